//! # Kernel
//!
//! The global scheduler instance and the public API for Krill.
//!
//! User code configures the kernel from `main`, then hands control over
//! for good; every call after `start()` is a supervisor-call trap into
//! the dispatcher.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init(low, high)   ← Adopt task memory, program SysTick,
//!         │                               set PendSV/SysTick to lowest priority
//!         ├─► kernel::add_task(...)     ← Carve tasks (×N)
//!         ├─► kernel::add_idle_task(..) ← Optional fallback task
//!         └─► kernel::start()           ← svc #0 (no return)
//!               └─► OS-start trampoline: enable the tick, dequeue the
//!                   first task, restore its context
//! ```

use crate::sched::Scheduler;
use crate::task::{TaskEntry, TaskRef};

#[cfg(all(target_arch = "arm", target_os = "none"))]
use crate::{arch, syscall::op};

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// The one and only scheduler.
///
/// # Safety
/// Accessed via `KERNEL_PTR`, which is set during `init()`. After
/// `start()` every access happens from exception context, where exception
/// priority serializes all mutation.
static mut KERNEL: Scheduler = Scheduler::new();

/// Raw pointer to the global scheduler, for the exception handlers.
///
/// # Safety
/// Set once during `init()`, read from exception context thereafter.
pub(crate) static mut KERNEL_PTR: *mut Scheduler = core::ptr::null_mut();

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Initialize the kernel with the task-memory region `[mem_low, mem_high)`.
///
/// Task control blocks and stacks are carved from this region, top-down.
/// On hardware this also programs the SysTick reload value (counting
/// stays disabled until `start`) and drops PendSV and SysTick to the
/// lowest exception priority.
///
/// Must be called exactly once, before any other kernel function.
pub fn init(mem_low: *mut u8, mem_high: *mut u8) {
    unsafe {
        KERNEL_PTR = core::ptr::addr_of_mut!(KERNEL);
        (*KERNEL_PTR).init(mem_low, mem_high);
    }
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        arch::init_hardware();
        defmt::debug!(
            "kernel: task memory {=usize:08x}..{=usize:08x}",
            mem_low as usize,
            mem_high as usize
        );
    }
}

/// Create a task with the given entry function and stack size (0 selects
/// the configured default) and append it to the ready queue.
///
/// Returns `None` when the task-memory region cannot hold another task;
/// the caller must check. The returned handle stays valid forever —
/// tasks are never destroyed.
pub fn add_task(entry: TaskEntry, stack_size: usize) -> Option<TaskRef> {
    debug_assert!(
        unsafe { !KERNEL_PTR.is_null() },
        "add_task before kernel::init"
    );
    let task = unsafe { (*KERNEL_PTR).create_task(entry, stack_size) };
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    match &task {
        Some(task) => defmt::debug!("kernel: task @ {=usize:08x}", task.as_ptr() as usize),
        None => defmt::warn!("kernel: task memory exhausted"),
    }
    task
}

/// Number of tasks created so far (the idle task not included).
pub fn task_count() -> usize {
    unsafe {
        if KERNEL_PTR.is_null() {
            0
        } else {
            (*KERNEL_PTR).task_count()
        }
    }
}

/// Current time in ticks. Wraps. Zero before `init`.
pub fn now() -> u32 {
    unsafe {
        if KERNEL_PTR.is_null() {
            0
        } else {
            (*KERNEL_PTR).ticks()
        }
    }
}

// ---------------------------------------------------------------------------
// Target-only API: everything below traps into the kernel or touches
// the interrupt mask, so it only exists on hardware.
// ---------------------------------------------------------------------------

/// Install an idle task that runs only when no other task can. It sleeps
/// the CPU between interrupts. Without one, an empty ready queue parks
/// the CPU in sleep-on-exit with the tick stopped.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn add_idle_task(stack_size: usize) -> Option<TaskRef> {
    extern "C" fn idle_body() -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
    unsafe { (*KERNEL_PTR).create_idle_task(idle_body, stack_size) }
}

/// Start multitasking. **Does not return.**
///
/// Resets the master stack to its linker-defined top, moves thread mode
/// onto the process stack, and issues `svc #0`; the OS-start trampoline
/// enables the tick and resumes the first task created.
///
/// `init()` must have been called and at least one task created.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start() -> ! {
    defmt::info!("kernel: starting, {=usize} tasks", task_count());
    arch::start()
}

/// Give up the rest of this time slice; the ready queue rotates.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn yield_now() {
    arch::syscall(op::RESCHEDULE, 0, 0);
}

/// Block until another task (or an ISR) signals this one.
///
/// Arms the task's signal latch: only a `signal()` issued after this
/// point releases it, and at most once.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn wait() {
    arch::syscall(op::WAIT, 0, 0);
}

/// Release `task` from a `wait()`. Dropped silently if the task has not
/// armed its latch — the rendezvous is edge-triggered. The released task
/// does not preempt the caller. ISR-safe.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn signal(task: TaskRef) {
    arch::syscall(op::SIGNAL, task.as_ptr() as usize, 0);
}

/// Busy-wait at least `ticks` scheduler ticks, yielding each lap.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn delay(ticks: u32) {
    let start = now();
    while now().wrapping_sub(start) <= ticks {
        yield_now();
    }
}

/// Suppress context switches until the matching `unlock`. Nests.
/// Interrupts stay enabled; a tick during the window leaves the current
/// task in place and the switch happens after release. ISR-safe.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn lock() {
    disable_irq();
    unsafe { (*KERNEL_PTR).lock_scheduler() };
    enable_irq();
}

/// Undo one `lock`; saturates at zero. Does not itself force a switch.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn unlock() {
    disable_irq();
    unsafe { (*KERNEL_PTR).unlock_scheduler() };
    enable_irq();
}

/// Mask interrupts globally. Nests; only the outermost call touches the
/// hardware mask. ISR-safe.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn disable_irq() {
    unsafe {
        if (*KERNEL_PTR).note_irq_disable() {
            arch::irq_mask();
        }
    }
}

/// Undo one `disable_irq`; the hardware unmasks on the outermost call,
/// followed by a pipeline-sync barrier. ISR-safe.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn enable_irq() {
    unsafe {
        if (*KERNEL_PTR).note_irq_enable() {
            arch::irq_unmask();
            arch::pipeline_sync();
        }
    }
}
