//! # Shared Cortex-M Plumbing
//!
//! System-register access and the Rust halves of the exception handlers.
//! The architectural register layout is identical on v6-M and v7-M, so
//! everything here is profile-independent; only the naked trampolines in
//! `v6m`/`v7m` differ.
//!
//! ## Exception Priorities
//!
//! - SVCall: priority 0 (reset default) — the dispatcher runs above the
//!   tick and the switcher, so kernel state never needs a lock.
//! - SysTick: 0xFF (lowest).
//! - PendSV: 0xFF (lowest) — the context switch runs only when every
//!   other handler has finished, and the two cannot preempt each other.

use crate::config::SYSTICK_RELOAD;
use crate::kernel::KERNEL_PTR;
use crate::sched::{Handoff, SwitchDecision};
use crate::syscall::{self, Request};

// ---------------------------------------------------------------------------
// System registers (architectural addresses, v6-M and v7-M alike)
// ---------------------------------------------------------------------------

/// SCB Interrupt Control and State Register.
const SCB_ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
/// SCB System Control Register.
const SCB_SCR: *mut u32 = 0xE000_ED10 as *mut u32;
/// SCB System Handler Priority Register 3 (PendSV, SysTick).
const SCB_SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;
/// SysTick Control and Status Register.
const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
/// SysTick Reload Value Register.
const SYST_RVR: *mut u32 = 0xE000_E014 as *mut u32;
/// SysTick Current Value Register.
const SYST_CVR: *mut u32 = 0xE000_E018 as *mut u32;

/// ICSR: write 1 to pend PendSV.
const ICSR_PENDSVSET: u32 = 1 << 28;
/// SCR: sleep when returning from handler to thread mode.
const SCR_SLEEPONEXIT: u32 = 1 << 1;

const CSR_ENABLE: u32 = 1 << 0;
const CSR_TICKINT: u32 = 1 << 1;
const CSR_CLKSOURCE: u32 = 1 << 2;

/// Top of the master stack, placed by the linker script.
unsafe extern "C" {
    static _stack_start: u32;
}

// ---------------------------------------------------------------------------
// Register helpers
// ---------------------------------------------------------------------------

/// Pend the context-switch exception. It runs once every handler at a
/// higher priority has returned.
pub(crate) fn trigger_pendsv() {
    unsafe { SCB_ICSR.write_volatile(ICSR_PENDSVSET) }
}

/// Program SysTick (reload, core clock, interrupt armed, counting
/// disabled) and drop PendSV/SysTick to the lowest priority. Called from
/// `kernel::init`; the tick starts counting in the OS-start trampoline.
pub(crate) fn init_hardware() {
    unsafe {
        // SHPR3 bits [23:16] = PendSV, [31:24] = SysTick
        let shpr3 = SCB_SHPR3.read_volatile() | (0xFF << 16) | (0xFF << 24);
        SCB_SHPR3.write_volatile(shpr3);

        SYST_RVR.write_volatile(SYSTICK_RELOAD);
        SYST_CVR.write_volatile(0);
        SYST_CSR.write_volatile(CSR_CLKSOURCE | CSR_TICKINT);
    }
}

fn systick_run(on: bool) {
    unsafe {
        let csr = SYST_CSR.read_volatile();
        SYST_CSR.write_volatile(if on { csr | CSR_ENABLE } else { csr & !CSR_ENABLE });
    }
}

/// Park the CPU: sleep as soon as the exception returns, with the tick
/// stopped so only a real interrupt wakes it.
fn enter_sleep_mode() {
    unsafe {
        let scr = SCB_SCR.read_volatile();
        SCB_SCR.write_volatile(scr | SCR_SLEEPONEXIT);
    }
    systick_run(false);
}

fn exit_sleep_mode() {
    unsafe {
        let scr = SCB_SCR.read_volatile();
        SCB_SCR.write_volatile(scr & !SCR_SLEEPONEXIT);
    }
    systick_run(true);
}

pub(crate) fn irq_mask() {
    cortex_m::interrupt::disable();
}

pub(crate) fn irq_unmask() {
    // Safety: paired with irq_mask by the nesting counter in the kernel
    unsafe { cortex_m::interrupt::enable() };
}

pub(crate) fn pipeline_sync() {
    cortex_m::asm::isb();
}

// ---------------------------------------------------------------------------
// Kernel entry
// ---------------------------------------------------------------------------

/// One trap into the kernel: parameters in R0/R1, operation code in R2.
/// The immediate 1 marks a dispatch (0 is reserved for OS start).
pub(crate) fn syscall(code: usize, arg0: usize, arg1: usize) {
    unsafe {
        core::arch::asm!(
            "svc 1",
            in("r0") arg0,
            in("r1") arg1,
            in("r2") code,
        );
    }
}

/// Hand the CPU to the kernel. Resets the MSP to the linker-defined top,
/// gives thread mode a scratch frame on the process stack, and traps with
/// immediate 0; the OS-start trampoline never returns here.
///
/// Thread mode stays privileged (CONTROL = 0b10): tasks must be able to
/// toggle the interrupt mask.
pub(crate) fn start() -> ! {
    let msp_top = unsafe { core::ptr::addr_of!(_stack_start) } as usize as u32;
    unsafe {
        core::arch::asm!(
            "msr msp, r0",
            "subs r0, #32",
            "msr psp, r0",
            "msr control, r1",
            "isb",
            "svc 0",
            in("r0") msp_top,
            in("r1") 2u32, // SPSEL: thread mode on PSP, still privileged
            options(noreturn),
        );
    }
}

// ---------------------------------------------------------------------------
// Rust halves of the exception handlers
// ---------------------------------------------------------------------------

/// SysTick: count time and force a round-robin rotation.
#[unsafe(no_mangle)]
extern "C" fn SysTick() {
    unsafe { (*KERNEL_PTR).advance_tick() };
    trigger_pendsv();
}

/// Dispatcher entry, tail-called from the SVCall trampoline with the
/// caller's stacked R0, R1, R2. Returning from here is the exception
/// return.
pub(super) extern "C" fn svc_dispatch(arg0: usize, arg1: usize, code: usize) {
    let kernel = unsafe { &mut *KERNEL_PTR };
    match Request::decode(arg0, arg1, code) {
        Some(request) => {
            if syscall::dispatch(kernel, request) {
                trigger_pendsv();
            }
        }
        None => debug_assert!(false, "unknown system call {}", code),
    }
}

/// First half of the PendSV handler: decide whether a switch happens.
/// Returns nonzero when the trampoline must move registers. Interrupts
/// are masked across the pick so it is atomic against the tick.
pub(super) extern "C" fn pendsv_pick() -> u32 {
    let kernel = unsafe { &mut *KERNEL_PTR };
    irq_mask();
    let decision = kernel.pick_for_switch();
    irq_unmask();
    match decision {
        SwitchDecision::Deferred | SwitchDecision::Unchanged => 0,
        SwitchDecision::Switch { exit_sleep } => {
            if exit_sleep {
                exit_sleep_mode();
            }
            1
        }
    }
}

/// Second half: `saved_psp` is the outgoing frame the trampoline just
/// stored. Returns the incoming frame to restore, or null to park the
/// CPU (the trampoline then skips the restore and sleeps on exit).
pub(super) extern "C" fn pendsv_commit(saved_psp: *mut u32) -> *mut u32 {
    let kernel = unsafe { &mut *KERNEL_PTR };
    match kernel.commit_switch(saved_psp) {
        Handoff::Resume(psp) => psp,
        Handoff::Sleep => {
            enter_sleep_mode();
            core::ptr::null_mut()
        }
    }
}

/// Tail of the OS-start trampoline: start the tick, dequeue the first
/// task, and hand its frame back for the restore.
pub(super) extern "C" fn start_first_task() -> *mut u32 {
    let kernel = unsafe { &mut *KERNEL_PTR };
    systick_run(true);
    match kernel.take_first_task() {
        Some(task) => {
            defmt::debug!("kernel: first task @ {=usize:08x}", task.as_ptr() as usize);
            task.saved_psp()
        }
        None => panic!("start() with no task created"),
    }
}
