//! # Scheduler Core
//!
//! Central kernel state and the round-robin scheduling policy. All the
//! kernel's globals live in one zero-initialized [`Scheduler`] record
//! (stored as a `static` in `kernel.rs`) that is mutated only from
//! exception context; exception priority is the kernel's lock.
//!
//! ## Scheduling Algorithm
//!
//! Tasks of equal standing rotate in strict FIFO order:
//!
//! 1. Every SysTick (or any system call that needs one) pends the
//!    context-switch exception, which runs at the lowest priority.
//! 2. When that exception finally runs, `pick_for_switch` re-appends the
//!    current task to the ready queue (unless it blocked, or it is the
//!    idle task) and dequeues the new head.
//! 3. Only if the pick actually changed tasks does the handler move
//!    registers; the policy here returns decisions, the `arch` layer
//!    applies them.
//!
//! With no runnable task and no idle task configured, the kernel parks
//! the CPU in sleep-on-exit with the tick stopped, and resumes when an
//! interrupt makes a task ready again.

use crate::mem::TaskMemory;
use crate::task::{TaskEntry, TaskQueue, TaskRef};

// ---------------------------------------------------------------------------
// Switch policy results
// ---------------------------------------------------------------------------

/// Outcome of the context-switch policy, computed before any register
/// is touched.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SwitchDecision {
    /// The scheduler lock is held; leave everything alone. The pending
    /// switch is honored after the next unlock.
    Deferred,
    /// The same task was picked again; nothing to do.
    Unchanged,
    /// Move registers. `exit_sleep` is set when this switch leaves the
    /// tickless-sleep state and the tick must be restarted.
    Switch { exit_sleep: bool },
}

/// Where execution goes after the outgoing context has been saved.
pub enum Handoff {
    /// Restore the register frame at this address and resume.
    Resume(*mut u32),
    /// No runnable task: arm sleep-on-exit and stop the tick.
    Sleep,
}

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// The kernel's global state: ready queue, current/leaving task, tick
/// counter, lock nesting, and the task-memory allocator.
pub struct Scheduler {
    /// FIFO of runnable, not-running tasks.
    ready: TaskQueue,

    /// The task whose context the CPU is executing, if any.
    current: Option<TaskRef>,

    /// The task that was current when the in-flight switch began. Set
    /// only between the pick and the commit, so the commit knows which
    /// TCB receives the just-saved stack pointer.
    leaving: Option<TaskRef>,

    /// Fallback task used when the ready queue drains, if configured.
    /// Never placed on the ready queue.
    idle: Option<TaskRef>,

    /// Monotonic tick counter; wraps.
    ticks: u32,

    /// Context switches are suppressed while this is positive.
    lock_count: u32,

    /// Nesting depth of global interrupt masking.
    irq_disable_count: u32,

    /// Set while the CPU is parked in sleep-on-exit with no current task.
    sleeping: bool,

    /// Number of tasks created (the idle task not included).
    task_count: usize,

    /// Bump allocator for TCBs and stacks.
    mem: TaskMemory,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            ready: TaskQueue::new(),
            current: None,
            leaving: None,
            idle: None,
            ticks: 0,
            lock_count: 0,
            irq_disable_count: 0,
            sleeping: false,
            task_count: 0,
            mem: TaskMemory::empty(),
        }
    }

    /// Adopt the task-memory region `[low, high)`.
    pub fn init(&mut self, low: *mut u8, high: *mut u8) {
        self.mem.init(low, high);
    }

    // -----------------------------------------------------------------------
    // Task creation
    // -----------------------------------------------------------------------

    /// Carve a new task and append it to the ready queue.
    ///
    /// Returns `None` when the task-memory region is exhausted.
    pub fn create_task(&mut self, entry: TaskEntry, stack_size: usize) -> Option<TaskRef> {
        let task = self.mem.carve(entry, stack_size)?;
        self.ready.enqueue(task);
        self.task_count += 1;
        Some(task)
    }

    /// Carve the idle task. It occupies the detached idle slot instead of
    /// the ready queue and only runs when nothing else can.
    pub fn create_idle_task(&mut self, entry: TaskEntry, stack_size: usize) -> Option<TaskRef> {
        let task = self.mem.carve(entry, stack_size)?;
        self.idle = Some(task);
        Some(task)
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Called from the tick handler.
    pub fn advance_tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    // -----------------------------------------------------------------------
    // Switch policy
    // -----------------------------------------------------------------------

    pub fn current(&self) -> Option<TaskRef> {
        self.current
    }

    /// Rotate: re-append the current task if it is still runnable (the
    /// idle task never queues), then take the next head, falling back to
    /// the idle task when the queue is empty.
    fn pick_next(&mut self) {
        if let Some(current) = self.current {
            if !current.is_waiting() && self.idle != Some(current) {
                self.ready.enqueue(current);
            }
        }
        self.leaving = self.current;
        self.current = self.ready.dequeue();
        if self.current.is_none() {
            self.current = self.idle;
        }
    }

    /// First half of the context switch: decide whether one happens.
    /// The caller masks interrupts around this so the pick is atomic
    /// against tick-driven inspection.
    pub fn pick_for_switch(&mut self) -> SwitchDecision {
        if self.lock_count > 0 {
            return SwitchDecision::Deferred;
        }
        self.pick_next();
        if self.current == self.leaving {
            self.leaving = None;
            return SwitchDecision::Unchanged;
        }
        let exit_sleep = self.sleeping && self.current.is_some();
        if exit_sleep {
            self.sleeping = false;
        }
        SwitchDecision::Switch { exit_sleep }
    }

    /// Second half: record the saved stack pointer of the task that just
    /// left (absent when resuming from an empty-ready-queue sleep) and
    /// hand back the incoming frame, or park the CPU.
    pub fn commit_switch(&mut self, saved_psp: *mut u32) -> Handoff {
        if let Some(leaving) = self.leaving.take() {
            leaving.set_saved_psp(saved_psp);
        }
        match self.current {
            Some(task) => Handoff::Resume(task.saved_psp()),
            None => {
                self.sleeping = true;
                Handoff::Sleep
            }
        }
    }

    /// Dequeue the very first task at OS start.
    pub fn take_first_task(&mut self) -> Option<TaskRef> {
        self.current = self.ready.dequeue();
        if self.current.is_none() {
            self.current = self.idle;
        }
        self.current
    }

    // -----------------------------------------------------------------------
    // Dispatcher helpers
    // -----------------------------------------------------------------------

    /// Mark the current task blocked; the next pick skips it.
    pub fn block_current(&mut self) {
        debug_assert!(self.current.is_some(), "blocking call outside task context");
        if let Some(current) = self.current {
            current.set_waiting(true);
        }
    }

    /// Clear a task's blocked flag and append it to the ready queue.
    pub fn make_ready(&mut self, task: TaskRef) {
        task.set_waiting(false);
        self.ready.enqueue(task);
    }

    // -----------------------------------------------------------------------
    // Locks
    // -----------------------------------------------------------------------

    /// Suppress context switches. Nests.
    pub fn lock_scheduler(&mut self) {
        self.lock_count += 1;
    }

    /// Undo one `lock_scheduler`; saturates at zero. A deferred switch is
    /// honored at the next pended exception, not here.
    pub fn unlock_scheduler(&mut self) {
        self.lock_count = self.lock_count.saturating_sub(1);
    }

    /// Bump the interrupt-disable nesting depth. Returns true on the
    /// 0→1 edge, when the caller must actually mask.
    pub fn note_irq_disable(&mut self) -> bool {
        self.irq_disable_count += 1;
        self.irq_disable_count == 1
    }

    /// Drop the interrupt-disable nesting depth; saturates. Returns true
    /// on the 1→0 edge, when the caller must unmask.
    pub fn note_irq_enable(&mut self) -> bool {
        let was = self.irq_disable_count;
        self.irq_disable_count = was.saturating_sub(1);
        was == 1
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn spin() -> ! {
        loop {}
    }

    fn make_kernel(region: &mut [u8]) -> Scheduler {
        let mut kernel = Scheduler::new();
        let low = region.as_mut_ptr();
        kernel.init(low, unsafe { low.add(region.len()) });
        kernel
    }

    /// Drive one pended switch to completion, as the PendSV handler would.
    fn force_switch(kernel: &mut Scheduler) {
        let decision = kernel.pick_for_switch();
        assert!(
            matches!(decision, SwitchDecision::Switch { .. }),
            "expected a task change, got {:?}",
            decision
        );
        kernel.commit_switch(core::ptr::null_mut());
    }

    #[test]
    fn test_round_robin_rotation() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);

        let a = kernel.create_task(spin, 256).unwrap();
        let b = kernel.create_task(spin, 256).unwrap();
        let c = kernel.create_task(spin, 256).unwrap();

        assert_eq!(kernel.take_first_task(), Some(a));

        // two full laps of strict rotation
        for expected in [b, c, a, b, c, a] {
            force_switch(&mut kernel);
            assert_eq!(kernel.current(), Some(expected), "rotation must be strict FIFO");
        }
    }

    #[test]
    fn test_single_task_is_unchanged() {
        let mut region = [0u8; 1024];
        let mut kernel = make_kernel(&mut region);

        let a = kernel.create_task(spin, 256).unwrap();
        kernel.take_first_task();

        assert_eq!(kernel.pick_for_switch(), SwitchDecision::Unchanged);
        assert_eq!(kernel.current(), Some(a));
    }

    #[test]
    fn test_lock_defers_switch() {
        let mut region = [0u8; 1024];
        let mut kernel = make_kernel(&mut region);

        let a = kernel.create_task(spin, 200).unwrap();
        kernel.create_task(spin, 200).unwrap();
        kernel.take_first_task();

        kernel.lock_scheduler();
        for _ in 0..10 {
            assert_eq!(kernel.pick_for_switch(), SwitchDecision::Deferred);
            assert_eq!(kernel.current(), Some(a), "lock must pin the current task");
        }
        kernel.unlock_scheduler();

        force_switch(&mut kernel);
        assert_ne!(kernel.current(), Some(a), "first pick after unlock must rotate");
    }

    #[test]
    fn test_unlock_saturates() {
        let mut kernel = Scheduler::new();
        kernel.unlock_scheduler();
        kernel.lock_scheduler();
        kernel.unlock_scheduler();
        // a stray extra unlock above must not have left the count negative
        assert_eq!(kernel.pick_for_switch(), SwitchDecision::Unchanged);
    }

    #[test]
    fn test_blocked_task_leaves_rotation() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);

        let a = kernel.create_task(spin, 256).unwrap();
        let b = kernel.create_task(spin, 256).unwrap();
        let c = kernel.create_task(spin, 256).unwrap();

        assert_eq!(kernel.take_first_task(), Some(a));
        kernel.block_current();

        for expected in [b, c, b, c] {
            force_switch(&mut kernel);
            assert_eq!(kernel.current(), Some(expected), "blocked task must not rotate back in");
        }
        assert!(a.is_waiting());
    }

    #[test]
    fn test_idle_task_fallback() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);

        let a = kernel.create_task(spin, 256).unwrap();
        let idle = kernel.create_idle_task(spin, 256).unwrap();

        assert_eq!(kernel.take_first_task(), Some(a));
        kernel.block_current();

        force_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(idle), "empty ready queue must fall back to idle");

        // a readied task displaces idle, and idle is never re-queued
        kernel.make_ready(a);
        force_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(a));
        assert_eq!(kernel.pick_for_switch(), SwitchDecision::Unchanged);
    }

    #[test]
    fn test_sleep_and_wake_cycle() {
        let mut region = [0u8; 1024];
        let mut kernel = make_kernel(&mut region);

        let a = kernel.create_task(spin, 256).unwrap();
        assert_eq!(kernel.take_first_task(), Some(a));
        kernel.block_current();

        // no runnable task, no idle task: the switch parks the CPU
        assert_eq!(kernel.pick_for_switch(), SwitchDecision::Switch { exit_sleep: false });
        assert!(matches!(
            kernel.commit_switch(core::ptr::null_mut()),
            Handoff::Sleep
        ));
        assert_eq!(kernel.current(), None);

        // a re-pend while parked changes nothing
        assert_eq!(kernel.pick_for_switch(), SwitchDecision::Unchanged);

        // waking: the switch must restart the tick, and the leaving slot
        // is empty because the sleeper's context was saved on the way down
        kernel.make_ready(a);
        assert_eq!(kernel.pick_for_switch(), SwitchDecision::Switch { exit_sleep: true });
        assert!(matches!(
            kernel.commit_switch(core::ptr::null_mut()),
            Handoff::Resume(_)
        ));
        assert_eq!(kernel.current(), Some(a));
    }

    #[test]
    fn test_first_task_runs_from_its_own_stack() {
        let mut region = [0u8; 1024];
        let low = region.as_mut_ptr() as usize;
        let high = low + region.len();
        let mut kernel = make_kernel(&mut region);

        let f = kernel.create_task(spin, 256).unwrap();
        assert_eq!(kernel.take_first_task(), Some(f));

        let psp = f.saved_psp() as usize;
        assert!(psp > low && psp < high, "first task's frame must lie in its region");
    }

    #[test]
    fn test_irq_nesting_edges() {
        let mut kernel = Scheduler::new();

        assert!(kernel.note_irq_disable(), "0→1 must mask");
        assert!(!kernel.note_irq_disable(), "nested disable must not re-mask");
        assert!(!kernel.note_irq_enable(), "inner enable must not unmask");
        assert!(kernel.note_irq_enable(), "outermost enable must unmask");
        assert!(!kernel.note_irq_enable(), "saturated enable must stay quiet");
    }
}
