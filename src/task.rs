//! # Task Control Blocks and Task Queues
//!
//! Defines the task model for Krill. Each task owns a control block (TCB)
//! carved out of the task-memory region together with its stack. TCBs are
//! never freed and never move, so the rest of the kernel refers to them
//! through stable [`TaskRef`] handles with program lifetime.
//!
//! Tasks migrate between the scheduler's queues through the intrusive
//! `next` link: a task is in at most one queue at any moment, and the
//! queues themselves are just `(head, tail)` pairs — no per-node
//! allocation, no counters.
//!
//! ## Task State Machine
//!
//! ```text
//!   ┌──────────┐     pick-next       ┌─────────┐
//!   │  Ready   │ ──────────────────► │ Running │
//!   └──────────┘                     └─────────┘
//!        ▲                                │
//!        │     tick / RESCHEDULE          │
//!        └───────────────────────────────┘
//!        │                                │
//!        │   SIGNAL / SIGNAL_EVENT /      │ WAIT / WAIT_EVENT /
//!        │   UNQUEUE_MUTEX                ▼ QUEUE_MUTEX (owned)
//!        │                          ┌──────────┐
//!        └───────────────────────── │ Blocked  │
//!                                   └──────────┘
//! ```
//!
//! There is no state field: "Running" is being the scheduler's current
//! task, "Ready" is sitting on the ready queue, and "Blocked" is the
//! `wait` flag being set (the task is then either on a primitive's wait
//! queue or parked on its own signal latch).

use core::ptr::NonNull;

/// The function signature for task entry points. Tasks run forever and
/// take no arguments.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB) — the per-task record the kernel keeps.
///
/// Lives at the low end of the task's carved memory block, immediately
/// below the stack. Zero-initialized by the allocator; all fields have a
/// meaningful all-zeroes state.
#[repr(C)]
pub struct Tcb {
    /// Saved process stack pointer. While the task is suspended this is
    /// the address of its software-saved register frame; the PendSV
    /// handler reads and writes it during context switches.
    pub(crate) psp: *mut u32,

    /// Next task in whichever queue currently holds this task.
    pub(crate) next: Option<TaskRef>,

    /// Wait/signal rendezvous latch. Set when the task arms a `wait()`;
    /// cleared by the `signal()` that releases it.
    pub(crate) signal: bool,

    /// Blocked flag. Set exactly when the task is neither running nor on
    /// the ready queue (the idle task excepted).
    pub(crate) wait: bool,
}

impl Tcb {
    /// An inert TCB, equal to the zero-filled state the allocator produces.
    pub const fn empty() -> Self {
        Self {
            psp: core::ptr::null_mut(),
            next: None,
            signal: false,
            wait: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Task references
// ---------------------------------------------------------------------------

/// Stable handle to a task.
///
/// Points at a [`Tcb`] inside the task-memory region. Tasks are never
/// destroyed, so the handle is valid for the lifetime of the program and
/// may be freely copied and shared; all mutation behind it happens in
/// kernel exception context, which is serialized by exception priority.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TaskRef(NonNull<Tcb>);

// Safety: a TaskRef is only a stable address. The kernel mutates the TCB
// it points to exclusively from exception context on a single core.
unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

impl TaskRef {
    /// Wrap a raw TCB pointer.
    ///
    /// # Safety
    /// `tcb` must point to a live, never-moving [`Tcb`] (one carved from
    /// the task-memory region, or a test fixture outliving the handle).
    pub unsafe fn from_raw(tcb: *mut Tcb) -> Option<TaskRef> {
        NonNull::new(tcb).map(TaskRef)
    }

    /// The raw TCB address, e.g. for stashing a handle in an `AtomicPtr`.
    pub fn as_ptr(self) -> *mut Tcb {
        self.0.as_ptr()
    }

    pub(crate) fn saved_psp(self) -> *mut u32 {
        unsafe { (*self.0.as_ptr()).psp }
    }

    pub(crate) fn set_saved_psp(self, psp: *mut u32) {
        unsafe { (*self.0.as_ptr()).psp = psp }
    }

    pub(crate) fn is_waiting(self) -> bool {
        unsafe { (*self.0.as_ptr()).wait }
    }

    pub(crate) fn set_waiting(self, wait: bool) {
        unsafe { (*self.0.as_ptr()).wait = wait }
    }

    pub(crate) fn signal_armed(self) -> bool {
        unsafe { (*self.0.as_ptr()).signal }
    }

    pub(crate) fn set_signal_armed(self, armed: bool) {
        unsafe { (*self.0.as_ptr()).signal = armed }
    }

    fn next(self) -> Option<TaskRef> {
        unsafe { (*self.0.as_ptr()).next }
    }

    fn set_next(self, next: Option<TaskRef>) {
        unsafe { (*self.0.as_ptr()).next = next }
    }
}

// ---------------------------------------------------------------------------
// Task queues
// ---------------------------------------------------------------------------

/// Intrusive singly-linked FIFO of tasks.
///
/// Used for the ready queue and for every primitive's wait queue. A task
/// is on at most one queue at a time, so the single `next` link in the
/// TCB suffices.
///
/// `tail` is deliberately left stale when the queue drains: emptiness is
/// defined by `head` alone, and `tail` must never be read while `head`
/// is absent.
pub(crate) struct TaskQueue {
    head: Option<TaskRef>,
    tail: Option<TaskRef>,
}

impl TaskQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append `task` at the tail.
    pub(crate) fn enqueue(&mut self, task: TaskRef) {
        task.set_next(None);
        match self.head {
            None => self.head = Some(task),
            Some(_) => {
                debug_assert!(self.tail.is_some(), "non-empty queue without a tail");
                if let Some(tail) = self.tail {
                    tail.set_next(Some(task));
                }
            }
        }
        self.tail = Some(task);
    }

    /// Remove and return the head, if any.
    pub(crate) fn dequeue(&mut self) -> Option<TaskRef> {
        let task = self.head?;
        self.head = task.next();
        // tail stays stale when the queue drains; head gates all access
        task.set_next(None);
        Some(task)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
