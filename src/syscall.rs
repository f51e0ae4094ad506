//! # System-Call Dispatch
//!
//! The kernel's entire mutation surface. User code traps with an `svc`
//! instruction carrying two parameters in R0/R1 and an operation code in
//! R2; the supervisor-call handler tail-calls into [`dispatch`] with
//! those three registers. Everything the dispatcher touches (queues,
//! TCB flags, event flag sets, mutex owners) is therefore only ever
//! mutated at supervisor-call priority, and — because the tick and the
//! context-switch exception sit strictly below it — needs no locking.
//!
//! A request is decoded once into a [`Request`] value and handled by a
//! single `match`; there is no handler table and no dynamic dispatch.
//!
//! Non-blocking operations (SIGNAL, SIGNAL_EVENT) never touch the
//! current task and are safe to invoke from interrupt handlers.

use crate::config::EVENT_FLAG_LIMIT;
use crate::sched::Scheduler;
use crate::sync::{Event, Mutex};
use crate::task::{TaskRef, Tcb};
use core::ptr::NonNull;

// ---------------------------------------------------------------------------
// Operation codes
// ---------------------------------------------------------------------------

/// Operation codes passed in R2. Zero is never a code: the SVC immediate
/// zero is reserved for OS start.
pub mod op {
    pub const WAIT: usize = 1;
    pub const SIGNAL: usize = 2;
    pub const RESCHEDULE: usize = 3;
    pub const EVENT_SIGNAL: usize = 4;
    pub const EVENT_WAIT: usize = 5;
    pub const EVENT_RESUME: usize = 6;
    pub const MUTEX_QUEUE: usize = 7;
    pub const MUTEX_UNQUEUE: usize = 8;
    pub const MUTEX_TRY: usize = 9;
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One decoded kernel request.
pub enum Request {
    /// Arm the current task's signal latch and block it.
    Wait,
    /// Release a task parked in `Wait`; dropped if the latch is not armed.
    Signal(TaskRef),
    /// Rotate the ready queue.
    Reschedule,
    /// Raise one event flag and wake one waiter.
    EventSignal(NonNull<Event>, u32),
    /// Block on an event unless flags are already pending.
    EventWait(NonNull<Event>),
    /// Read-and-clear an event's flag set into `*out`.
    EventResume(NonNull<Event>, NonNull<u32>),
    /// Take a mutex, blocking while it is owned.
    MutexQueue(NonNull<Mutex>),
    /// Hand a mutex to the next waiter, if any.
    MutexUnqueue(NonNull<Mutex>),
    /// Take a mutex if free; writes 1 or 0 into `*out`. Never blocks.
    MutexTry(NonNull<Mutex>, NonNull<u32>),
}

impl Request {
    /// Decode the three system-call registers. `None` means the caller
    /// passed an unknown code or a null object pointer.
    pub fn decode(arg0: usize, arg1: usize, code: usize) -> Option<Request> {
        let request = match code {
            op::WAIT => Request::Wait,
            op::SIGNAL => Request::Signal(unsafe { TaskRef::from_raw(arg0 as *mut Tcb) }?),
            op::RESCHEDULE => Request::Reschedule,
            op::EVENT_SIGNAL => {
                Request::EventSignal(NonNull::new(arg0 as *mut Event)?, arg1 as u32)
            }
            op::EVENT_WAIT => Request::EventWait(NonNull::new(arg0 as *mut Event)?),
            op::EVENT_RESUME => Request::EventResume(
                NonNull::new(arg0 as *mut Event)?,
                NonNull::new(arg1 as *mut u32)?,
            ),
            op::MUTEX_QUEUE => Request::MutexQueue(NonNull::new(arg0 as *mut Mutex)?),
            op::MUTEX_UNQUEUE => Request::MutexUnqueue(NonNull::new(arg0 as *mut Mutex)?),
            op::MUTEX_TRY => Request::MutexTry(
                NonNull::new(arg0 as *mut Mutex)?,
                NonNull::new(arg1 as *mut u32)?,
            ),
            _ => return None,
        };
        Some(request)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Apply one request to the kernel state. Returns true when the
/// context-switch exception should be pended afterwards.
pub fn dispatch(kernel: &mut Scheduler, request: Request) -> bool {
    match request {
        Request::Wait => {
            if let Some(current) = kernel.current() {
                current.set_signal_armed(true);
            }
            kernel.block_current();
            true
        }

        Request::Signal(task) => {
            // edge-triggered rendezvous: a signal for a task that has not
            // armed a wait is dropped, and at most one release per wait
            if task.signal_armed() {
                task.set_signal_armed(false);
                kernel.make_ready(task);
            }
            // the signalled task does not preempt the signaller
            false
        }

        Request::Reschedule => true,

        Request::EventSignal(event, flag) => {
            debug_assert!(flag < EVENT_FLAG_LIMIT, "event flag index out of range");
            let state = unsafe { event.as_ref().state() };
            state.flags |= 1u32.wrapping_shl(flag);
            if let Some(waiter) = state.waiters.dequeue() {
                kernel.make_ready(waiter);
            }
            false
        }

        Request::EventWait(event) => {
            let state = unsafe { event.as_ref().state() };
            if state.flags != 0 {
                // already signalled: do not block, do not re-order; the
                // caller drains the flags with EventResume
                return false;
            }
            kernel.block_current();
            if let Some(current) = kernel.current() {
                state.waiters.enqueue(current);
            }
            true
        }

        Request::EventResume(event, out) => {
            let state = unsafe { event.as_ref().state() };
            unsafe { out.as_ptr().write(state.flags) };
            state.flags = 0;
            false
        }

        Request::MutexQueue(mutex) => {
            let state = unsafe { mutex.as_ref().state() };
            if state.owner.is_none() {
                state.owner = kernel.current();
                false
            } else {
                kernel.block_current();
                if let Some(current) = kernel.current() {
                    state.waiters.enqueue(current);
                }
                true
            }
        }

        Request::MutexUnqueue(mutex) => {
            // contract: only the owner releases; not checked
            let state = unsafe { mutex.as_ref().state() };
            state.owner = state.waiters.dequeue();
            match state.owner {
                Some(next) => {
                    kernel.make_ready(next);
                    true
                }
                None => false,
            }
        }

        Request::MutexTry(mutex, out) => {
            let state = unsafe { mutex.as_ref().state() };
            let acquired = state.owner.is_none();
            if acquired {
                state.owner = kernel.current();
            }
            unsafe { out.as_ptr().write(acquired as u32) };
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::SwitchDecision;

    extern "C" fn spin() -> ! {
        loop {}
    }

    fn make_kernel(region: &mut [u8]) -> Scheduler {
        let mut kernel = Scheduler::new();
        let low = region.as_mut_ptr();
        kernel.init(low, unsafe { low.add(region.len()) });
        kernel
    }

    /// Run the pended context switch, as the hardware would after a
    /// dispatch that returned true.
    fn run_switch(kernel: &mut Scheduler) {
        if let SwitchDecision::Switch { .. } = kernel.pick_for_switch() {
            kernel.commit_switch(core::ptr::null_mut());
        }
    }

    fn event_ptr(event: &Event) -> NonNull<Event> {
        NonNull::new(event as *const Event as *mut Event).unwrap()
    }

    fn mutex_ptr(mutex: &Mutex) -> NonNull<Mutex> {
        NonNull::new(mutex as *const Mutex as *mut Mutex).unwrap()
    }

    #[test]
    fn test_decode_rejects_unknown_and_null() {
        assert!(Request::decode(0, 0, 99).is_none(), "unknown op must not decode");
        assert!(Request::decode(0, 0, op::SIGNAL).is_none(), "null task must not decode");
        assert!(Request::decode(0, 0, op::EVENT_WAIT).is_none());
        assert!(Request::decode(0, 0, op::WAIT).is_some());
    }

    #[test]
    fn test_signal_before_wait_is_lost() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        kernel.create_task(spin, 256).unwrap();
        kernel.take_first_task();

        // a never armed a wait: the signal must coalesce to nothing
        assert!(!dispatch(&mut kernel, Request::Signal(a)));
        assert!(!a.signal_armed());
        assert!(!a.is_waiting());
    }

    #[test]
    fn test_wait_blocks_until_signalled() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        let b = kernel.create_task(spin, 256).unwrap();

        assert_eq!(kernel.take_first_task(), Some(a));

        assert!(dispatch(&mut kernel, Request::Wait), "WAIT must request a switch");
        assert!(a.is_waiting());
        assert!(a.signal_armed());
        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(b));

        // b releases a; b keeps running until the next tick
        assert!(!dispatch(&mut kernel, Request::Signal(a)));
        assert!(!a.is_waiting());
        assert!(!a.signal_armed());
        assert_eq!(kernel.current(), Some(b));

        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(a), "released task must rotate back in");
    }

    #[test]
    fn test_ping_pong_rendezvous() {
        // A loops: signal(B); wait().  B loops: wait(); signal(A).
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        let b = kernel.create_task(spin, 256).unwrap();

        assert_eq!(kernel.take_first_task(), Some(a));

        // a's very first signal(B) fires before b has armed a wait and is
        // dropped; from then on the pair stays in lock-step
        for _ in 0..4 {
            // a runs: signal(B) then wait()
            assert_eq!(kernel.current(), Some(a));
            dispatch(&mut kernel, Request::Signal(b));
            dispatch(&mut kernel, Request::Wait);
            run_switch(&mut kernel);

            // exactly one of the pair holds an armed latch at any moment
            assert!(a.signal_armed() ^ b.signal_armed());

            // b runs: its wait() was already satisfied, so it signals back
            // and waits again
            assert_eq!(kernel.current(), Some(b));
            dispatch(&mut kernel, Request::Signal(a));
            dispatch(&mut kernel, Request::Wait);
            run_switch(&mut kernel);
        }
    }

    #[test]
    fn test_event_flags_coalesce() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);
        let waiter = kernel.create_task(spin, 256).unwrap();
        let producer = kernel.create_task(spin, 256).unwrap();
        let event = Event::new();

        assert_eq!(kernel.take_first_task(), Some(waiter));

        // waiter blocks on the empty flag set
        assert!(dispatch(&mut kernel, Request::EventWait(event_ptr(&event))));
        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(producer));

        // producer raises 0, 3, 0, 7 before the waiter resumes
        for flag in [0, 3, 0, 7] {
            dispatch(&mut kernel, Request::EventSignal(event_ptr(&event), flag));
        }
        assert!(!waiter.is_waiting(), "first signal must wake the waiter");

        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(waiter));

        // the waiter drains the accumulated set in one read-and-clear
        let mut flags = 0u32;
        dispatch(
            &mut kernel,
            Request::EventResume(event_ptr(&event), NonNull::from(&mut flags)),
        );
        assert_eq!(flags, 0x89, "returned flags must be the OR of all signals");
        assert_eq!(event.pending(), 0, "flags must be cleared on resume");
    }

    #[test]
    fn test_event_wait_with_pending_flags_does_not_block() {
        let mut region = [0u8; 1024];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        let event = Event::new();

        kernel.take_first_task();
        dispatch(&mut kernel, Request::EventSignal(event_ptr(&event), 5));

        assert!(
            !dispatch(&mut kernel, Request::EventWait(event_ptr(&event))),
            "pending flags must satisfy the wait immediately"
        );
        assert!(!a.is_waiting());

        let mut flags = 0u32;
        dispatch(
            &mut kernel,
            Request::EventResume(event_ptr(&event), NonNull::from(&mut flags)),
        );
        assert_eq!(flags, 1 << 5);
    }

    #[test]
    fn test_event_wakes_waiters_in_fifo_order() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        let b = kernel.create_task(spin, 256).unwrap();
        kernel.create_task(spin, 256).unwrap();
        let event = Event::new();

        assert_eq!(kernel.take_first_task(), Some(a));
        dispatch(&mut kernel, Request::EventWait(event_ptr(&event)));
        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(b));
        dispatch(&mut kernel, Request::EventWait(event_ptr(&event)));
        run_switch(&mut kernel);

        dispatch(&mut kernel, Request::EventSignal(event_ptr(&event), 0));
        assert!(!a.is_waiting(), "first waiter must wake first");
        assert!(b.is_waiting());

        dispatch(&mut kernel, Request::EventSignal(event_ptr(&event), 1));
        assert!(!b.is_waiting());
    }

    #[test]
    fn test_mutex_uncontended_acquire_release() {
        let mut region = [0u8; 1024];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        let mutex = Mutex::new();

        kernel.take_first_task();

        assert!(!dispatch(&mut kernel, Request::MutexQueue(mutex_ptr(&mutex))));
        assert_eq!(unsafe { mutex.state() }.owner, Some(a));

        assert!(!dispatch(&mut kernel, Request::MutexUnqueue(mutex_ptr(&mutex))));
        assert_eq!(unsafe { mutex.state() }.owner, None);
    }

    #[test]
    fn test_mutex_contention_is_fifo() {
        // Three tasks acquire in the cyclic order A, B, C; ownership must
        // hand over in exactly that order
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        let b = kernel.create_task(spin, 256).unwrap();
        let c = kernel.create_task(spin, 256).unwrap();
        let mutex = Mutex::new();

        assert_eq!(kernel.take_first_task(), Some(a));
        assert!(!dispatch(&mut kernel, Request::MutexQueue(mutex_ptr(&mutex))));

        // b and c pile up behind a
        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(b));
        assert!(dispatch(&mut kernel, Request::MutexQueue(mutex_ptr(&mutex))));
        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(c));
        assert!(dispatch(&mut kernel, Request::MutexQueue(mutex_ptr(&mutex))));
        run_switch(&mut kernel);

        // the owner is single-valued at every hand-over point
        assert_eq!(unsafe { mutex.state() }.owner, Some(a));
        assert!(dispatch(&mut kernel, Request::MutexUnqueue(mutex_ptr(&mutex))));
        assert_eq!(unsafe { mutex.state() }.owner, Some(b));
        assert!(!b.is_waiting());
        assert!(c.is_waiting(), "c must still be parked behind b");

        assert!(dispatch(&mut kernel, Request::MutexUnqueue(mutex_ptr(&mutex))));
        assert_eq!(unsafe { mutex.state() }.owner, Some(c));

        assert!(!dispatch(&mut kernel, Request::MutexUnqueue(mutex_ptr(&mutex))));
        assert_eq!(unsafe { mutex.state() }.owner, None);
    }

    #[test]
    fn test_mutex_try_never_blocks() {
        let mut region = [0u8; 2048];
        let mut kernel = make_kernel(&mut region);
        let a = kernel.create_task(spin, 256).unwrap();
        let b = kernel.create_task(spin, 256).unwrap();
        let mutex = Mutex::new();

        assert_eq!(kernel.take_first_task(), Some(a));

        let mut out = 7u32;
        dispatch(
            &mut kernel,
            Request::MutexTry(mutex_ptr(&mutex), NonNull::from(&mut out)),
        );
        assert_eq!(out, 1);
        assert_eq!(unsafe { mutex.state() }.owner, Some(a));

        run_switch(&mut kernel);
        assert_eq!(kernel.current(), Some(b));

        let mut out = 7u32;
        dispatch(
            &mut kernel,
            Request::MutexTry(mutex_ptr(&mutex), NonNull::from(&mut out)),
        );
        assert_eq!(out, 0, "a held mutex must fail the try");
        assert!(!b.is_waiting(), "a failed try must not block");
        assert_eq!(unsafe { mutex.state() }.owner, Some(a));
    }
}
