//! # Task-Memory Allocator
//!
//! Carves task control blocks and stacks out of a fixed memory region
//! handed to the kernel at `init`. Allocation is a downward bump: each
//! task takes a block from the current top, with the TCB at the low end
//! and the stack growing down from the high end. Blocks are never freed.
//!
//! ## Block Layout (top = high address)
//!
//! ```text
//!   old top ──────────────►┌────────────────────┐
//!                          │ initial frame      │ 16 words
//!                          │   xPSR (Thumb bit) │
//!                          │   PC (task entry)  │
//!                          │   LR,R12,R3..R0    │
//!                          │   R11..R4          │◄─ tcb.psp
//!                          ├────────────────────┤
//!                          │ stack (grows down) │
//!                          ├────────────────────┤
//!                          │ TCB                │
//!   new top ──────────────►└────────────────────┘
//! ```
//!
//! The initial frame makes a brand-new task look exactly like one that
//! was preempted just before its first instruction, so the first context
//! restore "returns" into the entry function.

use crate::config::DEFAULT_STACK_SIZE;
use crate::task::{TaskEntry, TaskRef, Tcb};

/// Words in a freshly prepared context frame: eight hardware-stacked
/// registers (R0–R3, R12, LR, PC, xPSR) plus eight software-saved ones
/// (R4–R11).
pub(crate) const FRAME_WORDS: usize = 16;

/// Index of the PC slot within the initial frame.
const FRAME_PC: usize = 14;

/// Index of the xPSR slot within the initial frame.
const FRAME_XPSR: usize = 15;

/// xPSR for a new task: only the Thumb bit. Without it the first
/// exception return into the task hard-faults.
const INITIAL_XPSR: u32 = 0x0100_0000;

/// The task-memory region and its bump pointer.
pub(crate) struct TaskMemory {
    /// Current top of free memory; always above `limit`.
    top: *mut u8,
    /// Lower bound of the region; allocation fails rather than cross it.
    limit: *mut u8,
}

impl TaskMemory {
    pub(crate) const fn empty() -> Self {
        Self {
            top: core::ptr::null_mut(),
            limit: core::ptr::null_mut(),
        }
    }

    /// Adopt the region `[low, high)`. The top is rounded down so every
    /// carved stack top is 8-aligned (AAPCS).
    pub(crate) fn init(&mut self, low: *mut u8, high: *mut u8) {
        self.top = ((high as usize) & !7) as *mut u8;
        self.limit = low;
    }

    /// Carve one task: control block, stack, and initial context frame.
    ///
    /// `stack_size` is the usable stack in bytes (0 selects
    /// [`DEFAULT_STACK_SIZE`]); it is rounded up to a word multiple, and
    /// the whole block to 8 bytes. Returns `None` when the region is
    /// exhausted — the only error this allocator can produce.
    pub(crate) fn carve(&mut self, entry: TaskEntry, stack_size: usize) -> Option<TaskRef> {
        let stack_size = if stack_size == 0 {
            DEFAULT_STACK_SIZE
        } else {
            (stack_size + 3) & !3
        };
        let block = (stack_size + core::mem::size_of::<Tcb>() + 7) & !7;

        let old_top = self.top;
        let new_top = (old_top as usize).checked_sub(block)?;
        if new_top <= self.limit as usize {
            return None;
        }
        self.top = new_top as *mut u8;

        unsafe {
            // zero the block: a zeroed Tcb is a valid idle one, and tasks
            // get a clean stack
            core::ptr::write_bytes(self.top, 0, block);

            // initial context frame at the high end of the stack
            let frame = (old_top as *mut u32).sub(FRAME_WORDS);
            frame.add(FRAME_PC).write(entry as usize as u32);
            frame.add(FRAME_XPSR).write(INITIAL_XPSR);

            let tcb = self.top as *mut Tcb;
            (*tcb).psp = frame;
            TaskRef::from_raw(tcb)
        }
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

    fn region_memory<const N: usize>() -> [u8; N] {
        [0xAA; N]
    }

    fn init_over<const N: usize>(region: &mut [u8; N]) -> TaskMemory {
        let mut mem = TaskMemory::empty();
        let low = region.as_mut_ptr();
        mem.init(low, unsafe { low.add(N) });
        mem
    }

    #[test]
    fn test_exhaustion_after_two_tasks() {
        // 512-byte region, 200-byte stacks: two fit, the third must fail
        let mut region = region_memory::<512>();
        let mut mem = init_over(&mut region);

        assert!(mem.carve(spin, 200).is_some());
        assert!(mem.carve(spin, 200).is_some());
        assert!(
            mem.carve(spin, 200).is_none(),
            "third task must be refused, not overlap the limit"
        );
    }

    #[test]
    fn test_zero_size_selects_default() {
        let mut big = region_memory::<4096>();
        let mut mem = init_over(&mut big);
        assert!(mem.carve(spin, 0).is_some());

        // a region smaller than the default stack cannot hold one
        let mut small = region_memory::<512>();
        let mut mem = init_over(&mut small);
        assert!(mem.carve(spin, 0).is_none());
    }

    #[test]
    fn test_initial_frame_layout() {
        let mut region = region_memory::<1024>();
        let mut mem = init_over(&mut region);
        let aligned_top = (region.as_ptr() as usize + 1024) & !7;

        let task = mem.carve(spin, 256).unwrap();
        let frame = task.saved_psp();

        assert_eq!(
            frame as usize,
            aligned_top - FRAME_WORDS * 4,
            "frame must sit at the high end of the stack"
        );
        assert_eq!(frame as usize % 8, 0, "saved stack pointer must be 8-aligned");

        unsafe {
            assert_eq!(frame.add(14).read(), spin as usize as u32, "PC slot");
            assert_eq!(frame.add(15).read(), 0x0100_0000, "xPSR slot: Thumb bit only");
            for slot in 0..14 {
                assert_eq!(frame.add(slot).read(), 0, "register slot {} not zeroed", slot);
            }
        }
    }

    #[test]
    fn test_control_block_zeroed() {
        let mut region = region_memory::<1024>();
        let mut mem = init_over(&mut region);

        let task = mem.carve(spin, 256).unwrap();
        let tcb = task.as_ptr();
        unsafe {
            assert!(!(*tcb).wait);
            assert!(!(*tcb).signal);
            assert!((*tcb).next.is_none());
        }
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        let mut region = region_memory::<2048>();
        let mut mem = init_over(&mut region);

        let first = mem.carve(spin, 256).unwrap();
        let second = mem.carve(spin, 256).unwrap();

        // second block lies strictly below the first's control block
        assert!((second.saved_psp() as usize) < first.as_ptr() as usize);
    }
}
