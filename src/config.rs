//! # Krill Configuration
//!
//! Compile-time constants governing the kernel and system behavior.
//! All limits are fixed at compile time — no dynamic allocation.

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// SysTick frequency in Hz. Determines the preemption granularity:
/// every tick the scheduler rotates the ready queue. Higher values give
/// finer time slicing at the cost of increased interrupt overhead.
pub const TICK_HZ: u32 = 1000;

/// SysTick reload value derived from the clock and tick frequencies.
/// Programmed into SYST_RVR during `kernel::init`.
pub const SYSTICK_RELOAD: u32 = SYSTEM_CLOCK_HZ / TICK_HZ - 1;

/// Stack size in bytes used when a task is created with a size of 0.
/// Must be large enough for the deepest call chain plus the hardware
/// exception frame (32 bytes) and the software-saved context (32 bytes
/// for R4–R11).
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Number of flags in an event flag group. Flag indices at or above this
/// limit are rejected by a debug assertion.
pub const EVENT_FLAG_LIMIT: u32 = 32;
