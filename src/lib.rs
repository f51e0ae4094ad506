//! # Krill — a preemptive micro-kernel for ARM Cortex-M
//!
//! A fixed-priority round-robin multitasking kernel for the v6-M and
//! v7-M profiles, with three synchronization primitives: binary signals,
//! event flag groups, and FIFO mutexes.
//!
//! ## Overview
//!
//! Tasks are carved once from a caller-supplied memory region and live
//! forever. A periodic SysTick rotates the ready queue; every kernel
//! service is a supervisor call into a single dispatcher; the actual
//! context switch happens in PendSV at the lowest exception priority.
//! When nothing is runnable the CPU parks in sleep-on-exit with the tick
//! stopped (or runs the optional idle task).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Application Tasks                     │
//! ├─────────────────────────────────────────────────────────┤
//! │               Kernel API (kernel.rs, sync.rs)           │
//! │   init() · add_task() · start() · yield_now() · wait()  │
//! │   signal() · Event · Mutex · lock() · disable_irq()     │
//! ├──────────────┬──────────────────────┬───────────────────┤
//! │  Scheduler   │  Syscall Dispatcher  │  Task Memory      │
//! │  sched.rs    │  syscall.rs          │  mem.rs           │
//! │  ─ ready     │  ─ decode (R0,R1,R2) │  ─ bump carve     │
//! │  ─ pick-next │  ─ one match site    │  ─ initial frame  │
//! ├──────────────┴──────────────────────┴───────────────────┤
//! │              Task Model (task.rs)                       │
//! │        TCB · TaskRef · intrusive FIFO queues            │
//! ├─────────────────────────────────────────────────────────┤
//! │         Arch Port (arch/: cortex_m, v6m, v7m)           │
//! │     SVCall · PendSV · SysTick · ICSR/SCR/SHPR3/SYST     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! Single core. Kernel state is mutated only from exception context:
//! the dispatcher (SVCall, highest priority) and the switcher (PendSV,
//! lowest, tied with SysTick). Because the low band cannot preempt the
//! dispatcher and the two low handlers cannot preempt each other, the
//! kernel needs no locks — only the pick-next critical section briefly
//! masks interrupts. Application ISRs may call the non-blocking services
//! (`signal`, `Event::signal`); blocking calls are task-context only.
//!
//! ## Memory Model
//!
//! - **No heap**: TCBs and stacks come from one caller-owned region
//! - **No `alloc`**: pure `core`
//! - **Tasks are never destroyed**: handles are plain stable pointers

#![no_std]

pub mod arch;
pub mod config;
pub mod kernel;
pub mod mem;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod task;

#[cfg(all(target_arch = "arm", target_os = "none"))]
defmt::timestamp!("{=u32:010}", kernel::now());
