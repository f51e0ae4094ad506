//! # Architecture Port Layer
//!
//! Cortex-M specific code: memory-mapped system registers, exception
//! handlers, and the context save/restore trampolines. Only compiled for
//! bare-metal ARM targets — the rest of the kernel is architecture
//! neutral and its logic runs in host unit tests.
//!
//! The register juggling differs between profiles (v6-M can only
//! ldm/stm low registers), so the naked handlers live in one module per
//! profile; everything they call is shared.

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod cortex_m;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) use cortex_m::{init_hardware, irq_mask, irq_unmask, pipeline_sync, start, syscall};

#[cfg(all(target_arch = "arm", target_os = "none", armv6m))]
mod v6m;

#[cfg(all(target_arch = "arm", target_os = "none", not(armv6m)))]
mod v7m;
