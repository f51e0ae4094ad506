//! # Armv7-M Trampolines
//!
//! The three exception-return-path trampolines for v7-M and v8-M
//! Mainline, where `stmdb`/`ldmia` reach all of R4–R11 in one
//! instruction. These are naked so the compiler cannot spill task
//! registers or reorder across the trap boundary; they may only touch
//! R0–R3 and R12 before the software frame is saved, because everything
//! else still belongs to the interrupted task.

use core::arch::naked_asm;

use super::cortex_m;

/// Supervisor-call entry.
///
/// Recovers the SVC immediate from the instruction preceding the stacked
/// return address, on whichever stack the caller was using (EXC_RETURN
/// bit 2 selects it). Immediate 0 is the one-shot OS start; anything
/// else tail-calls the dispatcher with the caller's stacked R0, R1, R2.
/// The dispatcher returns straight through the exception return.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn SVCall() {
    naked_asm!(
        "tst    lr, #4",
        "ite    eq",
        "mrseq  r3, msp",
        "mrsne  r3, psp",
        "ldr    r1, [r3, #24]",
        "ldrb   r1, [r1, #-2]",
        "cbnz   r1, 2f",
        "b      {start_os}",
        "2:",
        "ldm    r3, {{r0, r1, r2}}",
        "b      {dispatch}",
        start_os = sym start_os,
        dispatch = sym cortex_m::svc_dispatch,
    );
}

/// Context switch, at the lowest exception priority.
///
/// The hardware has already pushed the caller's R0–R3, R12, LR, PC and
/// xPSR onto its process stack. If the pick says so, push R4–R11 below
/// them, file the resulting stack pointer with the leaving task, and
/// pop the incoming task's R4–R11; the exception return then unstacks
/// the rest. A null commit means nothing is runnable — leave the
/// registers alone and let sleep-on-exit park the CPU.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        "push   {{r3, lr}}",
        "bl     {pick}",
        "cbz    r0, 2f",
        "mrs    r0, psp",
        "stmdb  r0!, {{r4-r11}}",
        "bl     {commit}",
        "cbz    r0, 2f",
        "ldmia  r0!, {{r4-r11}}",
        "msr    psp, r0",
        "2:",
        "pop    {{r3, pc}}",
        pick = sym cortex_m::pendsv_pick,
        commit = sym cortex_m::pendsv_commit,
    );
}

/// OS-start trampoline, reached from `SVCall` on immediate 0 exactly
/// once. Restores the first task's software frame and returns from the
/// exception into its first instruction.
#[unsafe(naked)]
unsafe extern "C" fn start_os() {
    naked_asm!(
        "push   {{r3, lr}}",
        "bl     {first}",
        "ldmia  r0!, {{r4-r11}}",
        "msr    psp, r0",
        "pop    {{r3, pc}}",
        first = sym cortex_m::start_first_task,
    );
}
