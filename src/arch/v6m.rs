//! # Armv6-M Trampolines
//!
//! The same three exception-return-path trampolines as the v7-M port,
//! restricted to the v6-M subset: `ldm`/`stm` only reach R0–R7, so the
//! high half of the software frame goes through low-register copies, and
//! conditional execution is spelled out with branches. Also suits
//! Armv8-M Baseline.

use core::arch::naked_asm;

use super::cortex_m;

/// Supervisor-call entry. See the v7-M port for the protocol; the only
/// differences are the branched stack select and the literal-pool
/// tail-calls (plain `b` to an external symbol has too little range on
/// v6-M).
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn SVCall() {
    naked_asm!(
        "mov    r0, lr",
        "movs   r1, #4",
        "tst    r0, r1",
        "beq    1f",
        "mrs    r3, psp",
        "b      2f",
        "1:",
        "mrs    r3, msp",
        "2:",
        "ldr    r1, [r3, #24]",
        "subs   r1, #2",
        "ldrb   r1, [r1]",
        "cmp    r1, #0",
        "bne    3f",
        "ldr    r0, ={start_os}",
        "bx     r0",
        "3:",
        "ldm    r3!, {{r0, r1, r2}}",
        "ldr    r3, ={dispatch}",
        "bx     r3",
        start_os = sym start_os,
        dispatch = sym cortex_m::svc_dispatch,
    );
}

/// Context switch. Same flow as the v7-M port; the software frame is
/// moved in two four-register halves with the high registers shuffled
/// through R4–R7.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        "push   {{r3, lr}}",
        "bl     {pick}",
        "cmp    r0, #0",
        "beq    2f",
        // save: R4-R7, then R8-R11 via low copies; r0 ends back at the
        // bottom of the frame for the commit call
        "mrs    r0, psp",
        "subs   r0, #32",
        "stmia  r0!, {{r4-r7}}",
        "mov    r4, r8",
        "mov    r5, r9",
        "mov    r6, r10",
        "mov    r7, r11",
        "stmia  r0!, {{r4-r7}}",
        "subs   r0, #32",
        "bl     {commit}",
        "cmp    r0, #0",
        "beq    2f",
        // restore: high half first so R4-R7 stay usable as scratch
        "adds   r0, #16",
        "ldmia  r0!, {{r4-r7}}",
        "mov    r8, r4",
        "mov    r9, r5",
        "mov    r10, r6",
        "mov    r11, r7",
        "subs   r0, #32",
        "ldmia  r0!, {{r4-r7}}",
        "adds   r0, #16",
        "msr    psp, r0",
        "2:",
        "pop    {{r3, pc}}",
        pick = sym cortex_m::pendsv_pick,
        commit = sym cortex_m::pendsv_commit,
    );
}

/// OS-start trampoline, reached from `SVCall` on immediate 0 exactly
/// once.
#[unsafe(naked)]
unsafe extern "C" fn start_os() {
    naked_asm!(
        "push   {{r3, lr}}",
        "bl     {first}",
        "adds   r0, #16",
        "ldmia  r0!, {{r4-r7}}",
        "mov    r8, r4",
        "mov    r9, r5",
        "mov    r10, r6",
        "mov    r11, r7",
        "subs   r0, #32",
        "ldmia  r0!, {{r4-r7}}",
        "adds   r0, #16",
        "msr    psp, r0",
        "pop    {{r3, pc}}",
        first = sym cortex_m::start_first_task,
    );
}
