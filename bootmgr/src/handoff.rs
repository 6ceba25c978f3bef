// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Jump into the selected application image.
//!
//! Only reachable from a verified boot choice; once entered there is no
//! way back. The flash peripheral must already have been consumed (and,
//! where the platform supports it, write-locked) before calling in.

use cortex_m::peripheral::{NVIC, SCB, SYST};

/// Hand the MCU to the application.
///
/// Steps, in order:
/// 1. mask interrupts while the core is rewired;
/// 2. stop SysTick and clear every pending NVIC line;
/// 3. point VTOR at the application vector table;
/// 4. force the main stack pointer active (the loader may run on PSP);
/// 5. load the new stack top, re-enable interrupts at the last possible
///    moment and branch to the reset handler in one sequence.
///
/// # Safety
///
/// `vector_table`, `stack_top` and `entry_point` must come from a slot
/// that passed verification. This replaces the stack pointer and executes
/// whatever the slot contains; it never returns.
pub unsafe fn jump_to_app(vector_table: u32, stack_top: u32, entry_point: u32) -> ! {
    cortex_m::interrupt::disable();

    // SysTick: counter off, exception off.
    let syst = &*SYST::PTR;
    syst.csr.write(0);

    // Disable and un-pend every interrupt line before the application
    // installs its own handlers.
    let nvic = &*NVIC::PTR;
    for icer in nvic.icer.iter() {
        icer.write(0xFFFF_FFFF);
    }
    for icpr in nvic.icpr.iter() {
        icpr.write(0xFFFF_FFFF);
    }

    let scb = &*SCB::PTR;
    scb.vtor.write(vector_table);

    // These instructions perform the following operations:
    //
    // * Modify CONTROL to use MSP as the stack pointer (clear spsel bit)
    // * Synchronize with an instruction barrier
    // * Initialize the stack pointer from the image's stack top
    // * Set the link register to a non-return value
    // * Re-enable interrupts and jump to the application reset handler
    core::arch::asm!(
        "mrs {tmp}, CONTROL",
        "bics {tmp}, {spsel}",
        "msr CONTROL, {tmp}",
        "isb",
        "msr MSP, {stack}",
        "mov lr, {new_lr}",
        "cpsie i",
        "bx {entry}",
        // `out(reg) _` is not permitted in a `noreturn` asm! call,
        // so instead use `in(reg) 0` and don't restore it afterwards.
        tmp = in(reg) 0,
        spsel = in(reg) 2,
        new_lr = in(reg) 0xFFFF_FFFFu32,
        stack = in(reg) stack_top,
        entry = in(reg) entry_point,
        options(noreturn),
    );
}
