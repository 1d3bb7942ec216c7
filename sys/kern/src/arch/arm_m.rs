// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv{6,7,8}-M.
//!
//! # Context switching
//!
//! The kernel runs as a library in whatever mode its caller is in: a task
//! making a kernel call executes kernel code on its own stack, inside a
//! critical section. When the scheduler picks a different task, `switch_to`
//! only records the choice and pends `PendSV`. Because interrupts are masked
//! inside the kernel, `PendSV` fires as soon as the kernel call leaves its
//! critical section, saves the outgoing task's callee-saved registers on its
//! process stack, and resumes the chosen task from its own.
//!
//! Interrupt handlers never switch directly. They bracket themselves with
//! `isr_enter`/`isr_exit`, and scheduling decisions made inside them are
//! deferred with `request_reschedule`, which also pends `PendSV`; the Rust
//! side of the `PendSV` handler then runs the deferred scheduling pass before
//! the switch.
//!
//! # Board requirements
//!
//! - Thread mode must be running on the process stack (`CONTROL.SPSEL = 1`)
//!   before `kernel_init`, since the caller becomes the init task and its
//!   state is saved on PSP at the first switch.
//! - `PendSV` should be the lowest priority exception.
//! - A global allocator must be registered; contexts and kernel tables are
//!   heap-allocated.
//! - Floating point state is not saved. Tasks that use the FPU must not be
//!   preempted while doing so.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use abi::TaskEntry;
use cortex_m::peripheral::scb::{Exception, VectActive};
use cortex_m::peripheral::SCB;

pub const MIN_STACK_SIZE: usize = 256;

/// Initial xPSR for a new task: only the Thumb bit set.
const INITIAL_PSR: u32 = 1 << 24;

/// Exception return to Thread mode, using PSP, no FP frame.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Words stacked by hardware on exception entry: r0-r3, r12, lr, pc, xPSR.
const HW_FRAME_WORDS: usize = 8;

/// Words stacked by `PendSV`: r4-r11 and the EXC_RETURN value.
const SW_FRAME_WORDS: usize = 9;

/// Fill pattern for fresh stacks, to make high-water marks visible in a
/// debugger.
const STACK_FILL: u32 = 0xbadd_cafe;

/// Address of the word holding the running task's saved stack pointer.
#[no_mangle]
static POSTBOX_CURRENT_SLOT: AtomicUsize = AtomicUsize::new(0);

/// Address of the word holding the saved stack pointer of the task `PendSV`
/// should resume.
#[no_mangle]
static POSTBOX_NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

/// Save slot for the init task, which has no kernel-allocated stack.
static INIT_SLOT: AtomicU32 = AtomicU32::new(0);

macro_rules! klog {
    ($($tt:tt)*) => {{
        #[cfg(feature = "klog-semihosting")]
        cortex_m_semihosting::hprintln!($($tt)*);
        #[cfg(not(feature = "klog-semihosting"))]
        let _ = format_args!($($tt)*);
    }};
}

/// Saved state of one task.
///
/// The saved stack pointer lives in a fixed word (the lowest word of the
/// task's stack, or `INIT_SLOT`), not in this struct, so that the kernel is
/// free to move `Context`s around as its tables grow.
#[derive(Debug)]
pub struct Context {
    slot: usize,
    stack: Vec<u32>,
}

impl Context {
    pub fn stack_size(&self) -> usize {
        self.stack.len() * 4
    }
}

pub fn init_context() -> Context {
    let slot = INIT_SLOT.as_ptr() as usize;
    POSTBOX_CURRENT_SLOT.store(slot, Ordering::Relaxed);
    POSTBOX_NEXT_SLOT.store(slot, Ordering::Relaxed);
    Context {
        slot,
        stack: Vec::new(),
    }
}

pub fn create_context(entry: TaskEntry, stacksize: usize) -> Option<Context> {
    // One extra word for the save slot, one for alignment slop.
    let words = stacksize.max(MIN_STACK_SIZE).div_ceil(4) + 2;
    let mut stack = Vec::new();
    stack.try_reserve_exact(words).ok()?;
    stack.resize(words, STACK_FILL);

    // ARMvX-M requires an 8-byte aligned stack pointer at exception return.
    let base = stack.as_ptr() as usize;
    let mut top = words;
    while (base + top * 4) & 0x7 != 0 {
        top -= 1;
    }

    let frame = top - HW_FRAME_WORDS;
    stack[frame..top].fill(0);
    stack[frame + 5] = task_return as usize as u32;
    stack[frame + 6] = entry as usize as u32;
    stack[frame + 7] = INITIAL_PSR;

    let sp = frame - SW_FRAME_WORDS;
    stack[sp..frame].fill(0);
    stack[sp + 8] = EXC_RETURN_THREAD_PSP;

    stack[0] = (base + sp * 4) as u32;
    Some(Context { slot: base, stack })
}

pub fn switch_to(next: &Context) {
    POSTBOX_NEXT_SLOT.store(next.slot, Ordering::Relaxed);
    // Inside PendSV, the handler picks up the new slot on its way out.
    if SCB::vect_active() != VectActive::Exception(Exception::PendSV) {
        SCB::set_pendsv();
    }
}

pub fn request_reschedule() {
    SCB::set_pendsv();
}

/// Where a task's entry function returns to.
extern "C" fn task_return() -> ! {
    // If this fails we are the init task, and there is nowhere else to go.
    let _ = crate::startup::with_kernel(|k| k.task_exit());
    loop {
        cortex_m::asm::wfi();
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(armv7m, armv8m))] {
        core::arch::global_asm!{"
            .section .text.PendSV
            .globl PendSV
            .type PendSV,function
            PendSV:
                @ save callee-saved state on the outgoing process stack.
                mrs r0, PSP
                stmdb r0!, {{r4-r11, lr}}
                ldr r1, =POSTBOX_CURRENT_SLOT
                ldr r2, [r1]
                str r0, [r2]

                bl pendsv_entry

                @ adopt the next slot as current, and resume from it.
                ldr r1, =POSTBOX_CURRENT_SLOT
                ldr r3, =POSTBOX_NEXT_SLOT
                ldr r2, [r3]
                str r2, [r1]
                ldr r0, [r2]
                ldmia r0!, {{r4-r11, lr}}
                msr PSP, r0
                bx lr
            ",
        }
    } else {
        core::arch::global_asm!{"
            .section .text.PendSV
            .globl PendSV
            .type PendSV,function
            PendSV:
                @ same frame layout as the ARMv7-M path, built without
                @ stmdb or high-register lists.
                mrs r0, PSP
                subs r0, #36
                stmia r0!, {{r4-r7}}
                mov r4, r8
                mov r5, r9
                mov r6, r10
                mov r7, r11
                stmia r0!, {{r4-r7}}
                mov r1, lr
                str r1, [r0]
                subs r0, #32
                ldr r1, =POSTBOX_CURRENT_SLOT
                ldr r2, [r1]
                str r0, [r2]

                bl pendsv_entry

                ldr r1, =POSTBOX_CURRENT_SLOT
                ldr r3, =POSTBOX_NEXT_SLOT
                ldr r2, [r3]
                str r2, [r1]
                ldr r0, [r2]
                adds r0, #16
                ldmia r0!, {{r4-r7}}
                mov r8, r4
                mov r9, r5
                mov r10, r6
                mov r11, r7
                ldr r1, [r0]
                adds r0, #4
                msr PSP, r0
                mov lr, r1
                subs r0, #36
                ldmia r0!, {{r4-r7}}
                bx lr
            ",
        }
    }
}

/// The Rust side of the PendSV handler, after the outgoing task's registers
/// have been saved.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    let _ = crate::startup::with_kernel(|k| {
        k.port_reschedule();
        Ok(())
    });
}
