// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application support library for Postbox.
//!
//! This contains the kernel calls that tasks make, as plain functions over
//! the process-wide kernel, and re-exports the contents of the `abi` crate
//! that gets shared with the kernel.
//!
//! # Blocking calls
//!
//! `task_wait` and `message_get` may have to suspend the caller. On a real
//! port, the kernel parks the task and switches away as the call leaves the
//! kernel; when something wakes the task, execution continues inside the
//! same call, which then collects what the wake delivered and returns it.
//!
//! On the hosted `fake` port nothing is ever really suspended, so a call that
//! had to block comes straight back with `KernelError::WouldBlock`, leaving
//! the kernel exactly as a suspended caller would.

#![no_std]

pub use abi::*;
pub use kern::{Wait, Wakeup};

use kern::startup::with_kernel;
use kern::Kernel;

pub mod hl;

/// Brings up the kernel and adopts the caller as the init task. Succeeds
/// once.
pub fn kernel_init() -> Result<TaskId, KernelError> {
    kern::startup::kernel_init()
}

/// Starts scheduling, running the most important task created so far.
pub fn kernel_start() -> Result<TaskId, KernelError> {
    kern::startup::kernel_start()
}

pub fn task_create(
    name: &'static str,
    priority: Priority,
    entry: TaskEntry,
    stacksize: usize,
) -> Result<TaskId, KernelError> {
    with_kernel(|k| k.task_create(name, priority, entry, stacksize))
}

pub fn task_free(task: TaskId) -> Result<(), KernelError> {
    with_kernel(|k| k.task_free(task))
}

pub fn task_self() -> Result<TaskId, KernelError> {
    with_kernel(|k| k.task_self())
}

pub fn task_get_priority(task: TaskId) -> Result<Priority, KernelError> {
    with_kernel(|k| k.task_get_priority(task))
}

pub fn task_set_priority(
    task: TaskId,
    priority: Priority,
) -> Result<(), KernelError> {
    with_kernel(|k| k.task_set_priority(task, priority))
}

pub fn task_signal(task: TaskId, sig: Signal) -> Result<(), KernelError> {
    with_kernel(|k| k.task_signal(task, sig))
}

/// Waits until any signal in `mask` is pending, then clears and returns the
/// pending bits in `mask`.
pub fn task_wait(mask: Signal) -> Result<Signal, KernelError> {
    block(
        |k| k.task_wait(mask),
        |w| match w {
            Wakeup::Signals(bits) => Some(bits),
            Wakeup::Message(_) => None,
        },
    )
}

pub fn message_create() -> Result<MessageId, KernelError> {
    with_kernel(|k| k.message_create())
}

pub fn message_free(msg: MessageId) -> Result<(), KernelError> {
    with_kernel(|k| k.message_free(msg))
}

pub fn message_set_data(
    msg: MessageId,
    data: Payload,
) -> Result<(), KernelError> {
    with_kernel(|k| k.message_set_data(msg, data))
}

pub fn message_get_data(msg: MessageId) -> Result<Payload, KernelError> {
    with_kernel(|k| k.message_get_data(msg))
}

pub fn message_put(dst: TaskId, msg: MessageId) -> Result<(), KernelError> {
    with_kernel(|k| k.message_put(dst, msg))
}

/// `message_put` for interrupt handlers: never switches tasks itself.
pub fn message_put_isr(
    dst: TaskId,
    msg: MessageId,
) -> Result<(), KernelError> {
    with_kernel(|k| k.message_put_isr(dst, msg))
}

/// Receives the oldest message in the caller's mailbox, waiting for one if
/// necessary.
pub fn message_get() -> Result<MessageId, KernelError> {
    block(
        |k| k.message_get(),
        |w| match w {
            Wakeup::Message(msg) => Some(msg),
            Wakeup::Signals(_) => None,
        },
    )
}

pub fn message_reply(msg: MessageId) -> Result<(), KernelError> {
    with_kernel(|k| k.message_reply(msg))
}

/// Performs any context switch that was deferred by an interrupt-context
/// call.
pub fn port_reschedule() -> Result<(), KernelError> {
    with_kernel(|k| {
        k.port_reschedule();
        Ok(())
    })
}

/// Runs a potentially blocking kernel call on behalf of the current task,
/// and if it blocked, collects the result of the wake.
fn block<T>(
    call: impl FnOnce(&mut Kernel) -> Result<Wait<T>, KernelError>,
    collect: impl FnOnce(Wakeup) -> Option<T>,
) -> Result<T, KernelError> {
    let (me, outcome) = with_kernel(|k| {
        let me = k.task_self()?;
        Ok((me, call(k)?))
    })?;
    match outcome {
        Wait::Ready(value) => Ok(value),
        // On a real port we get here only after being woken.
        Wait::Blocked => match with_kernel(|k| k.take_wakeup(me))? {
            Some(wakeup) => collect(wakeup).ok_or(KernelError::WouldBlock),
            None => Err(KernelError::WouldBlock),
        },
    }
}
