// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level user interface.
//!
//! This is intended to provide a more ergonomic interface than the raw
//! kernel calls.

use kern::startup::with_kernel;

use crate::{message_get, message_get_data, message_reply};
use abi::{KernelError, MessageId, Payload};

/// Receives a message, handles it, and replies.
///
/// `handler` gets the message and its payload, and the message is handed
/// back to its sender as soon as `handler` returns, so the handler is the
/// only code that gets to touch the payload. Whatever `handler` returns is
/// passed through.
///
/// Blocks until a message arrives, like `message_get`.
pub fn recv<R>(
    handler: impl FnOnce(MessageId, Payload) -> R,
) -> Result<R, KernelError> {
    let msg = message_get()?;
    let data = message_get_data(msg)?;
    let result = handler(msg, data);
    message_reply(msg)?;
    Ok(result)
}

/// Runs `body` as an interrupt handler.
///
/// Kernel calls made from `body` never switch tasks directly. If any of them
/// made a more important task ready, the switch happens as this returns.
pub fn isr<R>(body: impl FnOnce() -> R) -> Result<R, KernelError> {
    with_kernel(|k| {
        k.isr_enter();
        Ok(())
    })?;
    let result = body();
    with_kernel(|k| {
        k.isr_exit();
        Ok(())
    })?;
    Ok(result)
}
