// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message envelopes.
//!
//! A message carries one opaque `Payload` and a record of which side of an
//! exchange may touch it. The kernel never looks behind the payload.
//! Delivery (`message_put`, `message_get`, `message_reply`) lives in
//! `syscalls`; this module manages the envelopes themselves.

use abi::{KernelError, MessageId, Ownership, Payload, Phase};

use crate::kernel::Kernel;

/// Where a message is in its delivery cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Holder {
    /// Unsent, or replied to.
    Sender,
    /// Waiting in the mailbox of the task at this index.
    Queued(usize),
    /// Received by the task at this index, which has not replied yet.
    Receiver(usize),
}

impl Holder {
    pub fn ownership(self) -> Ownership {
        match self {
            Holder::Sender => Ownership::HeldBySender,
            Holder::Queued(_) | Holder::Receiver(_) => Ownership::HeldByReceiver,
        }
    }
}

#[derive(Debug)]
pub struct Message {
    pub(crate) data: Payload,
    pub(crate) holder: Holder,
}

impl Kernel {
    pub fn message_create(&mut self) -> Result<MessageId, KernelError> {
        if self.phase == Phase::Uninitialized {
            refuse!(self, KernelError::NotInitialized);
        }
        let message = Message {
            data: Payload::NULL,
            holder: Holder::Sender,
        };
        match self.messages.insert(message) {
            Ok(id) => Ok(id),
            Err(e) => refuse!(self, e),
        }
    }

    /// Releases an envelope. Refused while a receiver holds it.
    pub fn message_free(&mut self, id: MessageId) -> Result<(), KernelError> {
        let Some(index) = self.messages.check(id) else {
            refuse!(self, KernelError::BadMessage);
        };
        if self.messages[index].holder != Holder::Sender {
            refuse!(self, KernelError::MessageInFlight);
        }
        self.messages.remove(id);
        Ok(())
    }

    /// Attaches a payload.
    ///
    /// While the message is held by the sender anyone may do this; once it
    /// has been received, only the receiver may, and while it sits in a
    /// mailbox nobody may.
    pub fn message_set_data(
        &mut self,
        id: MessageId,
        data: Payload,
    ) -> Result<(), KernelError> {
        let Some(index) = self.messages.check(id) else {
            refuse!(self, KernelError::BadMessage);
        };
        match self.messages[index].holder {
            Holder::Sender => (),
            Holder::Queued(_) => refuse!(self, KernelError::MessageInFlight),
            Holder::Receiver(r) => {
                if self.in_interrupt() || self.running != Some(r) {
                    refuse!(self, KernelError::NotHolder);
                }
            }
        }
        self.messages[index].data = data;
        Ok(())
    }

    pub fn message_get_data(&self, id: MessageId) -> Result<Payload, KernelError> {
        self.messages
            .get(id)
            .map(|m| m.data)
            .ok_or(KernelError::BadMessage)
    }

    pub fn message_ownership(
        &self,
        id: MessageId,
    ) -> Result<Ownership, KernelError> {
        self.messages
            .get(id)
            .map(|m| m.holder.ownership())
            .ok_or(KernelError::BadMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use abi::Priority;

    fn nop() {}

    #[test]
    fn create_needs_init() {
        let mut k = Kernel::with_defaults();
        assert_eq!(k.message_create(), Err(KernelError::NotInitialized));
        k.init().unwrap();
        let m = k.message_create().unwrap();
        assert_eq!(k.message_ownership(m), Ok(Ownership::HeldBySender));
        assert_eq!(k.message_get_data(m), Ok(Payload::NULL));
    }

    #[test]
    fn create_respects_message_limit() {
        let mut k = Kernel::new(Config {
            max_tasks: 4,
            max_messages: 2,
        });
        k.init().unwrap();
        let a = k.message_create().unwrap();
        k.message_create().unwrap();
        assert_eq!(k.message_create(), Err(KernelError::OutOfMemory));
        k.message_free(a).unwrap();
        assert!(k.message_create().is_ok());
    }

    #[test]
    fn free_retires_the_handle() {
        let mut k = Kernel::with_defaults();
        k.init().unwrap();
        let m = k.message_create().unwrap();
        k.message_free(m).unwrap();
        assert_eq!(k.message_free(m), Err(KernelError::BadMessage));
        assert_eq!(k.message_get_data(m), Err(KernelError::BadMessage));
        assert_eq!(
            k.message_set_data(m, Payload::from_addr(4)),
            Err(KernelError::BadMessage)
        );
    }

    #[test]
    fn in_flight_messages_are_guarded() {
        let mut k = Kernel::with_defaults();
        k.init().unwrap();
        let a = k.task_create("a", Priority::NORMAL, nop, 0).unwrap();
        let m = k.message_create().unwrap();
        k.message_set_data(m, Payload::from_addr(0x1000)).unwrap();
        k.message_put(a, m).unwrap();

        assert_eq!(k.message_ownership(m), Ok(Ownership::HeldByReceiver));
        assert_eq!(k.message_free(m), Err(KernelError::MessageInFlight));
        assert_eq!(
            k.message_set_data(m, Payload::NULL),
            Err(KernelError::MessageInFlight)
        );
        // Reading is harmless.
        assert_eq!(k.message_get_data(m), Ok(Payload::from_addr(0x1000)));

        k.start().unwrap();
        assert_eq!(k.message_get(), Ok(crate::Wait::Ready(m)));
        // The receiver may now rewrite the payload.
        k.message_set_data(m, Payload::from_addr(0x2000)).unwrap();
        k.message_reply(m).unwrap();
        assert_eq!(k.message_get_data(m), Ok(Payload::from_addr(0x2000)));
        k.message_free(m).unwrap();
    }
}
