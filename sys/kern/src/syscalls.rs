// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signals and message delivery.
//!
//! These are the operations that block and wake tasks. A blocking operation
//! that can't complete right away parks the caller, reschedules, and returns
//! `Wait::Blocked`; what eventually wakes the task is left in its wakeup slot
//! (see `Kernel::take_wakeup`) for it to collect when it resumes.
//!
//! Wakes delivered from interrupt context never switch tasks directly; the
//! reschedule is deferred to the outermost `isr_exit` or `port_reschedule`.

use abi::{KernelError, MessageId, Phase, Signal, TaskId, TaskState};

use crate::kernel::Kernel;
use crate::msg::Holder;
use crate::task::{NextTask, Wakeup};
use crate::trace::Trace;

/// Outcome of an operation that may block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum Wait<T> {
    /// Completed without blocking.
    Ready(T),
    /// The caller has been parked and is no longer the running task. The
    /// result arrives as a `Wakeup`.
    Blocked,
}

impl Kernel {
    /// Posts signal bits to a task, waking it if it was waiting on any of
    /// them. Never blocks; safe from interrupt context.
    pub fn task_signal(
        &mut self,
        id: TaskId,
        sig: Signal,
    ) -> Result<(), KernelError> {
        let Some(index) = self.tasks.check(id) else {
            refuse!(self, KernelError::BadTask);
        };
        trace!(self, Trace::Signal(id, sig));
        let task = &mut self.tasks[index];
        let hint = if task.post(sig) {
            let priority = task.priority();
            self.ready.insert(index, priority);
            trace!(self, Trace::Wake(id));
            NextTask::Other
        } else {
            NextTask::Same
        };
        self.dispatch(hint);
        Ok(())
    }

    /// Waits for any of the signals in `mask`.
    ///
    /// If some are already pending, exactly those bits are cleared and
    /// returned. Otherwise the caller blocks until one is posted. An empty
    /// mask blocks forever.
    pub fn task_wait(&mut self, mask: Signal) -> Result<Wait<Signal>, KernelError> {
        let index = self.blocking_caller()?;
        if let Some(firing) = self.tasks[index].take_signals(mask) {
            return Ok(Wait::Ready(firing));
        }
        self.check_may_block(index)?;
        self.tasks[index].block_on_signals(mask);
        trace!(self, Trace::WaitSignal(self.current_id(index), mask));
        self.reschedule();
        Ok(Wait::Blocked)
    }

    /// Puts a message into `dst`'s mailbox, handing ownership to the
    /// receiver. If `dst` is waiting for a message it gets this one directly
    /// and may preempt the caller.
    pub fn message_put(
        &mut self,
        dst: TaskId,
        msg: MessageId,
    ) -> Result<(), KernelError> {
        let hint = self.put(dst, msg, false)?;
        self.dispatch(hint);
        Ok(())
    }

    /// Interrupt-context flavor of `message_put`: any resulting switch is
    /// always deferred.
    pub fn message_put_isr(
        &mut self,
        dst: TaskId,
        msg: MessageId,
    ) -> Result<(), KernelError> {
        let hint = self.put(dst, msg, true)?;
        if hint == NextTask::Other {
            self.defer_reschedule();
        }
        Ok(())
    }

    fn put(
        &mut self,
        dst: TaskId,
        msg: MessageId,
        isr: bool,
    ) -> Result<NextTask, KernelError> {
        let Some(d) = self.tasks.check(dst) else {
            refuse!(self, KernelError::BadTask);
        };
        let Some(m) = self.messages.check(msg) else {
            refuse!(self, KernelError::BadMessage);
        };
        if self.messages[m].holder != Holder::Sender {
            refuse!(self, KernelError::MessageInFlight);
        }

        let task = &mut self.tasks[d];
        let hint = match task.state {
            TaskState::Terminated => refuse!(self, KernelError::Terminated),
            TaskState::BlockedOnMessage => {
                // Its mailbox is necessarily empty; hand over directly.
                task.held += 1;
                task.wakeup = Some(Wakeup::Message(msg));
                task.state = TaskState::Ready;
                let priority = task.priority();
                self.messages[m].holder = Holder::Receiver(d);
                self.ready.insert(d, priority);
                trace!(self, Trace::Wake(dst));
                NextTask::Other
            }
            _ => {
                if task.mailbox.try_reserve(1).is_err() {
                    refuse!(self, KernelError::OutOfMemory);
                }
                task.mailbox.push_back(msg);
                self.messages[m].holder = Holder::Queued(d);
                NextTask::Same
            }
        };
        trace!(self, Trace::Put { dst, msg, isr });
        Ok(hint)
    }

    /// Takes the oldest message from the caller's mailbox, blocking if it's
    /// empty.
    pub fn message_get(&mut self) -> Result<Wait<MessageId>, KernelError> {
        let index = self.blocking_caller()?;
        let task = &mut self.tasks[index];
        if let Some(msg) = task.mailbox.pop_front() {
            task.held += 1;
            if let Some(message) = self.messages.get_mut(msg) {
                message.holder = Holder::Receiver(index);
            }
            trace!(self, Trace::Get(self.current_id(index), msg));
            return Ok(Wait::Ready(msg));
        }
        self.check_may_block(index)?;
        let task = &mut self.tasks[index];
        task.wakeup = None;
        task.state = TaskState::BlockedOnMessage;
        trace!(self, Trace::WaitMessage(self.current_id(index)));
        self.reschedule();
        Ok(Wait::Blocked)
    }

    /// Hands a received message back to its sender.
    ///
    /// Only the receiving task may reply, and only once per delivery. This
    /// does not wake anyone; senders that need to know use a signal or the
    /// payload.
    pub fn message_reply(&mut self, msg: MessageId) -> Result<(), KernelError> {
        let Some(m) = self.messages.check(msg) else {
            refuse!(self, KernelError::BadMessage);
        };
        let receiver = match self.messages[m].holder {
            Holder::Sender => refuse!(self, KernelError::NotDelivered),
            Holder::Receiver(r)
                if !self.in_interrupt() && self.running == Some(r) =>
            {
                r
            }
            _ => refuse!(self, KernelError::NotHolder),
        };
        self.messages[m].holder = Holder::Sender;
        let task = &mut self.tasks[receiver];
        task.held = task.held.saturating_sub(1);
        trace!(self, Trace::Reply(msg));
        Ok(())
    }

    /// The task on whose behalf a potentially blocking call is made.
    fn blocking_caller(&mut self) -> Result<usize, KernelError> {
        let Some(index) = self.running else {
            refuse!(self, KernelError::NotInitialized);
        };
        if self.in_interrupt() {
            refuse!(self, KernelError::InInterrupt);
        }
        Ok(index)
    }

    /// Checks that the task at `index` is allowed to actually block.
    fn check_may_block(&mut self, index: usize) -> Result<(), KernelError> {
        if self.phase != Phase::Running {
            refuse!(self, KernelError::NotStarted);
        }
        if index == TaskId::INIT.index() {
            refuse!(self, KernelError::InitTask);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use abi::{Ownership, Payload, Priority};
    use proptest::prelude::*;

    fn nop() {}

    fn initialized() -> Kernel {
        let mut k = Kernel::with_defaults();
        k.init().unwrap();
        k
    }

    #[test]
    fn wait_with_pending_bits_returns_immediately() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::NORMAL, nop, 0).unwrap();
        k.task_signal(a, Signal::SIG0 | Signal::SIG2 | Signal::SIG5).unwrap();
        k.start().unwrap();
        assert_eq!(k.task_self(), Ok(a));

        assert_eq!(
            k.task_wait(Signal::SIG2 | Signal::SIG3),
            Ok(Wait::Ready(Signal::SIG2))
        );
        // Bits outside the mask are untouched.
        assert_eq!(
            k.task_info(a).unwrap().pending_signals,
            (Signal::SIG0 | Signal::SIG5).bits()
        );
        assert_eq!(k.task_state(a), Ok(TaskState::Running));
    }

    #[test]
    fn wait_from_init_task() {
        let mut k = initialized();
        k.task_signal(TaskId::INIT, Signal::SIG1).unwrap();
        // Satisfiable waits are fine even before start.
        assert_eq!(k.task_wait(Signal::SIG1), Ok(Wait::Ready(Signal::SIG1)));
        assert_eq!(k.task_wait(Signal::SIG1), Err(KernelError::NotStarted));
        k.start().unwrap();
        assert_eq!(k.task_wait(Signal::SIG1), Err(KernelError::InitTask));
        assert_eq!(k.message_get(), Err(KernelError::InitTask));
        assert_eq!(k.task_state(TaskId::INIT), Ok(TaskState::Running));
    }

    #[test]
    fn blocking_calls_refused_in_interrupt() {
        let mut k = initialized();
        k.task_create("a", Priority::NORMAL, nop, 0).unwrap();
        k.start().unwrap();
        k.isr_enter();
        assert_eq!(k.task_wait(Signal::SIG0), Err(KernelError::InInterrupt));
        assert_eq!(k.message_get(), Err(KernelError::InInterrupt));
        k.isr_exit();
    }

    #[test]
    fn zero_mask_blocks_until_freed() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::NORMAL, nop, 0).unwrap();
        k.start().unwrap();
        assert_eq!(k.task_wait(Signal::empty()), Ok(Wait::Blocked));
        k.task_signal(a, Signal::all()).unwrap();
        assert_eq!(k.task_state(a), Ok(TaskState::BlockedOnSignal));
        assert_eq!(k.task_self(), Ok(TaskId::INIT));
    }

    /// A at LOW, B at HIGH. B waits for a signal and A delivers it: B must
    /// take over immediately, with exactly the awaited bit.
    #[test]
    fn signal_preempts_lower_priority_sender() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::LOW, nop, 0).unwrap();
        let b = k.task_create("b", Priority::HIGH, nop, 0).unwrap();
        k.start().unwrap();
        assert_eq!(k.task_self(), Ok(b));

        assert_eq!(k.task_wait(Signal::SIG0), Ok(Wait::Blocked));
        assert_eq!(k.task_state(b), Ok(TaskState::BlockedOnSignal));
        assert_eq!(k.task_self(), Ok(a));
        arch::take_switch_count();

        k.task_signal(b, Signal::SIG0).unwrap();
        assert_eq!(k.task_self(), Ok(b));
        assert_eq!(k.task_state(b), Ok(TaskState::Running));
        assert_eq!(k.task_state(a), Ok(TaskState::Ready));
        assert_eq!(arch::take_switch_count(), 1);
        assert_eq!(k.take_wakeup(b), Ok(Some(Wakeup::Signals(Signal::SIG0))));
        assert_eq!(k.take_wakeup(b), Ok(None));
        assert_eq!(k.task_info(b).unwrap().pending_signals, 0);

        // a doesn't run again until b blocks.
        assert_eq!(k.ready_tasks().next(), Some(a));
        assert_eq!(k.task_wait(Signal::SIG0), Ok(Wait::Blocked));
        assert_eq!(k.task_self(), Ok(a));
    }

    /// Bits posted between the wake and the waiter actually running are
    /// delivered together, and nothing is left over for the next wait.
    #[test]
    fn wait_collects_every_bit_posted_before_resuming() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::LOW, nop, 0).unwrap();
        k.start().unwrap();
        assert_eq!(k.task_wait(Signal::SIG0 | Signal::SIG1), Ok(Wait::Blocked));
        assert_eq!(k.task_self(), Ok(TaskId::INIT));

        k.isr_enter();
        k.task_signal(a, Signal::SIG0).unwrap();
        k.task_signal(a, Signal::SIG1 | Signal::SIG4).unwrap();
        assert_eq!(k.task_state(a), Ok(TaskState::Ready));
        k.isr_exit();

        assert_eq!(k.task_self(), Ok(a));
        assert_eq!(
            k.take_wakeup(a),
            Ok(Some(Wakeup::Signals(Signal::SIG0 | Signal::SIG1)))
        );
        assert_eq!(
            k.task_info(a).unwrap().pending_signals,
            Signal::SIG4.bits()
        );
        assert_eq!(k.task_wait(Signal::SIG0 | Signal::SIG1), Ok(Wait::Blocked));
    }

    #[test]
    fn signal_to_less_important_task_does_not_preempt() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::NORMAL, nop, 0).unwrap();
        let b = k.task_create("b", Priority::HIGH, nop, 0).unwrap();
        k.start().unwrap();
        assert_eq!(k.task_self(), Ok(b));
        assert_eq!(k.task_wait(Signal::SIG7), Ok(Wait::Blocked));
        assert_eq!(k.task_self(), Ok(a));
        assert_eq!(k.task_wait(Signal::SIG7), Ok(Wait::Blocked));
        assert_eq!(k.task_self(), Ok(TaskId::INIT));

        // init wakes a; a outranks init and runs.
        k.task_signal(a, Signal::SIG7).unwrap();
        assert_eq!(k.task_self(), Ok(a));
        // a wakes b; b outranks a and runs.
        k.task_signal(b, Signal::SIG7).unwrap();
        assert_eq!(k.task_self(), Ok(b));
        // b signals a, which is already ready: nothing changes.
        k.task_signal(a, Signal::SIG3).unwrap();
        assert_eq!(k.task_self(), Ok(b));
        assert_eq!(k.ready_tasks().collect::<Vec<_>>(), [a, TaskId::INIT]);
    }

    #[test]
    fn get_blocks_then_receives_directly() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::LOW, nop, 0).unwrap();
        let b = k.task_create("b", Priority::HIGH, nop, 0).unwrap();
        let m = k.message_create().unwrap();
        k.start().unwrap();

        assert_eq!(k.message_get(), Ok(Wait::Blocked));
        assert_eq!(k.task_state(b), Ok(TaskState::BlockedOnMessage));
        assert_eq!(k.task_self(), Ok(a));

        k.message_put(b, m).unwrap();
        assert_eq!(k.task_self(), Ok(b));
        assert_eq!(k.take_wakeup(b), Ok(Some(Wakeup::Message(m))));
        assert_eq!(k.mailbox_len(b), Ok(0));
        assert_eq!(k.message_ownership(m), Ok(Ownership::HeldByReceiver));
        k.message_reply(m).unwrap();
        assert_eq!(k.message_ownership(m), Ok(Ownership::HeldBySender));
    }

    #[test]
    fn put_isr_defers_switch() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::LOW, nop, 0).unwrap();
        let b = k.task_create("b", Priority::HIGH, nop, 0).unwrap();
        let m = k.message_create().unwrap();
        k.start().unwrap();
        assert_eq!(k.message_get(), Ok(Wait::Blocked));
        arch::take_reschedule_requests();

        k.isr_enter();
        k.message_put_isr(b, m).unwrap();
        assert_eq!(k.task_self(), Ok(a));
        assert_eq!(k.task_state(b), Ok(TaskState::Ready));
        assert_eq!(arch::take_reschedule_requests(), 1);
        k.isr_exit();
        assert_eq!(k.task_self(), Ok(b));
    }

    #[test]
    fn put_isr_outside_interrupt_waits_for_port_reschedule() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::LOW, nop, 0).unwrap();
        let b = k.task_create("b", Priority::HIGH, nop, 0).unwrap();
        let m = k.message_create().unwrap();
        k.start().unwrap();
        assert_eq!(k.message_get(), Ok(Wait::Blocked));

        k.message_put_isr(b, m).unwrap();
        assert_eq!(k.task_self(), Ok(a));
        k.port_reschedule();
        assert_eq!(k.task_self(), Ok(b));
        // Nothing further pending.
        k.port_reschedule();
        assert_eq!(k.task_self(), Ok(b));
    }

    #[test]
    fn reply_rules() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::HIGH, nop, 0).unwrap();
        let b = k.task_create("b", Priority::NORMAL, nop, 0).unwrap();
        let m = k.message_create().unwrap();
        let n = k.message_create().unwrap();
        assert_eq!(k.message_reply(m), Err(KernelError::NotDelivered));

        k.message_put(a, m).unwrap();
        k.message_put(b, n).unwrap();
        // Queued, not yet received.
        k.start().unwrap();
        assert_eq!(k.message_reply(m), Err(KernelError::NotHolder));
        assert_eq!(k.message_put(b, m), Err(KernelError::MessageInFlight));

        assert_eq!(k.message_get(), Ok(Wait::Ready(m)));
        // a holds m, but n belongs to b.
        assert_eq!(k.message_reply(n), Err(KernelError::NotHolder));
        k.isr_enter();
        assert_eq!(k.message_reply(m), Err(KernelError::NotHolder));
        k.isr_exit();
        k.message_reply(m).unwrap();
        assert_eq!(k.message_reply(m), Err(KernelError::NotDelivered));
        assert_eq!(k.message_reply(MessageId(0xffff)), Err(KernelError::BadMessage));
    }

    #[test]
    fn put_to_bad_targets() {
        let mut k = initialized();
        let m = k.message_create().unwrap();
        assert_eq!(
            k.message_put(TaskId(0x0001_0000), m),
            Err(KernelError::BadTask)
        );
        assert_eq!(k.message_put(TaskId(7), m), Err(KernelError::BadTask));
        k.message_free(m).unwrap();
        assert_eq!(k.message_put(TaskId::INIT, m), Err(KernelError::BadMessage));
    }

    /// Payloads survive a full put/get/reply cycle verbatim, and the envelope
    /// can go round again.
    #[test]
    fn reuse_after_reply() {
        let mut k = initialized();
        let a = k.task_create("a", Priority::NORMAL, nop, 0).unwrap();
        let m = k.message_create().unwrap();
        let data = [1u32, 2, 3];
        let payload = Payload::from_ptr(data.as_ptr());
        k.message_set_data(m, payload).unwrap();
        k.start().unwrap();
        assert_eq!(k.task_self(), Ok(a));

        for _ in 0..3 {
            k.message_put(a, m).unwrap();
            assert_eq!(k.message_ownership(m), Ok(Ownership::HeldByReceiver));
            assert_eq!(k.message_get(), Ok(Wait::Ready(m)));
            assert_eq!(k.message_get_data(m), Ok(payload));
            k.message_reply(m).unwrap();
            assert_eq!(k.message_ownership(m), Ok(Ownership::HeldBySender));
            assert_eq!(k.message_get_data(m), Ok(payload));
        }
        assert_eq!(k.message_get_data(m).unwrap().as_ptr::<u32>(), data.as_ptr());
    }

    proptest! {
        /// Messages come out of a mailbox in the order they went in, whether
        /// put from task or interrupt context.
        #[test]
        fn mailbox_is_fifo(
            puts in prop::collection::vec((any::<usize>(), any::<bool>()), 1..48)
        ) {
            let mut k = initialized();
            let rx = k.task_create("rx", Priority::NORMAL, nop, 0).unwrap();
            k.start().unwrap();
            prop_assert_eq!(k.task_self(), Ok(rx));

            let mut sent = Vec::new();
            for &(addr, from_isr) in &puts {
                let m = k.message_create().unwrap();
                k.message_set_data(m, Payload::from_addr(addr)).unwrap();
                if from_isr {
                    k.isr_enter();
                    k.message_put_isr(rx, m).unwrap();
                    k.isr_exit();
                } else {
                    k.message_put(rx, m).unwrap();
                }
                sent.push((m, addr));
            }
            prop_assert_eq!(k.mailbox_len(rx), Ok(sent.len()));

            for &(m, addr) in &sent {
                prop_assert_eq!(k.message_get(), Ok(Wait::Ready(m)));
                prop_assert_eq!(k.message_get_data(m), Ok(Payload::from_addr(addr)));
                k.message_reply(m).unwrap();
            }
            prop_assert_eq!(k.task_self(), Ok(rx));
        }

        /// Waiting never clears bits outside the mask, and a satisfiable wait
        /// returns exactly the overlap.
        #[test]
        fn wait_clears_only_the_overlap(pending: u8, mask: u8) {
            let mut k = initialized();
            let a = k.task_create("a", Priority::NORMAL, nop, 0).unwrap();
            k.start().unwrap();
            k.task_signal(a, Signal::from_bits_retain(pending)).unwrap();

            let overlap = pending & mask;
            let r = k.task_wait(Signal::from_bits_retain(mask));
            if overlap != 0 {
                prop_assert_eq!(r, Ok(Wait::Ready(Signal::from_bits_retain(overlap))));
                prop_assert_eq!(
                    k.task_info(a).unwrap().pending_signals,
                    pending & !mask
                );
            } else {
                prop_assert_eq!(r, Ok(Wait::Blocked));
                prop_assert_eq!(k.task_info(a).unwrap().pending_signals, pending);
            }
        }
    }
}
