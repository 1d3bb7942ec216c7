// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.

use alloc::collections::VecDeque;

use abi::{
    KernelError, MessageId, Phase, Priority, Signal, TaskEntry, TaskId,
    TaskInfo, TaskState,
};

use crate::arch;
use crate::kernel::Kernel;
use crate::msg::Holder;
use crate::trace::Trace;

/// Internal representation of a task.
#[derive(Debug)]
pub struct Task {
    name: &'static str,
    priority: Priority,
    pub(crate) state: TaskState,
    context: arch::Context,
    /// Messages put to this task and not yet received, oldest first.
    pub(crate) mailbox: VecDeque<MessageId>,
    /// Pending signal bits.
    signals: Signal,
    /// Bits that will wake the task while it is `BlockedOnSignal`. Stays set
    /// after the wake until the task runs and collects its signals.
    wait_mask: Signal,
    /// What the last wake delivered, if not yet collected.
    pub(crate) wakeup: Option<Wakeup>,
    /// Number of messages received and not yet replied to.
    pub(crate) held: u32,
}

/// The result handed to a task that was blocked and has been woken.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wakeup {
    /// The signals that satisfied a `task_wait`. They have already been
    /// cleared from the pending set.
    Signals(Signal),
    /// A message delivered to a `message_get`.
    Message(MessageId),
}

impl Task {
    pub(crate) fn new(
        name: &'static str,
        priority: Priority,
        context: arch::Context,
        state: TaskState,
    ) -> Self {
        Task {
            name,
            priority,
            state,
            context,
            mailbox: VecDeque::new(),
            signals: Signal::empty(),
            wait_mask: Signal::empty(),
            wakeup: None,
            held: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn context(&self) -> &arch::Context {
        &self.context
    }

    pub fn pending_signals(&self) -> Signal {
        self.signals
    }

    /// Posts signal bits to this task.
    ///
    /// If the task is blocked waiting on any of the posted bits it becomes
    /// `Ready` and this returns `true`; the caller is then responsible for
    /// putting it on the ready queue. The bits stay pending until the task
    /// next runs (see `collect_signals`), so anything posted in between is
    /// delivered with them.
    #[must_use]
    pub fn post(&mut self, sig: Signal) -> bool {
        self.signals |= sig;

        if self.state == TaskState::BlockedOnSignal
            && self.signals.intersects(self.wait_mask)
        {
            self.state = TaskState::Ready;
            return true;
        }
        false
    }

    /// Completes a signal wait as the task is given the CPU: consumes the
    /// pending bits in the wait mask into the task's wakeup.
    pub(crate) fn collect_signals(&mut self) {
        if self.wait_mask.is_empty() {
            return;
        }
        if let Some(firing) = self.take_signals(self.wait_mask) {
            self.wakeup = Some(Wakeup::Signals(firing));
        }
        self.wait_mask = Signal::empty();
    }

    /// Clears and returns the pending bits in `mask`, if there are any.
    pub fn take_signals(&mut self, mask: Signal) -> Option<Signal> {
        let firing = self.signals & mask;
        if firing.is_empty() {
            None
        } else {
            self.signals.remove(firing);
            Some(firing)
        }
    }

    /// Records that the task is about to block on `mask`.
    pub(crate) fn block_on_signals(&mut self, mask: Signal) {
        self.wait_mask = mask;
        self.wakeup = None;
        self.state = TaskState::BlockedOnSignal;
    }
}

/// Return value for operations that can have scheduling implications. This is
/// marked `must_use` because forgetting to actually update the scheduler
/// after performing an operation that requires it would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// It's fine to keep running whatever task we were just running.
    Same,
    /// The set of ready tasks changed in a way that may call for a switch.
    /// The scheduler needs to figure it out.
    Other,
}

impl Kernel {
    /// Creates a task that will start at `entry` with at least `stacksize`
    /// bytes of stack, and makes it ready.
    ///
    /// Only legal between `init` and `start`. Never switches.
    pub fn task_create(
        &mut self,
        name: &'static str,
        priority: Priority,
        entry: TaskEntry,
        stacksize: usize,
    ) -> Result<TaskId, KernelError> {
        match self.phase {
            Phase::Uninitialized => refuse!(self, KernelError::NotInitialized),
            Phase::Running => refuse!(self, KernelError::AlreadyStarted),
            Phase::Initialized => (),
        }
        let Some(context) = arch::create_context(entry, stacksize) else {
            refuse!(self, KernelError::OutOfMemory);
        };
        let task = Task::new(name, priority, context, TaskState::Ready);
        let id = match self.tasks.insert(task) {
            Ok(id) => id,
            Err(e) => refuse!(self, e),
        };
        if let Err(e) = self.ready.reserve(id.index()) {
            self.tasks.remove(id);
            refuse!(self, e);
        }
        self.ready.insert(id.index(), priority);
        trace!(self, Trace::Create(id));
        klog!("kernel: created task {} ({:?}) as {:?}", name, priority, id);
        Ok(id)
    }

    /// Releases a task and its context.
    ///
    /// Refused for the running task, the init task, a task with messages
    /// waiting in its mailbox, and a task holding messages it hasn't replied
    /// to.
    pub fn task_free(&mut self, id: TaskId) -> Result<(), KernelError> {
        let Some(index) = self.tasks.check(id) else {
            refuse!(self, KernelError::BadTask);
        };
        if id == TaskId::INIT {
            refuse!(self, KernelError::InitTask);
        }
        if self.running == Some(index) {
            refuse!(self, KernelError::TaskRunning);
        }
        let task = &self.tasks[index];
        if !task.mailbox.is_empty() {
            refuse!(self, KernelError::MailboxNotEmpty);
        }
        if task.held != 0 {
            refuse!(self, KernelError::MessagesOutstanding);
        }
        self.ready.remove(index);
        self.tasks.remove(id);
        trace!(self, Trace::Free(id));
        Ok(())
    }

    /// Terminates the running task.
    ///
    /// Messages waiting in its mailbox, or received and not replied to, go
    /// back to their senders: nobody will ever process them now.
    pub fn task_exit(&mut self) -> Result<(), KernelError> {
        let Some(index) = self.running else {
            refuse!(self, KernelError::NotInitialized);
        };
        if self.in_interrupt() {
            refuse!(self, KernelError::InInterrupt);
        }
        if index == TaskId::INIT.index() {
            refuse!(self, KernelError::InitTask);
        }
        let task = &mut self.tasks[index];
        task.state = TaskState::Terminated;
        task.mailbox.clear();
        task.held = 0;
        task.wakeup = None;
        for (_, message) in self.messages.iter_mut() {
            if matches!(
                message.holder,
                Holder::Queued(i) | Holder::Receiver(i) if i == index
            ) {
                message.holder = Holder::Sender;
            }
        }
        trace!(self, Trace::Exit(self.current_id(index)));
        self.reschedule();
        Ok(())
    }

    /// The running task.
    pub fn task_self(&self) -> Result<TaskId, KernelError> {
        self.running
            .map(|index| self.current_id(index))
            .ok_or(KernelError::NotInitialized)
    }

    pub fn task_get_priority(&self, id: TaskId) -> Result<Priority, KernelError> {
        self.tasks
            .get(id)
            .map(Task::priority)
            .ok_or(KernelError::BadTask)
    }

    /// Changes a task's priority, preempting right away if that makes a
    /// ready task more important than the running one.
    pub fn task_set_priority(
        &mut self,
        id: TaskId,
        priority: Priority,
    ) -> Result<(), KernelError> {
        let Some(index) = self.tasks.check(id) else {
            refuse!(self, KernelError::BadTask);
        };
        let task = &mut self.tasks[index];
        if task.priority == priority {
            return Ok(());
        }
        task.priority = priority;
        if self.ready.remove(index) {
            self.ready.insert(index, priority);
        }
        trace!(self, Trace::Priority(id, priority.0));
        self.dispatch(NextTask::Other);
        Ok(())
    }

    pub fn task_state(&self, id: TaskId) -> Result<TaskState, KernelError> {
        self.tasks.get(id).map(Task::state).ok_or(KernelError::BadTask)
    }

    /// Number of messages waiting in a task's mailbox.
    pub fn mailbox_len(&self, id: TaskId) -> Result<usize, KernelError> {
        self.tasks
            .get(id)
            .map(|t| t.mailbox.len())
            .ok_or(KernelError::BadTask)
    }

    pub fn task_info(&self, id: TaskId) -> Result<TaskInfo, KernelError> {
        let task = self.tasks.get(id).ok_or(KernelError::BadTask)?;
        Ok(TaskInfo {
            id,
            name: task.name,
            priority: task.priority,
            state: task.state,
            pending_signals: task.signals.bits(),
            mailbox_len: task.mailbox.len(),
        })
    }

    /// Collects what woke a task from its last blocking call. Each wakeup is
    /// handed out once.
    pub fn take_wakeup(
        &mut self,
        id: TaskId,
    ) -> Result<Option<Wakeup>, KernelError> {
        match self.tasks.get_mut(id) {
            Some(task) => Ok(task.wakeup.take()),
            None => refuse!(self, KernelError::BadTask),
        }
    }
}
