// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel object and the scheduler.
//!
//! A `Kernel` holds everything the kernel knows: both tables, the ready
//! queue, which task owns the CPU, and interrupt bookkeeping. Operations on
//! tasks, messages and signals are implemented as `impl Kernel` blocks in
//! their own modules; this one covers bootstrap and scheduling.
//!
//! Every operation is performed on behalf of the *running* task (or an
//! interrupt handler, between `isr_enter` and `isr_exit`). When an operation
//! changes which task should run, `reschedule` updates the kernel's notion
//! of the running task and hands the new context to `arch::switch_to`; the
//! real switch happens once the kernel call returns.

use abi::{KernelError, MessageId, Phase, Priority, TaskId, TaskState};

use crate::arch;
use crate::config::{Config, MAX_HANDLES, TRACE_DEPTH};
use crate::msg::Message;
use crate::ready::ReadyQueue;
use crate::table::Table;
use crate::task::{NextTask, Task};
use crate::trace::{Ringbuf, Trace};

#[derive(Debug)]
pub struct Kernel {
    pub(crate) config: Config,
    pub(crate) phase: Phase,
    pub(crate) tasks: Table<TaskId, Task>,
    pub(crate) messages: Table<MessageId, Message>,
    pub(crate) ready: ReadyQueue,
    /// Task-table index of the task that owns the CPU. `None` only before
    /// `init`.
    pub(crate) running: Option<usize>,
    pub(crate) isr_depth: u32,
    pub(crate) reschedule_pending: bool,
    pub(crate) trace: Ringbuf<Trace, TRACE_DEPTH>,
}

impl Kernel {
    pub fn new(config: Config) -> Self {
        let config = Config {
            max_tasks: config.max_tasks.min(MAX_HANDLES),
            max_messages: config.max_messages.min(MAX_HANDLES),
        };
        Kernel {
            config,
            phase: Phase::Uninitialized,
            tasks: Table::new(config.max_tasks),
            messages: Table::new(config.max_messages),
            ready: ReadyQueue::new(),
            running: None,
            isr_depth: 0,
            reschedule_pending: false,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Brings up the kernel, adopting the caller as the init task.
    ///
    /// The init task always gets `TaskId::INIT`. It runs at `Priority::IDLE`
    /// and doubles as the idle task once scheduling starts, which is why it
    /// may never block, exit, or be freed.
    pub fn init(&mut self) -> Result<TaskId, KernelError> {
        if self.phase != Phase::Uninitialized {
            refuse!(self, KernelError::AlreadyInitialized);
        }
        // Reserve link storage first so a failure leaves nothing behind.
        if let Err(e) = self.ready.reserve(TaskId::INIT.index()) {
            refuse!(self, e);
        }
        let init = Task::new(
            "init",
            Priority::IDLE,
            arch::init_context(),
            TaskState::Running,
        );
        let id = match self.tasks.insert(init) {
            Ok(id) => id,
            Err(e) => refuse!(self, e),
        };
        self.running = Some(id.index());
        self.phase = Phase::Initialized;
        trace!(self, Trace::Init);
        klog!("kernel: initialized, {} tasks max", self.config.max_tasks);
        Ok(id)
    }

    /// Ends the setup phase and starts scheduling.
    ///
    /// The init task goes to the back of the ready queue, behind every task
    /// created during setup, and the most important task takes over. Returns
    /// the init task's id; on a real port, this call returns to the caller
    /// only once the init task is next scheduled.
    pub fn start(&mut self) -> Result<TaskId, KernelError> {
        match self.phase {
            Phase::Uninitialized => refuse!(self, KernelError::NotInitialized),
            Phase::Running => refuse!(self, KernelError::AlreadyStarted),
            Phase::Initialized => (),
        }
        self.phase = Phase::Running;
        trace!(self, Trace::Start);
        klog!("kernel: starting with {} ready tasks", self.ready.len());

        let init = TaskId::INIT.index();
        let priority = self.tasks[init].priority();
        self.tasks[init].state = TaskState::Ready;
        self.ready.insert(init, priority);
        self.reschedule();
        Ok(TaskId::INIT)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    pub fn in_interrupt(&self) -> bool {
        self.isr_depth != 0
    }

    /// Tasks in the ready queue, in the order they would be dispatched.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready.iter().map(move |index| self.current_id(index))
    }

    /// Notes entry into an interrupt handler. Handlers may nest.
    pub fn isr_enter(&mut self) {
        self.isr_depth += 1;
    }

    /// Notes exit from an interrupt handler. Leaving the outermost handler
    /// runs any reschedule deferred while inside.
    pub fn isr_exit(&mut self) {
        if self.isr_depth == 0 {
            klog!("kernel: isr_exit outside interrupt");
            return;
        }
        self.isr_depth -= 1;
        self.port_reschedule();
    }

    /// Runs a deferred reschedule, if one is pending and we're back in task
    /// context.
    pub fn port_reschedule(&mut self) {
        if self.reschedule_pending && !self.in_interrupt() {
            self.reschedule();
        }
    }

    /// Acts on a scheduling hint.
    pub(crate) fn dispatch(&mut self, hint: NextTask) {
        match hint {
            NextTask::Same => (),
            NextTask::Other => self.reschedule(),
        }
    }

    /// Records that a reschedule is needed without performing it.
    pub(crate) fn defer_reschedule(&mut self) {
        self.reschedule_pending = true;
        arch::request_reschedule();
        trace!(self, Trace::Deferred);
    }

    /// Makes the most important ready task the running one, if it should be.
    ///
    /// A running task keeps the CPU unless a ready task is strictly more
    /// important; if it loses it, it goes back to the *front* of its priority
    /// level, so preemption never reorders tasks of equal priority.
    /// A running task that has blocked or exited is simply replaced by the
    /// head of the ready queue. In interrupt context the decision is deferred
    /// until the outermost `isr_exit`.
    pub(crate) fn reschedule(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        if self.in_interrupt() {
            self.defer_reschedule();
            return;
        }
        self.reschedule_pending = false;

        let current = self.running;
        if let Some(cur) = current {
            let cur_priority = self.tasks[cur].priority();
            if self.tasks[cur].state() == TaskState::Running {
                match self.ready.peek() {
                    Some(next)
                        if self.tasks[next]
                            .priority()
                            .is_more_important_than(cur_priority) =>
                    {
                        self.tasks[cur].state = TaskState::Ready;
                        self.ready.push_front(cur, cur_priority);
                    }
                    _ => return,
                }
            }
        }

        // The init task never blocks, so the queue can't be empty here.
        let next = match self.ready.pop() {
            Some(next) => next,
            None => panic!("no runnable task"),
        };
        self.switch(current, next);
    }

    fn switch(&mut self, from: Option<usize>, to: usize) {
        let task = &mut self.tasks[to];
        task.state = TaskState::Running;
        task.collect_signals();
        self.running = Some(to);
        if from == Some(to) {
            return;
        }
        arch::switch_to(self.tasks[to].context());
        trace!(
            self,
            Trace::Switch {
                from: from.and_then(|i| self.tasks.id_of(i)),
                to: self.current_id(to),
            }
        );
    }

    /// Produces the current `TaskId` for the task at `index`, which must be
    /// occupied.
    pub(crate) fn current_id(&self, index: usize) -> TaskId {
        match self.tasks.id_of(index) {
            Some(id) => id,
            None => panic!("no task at index {index}"),
        }
    }
}
