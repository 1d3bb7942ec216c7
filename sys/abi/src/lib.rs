// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between kernel and applications.

#![no_std]

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Signature of a task entry point.
pub type TaskEntry = fn();

/// Type used to track generation numbers of table slots.
///
/// A slot's generation is bumped every time its occupant is freed, so that
/// handles naming the previous occupant stop working instead of silently
/// referring to whatever was allocated next.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Generation(u16);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl From<u16> for Generation {
    fn from(x: u16) -> Self {
        Self(x)
    }
}

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines two fields, a task index (the slot the task occupies
/// in the kernel's task table) and a generation number. The generation number
/// of a slot is incremented when its task is freed, so an id held past
/// `task_free` is rejected by the kernel rather than aliasing a newer task.
///
/// The task index is in the lower `TaskId::INDEX_BITS` bits, while the
/// generation is in the remaining top bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TaskId(pub u32);

impl TaskId {
    /// The init task always occupies slot 0 and is never freed, so its id
    /// never changes.
    pub const INIT: Self = Self(0);

    /// Number of bits in a `TaskId` used to represent task index, rather than
    /// generation number.
    pub const INDEX_BITS: u32 = 16;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId(
            (index as u32 & Self::INDEX_MASK) | (gen.0 as u32) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u16)
    }
}

/// Names a particular incarnation of a message envelope. Same layout as
/// `TaskId`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MessageId(pub u32);

impl MessageId {
    pub const INDEX_BITS: u32 = 16;
    pub const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        MessageId(
            (index as u32 & Self::INDEX_MASK) | (gen.0 as u32) << Self::INDEX_BITS,
        )
    }

    pub fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u16)
    }
}

const_assert_eq!(core::mem::size_of::<TaskId>(), 4);
const_assert_eq!(core::mem::size_of::<MessageId>(), 4);

/// Indicates priority of a task.
///
/// Priorities are signed 8-bit numbers. Numerically *greater* priorities are
/// more important, so `i8::MAX` is the most likely to be scheduled and
/// `Priority::IDLE` (`i8::MIN`) the least.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`, to
/// keep us from confusing ourselves on whether `>` means numerically greater or
/// more important. Use `is_more_important_than`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Priority(pub i8);

impl Priority {
    pub const IDLE: Self = Self(i8::MIN);
    pub const LOW: Self = Self(i8::MIN / 2);
    pub const NORMAL: Self = Self(0);
    pub const HIGH: Self = Self(i8::MAX / 2);

    /// Number of distinct priority levels.
    pub const LEVELS: usize = 256;

    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Maps this priority onto `0..LEVELS`, where level 0 is `IDLE` and
    /// larger levels are more important.
    pub const fn level(self) -> usize {
        (self.0 as i16 - i8::MIN as i16) as usize
    }

    /// Inverse of `level`. Levels out of range are truncated to 8 bits.
    pub const fn from_level(level: usize) -> Self {
        Self((level as i16 + i8::MIN as i16) as i8)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

bitflags::bitflags! {
    /// A set of signal bits. Each task has eight of them.
    ///
    /// Bits posted to a task accumulate until the task consumes them with a
    /// matching wait, so a waiter sees the union of everything posted since its
    /// last wait, and nothing about ordering.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    #[repr(transparent)]
    pub struct Signal: u8 {
        const SIG0 = 1 << 0;
        const SIG1 = 1 << 1;
        const SIG2 = 1 << 2;
        const SIG3 = 1 << 3;
        const SIG4 = 1 << 4;
        const SIG5 = 1 << 5;
        const SIG6 = 1 << 6;
        const SIG7 = 1 << 7;
    }
}

/// Opaque reference to the data carried by a message.
///
/// The kernel stores and hands back the address verbatim; it never
/// dereferences, copies, or frees what it points to. Keeping the referent
/// alive and correctly shared is the business of the tasks exchanging it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Payload(usize);

impl Payload {
    pub const NULL: Self = Self(0);

    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// State used to make scheduling decisions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// Task currently owns the CPU. Exactly one task is in this state once the
    /// kernel has been initialized.
    Running,
    /// Task could be scheduled on the CPU, and sits in the ready queue.
    Ready,
    /// Task is blocked until a signal in its wait mask is posted.
    BlockedOnSignal,
    /// Task is blocked until a message is put into its mailbox.
    BlockedOnMessage,
    /// Task's entry function has returned. It will never be scheduled again
    /// and is waiting to be freed.
    Terminated,
}

/// Which side of an exchange may currently touch a message envelope.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Ownership {
    /// Freshly created, or replied to. The sender may reuse or free it.
    HeldBySender,
    /// Put into a mailbox and not yet replied to. Only the destination may
    /// touch it.
    HeldByReceiver,
}

/// Lifecycle of the kernel as a whole. Transitions only go forward.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Phase {
    /// No kernel data structures exist yet.
    Uninitialized,
    /// `kernel_init` has run; tasks may be created.
    Initialized,
    /// `kernel_start` has run; scheduling is live and task creation is
    /// closed.
    Running,
}

/// Snapshot of a task, for debuggers and status displays.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: &'static str,
    pub priority: Priority,
    pub state: TaskState,
    /// Raw bits of the pending signal set.
    pub pending_signals: u8,
    /// Number of messages waiting in the task's mailbox.
    pub mailbox_len: usize,
}

/// Errors reported by kernel operations.
///
/// None of these are fatal to the kernel; they indicate that the caller asked
/// for something the kernel refused to do, and the kernel state is unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KernelError {
    /// Storage for a task, context, message, or queue entry could not be
    /// obtained.
    OutOfMemory,
    /// `kernel_init` was called a second time.
    AlreadyInitialized,
    /// The operation needs `kernel_init` to have run first.
    NotInitialized,
    /// The operation is only allowed before `kernel_start` (task creation),
    /// or `kernel_start` was called a second time.
    AlreadyStarted,
    /// A blocking operation was attempted before `kernel_start`.
    NotStarted,
    /// A blocking operation was attempted from interrupt context.
    InInterrupt,
    /// A blocking call returned without the caller having been suspended and
    /// resumed, which happens on ports that do not really switch contexts.
    WouldBlock,
    /// The task to be freed is the one currently running.
    TaskRunning,
    /// The task to be freed still has undelivered messages in its mailbox.
    MailboxNotEmpty,
    /// The task to be freed still holds received messages it has not replied
    /// to.
    MessagesOutstanding,
    /// The operation is not allowed on the init task, which must remain
    /// schedulable at all times.
    InitTask,
    /// The destination task has terminated and will never receive again.
    Terminated,
    /// The message is held by a receiver and cannot be put, or freed.
    MessageInFlight,
    /// The message is held by its sender, so there is nothing to reply to.
    NotDelivered,
    /// Only the task that received a message may reply to it.
    NotHolder,
    /// The task id is out of range or names a task that has been freed.
    BadTask,
    /// The message id is out of range or names a message that has been freed.
    BadMessage,
}

/// Broad classes of `KernelError`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Storage exhausted; the caller may retry later or give up.
    Allocation,
    /// The operation is not legal in the kernel's current phase or context.
    Phase,
    /// Honoring the operation would corrupt kernel or task state.
    Invariant,
    /// A handle passed to the kernel does not name a live object.
    Handle,
}

impl KernelError {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::OutOfMemory => ErrorClass::Allocation,
            Self::AlreadyInitialized
            | Self::NotInitialized
            | Self::AlreadyStarted
            | Self::NotStarted
            | Self::InInterrupt
            | Self::WouldBlock => ErrorClass::Phase,
            Self::TaskRunning
            | Self::MailboxNotEmpty
            | Self::MessagesOutstanding
            | Self::InitTask
            | Self::Terminated
            | Self::MessageInFlight
            | Self::NotDelivered
            | Self::NotHolder => ErrorClass::Invariant,
            Self::BadTask | Self::BadMessage => ErrorClass::Handle,
        }
    }

    /// Stable, non-zero status code for this error. Zero is reserved for
    /// success; see `status`.
    pub fn code(self) -> u8 {
        match self {
            Self::OutOfMemory => 1,
            Self::AlreadyInitialized => 2,
            Self::NotInitialized => 3,
            Self::AlreadyStarted => 4,
            Self::NotStarted => 5,
            Self::InInterrupt => 6,
            Self::WouldBlock => 7,
            Self::TaskRunning => 8,
            Self::MailboxNotEmpty => 9,
            Self::MessagesOutstanding => 10,
            Self::InitTask => 11,
            Self::Terminated => 12,
            Self::MessageInFlight => 13,
            Self::NotDelivered => 14,
            Self::NotHolder => 15,
            Self::BadTask => 16,
            Self::BadMessage => 17,
        }
    }
}

impl From<KernelError> for u8 {
    fn from(e: KernelError) -> Self {
        e.code()
    }
}

/// Collapses a result into a status code: zero on success, `code()` on error.
pub fn status<T>(r: Result<T, KernelError>) -> u8 {
    match r {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}
