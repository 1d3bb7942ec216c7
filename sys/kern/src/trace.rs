// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel event trace.
//!
//! Every kernel instance carries a small ring of recent scheduling and
//! messaging events, meant to be read out with a debugger (or by tests) when
//! something goes wrong. Consecutive identical events from the same source
//! line are merged into one entry with a count, so a task spinning on a
//! refused call doesn't wipe out the interesting history.
//!
//! Recording can be compiled out with the `trace-disabled` feature; the ring
//! itself stays so that its layout doesn't depend on features.

use abi::{KernelError, MessageId, Signal, TaskId};

/// One traced kernel event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Init,
    Start,
    Create(TaskId),
    Free(TaskId),
    Exit(TaskId),
    Priority(TaskId, i8),
    WaitSignal(TaskId, Signal),
    WaitMessage(TaskId),
    Wake(TaskId),
    Switch { from: Option<TaskId>, to: TaskId },
    Deferred,
    Signal(TaskId, Signal),
    Put { dst: TaskId, msg: MessageId, isr: bool },
    Get(TaskId, MessageId),
    Reply(MessageId),
    Refused(KernelError),
}

#[derive(Copy, Clone, Debug)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of the last `N` distinct entries.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub fn new(init: T) -> Self {
        Ringbuf {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // Treating None as usize::MAX makes the first entry land in slot 0
        // below, and never matches an existing entry.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Iterates over recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.count != 0)
    }

    /// Iterates over recorded payloads, oldest first, expanding merged
    /// entries.
    pub fn events(&self) -> impl Iterator<Item = T> + '_ {
        self.iter().flat_map(|ent| {
            core::iter::repeat(ent.payload).take(ent.count as usize)
        })
    }
}

/// Records an event in a kernel's trace ring, tagged with the source line.
#[cfg(not(feature = "trace-disabled"))]
macro_rules! trace {
    ($k:expr, $ev:expr) => {{
        let ev = $ev;
        $crate::trace::Ringbuf::entry(&mut $k.trace, line!() as u16, ev);
    }};
}

#[cfg(feature = "trace-disabled")]
macro_rules! trace {
    ($k:expr, $ev:expr) => {{
        let _ = &$k;
        let _ = $ev;
    }};
}

/// Traces and logs a refused operation, then returns the error from the
/// enclosing function.
macro_rules! refuse {
    ($k:expr, $err:expr) => {{
        let err: abi::KernelError = $err;
        trace!($k, $crate::trace::Trace::Refused(err));
        klog!("kernel: refused: {:?}", err);
        return Err(err);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_merged() {
        let mut rb: Ringbuf<u8, 4> = Ringbuf::new(0);
        rb.entry(10, 1);
        rb.entry(10, 1);
        rb.entry(11, 1);
        let ents: Vec<_> = rb.iter().map(|e| (e.line, e.count)).collect();
        assert_eq!(ents, [(10, 2), (11, 1)]);
        assert_eq!(rb.events().collect::<Vec<_>>(), [1, 1, 1]);
    }

    #[test]
    fn wraps_oldest_first() {
        let mut rb: Ringbuf<u8, 3> = Ringbuf::new(0);
        for i in 1..=5 {
            rb.entry(1, i);
        }
        assert_eq!(rb.events().collect::<Vec<_>>(), [3, 4, 5]);
        // Slot 0 has been written twice.
        assert_eq!(rb.buffer[0].generation, 2);
    }

    #[test]
    fn empty() {
        let rb: Ringbuf<Trace, 8> = Ringbuf::new(Trace::None);
        assert_eq!(rb.iter().count(), 0);
    }
}
