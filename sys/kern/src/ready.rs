// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The ready queue.
//!
//! One FIFO per priority level, threaded through per-task link records, plus a
//! bitmap of non-empty levels. Finding the next task to run is a scan of
//! eight words from the top; everything else is O(1).
//!
//! Tasks are identified here by task-table index. The caller is responsible
//! for only queueing live tasks, and for removing a task before its slot is
//! freed.

use alloc::vec::Vec;

use abi::{KernelError, Priority};

const NIL: u16 = u16::MAX;
const LEVELS: usize = Priority::LEVELS;
const WORDS: usize = LEVELS / 32;

#[derive(Copy, Clone, Debug)]
struct Link {
    prev: u16,
    next: u16,
    level: u8,
    queued: bool,
}

impl Link {
    const UNQUEUED: Self = Link {
        prev: NIL,
        next: NIL,
        level: 0,
        queued: false,
    };
}

#[derive(Debug)]
pub struct ReadyQueue {
    bitmap: [u32; WORDS],
    heads: [u16; LEVELS],
    tails: [u16; LEVELS],
    links: Vec<Link>,
    len: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        ReadyQueue {
            bitmap: [0; WORDS],
            heads: [NIL; LEVELS],
            tails: [NIL; LEVELS],
            links: Vec::new(),
            len: 0,
        }
    }

    /// Ensures there is link storage for task `index`, so that a later
    /// `insert` cannot fail.
    pub fn reserve(&mut self, index: usize) -> Result<(), KernelError> {
        if index >= self.links.len() {
            self.links
                .try_reserve(index + 1 - self.links.len())
                .map_err(|_| KernelError::OutOfMemory)?;
            self.links.resize(index + 1, Link::UNQUEUED);
        }
        Ok(())
    }

    /// Appends task `index` to the tail of its priority level.
    ///
    /// # Panics
    ///
    /// If `index` was never reserved or is already queued.
    pub fn insert(&mut self, index: usize, priority: Priority) {
        let level = priority.level();
        let tail = self.tails[level];
        let link = &mut self.links[index];
        assert!(!link.queued, "task {index} queued twice");
        *link = Link {
            prev: tail,
            next: NIL,
            level: level as u8,
            queued: true,
        };
        if tail == NIL {
            self.heads[level] = index as u16;
            self.bitmap[level / 32] |= 1 << (level % 32);
        } else {
            self.links[usize::from(tail)].next = index as u16;
        }
        self.tails[level] = index as u16;
        self.len += 1;
    }

    /// Puts task `index` at the head of its priority level, ahead of tasks
    /// that are already waiting there.
    ///
    /// # Panics
    ///
    /// If `index` was never reserved or is already queued.
    pub fn push_front(&mut self, index: usize, priority: Priority) {
        let level = priority.level();
        let head = self.heads[level];
        let link = &mut self.links[index];
        assert!(!link.queued, "task {index} queued twice");
        *link = Link {
            prev: NIL,
            next: head,
            level: level as u8,
            queued: true,
        };
        if head == NIL {
            self.tails[level] = index as u16;
            self.bitmap[level / 32] |= 1 << (level % 32);
        } else {
            self.links[usize::from(head)].prev = index as u16;
        }
        self.heads[level] = index as u16;
        self.len += 1;
    }

    /// Unlinks task `index`, returning whether it was queued.
    pub fn remove(&mut self, index: usize) -> bool {
        let link = match self.links.get(index) {
            Some(link) if link.queued => *link,
            _ => return false,
        };
        let level = usize::from(link.level);
        if link.prev == NIL {
            self.heads[level] = link.next;
        } else {
            self.links[usize::from(link.prev)].next = link.next;
        }
        if link.next == NIL {
            self.tails[level] = link.prev;
        } else {
            self.links[usize::from(link.next)].prev = link.prev;
        }
        if self.heads[level] == NIL {
            self.bitmap[level / 32] &= !(1 << (level % 32));
        }
        self.links[index] = Link::UNQUEUED;
        self.len -= 1;
        true
    }

    fn top_level(&self) -> Option<usize> {
        self.bitmap
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &word)| word != 0)
            .map(|(w, &word)| w * 32 + 31 - word.leading_zeros() as usize)
    }

    /// The task that should run next: head of the most important non-empty
    /// level.
    pub fn peek(&self) -> Option<usize> {
        self.top_level().map(|level| usize::from(self.heads[level]))
    }

    pub fn pop(&mut self) -> Option<usize> {
        let index = self.peek()?;
        self.remove(index);
        Some(index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.links.get(index).is_some_and(|l| l.queued)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Walks the queue in dispatch order: most important level first, FIFO
    /// within a level.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..LEVELS).rev().flat_map(move |level| {
            let mut cursor = self.heads[level];
            core::iter::from_fn(move || {
                if cursor == NIL {
                    return None;
                }
                let index = usize::from(cursor);
                cursor = self.links[index].next;
                Some(index)
            })
        })
    }
}
