// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generational slot tables.
//!
//! Tasks and messages are both named by handles that pack a slot index and a
//! generation number. A slot's generation advances each time its occupant is
//! removed, so a handle that outlives its object is detected rather than
//! resolving to whatever occupies the slot next.

use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

use abi::{Generation, KernelError, MessageId, TaskId};

/// A handle type that can name a table slot.
pub trait Handle: Copy {
    fn for_index_and_gen(index: usize, gen: Generation) -> Self;
    fn index(&self) -> usize;
    fn generation(&self) -> Generation;
}

impl Handle for TaskId {
    fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId::for_index_and_gen(index, gen)
    }
    fn index(&self) -> usize {
        TaskId::index(self)
    }
    fn generation(&self) -> Generation {
        TaskId::generation(self)
    }
}

impl Handle for MessageId {
    fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        MessageId::for_index_and_gen(index, gen)
    }
    fn index(&self) -> usize {
        MessageId::index(self)
    }
    fn generation(&self) -> Generation {
        MessageId::generation(self)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: Generation,
    value: Option<T>,
}

/// A table of `T` addressed by handles of type `H`.
///
/// Storage grows on demand up to `capacity` slots, and vacated slots are
/// reused lowest-first.
#[derive(Debug)]
pub struct Table<H, T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
    live: usize,
    _handle: PhantomData<fn() -> H>,
}

impl<H: Handle, T> Table<H, T> {
    pub fn new(capacity: usize) -> Self {
        Table {
            slots: Vec::new(),
            capacity,
            live: 0,
            _handle: PhantomData,
        }
    }

    /// Stores `value` in a free slot and returns its handle.
    ///
    /// Fails with `OutOfMemory` if the table is at capacity or more storage
    /// cannot be obtained. In that case `value` is dropped.
    pub fn insert(&mut self, value: T) -> Result<H, KernelError> {
        let index = match self.slots.iter().position(|s| s.value.is_none()) {
            Some(i) => i,
            None => {
                if self.slots.len() >= self.capacity {
                    return Err(KernelError::OutOfMemory);
                }
                self.slots
                    .try_reserve(1)
                    .map_err(|_| KernelError::OutOfMemory)?;
                self.slots.push(Slot {
                    generation: Generation::ZERO,
                    value: None,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        self.live += 1;
        Ok(H::for_index_and_gen(index, slot.generation))
    }

    /// Checks `id` against the table, returning its index if it names a live
    /// entry.
    pub fn check(&self, id: H) -> Option<usize> {
        let slot = self.slots.get(id.index())?;
        (slot.value.is_some() && slot.generation == id.generation())
            .then_some(id.index())
    }

    pub fn get(&self, id: H) -> Option<&T> {
        let index = self.check(id)?;
        self.slots[index].value.as_ref()
    }

    pub fn get_mut(&mut self, id: H) -> Option<&mut T> {
        let index = self.check(id)?;
        self.slots[index].value.as_mut()
    }

    /// Removes the entry named by `id`, retiring the handle.
    pub fn remove(&mut self, id: H) -> Option<T> {
        let index = self.check(id)?;
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.next();
        self.live -= 1;
        slot.value.take()
    }

    /// Produces the current handle for an occupied slot.
    pub fn id_of(&self, index: usize) -> Option<H> {
        let slot = self.slots.get(index)?;
        slot.value
            .as_ref()
            .map(|_| H::for_index_and_gen(index, slot.generation))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates over occupied slots in index order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.value.as_mut().map(|v| (i, v)))
    }
}

/// Direct access by index, for indices the kernel has already validated.
/// Indexing a vacant slot is a kernel bug and panics.
impl<H, T> Index<usize> for Table<H, T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match &self.slots[index].value {
            Some(v) => v,
            None => panic!("vacant slot {index}"),
        }
    }
}

impl<H, T> IndexMut<usize> for Table<H, T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        match &mut self.slots[index].value {
            Some(v) => v,
            None => panic!("vacant slot {index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_are_rejected() {
        let mut t: Table<MessageId, &str> = Table::new(4);
        let a = t.insert("a").unwrap();
        assert_eq!(t.get(a), Some(&"a"));
        assert_eq!(t.remove(a), Some("a"));
        assert_eq!(t.get(a), None);
        assert_eq!(t.remove(a), None);

        // The slot is reused, but under a new generation.
        let b = t.insert("b").unwrap();
        assert_eq!(b.index(), a.index());
        assert_ne!(b, a);
        assert_eq!(t.get(a), None);
        assert_eq!(t.get(b), Some(&"b"));
    }

    #[test]
    fn out_of_range_handle() {
        let t: Table<TaskId, u32> = Table::new(4);
        assert_eq!(t.check(TaskId::for_index_and_gen(3, Generation::ZERO)), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut t: Table<TaskId, u32> = Table::new(2);
        let first = t.insert(1).unwrap();
        t.insert(2).unwrap();
        assert_eq!(t.insert(3), Err(KernelError::OutOfMemory));
        assert_eq!(t.len(), 2);

        t.remove(first).unwrap();
        let again = t.insert(3).unwrap();
        assert_eq!(again.index(), 0);
        assert_eq!(t[0], 3);
    }

    #[test]
    fn first_insert_is_index_zero_generation_zero() {
        let mut t: Table<TaskId, ()> = Table::new(1);
        assert_eq!(t.insert(()).unwrap(), TaskId::INIT);
        assert_eq!(t.id_of(0), Some(TaskId::INIT));
        assert_eq!(t.id_of(1), None);
    }
}
