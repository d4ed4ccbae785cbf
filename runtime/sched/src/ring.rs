//! Work ring - fixed-capacity FIFO of deferred work items
//!
//! Each priority class owns one ring. The producer writes at
//! `work_index % capacity` and advances `work_index`; the worker consumes
//! from `head`. A full ring refuses the push instead of overwriting a slot
//! the worker has not consumed yet.

use crate::WorkItem;

pub(crate) struct WorkRing {
    /// Slot storage
    slots: Box<[Option<WorkItem>]>,

    /// Next slot the worker consumes
    head: usize,

    /// Occupied slots
    len: usize,

    /// Total items ever pushed; the next slot is `work_index % capacity`
    work_index: u64,
}

impl WorkRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            work_index: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Push an item; returns the slot it landed in
    ///
    /// # Errors
    /// Hands the item back if the ring is full. No slot is modified.
    pub(crate) fn push(&mut self, item: WorkItem) -> Result<usize, WorkItem> {
        if self.is_full() {
            return Err(item);
        }

        let slot = (self.work_index % self.slots.len() as u64) as usize;
        debug_assert_eq!(slot, (self.head + self.len) % self.slots.len());

        self.slots[slot] = Some(item);
        self.work_index += 1;
        self.len += 1;

        Ok(slot)
    }

    /// Pop the oldest item
    pub(crate) fn pop(&mut self) -> Option<WorkItem> {
        if self.is_empty() {
            return None;
        }

        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;

        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Priority;
    use std::sync::Arc;

    fn item(arg: usize) -> WorkItem {
        WorkItem {
            priority: Priority::FIRST,
            func: Arc::new(|_| {}),
            arg,
        }
    }

    #[test]
    fn test_ring_fifo_and_wrap() {
        let mut ring = WorkRing::new(4);

        for round in 0..3 {
            for i in 0..4 {
                let slot = ring.push(item(round * 10 + i)).ok().unwrap();
                assert_eq!(slot, i);
            }
            assert!(ring.is_full());

            for i in 0..4 {
                assert_eq!(ring.pop().unwrap().arg, round * 10 + i);
            }
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_ring_full_rejects_without_overwrite() {
        let mut ring = WorkRing::new(2);
        ring.push(item(1)).ok().unwrap();
        ring.push(item(2)).ok().unwrap();

        let rejected = ring.push(item(3)).err().unwrap();
        assert_eq!(rejected.arg, 3);
        assert_eq!(ring.len(), 2);

        assert_eq!(ring.pop().unwrap().arg, 1);
        assert_eq!(ring.pop().unwrap().arg, 2);
        assert!(ring.pop().is_none());
    }

    #[test]
    fn test_ring_slot_follows_work_index() {
        let mut ring = WorkRing::new(3);

        ring.push(item(0)).ok().unwrap();
        ring.push(item(1)).ok().unwrap();
        ring.pop();
        ring.pop();

        // work_index is 2, so the next push lands in slot 2 and then wraps
        assert_eq!(ring.push(item(2)).ok().unwrap(), 2);
        assert_eq!(ring.push(item(3)).ok().unwrap(), 0);
        assert_eq!(ring.capacity(), 3);
    }
}
