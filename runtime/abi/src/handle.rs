//! Handle tables for firmware-owned host objects
//!
//! Firmware never sees a host pointer. Every semaphore, lock and timer it
//! creates is named by a non-zero 32-bit handle: the low 16 bits are the
//! slot number plus one, the high 16 bits a generation that changes each
//! time the slot is reused, so a stale handle is detected instead of
//! aliasing a newer object.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{AbiError, Result};

/// Firmware-visible object handle; 0 is the null handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn new(slot: usize, generation: u16) -> Self {
        Handle(((generation as u32) << 16) | (slot as u32 + 1))
    }

    /// `None` when the slot bits are zero
    fn slot(self) -> Option<usize> {
        ((self.0 & 0xFFFF) as usize).checked_sub(1)
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Maximum live objects per table
pub const MAX_HANDLES: usize = 0xFFFF;

struct Slot<T> {
    generation: u16,
    entry: Option<Arc<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    /// Slots released by `remove`, reused first
    free: Vec<usize>,
}

/// One table per object kind
pub struct HandleTable<T> {
    kind: &'static str,
    inner: Mutex<Slots<T>>,
}

impl<T> HandleTable<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Store `value` and return its handle
    ///
    /// Returns `None` when every slot is live.
    pub fn insert(&self, value: T) -> Option<Handle> {
        let mut inner = self.inner.lock();
        let entry = Some(Arc::new(value));

        if let Some(slot) = inner.free.pop() {
            let record = &mut inner.slots[slot];
            record.generation = record.generation.wrapping_add(1);
            record.entry = entry;
            return Some(Handle::new(slot, record.generation));
        }

        if inner.slots.len() >= MAX_HANDLES {
            log::error!("{} table exhausted ({} live)", self.kind, MAX_HANDLES);
            return None;
        }

        let slot = inner.slots.len();
        inner.slots.push(Slot { generation: 0, entry });
        Some(Handle::new(slot, 0))
    }

    /// Resolve a handle
    ///
    /// # Errors
    /// - `NullHandle` for handle 0
    /// - `BadHandle` for a released, reused or never-issued handle
    pub fn get(&self, handle: Handle) -> Result<Arc<T>> {
        if handle.is_null() {
            return Err(AbiError::NullHandle);
        }

        let slot = handle.slot().ok_or(AbiError::BadHandle(handle.0))?;
        let inner = self.inner.lock();
        inner
            .slots
            .get(slot)
            .filter(|record| record.generation == handle.generation())
            .and_then(|record| record.entry.clone())
            .ok_or(AbiError::BadHandle(handle.0))
    }

    /// Release a handle and return the object it named
    pub fn remove(&self, handle: Handle) -> Result<Arc<T>> {
        if handle.is_null() {
            return Err(AbiError::NullHandle);
        }

        let slot = handle.slot().ok_or(AbiError::BadHandle(handle.0))?;
        let mut inner = self.inner.lock();
        let entry = inner
            .slots
            .get_mut(slot)
            .filter(|record| record.generation == handle.generation())
            .and_then(|record| record.entry.take())
            .ok_or(AbiError::BadHandle(handle.0))?;
        inner.free.push(slot);

        Ok(entry)
    }

    /// Live objects
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.len() - inner.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_rejected() {
        let table: HandleTable<u32> = HandleTable::new("test");
        assert!(matches!(table.get(Handle::NULL), Err(AbiError::NullHandle)));
        assert!(matches!(table.remove(Handle::NULL), Err(AbiError::NullHandle)));
    }

    #[test]
    fn test_insert_get_remove() {
        let table = HandleTable::new("test");
        let handle = table.insert(7u32).unwrap();

        assert!(!handle.is_null());
        assert_eq!(*table.get(handle).unwrap(), 7);
        assert_eq!(table.len(), 1);

        assert_eq!(*table.remove(handle).unwrap(), 7);
        assert!(table.is_empty());
        assert!(matches!(table.get(handle), Err(AbiError::BadHandle(_))));
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let table = HandleTable::new("test");
        let old = table.insert(1u32).unwrap();
        table.remove(old).unwrap();

        let new = table.insert(2u32).unwrap();
        assert_ne!(old, new);
        assert!(matches!(table.get(old), Err(AbiError::BadHandle(_))));
        assert_eq!(*table.get(new).unwrap(), 2);
    }

    #[test]
    fn test_never_issued_handle() {
        let table: HandleTable<u32> = HandleTable::new("test");
        assert!(matches!(table.get(Handle(0x0001_0005)), Err(AbiError::BadHandle(_))));
    }

    #[test]
    fn test_zero_slot_with_generation_rejected() {
        let table = HandleTable::new("test");
        let live = table.insert(3u32).unwrap();

        let garbage = Handle(0x0001_0000);
        assert!(matches!(table.get(garbage), Err(AbiError::BadHandle(0x0001_0000))));
        assert!(matches!(table.remove(garbage), Err(AbiError::BadHandle(0x0001_0000))));
        assert_eq!(*table.get(live).unwrap(), 3);
    }
}
