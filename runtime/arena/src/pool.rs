//! Memory Pool - one physically contiguous DMA region
//!
//! A pool is a window `[kva_base, kva_base + size)` that is mapped 1:1 onto
//! `[dva_base, dva_base + size)` for the device. Buffers are carved from the
//! front of the window by advancing `end`.
//!
//! With [`AllocPolicy::Bump`], `end` never moves backwards: freeing only drops
//! the record and `used`, so space is recovered only when the pool is rebound
//! to fresh backing storage. [`AllocPolicy::FreeList`] additionally keeps the
//! freed ranges and reuses them first-fit.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::align::align_up;
use crate::{ArenaError, DeviceAddr, KernelAddr, Result};

/// Backing storage for a pool, as handed over by the memory owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingRegion {
    /// Kernel-visible base address
    pub kva_base: KernelAddr,

    /// Device-visible base address
    pub dva_base: DeviceAddr,

    /// Size in bytes
    pub size: usize,
}

impl BackingRegion {
    pub fn new(kva_base: KernelAddr, dva_base: DeviceAddr, size: usize) -> Self {
        Self { kva_base, dva_base, size }
    }
}

/// How `free` treats released space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocPolicy {
    /// Released space is never reused until the pool is rebound
    #[default]
    Bump,

    /// Released ranges are coalesced and reused first-fit
    FreeList,
}

/// Opaque pool identifier issued by [`crate::Arena::init_pool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle(pub(crate) usize);

impl PoolHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One live buffer carved out of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub kernel_addr: KernelAddr,
    pub device_addr: DeviceAddr,

    /// Size after alignment rounding
    pub size: usize,

    pub pool: PoolHandle,
}

/// Snapshot of pool bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub used: usize,
    pub end: usize,
    pub live: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hole {
    offset: usize,
    size: usize,
}

/// A named DMA pool
#[derive(Debug)]
pub struct MemoryPool {
    name: String,
    handle: PoolHandle,
    backing: BackingRegion,
    alignment: usize,
    policy: AllocPolicy,

    /// Bytes held by live allocations
    used: usize,

    /// Bump offset from `kva_base`
    end: usize,

    /// Live allocations keyed by kernel address
    live: BTreeMap<KernelAddr, Allocation>,

    /// Freed ranges below `end`, sorted by offset (free-list policy only)
    holes: Vec<Hole>,
}

impl MemoryPool {
    pub(crate) fn new(
        name: &str,
        handle: PoolHandle,
        backing: BackingRegion,
        alignment: usize,
        policy: AllocPolicy,
    ) -> Self {
        Self {
            name: name.to_string(),
            handle,
            backing,
            alignment,
            policy,
            used: 0,
            end: 0,
            live: BTreeMap::new(),
            holes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle
    }

    pub fn backing(&self) -> BackingRegion {
        self.backing
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.backing.size
    }

    /// Bytes that can still be bump-allocated
    pub fn remaining(&self) -> usize {
        self.backing.size - self.end
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.backing.size,
            used: self.used,
            end: self.end,
            live: self.live.len(),
        }
    }

    /// Live allocations in address order
    pub fn outstanding(&self) -> Vec<Allocation> {
        self.live.values().copied().collect()
    }

    /// Drop all bookkeeping and bind the pool to `backing`
    ///
    /// Outstanding allocations are forgotten; the caller owns any leak.
    pub(crate) fn rebind(&mut self, backing: BackingRegion, alignment: usize) {
        if self.used != 0 {
            log::warn!(
                "[{}] rebinding with {} bytes still allocated ({} buffers)",
                self.name,
                self.used,
                self.live.len()
            );
        }

        self.backing = backing;
        self.alignment = alignment;
        self.used = 0;
        self.end = 0;
        self.live.clear();
        self.holes.clear();

        log::info!(
            "[{}] bound kva {:#x} dva {:#x} size {:#x} align {}",
            self.name,
            backing.kva_base,
            backing.dva_base,
            backing.size,
            alignment
        );
    }

    /// Carve a buffer of at least `size` bytes
    ///
    /// # Errors
    /// - `InvalidSize` if `size` is zero or overflows when aligned
    /// - `OutOfMemory` if the aligned size does not fit
    pub fn allocate(&mut self, size: usize) -> Result<Allocation> {
        if size == 0 {
            return Err(ArenaError::InvalidSize { pool: self.name.clone(), size });
        }

        let aligned = align_up(size, self.alignment)
            .ok_or_else(|| ArenaError::InvalidSize { pool: self.name.clone(), size })?;

        let offset = match self.policy {
            AllocPolicy::FreeList => match self.take_hole(aligned) {
                Some(offset) => offset,
                None => self.bump(aligned)?,
            },
            AllocPolicy::Bump => self.bump(aligned)?,
        };

        let allocation = Allocation {
            kernel_addr: self.backing.kva_base + offset,
            device_addr: self.backing.dva_base + offset as DeviceAddr,
            size: aligned,
            pool: self.handle,
        };

        self.used += aligned;
        self.live.insert(allocation.kernel_addr, allocation);

        log::debug!(
            "[{}] alloc kva {:#x} dva {:#x} size {:#x} (used {:#x}, end {:#x})",
            self.name,
            allocation.kernel_addr,
            allocation.device_addr,
            aligned,
            self.used,
            self.end
        );

        Ok(allocation)
    }

    fn bump(&mut self, size: usize) -> Result<usize> {
        let fits = self
            .end
            .checked_add(size)
            .is_some_and(|new_end| new_end <= self.backing.size);

        if !fits {
            log::error!(
                "[{}] out of memory: requested {} bytes, {} available",
                self.name,
                size,
                self.remaining()
            );
            return Err(ArenaError::OutOfMemory {
                pool: self.name.clone(),
                requested: size,
                available: self.remaining(),
            });
        }

        let offset = self.end;
        self.end += size;
        Ok(offset)
    }

    fn take_hole(&mut self, size: usize) -> Option<usize> {
        let index = self.holes.iter().position(|hole| hole.size >= size)?;
        let hole = &mut self.holes[index];
        let offset = hole.offset;

        if hole.size == size {
            self.holes.remove(index);
        } else {
            hole.offset += size;
            hole.size -= size;
        }

        Some(offset)
    }

    /// Release the buffer that starts at `kernel_addr`
    ///
    /// # Errors
    /// `UnknownAllocation` if no live buffer starts at that address; the pool
    /// is left untouched.
    pub fn free(&mut self, kernel_addr: KernelAddr) -> Result<()> {
        let allocation = self.live.remove(&kernel_addr).ok_or_else(|| {
            log::error!("[{}] free of unknown kva {:#x}", self.name, kernel_addr);
            ArenaError::UnknownAllocation { pool: self.name.clone(), addr: kernel_addr }
        })?;

        self.used -= allocation.size;

        if self.policy == AllocPolicy::FreeList {
            let offset = allocation.kernel_addr - self.backing.kva_base;
            self.release_range(offset, allocation.size);
        }

        log::debug!(
            "[{}] free kva {:#x} size {:#x} (used {:#x}, end {:#x})",
            self.name,
            kernel_addr,
            allocation.size,
            self.used,
            self.end
        );

        Ok(())
    }

    fn release_range(&mut self, offset: usize, size: usize) {
        let index = self.holes.partition_point(|hole| hole.offset < offset);
        self.holes.insert(index, Hole { offset, size });

        // Merge with the successor, then the predecessor
        if index + 1 < self.holes.len()
            && self.holes[index].offset + self.holes[index].size == self.holes[index + 1].offset
        {
            self.holes[index].size += self.holes[index + 1].size;
            self.holes.remove(index + 1);
        }
        if index > 0
            && self.holes[index - 1].offset + self.holes[index - 1].size == self.holes[index].offset
        {
            self.holes[index - 1].size += self.holes[index].size;
            self.holes.remove(index);
        }

        // A hole touching the bump offset goes back to the bump region
        if let Some(last) = self.holes.last().copied() {
            if last.offset + last.size == self.end {
                self.end = last.offset;
                self.holes.pop();
            }
        }
    }

    /// Check that `kernel_addr` lies inside the pool window
    pub fn contains_kernel(&self, kernel_addr: KernelAddr) -> bool {
        kernel_addr >= self.backing.kva_base
            && kernel_addr - self.backing.kva_base < self.backing.size
    }

    /// Check that `device_addr` lies inside the pool window
    pub fn contains_device(&self, device_addr: DeviceAddr) -> bool {
        device_addr >= self.backing.dva_base
            && device_addr - self.backing.dva_base < self.backing.size as DeviceAddr
    }

    pub fn translate_to_device(&self, kernel_addr: KernelAddr) -> Result<DeviceAddr> {
        if !self.contains_kernel(kernel_addr) {
            log::error!("[{}] kva {:#x} outside pool window", self.name, kernel_addr);
            return Err(ArenaError::OutOfRange { pool: self.name.clone(), addr: kernel_addr as u64 });
        }

        Ok(self.backing.dva_base + (kernel_addr - self.backing.kva_base) as DeviceAddr)
    }

    pub fn translate_to_kernel(&self, device_addr: DeviceAddr) -> Result<KernelAddr> {
        if !self.contains_device(device_addr) {
            log::error!("[{}] dva {:#x} outside pool window", self.name, device_addr);
            return Err(ArenaError::OutOfRange { pool: self.name.clone(), addr: device_addr });
        }

        Ok(self.backing.kva_base + (device_addr - self.backing.dva_base) as usize)
    }

    /// Validate that `[kernel_addr, kernel_addr + len)` lies inside the window
    pub(crate) fn check_range(&self, kernel_addr: KernelAddr, len: usize) -> Result<DeviceAddr> {
        let device_addr = self.translate_to_device(kernel_addr)?;
        let offset = kernel_addr - self.backing.kva_base;

        match offset.checked_add(len) {
            Some(end) if end <= self.backing.size => Ok(device_addr),
            _ => Err(ArenaError::OutOfRange {
                pool: self.name.clone(),
                addr: kernel_addr.wrapping_add(len) as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KVA: usize = 0x8000_0000;
    const DVA: u64 = 0x1000_0000;

    fn pool(size: usize, alignment: usize, policy: AllocPolicy) -> MemoryPool {
        MemoryPool::new("TEST", PoolHandle(0), BackingRegion::new(KVA, DVA, size), alignment, policy)
    }

    #[test]
    fn test_allocate_rounds_to_alignment() {
        let mut p = pool(0x1000, 64, AllocPolicy::Bump);

        let a = p.allocate(1).unwrap();
        let b = p.allocate(65).unwrap();

        assert_eq!(a.size, 64);
        assert_eq!(b.kernel_addr, KVA + 64);
        assert_eq!(b.size, 128);
        assert_eq!(p.stats().end, 192);
        assert_eq!(p.stats().used, 192);
    }

    #[test]
    fn test_allocate_zero_rejected() {
        let mut p = pool(0x1000, 64, AllocPolicy::Bump);
        assert!(matches!(p.allocate(0), Err(ArenaError::InvalidSize { size: 0, .. })));
        assert_eq!(p.stats().end, 0);
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut p = pool(256, 64, AllocPolicy::Bump);

        p.allocate(200).unwrap();
        let result = p.allocate(64);

        assert!(matches!(
            result,
            Err(ArenaError::OutOfMemory { requested: 64, available: 0, .. })
        ));
    }

    #[test]
    fn test_bump_free_keeps_end() {
        let mut p = pool(256, 64, AllocPolicy::Bump);

        let a = p.allocate(64).unwrap();
        p.allocate(64).unwrap();
        p.free(a.kernel_addr).unwrap();

        let stats = p.stats();
        assert_eq!(stats.used, 64);
        assert_eq!(stats.end, 128);
        assert_eq!(stats.live, 1);
    }

    #[test]
    fn test_free_unknown_address() {
        let mut p = pool(256, 64, AllocPolicy::Bump);
        p.allocate(64).unwrap();

        assert!(matches!(p.free(KVA + 8), Err(ArenaError::UnknownAllocation { .. })));
        assert_eq!(p.stats().used, 64);
    }

    #[test]
    fn test_free_list_reuses_hole() {
        let mut p = pool(256, 64, AllocPolicy::FreeList);

        let a = p.allocate(64).unwrap();
        p.allocate(64).unwrap();
        p.free(a.kernel_addr).unwrap();

        let c = p.allocate(64).unwrap();
        assert_eq!(c.kernel_addr, a.kernel_addr);
        assert_eq!(p.stats().end, 128);
    }

    #[test]
    fn test_free_list_coalesces_and_retracts_end() {
        let mut p = pool(512, 64, AllocPolicy::FreeList);

        let a = p.allocate(64).unwrap();
        let b = p.allocate(64).unwrap();
        let c = p.allocate(64).unwrap();

        p.free(a.kernel_addr).unwrap();
        p.free(b.kernel_addr).unwrap();
        assert_eq!(p.stats().end, 192);

        // Freeing the tail merges everything back into the bump region
        p.free(c.kernel_addr).unwrap();
        assert_eq!(p.stats().end, 0);
        assert_eq!(p.stats().used, 0);

        let big = p.allocate(512).unwrap();
        assert_eq!(big.kernel_addr, KVA);
    }

    #[test]
    fn test_translation_window() {
        let p = pool(0x1000, 64, AllocPolicy::Bump);

        assert_eq!(p.translate_to_device(KVA + 0x10).unwrap(), DVA + 0x10);
        assert_eq!(p.translate_to_kernel(DVA + 0xFFF).unwrap(), KVA + 0xFFF);

        assert!(matches!(p.translate_to_device(KVA + 0x1000), Err(ArenaError::OutOfRange { .. })));
        assert!(matches!(p.translate_to_device(KVA - 1), Err(ArenaError::OutOfRange { .. })));
        assert!(matches!(p.translate_to_kernel(DVA - 1), Err(ArenaError::OutOfRange { .. })));
    }

    #[test]
    fn test_check_range_bounds() {
        let p = pool(0x1000, 64, AllocPolicy::Bump);

        assert_eq!(p.check_range(KVA, 0x1000).unwrap(), DVA);
        assert!(p.check_range(KVA + 0x800, 0x801).is_err());
        assert!(p.check_range(KVA + 0x800, usize::MAX).is_err());
    }

    #[test]
    fn test_rebind_resets_bookkeeping() {
        let mut p = pool(256, 64, AllocPolicy::Bump);
        p.allocate(64).unwrap();

        p.rebind(BackingRegion::new(KVA * 2, DVA * 2, 512), 128);

        let stats = p.stats();
        assert_eq!(stats.capacity, 512);
        assert_eq!(stats.used, 0);
        assert_eq!(stats.end, 0);
        assert_eq!(stats.live, 0);
        assert_eq!(p.allocate(1).unwrap().size, 128);
    }
}
