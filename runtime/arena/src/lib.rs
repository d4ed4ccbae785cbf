//! Memory Arena - Named DMA pools shared between host and co-processor
//!
//! # Purpose
//! Sub-allocates fixed, physically contiguous DMA regions into buffers that
//! both the host CPU and the co-processor firmware can address. The arena is
//! the only owner of kernel/device address bookkeeping.
//!
//! # Integration Points
//! - Depends on: nothing beyond the memory owner handing over backing regions
//! - Provides to: the host service table (firmware alloc/free/translate/cache
//!   entries), the face-detection pipeline (work heaps and descriptors)
//!
//! # Architecture
//! Each pool is a bump allocator over one window, 1:1 offset-mapped between
//! kernel and device address spaces. Pools live behind their own lock; no
//! operation ever touches two pools. Cache maintenance is delegated to an
//! injectable [`CacheMaintenance`] backend after range validation.
//!
//! # Testing Strategy
//! - Unit tests: alignment, exhaustion, translation windows, both free policies
//! - Integration tests: the full-pool scenario and the translation round-trip
//! - Benchmarks: allocate/free throughput per policy

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

mod align;
mod cache;
mod pool;

pub use align::{align_down, align_up, is_aligned, pages_needed, valid_alignment, DEFAULT_ALIGNMENT, PAGE_SIZE};
pub use cache::{CacheMaintenance, CacheRange, NoopCache};
pub use pool::{AllocPolicy, Allocation, BackingRegion, MemoryPool, PoolHandle, PoolStats};

/// Kernel-visible (CPU) address
pub type KernelAddr = usize;

/// Device-visible (DMA/IOMMU) address
pub type DeviceAddr = u64;

/// Error types for arena operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("Pool {pool} out of memory (requested: {requested} bytes, available: {available} bytes)")]
    OutOfMemory {
        pool: String,
        requested: usize,
        available: usize,
    },

    #[error("Address {addr:#x} outside pool {pool}")]
    OutOfRange { pool: String, addr: u64 },

    #[error("Invalid allocation size {size} for pool {pool}")]
    InvalidSize { pool: String, size: usize },

    #[error("No allocation at {addr:#x} in pool {pool}")]
    UnknownAllocation { pool: String, addr: KernelAddr },

    #[error("Invalid alignment {alignment} (must be a non-zero power of two)")]
    InvalidAlignment { alignment: usize },

    #[error("Backing region for pool {pool} wraps the address space")]
    InvalidBacking { pool: String },

    #[error("Unknown pool handle {0}")]
    UnknownPool(usize),
}

pub type Result<T> = core::result::Result<T, ArenaError>;

/// The set of pools owned by one bridge instance
pub struct Arena {
    pools: RwLock<Vec<Arc<Mutex<MemoryPool>>>>,
    policy: AllocPolicy,
    cache: Arc<dyn CacheMaintenance>,
}

impl Arena {
    /// Create an empty arena with a no-op cache backend
    pub fn new(policy: AllocPolicy) -> Self {
        Self::with_cache(policy, Arc::new(NoopCache))
    }

    /// Create an empty arena with a platform cache backend
    pub fn with_cache(policy: AllocPolicy, cache: Arc<dyn CacheMaintenance>) -> Self {
        Self {
            pools: RwLock::new(Vec::new()),
            policy,
            cache,
        }
    }

    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    /// Bind a named pool to backing storage
    ///
    /// Binding a name that already exists rebinds that pool: bookkeeping is
    /// reset and the existing handle is returned.
    ///
    /// # Errors
    /// - `InvalidAlignment` if `alignment` is not a non-zero power of two
    /// - `InvalidBacking` if the region wraps either address space
    pub fn init_pool(&self, name: &str, backing: BackingRegion, alignment: usize) -> Result<PoolHandle> {
        if !valid_alignment(alignment) {
            return Err(ArenaError::InvalidAlignment { alignment });
        }

        let wraps = backing.kva_base.checked_add(backing.size).is_none()
            || backing.dva_base.checked_add(backing.size as DeviceAddr).is_none();
        if wraps {
            return Err(ArenaError::InvalidBacking { pool: name.to_string() });
        }

        // Lookup and insert under one write guard so a name is bound once
        let mut pools = self.pools.write();
        if let Some(existing) = pools.iter().find(|pool| pool.lock().name() == name) {
            let mut pool = existing.lock();
            pool.rebind(backing, alignment);
            return Ok(pool.handle());
        }

        let handle = PoolHandle(pools.len());
        let mut pool = MemoryPool::new(name, handle, backing, alignment, self.policy);
        pool.rebind(backing, alignment);
        pools.push(Arc::new(Mutex::new(pool)));

        Ok(handle)
    }

    /// Look up a pool by name
    pub fn pool_by_name(&self, name: &str) -> Option<PoolHandle> {
        self.pools
            .read()
            .iter()
            .map(|pool| pool.lock())
            .find(|pool| pool.name() == name)
            .map(|pool| pool.handle())
    }

    fn pool(&self, handle: PoolHandle) -> Result<Arc<Mutex<MemoryPool>>> {
        self.pools
            .read()
            .get(handle.0)
            .cloned()
            .ok_or(ArenaError::UnknownPool(handle.0))
    }

    fn with_pool<R>(&self, handle: PoolHandle, f: impl FnOnce(&mut MemoryPool) -> Result<R>) -> Result<R> {
        let pool = self.pool(handle)?;
        let mut guard = pool.lock();
        f(&mut guard)
    }

    pub fn pool_name(&self, handle: PoolHandle) -> Result<String> {
        self.with_pool(handle, |pool| Ok(pool.name().to_string()))
    }

    /// Allocate `size` bytes (rounded up to the pool alignment)
    pub fn allocate(&self, handle: PoolHandle, size: usize) -> Result<Allocation> {
        self.with_pool(handle, |pool| pool.allocate(size))
    }

    /// Release the buffer starting at `kernel_addr`
    pub fn free(&self, handle: PoolHandle, kernel_addr: KernelAddr) -> Result<()> {
        self.with_pool(handle, |pool| pool.free(kernel_addr))
    }

    pub fn translate_to_device(&self, handle: PoolHandle, kernel_addr: KernelAddr) -> Result<DeviceAddr> {
        self.with_pool(handle, |pool| pool.translate_to_device(kernel_addr))
    }

    pub fn translate_to_kernel(&self, handle: PoolHandle, device_addr: DeviceAddr) -> Result<KernelAddr> {
        self.with_pool(handle, |pool| pool.translate_to_kernel(device_addr))
    }

    /// Make device writes in the range visible to the CPU
    pub fn invalidate_for_cpu(&self, handle: PoolHandle, kernel_addr: KernelAddr, len: usize) -> Result<()> {
        self.with_pool(handle, |pool| {
            let device_addr = pool.check_range(kernel_addr, len)?;
            self.cache
                .invalidate_for_cpu(pool.name(), CacheRange { kernel_addr, device_addr, len });
            Ok(())
        })
    }

    /// Make CPU writes in the range visible to the device
    pub fn flush_for_device(&self, handle: PoolHandle, kernel_addr: KernelAddr, len: usize) -> Result<()> {
        self.with_pool(handle, |pool| {
            let device_addr = pool.check_range(kernel_addr, len)?;
            self.cache
                .flush_for_device(pool.name(), CacheRange { kernel_addr, device_addr, len });
            Ok(())
        })
    }

    pub fn stats(&self, handle: PoolHandle) -> Result<PoolStats> {
        self.with_pool(handle, |pool| Ok(pool.stats()))
    }

    /// Live allocations of one pool, for leak reports
    pub fn outstanding(&self, handle: PoolHandle) -> Result<Vec<Allocation>> {
        self.with_pool(handle, |pool| Ok(pool.outstanding()))
    }

    /// Log every live allocation across all pools; returns the total count
    pub fn report_leaks(&self) -> usize {
        let pools = self.pools.read();
        let mut total = 0;

        for pool in pools.iter() {
            let pool = pool.lock();
            for allocation in pool.outstanding() {
                log::warn!(
                    "[{}] leaked kva {:#x} size {:#x}",
                    pool.name(),
                    allocation.kernel_addr,
                    allocation.size
                );
                total += 1;
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCache {
        invalidated: AtomicUsize,
        flushed: AtomicUsize,
    }

    impl CacheMaintenance for CountingCache {
        fn invalidate_for_cpu(&self, _pool: &str, range: CacheRange) {
            self.invalidated.fetch_add(range.len, Ordering::SeqCst);
        }

        fn flush_for_device(&self, _pool: &str, range: CacheRange) {
            self.flushed.fetch_add(range.len, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_init_pool_rejects_bad_alignment() {
        let arena = Arena::new(AllocPolicy::Bump);
        let result = arena.init_pool("VRA", BackingRegion::new(0x1000, 0x1000, 0x1000), 48);
        assert!(matches!(result, Err(ArenaError::InvalidAlignment { alignment: 48 })));
    }

    #[test]
    fn test_init_pool_rejects_wrapping_backing() {
        let arena = Arena::new(AllocPolicy::Bump);
        let result = arena.init_pool("VRA", BackingRegion::new(usize::MAX - 10, 0, 0x1000), 64);
        assert!(matches!(result, Err(ArenaError::InvalidBacking { .. })));
    }

    #[test]
    fn test_rebind_by_name_keeps_handle() {
        let arena = Arena::new(AllocPolicy::Bump);
        let first = arena.init_pool("DMA_TNR", BackingRegion::new(0x1000, 0x1000, 0x1000), 64).unwrap();
        arena.allocate(first, 128).unwrap();

        let second = arena.init_pool("DMA_TNR", BackingRegion::new(0x4000, 0x4000, 0x2000), 64).unwrap();

        assert_eq!(first, second);
        assert_eq!(arena.stats(first).unwrap().used, 0);
        assert_eq!(arena.stats(first).unwrap().capacity, 0x2000);
    }

    #[test]
    fn test_pools_are_independent() {
        let arena = Arena::new(AllocPolicy::Bump);
        let a = arena.init_pool("A", BackingRegion::new(0x1000, 0x1000, 0x100), 64).unwrap();
        let b = arena.init_pool("B", BackingRegion::new(0x2000, 0x2000, 0x100), 64).unwrap();

        arena.allocate(a, 0x100).unwrap();
        assert!(arena.allocate(a, 1).is_err());
        assert!(arena.allocate(b, 0x100).is_ok());
    }

    #[test]
    fn test_unknown_pool_handle() {
        let arena = Arena::new(AllocPolicy::Bump);
        assert!(matches!(arena.allocate(PoolHandle(3), 64), Err(ArenaError::UnknownPool(3))));
    }

    #[test]
    fn test_cache_ops_validate_then_delegate() {
        let cache = Arc::new(CountingCache::default());
        let arena = Arena::with_cache(AllocPolicy::Bump, cache.clone());
        let pool = arena.init_pool("VRA", BackingRegion::new(0x1000, 0x9000, 0x1000), 64).unwrap();

        arena.invalidate_for_cpu(pool, 0x1000, 0x100).unwrap();
        arena.flush_for_device(pool, 0x1800, 0x80).unwrap();
        assert!(arena.flush_for_device(pool, 0x1F00, 0x200).is_err());

        assert_eq!(cache.invalidated.load(Ordering::SeqCst), 0x100);
        assert_eq!(cache.flushed.load(Ordering::SeqCst), 0x80);
    }

    #[test]
    fn test_report_leaks_counts_live_buffers() {
        let arena = Arena::new(AllocPolicy::Bump);
        let pool = arena.init_pool("DMA_MEDRC", BackingRegion::new(0x1000, 0x1000, 0x1000), 64).unwrap();

        let a = arena.allocate(pool, 64).unwrap();
        arena.allocate(pool, 64).unwrap();
        arena.free(pool, a.kernel_addr).unwrap();

        assert_eq!(arena.report_leaks(), 1);
        assert_eq!(arena.outstanding(pool).unwrap().len(), 1);
    }
}
