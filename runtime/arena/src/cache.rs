//! Cache maintenance seam
//!
//! Pools are cache-coherent only by explicit maintenance. The arena validates
//! the range against the pool window and then hands it to a backend; the
//! backend is the only piece that touches real cache-control instructions.

use crate::{DeviceAddr, KernelAddr};

/// A validated range inside one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRange {
    /// Kernel-visible start address
    pub kernel_addr: KernelAddr,

    /// Device-visible start address of the same bytes
    pub device_addr: DeviceAddr,

    /// Length in bytes
    pub len: usize,
}

/// Platform cache operations
///
/// Implementations must be callable from any thread, including while a
/// pool lock is held.
pub trait CacheMaintenance: Send + Sync {
    /// Discard CPU cache lines so the CPU observes device writes
    fn invalidate_for_cpu(&self, pool: &str, range: CacheRange);

    /// Write back dirty CPU cache lines so the device observes CPU writes
    fn flush_for_device(&self, pool: &str, range: CacheRange);
}

/// Backend for coherent platforms and host-side testing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl CacheMaintenance for NoopCache {
    fn invalidate_for_cpu(&self, pool: &str, range: CacheRange) {
        log::trace!("[{}] invalidate {:#x}+{:#x} (noop)", pool, range.kernel_addr, range.len);
    }

    fn flush_for_device(&self, pool: &str, range: CacheRange) {
        log::trace!("[{}] flush {:#x}+{:#x} (noop)", pool, range.kernel_addr, range.len);
    }
}
