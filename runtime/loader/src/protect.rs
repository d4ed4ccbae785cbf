//! Memory protection seams
//!
//! The loader never touches page tables itself. Protection changes go
//! through a [`ProtectionBackend`], and platforms with a hypervisor or
//! secure monitor supply a [`ProtectionVerifier`] that takes over
//! executable enforcement once an image is copied.

use std::io;

use bitflags::bitflags;
use copro_arena::{pages_needed, KernelAddr, PAGE_SIZE};

bitflags! {
    /// Page permissions of a firmware code region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;

        /// Loaded code: read-only, executable
        const RX = Self::READ.bits() | Self::EXEC.bits();

        /// Code being replaced: writable, never executable
        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Protection {
    /// Writable and executable at once
    pub fn violates_wx(self) -> bool {
        self.contains(Protection::WRITE | Protection::EXEC)
    }
}

/// A page-granular code region inside a firmware window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtectedRegion {
    pub base: KernelAddr,
    pub pages: usize,
}

impl ProtectedRegion {
    /// Region covering `size` bytes from `base`, rounded up to whole pages
    pub fn covering(base: KernelAddr, size: usize) -> Self {
        Self {
            base,
            pages: pages_needed(size),
        }
    }

    pub fn size(&self) -> usize {
        self.pages * PAGE_SIZE
    }
}

/// Applies page permission changes
pub trait ProtectionBackend: Send + Sync {
    /// Add `set` and remove `clear` on every page of `region`
    fn change(&self, region: ProtectedRegion, set: Protection, clear: Protection) -> io::Result<()>;
}

/// Backend for hosts where firmware windows are plain memory
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProtection;

impl ProtectionBackend for NoopProtection {
    fn change(&self, region: ProtectedRegion, set: Protection, clear: Protection) -> io::Result<()> {
        log::trace!(
            "protect {:#x}+{} pages: +{:?} -{:?} (noop)",
            region.base,
            region.pages,
            set,
            clear
        );
        Ok(())
    }
}

/// Region description handed to an external verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierRegistration {
    pub binary_base: KernelAddr,
    pub binary_size: usize,
    pub code: Vec<ProtectedRegion>,
}

/// External protection verifier (hypervisor or secure monitor)
pub trait ProtectionVerifier: Send + Sync {
    /// Drop a previous registration
    fn revoke(&self, registration: &VerifierRegistration) -> io::Result<()>;

    /// Verify and enforce a freshly copied image
    fn install(&self, registration: &VerifierRegistration) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_rounds_to_pages() {
        let region = ProtectedRegion::covering(0x4000_0000, PAGE_SIZE + 1);
        assert_eq!(region.pages, 2);
        assert_eq!(region.size(), 2 * PAGE_SIZE);
    }

    #[test]
    fn test_wx_detection() {
        assert!(!Protection::RX.violates_wx());
        assert!(!Protection::RW.violates_wx());
        assert!((Protection::RW | Protection::EXEC).violates_wx());
    }
}
