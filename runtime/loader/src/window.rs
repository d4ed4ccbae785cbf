//! Destination window for one firmware image
//!
//! The window owns the bytes the firmware will run from and mirrors the
//! protection of each code region as last applied by the loader. Writes
//! into a code region that is not writable are refused, so a window can
//! never be patched while executable.

use parking_lot::Mutex;

use copro_arena::KernelAddr;

use crate::image::ImageConfig;
use crate::protect::{Protection, ProtectedRegion};
use crate::{LoaderError, Result};

struct WindowInner {
    bytes: Vec<u8>,
    protection: Vec<Protection>,
}

pub struct MemoryWindow {
    name: String,
    base: KernelAddr,
    capacity: usize,
    /// Code regions as window offsets, matching `regions`
    code: Vec<(usize, usize)>,
    regions: Vec<ProtectedRegion>,
    inner: Mutex<WindowInner>,
}

impl MemoryWindow {
    /// Reserve the window described by `config`; code starts out read-only executable
    pub fn new(config: &ImageConfig) -> Result<Self> {
        config.validate()?;

        let code: Vec<(usize, usize)> = config.code.iter().map(|r| (r.offset, r.size)).collect();
        let regions = code
            .iter()
            .map(|&(offset, size)| ProtectedRegion::covering(config.base + offset, size))
            .collect::<Vec<_>>();

        log::debug!(
            "window {} at {:#x} ({:#x} bytes, {} code regions)",
            config.name,
            config.base,
            config.capacity,
            regions.len()
        );

        Ok(Self {
            name: config.name.clone(),
            base: config.base,
            capacity: config.capacity,
            inner: Mutex::new(WindowInner {
                bytes: vec![0; config.capacity],
                protection: vec![Protection::RX; regions.len()],
            }),
            code,
            regions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> KernelAddr {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Kernel address of `offset`
    pub fn addr(&self, offset: usize) -> KernelAddr {
        self.base + offset
    }

    pub fn regions(&self) -> &[ProtectedRegion] {
        &self.regions
    }

    pub fn protection(&self, region: usize) -> Option<Protection> {
        self.inner.lock().protection.get(region).copied()
    }

    /// No code region is writable and executable at once
    pub fn is_wx_clean(&self) -> bool {
        self.inner.lock().protection.iter().all(|p| !p.violates_wx())
    }

    pub(crate) fn apply(&self, region: usize, set: Protection, clear: Protection) {
        let mut inner = self.inner.lock();
        if let Some(protection) = inner.protection.get_mut(region) {
            *protection = (*protection - clear) | set;
            if protection.violates_wx() {
                log::error!("{} code region {} is writable and executable", self.name, region);
            }
        }
    }

    /// Record that an external verifier now enforces read-only execute
    pub(crate) fn mark_enforced(&self) {
        let mut inner = self.inner.lock();
        for protection in inner.protection.iter_mut() {
            *protection = Protection::RX;
        }
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<usize> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.capacity)
            .ok_or_else(|| LoaderError::OutOfWindow {
                window: self.name.clone(),
                offset,
                len,
            })
    }

    /// Copy `data` into the window at `offset`
    ///
    /// # Errors
    /// - `OutOfWindow` if the range does not fit
    /// - `WindowProtected` if it touches a code region lacking write permission
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let end = self.check_range(offset, data.len())?;
        let mut inner = self.inner.lock();

        let blocked = self.code.iter().zip(&inner.protection).any(|(&(start, size), protection)| {
            offset < start + size && start < end && !protection.contains(Protection::WRITE)
        });
        if blocked {
            return Err(LoaderError::WindowProtected {
                window: self.name.clone(),
                offset,
                len: data.len(),
            });
        }

        inner.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let end = self.check_range(offset, len)?;
        Ok(self.inner.lock().bytes[offset..end].to_vec())
    }
}
