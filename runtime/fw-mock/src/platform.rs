//! Image, protection and cache doubles

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use copro_arena::{CacheMaintenance, CacheRange};
use copro_loader::{
    ImageBlob, ImageProvider, ImageSource, ProtectedRegion, Protection, ProtectionBackend, ProtectionVerifier,
    VerifierRegistration, VERSION_TAIL_LEN,
};

/// Image bytes of `len` filled with `fill`, carrying `version` in the tail
pub fn image_bytes(len: usize, fill: u8, version: &str) -> Vec<u8> {
    let mut data = vec![fill; len];
    let tail = len.saturating_sub(VERSION_TAIL_LEN);
    data[tail..].fill(0);

    let text = &version.as_bytes()[..version.len().min(len - tail)];
    data[tail..tail + text.len()].copy_from_slice(text);
    data
}

/// Serves images from memory
#[derive(Default)]
pub struct MockImageProvider {
    images: Mutex<HashMap<String, (Vec<u8>, ImageSource)>>,
    requests: Mutex<Vec<String>>,
}

impl MockImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: &str, data: Vec<u8>) {
        self.images
            .lock()
            .insert(name.to_string(), (data, ImageSource::BuiltIn));
    }

    pub fn put_user(&self, name: &str, data: Vec<u8>) {
        self.images
            .lock()
            .insert(name.to_string(), (data, ImageSource::UserProvided));
    }

    pub fn remove(&self, name: &str) {
        self.images.lock().remove(name);
    }

    /// Names requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl ImageProvider for MockImageProvider {
    fn request(&self, name: &str) -> io::Result<ImageBlob> {
        self.requests.lock().push(name.to_string());

        let (data, source) = self
            .images
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no image {}", name)))?;

        Ok(ImageBlob {
            name: name.to_string(),
            data,
            source,
        })
    }
}

/// Records every permission change; can fail the n-th one
#[derive(Default)]
pub struct RecordingProtection {
    changes: Mutex<Vec<(ProtectedRegion, Protection, Protection)>>,
    fail_at: Mutex<Option<usize>>,
}

impl RecordingProtection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(&self, call: usize) {
        *self.fail_at.lock() = Some(call);
    }

    pub fn clear_failure(&self) {
        *self.fail_at.lock() = None;
    }

    pub fn changes(&self) -> Vec<(ProtectedRegion, Protection, Protection)> {
        self.changes.lock().clone()
    }

    /// True if no region was ever left writable and executable
    pub fn never_wx(&self) -> bool {
        let mut current: HashMap<usize, Protection> = HashMap::new();
        for (region, set, clear) in self.changes.lock().iter() {
            let prot = current.entry(region.base).or_insert(Protection::RX);
            prot.insert(*set);
            prot.remove(*clear);
            if prot.violates_wx() {
                return false;
            }
        }
        true
    }
}

impl ProtectionBackend for RecordingProtection {
    fn change(&self, region: ProtectedRegion, set: Protection, clear: Protection) -> io::Result<()> {
        let mut changes = self.changes.lock();
        let index = changes.len();
        changes.push((region, set, clear));

        if *self.fail_at.lock() == Some(index) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected protection failure"));
        }
        Ok(())
    }
}

/// External verifier double
#[derive(Default)]
pub struct MockVerifier {
    installed: Mutex<Vec<VerifierRegistration>>,
    revoked: Mutex<Vec<VerifierRegistration>>,
    refuse: Mutex<bool>,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    pub fn installed(&self) -> Vec<VerifierRegistration> {
        self.installed.lock().clone()
    }

    pub fn revoked(&self) -> Vec<VerifierRegistration> {
        self.revoked.lock().clone()
    }
}

impl ProtectionVerifier for MockVerifier {
    fn revoke(&self, registration: &VerifierRegistration) -> io::Result<()> {
        self.revoked.lock().push(registration.clone());
        Ok(())
    }

    fn install(&self, registration: &VerifierRegistration) -> io::Result<()> {
        if *self.refuse.lock() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "verification refused"));
        }
        self.installed.lock().push(registration.clone());
        Ok(())
    }
}

/// Cache backend counting maintenance requests
#[derive(Default)]
pub struct CountingCache {
    invalidations: AtomicUsize,
    flushes: AtomicUsize,
    bytes: AtomicUsize,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Bytes covered by all requests
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }
}

impl CacheMaintenance for CountingCache {
    fn invalidate_for_cpu(&self, pool: &str, range: CacheRange) {
        log::trace!("[{}] invalidate {:#x}+{:#x}", pool, range.kernel_addr, range.len);
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(range.len, Ordering::SeqCst);
    }

    fn flush_for_device(&self, pool: &str, range: CacheRange) {
        log::trace!("[{}] flush {:#x}+{:#x}", pool, range.kernel_addr, range.len);
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(range.len, Ordering::SeqCst);
    }
}
