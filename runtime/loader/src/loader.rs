//! Load sequencing
//!
//! ```text
//! Unloaded ─► Validating ─► Writable ─► Copied ─► Executable ─► Running
//!                 │            │           │           │
//!                 └────────────┴───────────┴───────────┴──► Failed
//! ```
//! A data-only load runs `Validating ─► Copied ─► Running` against an image
//! whose code is already in place and leaves protection alone.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use copro_abi::{build_auxiliary_table, build_primary_table, Host, ServiceTable, TableVariant};
use copro_arena::{CacheMaintenance, CacheRange, KernelAddr, NoopCache};

use crate::image::{carve_version, ImageConfig, ImageKind, LoadKind, LoadState, ProtectionState};
use crate::protect::{NoopProtection, Protection, ProtectionBackend, ProtectionVerifier, VerifierRegistration};
use crate::provider::{ImageBlob, ImageProvider, ImageSource};
use crate::window::MemoryWindow;
use crate::{LoaderError, Result};

/// Firmware start-up trampoline
///
/// Called once the image is executable, with the entry address and the
/// table matching the image. Firmware keeps the table for later calls.
pub trait FirmwareEntry: Send + Sync {
    fn start_up(&self, entry: KernelAddr, table: ServiceTable);
}

struct ImageInner {
    state: LoadState,
    protection: ProtectionState,
    code_loaded: bool,
    registration: Option<VerifierRegistration>,
    source: Option<ImageSource>,
    size: usize,
    starts: u32,
}

/// One loadable firmware image and its window
pub struct FirmwareImage {
    kind: ImageKind,
    name: RwLock<String>,
    config: ImageConfig,
    window: MemoryWindow,
    entry: Option<Arc<dyn FirmwareEntry>>,
    inner: Mutex<ImageInner>,
}

impl FirmwareImage {
    pub fn new(kind: ImageKind, config: ImageConfig, entry: Option<Arc<dyn FirmwareEntry>>) -> Result<Self> {
        let window = MemoryWindow::new(&config)?;

        Ok(Self {
            kind,
            name: RwLock::new(config.name.clone()),
            config,
            window,
            entry,
            inner: Mutex::new(ImageInner {
                state: LoadState::Unloaded,
                protection: ProtectionState::Executable,
                code_loaded: false,
                registration: None,
                source: None,
                size: 0,
                starts: 0,
            }),
        })
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// File name requested from the provider
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        log::info!("{} image name: {}", self.kind.label(), name);
        *self.name.write() = name.to_string();
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn window(&self) -> &MemoryWindow {
        &self.window
    }

    pub fn state(&self) -> LoadState {
        self.inner.lock().state
    }

    pub fn protection(&self) -> ProtectionState {
        self.inner.lock().protection
    }

    /// Code has been copied and protected at least once
    pub fn code_loaded(&self) -> bool {
        self.inner.lock().code_loaded
    }

    /// Source of the last fetched image
    pub fn source(&self) -> Option<ImageSource> {
        self.inner.lock().source
    }

    /// Size of the last fetched image
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// Number of times the entry point was called
    pub fn starts(&self) -> u32 {
        self.inner.lock().starts
    }

    pub fn registration(&self) -> Option<VerifierRegistration> {
        self.inner.lock().registration.clone()
    }

    pub fn entry_addr(&self) -> KernelAddr {
        self.window.addr(self.config.entry_offset)
    }
}

/// Places images into their windows under W^X and enters them
pub struct Loader {
    host: Arc<Host>,
    provider: Arc<dyn ImageProvider>,
    protection: Arc<dyn ProtectionBackend>,
    verifier: Option<Arc<dyn ProtectionVerifier>>,
    cache: Arc<dyn CacheMaintenance>,
    control: Mutex<()>,
}

impl Loader {
    pub fn new(host: Arc<Host>, provider: Arc<dyn ImageProvider>) -> Self {
        Self {
            host,
            provider,
            protection: Arc::new(NoopProtection),
            verifier: None,
            cache: Arc::new(NoopCache),
            control: Mutex::new(()),
        }
    }

    pub fn with_protection(mut self, backend: Arc<dyn ProtectionBackend>) -> Self {
        self.protection = backend;
        self
    }

    /// Hand executable enforcement to an external verifier
    pub fn with_verifier(mut self, verifier: Arc<dyn ProtectionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheMaintenance>) -> Self {
        self.cache = cache;
        self
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Serialize multi-image load sequences
    pub fn lock_control(&self) -> MutexGuard<'_, ()> {
        self.control.lock()
    }

    /// Load `image` and, if it has an entry point, start it
    ///
    /// # Arguments
    /// * `image` - Image to load
    /// * `load` - `All` for code and data, `DataOnly` to refresh data segments
    ///
    /// # Returns
    /// `Ok(())` once the image is running. An `All` load of an image that is
    /// already running does nothing and succeeds.
    ///
    /// # Errors
    /// - `Fatal` if the host latched a firmware assert
    /// - `InvalidState` for a data-only load before code was loaded
    /// - `ImageUnavailable`, `ImageTooLarge`, `ImageCorrupt` while validating
    /// - `Protection`, `Verifier` from the protection toggles
    pub fn load(&self, image: &FirmwareImage, load: LoadKind) -> Result<()> {
        if self.host.fatal().is_set() {
            log::error!("{}: binary loading is fatal", image.name());
            return Err(LoaderError::Fatal);
        }

        let mut inner = image.inner.lock();

        let outcome = match load {
            LoadKind::All if inner.state == LoadState::Running => {
                log::info!("{} is already running", image.name());
                return Ok(());
            }
            LoadKind::All => self.load_all(image, &mut inner),
            LoadKind::DataOnly if !inner.code_loaded => {
                return Err(LoaderError::InvalidState {
                    image: image.name(),
                    state: inner.state,
                    expected: "code loaded",
                });
            }
            LoadKind::DataOnly => self.load_data(image, &mut inner),
        };

        if let Err(e) = outcome {
            log::error!("failed to load {} ({}): {}", image.name(), image.kind.label(), e);
            inner.state = LoadState::Failed;
            return Err(e);
        }

        inner.state = LoadState::Running;
        inner.code_loaded = true;
        inner.starts += 1;
        drop(inner);

        self.start(image);
        Ok(())
    }

    fn fetch(&self, image: &FirmwareImage, inner: &mut ImageInner) -> Result<ImageBlob> {
        inner.state = LoadState::Validating;

        let name = image.name();
        let blob = self
            .provider
            .request(&name)
            .map_err(|source| LoaderError::ImageUnavailable { name: name.clone(), source })?;

        inner.source = Some(blob.source);
        inner.size = blob.len();

        if blob.len() > image.window.capacity() {
            log::error!(
                "{} bin size is bigger than memory area. {:#x}[{:#x}]",
                image.kind.label(),
                blob.len(),
                image.window.capacity()
            );
            return Err(LoaderError::ImageTooLarge {
                name,
                size: blob.len(),
                capacity: image.window.capacity(),
            });
        }

        Ok(blob)
    }

    fn load_all(&self, image: &FirmwareImage, inner: &mut ImageInner) -> Result<()> {
        let blob = self.fetch(image, inner)?;

        if let Some(verifier) = &self.verifier {
            if let Some(previous) = inner.registration.take() {
                if let Err(e) = verifier.revoke(&previous) {
                    log::warn!("{}: revoking previous registration failed: {}", image.name(), e);
                }
            }
        }

        self.make_writable(image, inner)?;

        log::info!(
            "binary info[{}] - type: C/D, addr: {:#x}, size: {:#x} from: {}",
            image.kind.label(),
            image.window.base(),
            blob.len(),
            blob.source
        );
        self.copy(image, 0, &blob.data)?;
        inner.state = LoadState::Copied;

        match &self.verifier {
            Some(verifier) => {
                let registration = VerifierRegistration {
                    binary_base: image.window.base(),
                    binary_size: blob.len(),
                    code: image.window.regions().to_vec(),
                };
                verifier.install(&registration).map_err(|source| {
                    log::error!("{}: verifier refused the image", image.name());
                    LoaderError::Verifier { image: image.name(), source }
                })?;
                inner.registration = Some(registration);
                image.window.mark_enforced();
                inner.protection = ProtectionState::Executable;
                inner.state = LoadState::ProtectionToggled(ProtectionState::Executable);
            }
            None => self.make_executable(image, inner)?,
        }

        self.record_version(image, &blob.data);
        Ok(())
    }

    fn load_data(&self, image: &FirmwareImage, inner: &mut ImageInner) -> Result<()> {
        let blob = self.fetch(image, inner)?;
        let config = &image.config;

        if blob.len() <= config.data_offset {
            return Err(LoaderError::ImageCorrupt {
                name: image.name(),
                reason: format!("{:#x} bytes holds no data past {:#x}", blob.len(), config.data_offset),
            });
        }

        for segment in &config.data_segments {
            let end = segment.len.map_or(blob.len(), |len| segment.offset + len);
            if segment.offset >= end || end > blob.len() {
                return Err(LoaderError::ImageCorrupt {
                    name: image.name(),
                    reason: format!("data segment {:#x}..{:#x} exceeds {:#x} bytes", segment.offset, end, blob.len()),
                });
            }

            log::info!(
                "binary info[{}] - type: D, from: {}",
                image.kind.label(),
                blob.source
            );
            self.copy(image, segment.offset, &blob.data[segment.offset..end])?;
        }
        inner.state = LoadState::Copied;

        self.record_version(image, &blob.data);
        Ok(())
    }

    fn copy(&self, image: &FirmwareImage, offset: usize, data: &[u8]) -> Result<()> {
        image.window.write(offset, data)?;

        let kernel_addr = image.window.addr(offset);
        self.cache.flush_for_device(
            image.window.name(),
            CacheRange {
                kernel_addr,
                device_addr: kernel_addr as u64,
                len: data.len(),
            },
        );
        Ok(())
    }

    /// Strip execute, then add write; execute is restored if write fails
    ///
    /// Each step runs only if the region still needs it, so code left
    /// half-toggled by an earlier failed load is picked up where it stopped.
    fn make_writable(&self, image: &FirmwareImage, inner: &mut ImageInner) -> Result<()> {
        for (index, &region) in image.window.regions().iter().enumerate() {
            let current = image.window.protection(index).unwrap_or(Protection::RX);
            let was_exec = current.contains(Protection::EXEC);

            if was_exec {
                self.protection
                    .change(region, Protection::empty(), Protection::EXEC)
                    .map_err(|source| LoaderError::Protection {
                        image: image.name(),
                        step: "strip execute",
                        source,
                    })?;
                image.window.apply(index, Protection::empty(), Protection::EXEC);
            }

            if current.contains(Protection::WRITE) {
                continue;
            }

            if let Err(source) = self.protection.change(region, Protection::WRITE, Protection::empty()) {
                if was_exec {
                    log::error!("{}: adding write to {:#x} failed, restoring execute", image.name(), region.base);
                    match self.protection.change(region, Protection::EXEC, Protection::empty()) {
                        Ok(()) => image.window.apply(index, Protection::EXEC, Protection::empty()),
                        Err(e) => log::error!("{}: restoring execute failed: {}", image.name(), e),
                    }
                }
                return Err(LoaderError::Protection {
                    image: image.name(),
                    step: "add write",
                    source,
                });
            }
            image.window.apply(index, Protection::WRITE, Protection::empty());
        }

        inner.protection = ProtectionState::Writable;
        inner.state = LoadState::ProtectionToggled(ProtectionState::Writable);
        Ok(())
    }

    /// Strip write, then restore execute
    fn make_executable(&self, image: &FirmwareImage, inner: &mut ImageInner) -> Result<()> {
        if inner.protection != ProtectionState::Writable {
            log::error!("{}: memory attribute state is wrong", image.name());
            return Err(LoaderError::InvalidState {
                image: image.name(),
                state: inner.state,
                expected: "writable code",
            });
        }

        for (index, &region) in image.window.regions().iter().enumerate() {
            self.protection
                .change(region, Protection::empty(), Protection::WRITE)
                .map_err(|source| LoaderError::Protection {
                    image: image.name(),
                    step: "strip write",
                    source,
                })?;
            image.window.apply(index, Protection::empty(), Protection::WRITE);

            self.protection
                .change(region, Protection::EXEC, Protection::empty())
                .map_err(|source| LoaderError::Protection {
                    image: image.name(),
                    step: "add execute",
                    source,
                })?;
            image.window.apply(index, Protection::EXEC, Protection::empty());
        }

        inner.protection = ProtectionState::Executable;
        inner.state = LoadState::ProtectionToggled(ProtectionState::Executable);
        Ok(())
    }

    fn record_version(&self, image: &FirmwareImage, data: &[u8]) {
        match carve_version(data) {
            Some(version) => self.host.set_binary_version(image.kind.binary_kind(), version),
            None => log::warn!("{}: no version string", image.name()),
        }
    }

    fn start(&self, image: &FirmwareImage) {
        let (Some(entry), Some(variant)) = (&image.entry, image.kind.table_variant()) else {
            return;
        };

        let table = match variant {
            TableVariant::Primary => build_primary_table(self.host.clone()),
            TableVariant::Auxiliary => build_auxiliary_table(self.host.clone()),
        };

        log::info!("{} start_up at {:#x}", image.kind.label(), image.entry_addr());
        entry.start_up(image.entry_addr(), table);
    }
}
