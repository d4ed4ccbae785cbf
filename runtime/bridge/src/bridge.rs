//! Bridge context
//!
//! Owns one of everything: the arena and its pools, the task scheduler,
//! host services, the loader and the three firmware images. The load
//! sequence mirrors the boot flow of the co-processor:
//!
//! ```text
//! load_binaries()
//!   ├─ [load control] primary (All | DataOnly) ─► accelerator (All) ─► auxiliary (All | DataOnly)
//!   ├─ start task workers
//!   └─ bind DMA_TAAISP, DMA_MEDRC, DMA_TNR, VRA
//! ```

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use copro_abi::{
    build_auxiliary_table, build_primary_table, FaceDataSource, Host, PoolId, ServiceTable, TableVariant,
};
use copro_arena::{Arena, CacheMaintenance, NoopCache};
use copro_loader::{
    FirmwareEntry, FirmwareImage, ImageKind, ImageProvider, LoadKind, Loader, ProtectionBackend, ProtectionVerifier,
};
use copro_sched::TaskScheduler;
use copro_vra::{VraFirmware, VraPipeline};

use crate::config::BridgeConfig;
use crate::{BridgeError, Result};

bitflags! {
    /// Load progress of the bridge
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoadFlags: u32 {
        /// Primary image code is in place; later loads refresh data only
        const PRIMARY_CODE = 1 << 0;
        /// Auxiliary image code is in place
        const AUXILIARY_CODE = 1 << 1;
        const ALL_CODE = Self::PRIMARY_CODE.bits() | Self::AUXILIARY_CODE.bits();
        /// Every image loaded, workers started and pools bound
        const BINARIES = 1 << 2;
    }
}

/// Platform seams the bridge is built over
pub struct BridgeDeps {
    pub provider: Arc<dyn ImageProvider>,
    pub protection: Option<Arc<dyn ProtectionBackend>>,
    pub verifier: Option<Arc<dyn ProtectionVerifier>>,
    pub cache: Arc<dyn CacheMaintenance>,
    pub primary_entry: Option<Arc<dyn FirmwareEntry>>,
    pub auxiliary_entry: Option<Arc<dyn FirmwareEntry>>,
}

impl BridgeDeps {
    pub fn new(provider: Arc<dyn ImageProvider>) -> Self {
        Self {
            provider,
            protection: None,
            verifier: None,
            cache: Arc::new(NoopCache),
            primary_entry: None,
            auxiliary_entry: None,
        }
    }

    pub fn with_protection(mut self, protection: Arc<dyn ProtectionBackend>) -> Self {
        self.protection = Some(protection);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ProtectionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheMaintenance>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_primary_entry(mut self, entry: Arc<dyn FirmwareEntry>) -> Self {
        self.primary_entry = Some(entry);
        self
    }

    pub fn with_auxiliary_entry(mut self, entry: Arc<dyn FirmwareEntry>) -> Self {
        self.auxiliary_entry = Some(entry);
        self
    }
}

pub struct Bridge {
    config: BridgeConfig,
    arena: Arc<Arena>,
    scheduler: Arc<TaskScheduler>,
    host: Arc<Host>,
    primary_table: ServiceTable,
    auxiliary_table: ServiceTable,
    loader: Loader,
    primary: FirmwareImage,
    auxiliary: FirmwareImage,
    accelerator: FirmwareImage,
    flags: Mutex<LoadFlags>,
    vra: Mutex<Option<Arc<VraPipeline>>>,
}

impl Bridge {
    /// Build every part of the bridge; nothing is loaded yet
    ///
    /// # Errors
    /// - `Pool` if the pool table is incomplete
    /// - `Sched` for a bad class table
    /// - `Abi` if host services cannot start
    /// - `Loader` if an image window is misconfigured
    pub fn new(config: BridgeConfig, deps: BridgeDeps) -> Result<Self> {
        config.validate()?;

        let arena = Arc::new(Arena::with_cache(config.alloc_policy, deps.cache.clone()));
        let scheduler = Arc::new(TaskScheduler::new(config.scheduler.clone())?);
        let host = Arc::new(Host::new(config.host.clone(), arena.clone(), scheduler.clone())?);

        let primary_table = build_primary_table(host.clone());
        let auxiliary_table = build_auxiliary_table(host.clone());

        let mut loader = Loader::new(host.clone(), deps.provider).with_cache(deps.cache);
        if let Some(protection) = deps.protection {
            loader = loader.with_protection(protection);
        }
        if let Some(verifier) = deps.verifier {
            loader = loader.with_verifier(verifier);
        }

        let primary = FirmwareImage::new(ImageKind::Primary, config.primary.clone(), deps.primary_entry)?;
        let auxiliary = FirmwareImage::new(ImageKind::Auxiliary, config.auxiliary.clone(), deps.auxiliary_entry)?;
        let accelerator = FirmwareImage::new(ImageKind::Accelerator, config.accelerator.clone(), None)?;

        log::info!(
            "bridge ready: {} pools, {} task classes",
            config.pools.len(),
            config.scheduler.classes.len()
        );

        Ok(Self {
            config,
            arena,
            scheduler,
            host,
            primary_table,
            auxiliary_table,
            loader,
            primary,
            auxiliary,
            accelerator,
            flags: Mutex::new(LoadFlags::empty()),
            vra: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn table(&self, variant: TableVariant) -> &ServiceTable {
        match variant {
            TableVariant::Primary => &self.primary_table,
            TableVariant::Auxiliary => &self.auxiliary_table,
        }
    }

    pub fn image(&self, kind: ImageKind) -> &FirmwareImage {
        match kind {
            ImageKind::Primary => &self.primary,
            ImageKind::Auxiliary => &self.auxiliary,
            ImageKind::Accelerator => &self.accelerator,
        }
    }

    pub fn flags(&self) -> LoadFlags {
        *self.flags.lock()
    }

    pub fn is_loaded(&self) -> bool {
        self.flags().contains(LoadFlags::BINARIES)
    }

    /// Pipeline attached with [`Bridge::attach_vra`], if any
    pub fn vra(&self) -> Option<Arc<VraPipeline>> {
        self.vra.lock().clone()
    }

    /// Load all images, start the task workers and bind the DMA pools
    ///
    /// Images whose code is already in place only get their data segments
    /// refreshed. Calling this while loaded is a no-op.
    ///
    /// # Errors
    /// - `Fatal` once firmware has latched an assert
    /// - `Loader` from the first image that fails; later images are not tried
    /// - `Sched` if the workers cannot be started
    /// - `Arena` if a pool cannot be bound
    pub fn load_binaries(&self) -> Result<()> {
        let mut flags = self.flags.lock();

        log::info!("binary load start");
        if flags.contains(LoadFlags::BINARIES) {
            log::info!("binaries are already loaded");
            return Ok(());
        }

        if self.host.fatal().is_set() {
            log::error!("binary loading is latched fatal");
            return Err(BridgeError::Fatal);
        }

        {
            let _control = self.loader.lock_control();

            self.load_code_image(&self.primary, LoadFlags::PRIMARY_CODE, &mut flags)?;
            self.loader.load(&self.accelerator, LoadKind::All)?;
            self.load_code_image(&self.auxiliary, LoadFlags::AUXILIARY_CODE, &mut flags)?;
        }

        self.scheduler.start()?;
        self.bind_pools()?;

        flags.insert(LoadFlags::BINARIES);
        log::info!("binary load done");
        Ok(())
    }

    fn load_code_image(&self, image: &FirmwareImage, code: LoadFlags, flags: &mut LoadFlags) -> Result<()> {
        if flags.contains(code) {
            self.loader.load(image, LoadKind::DataOnly)?;
            return Ok(());
        }

        log::info!("{} code/data load start", image.kind().label());
        self.loader.load(image, LoadKind::All)?;
        flags.insert(code);
        Ok(())
    }

    /// Put primary and auxiliary code in place ahead of the first stream
    ///
    /// Both images are tried even if the first fails; the last error is
    /// returned.
    pub fn load_on_boot(&self) -> Result<()> {
        let mut flags = self.flags.lock();
        let _control = self.loader.lock_control();
        let mut outcome = Ok(());

        for (image, code) in [
            (&self.primary, LoadFlags::PRIMARY_CODE),
            (&self.auxiliary, LoadFlags::AUXILIARY_CODE),
        ] {
            if flags.contains(code) {
                continue;
            }

            match self.loader.load(image, LoadKind::All) {
                Ok(()) => flags.insert(code),
                Err(e) => {
                    log::error!("boot load of {} failed: {}", image.kind().label(), e);
                    outcome = Err(e.into());
                }
            }
        }

        outcome
    }

    fn bind_pools(&self) -> Result<()> {
        for pool in &self.config.pools {
            if let Ok(handle) = self.host.pool(pool.pool) {
                let live = self.arena.stats(handle)?.live;
                if live > 0 {
                    log::warn!("[{}] rebinding with {} live allocations", pool.pool.name(), live);
                }
            }

            let handle = self.arena.init_pool(pool.pool.name(), pool.backing(), pool.alignment)?;
            self.host.bind_pool(pool.pool, handle);
            log::debug!(
                "[{}] kva {:#x} dva {:#x} size {:#x}",
                pool.pool.name(),
                pool.kva_base,
                pool.dva_base,
                pool.size
            );
        }
        Ok(())
    }

    /// Drain and stop the task workers and report leaked DMA memory
    ///
    /// Image code stays in place, so the next [`Bridge::load_binaries`]
    /// only refreshes data.
    ///
    /// # Returns
    /// Number of allocations still outstanding across all pools
    pub fn unload(&self) -> Result<usize> {
        let mut flags = self.flags.lock();

        if self.scheduler.is_running() {
            self.scheduler.flush_all()?;
        }
        self.scheduler.shutdown();
        flags.remove(LoadFlags::BINARIES);

        let leaks = self.arena.report_leaks();
        if leaks > 0 {
            log::warn!("{} allocations outstanding at unload", leaks);
        }
        Ok(leaks)
    }

    /// Change the file names requested for the primary and auxiliary images
    pub fn set_firmware_names(&self, primary: &str, auxiliary: &str) {
        self.primary.set_name(primary);
        self.auxiliary.set_name(auxiliary);
    }

    /// Build the face-detection pipeline over this bridge's host services
    ///
    /// The pipeline becomes the source of `get_fd_data` for firmware.
    /// Attaching again replaces the previous pipeline.
    pub fn attach_vra(&self, firmware: Arc<dyn VraFirmware>) -> Result<Arc<VraPipeline>> {
        let pipeline = VraPipeline::new(self.config.vra.clone(), self.host.clone(), firmware)?;

        let source: Arc<dyn FaceDataSource> = pipeline.clone();
        self.host.set_face_source(Arc::downgrade(&source));

        if self.vra.lock().replace(pipeline.clone()).is_some() {
            log::warn!("replaced attached face-detection pipeline");
        }
        Ok(pipeline)
    }

    /// Detach the pipeline; firmware sees no faces afterwards
    pub fn detach_vra(&self) -> Option<Arc<VraPipeline>> {
        self.host.clear_face_source();
        self.vra.lock().take()
    }

    /// Live allocations in one firmware-visible pool
    pub fn pool_live(&self, pool: PoolId) -> Result<usize> {
        let handle = self.host.pool(pool)?;
        Ok(self.arena.stats(handle)?.live)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(pipeline) = self.vra.get_mut().take() {
            if let Err(e) = pipeline.terminate_frame_work() {
                log::warn!("face-detection teardown failed: {}", e);
            }
        }
        self.scheduler.shutdown();
        self.host.shutdown();
    }
}
