//! Host services behind the service tables
//!
//! One `Host` per bridge. Every table entry resolves to a method here; the
//! tables only add the frozen index layout and argument unpacking.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use copro_arena::{Arena, DeviceAddr, KernelAddr, PoolHandle};
use copro_sched::{Priority, Producer, TaskArg, TaskFn, TaskScheduler};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::clock::Clock;
use crate::faces::{FaceDataSource, FaceSnapshot, MAX_FACES};
use crate::fwlog::{FirmwareLog, DEFAULT_LOG_CAPACITY};
use crate::handle::{Handle, HandleTable};
use crate::irq::{GeneralIrqTable, HwipChain, InterruptTable};
use crate::sync::{BlockingLock, IrqFlags, Semaphore, SpinLock};
use crate::timer::{TimerFn, TimerService};
use crate::{AbiError, Result, TableVariant};

/// Firmware-visible DMA pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PoolId {
    #[serde(rename = "DMA_TAAISP")]
    TaaIsp,
    #[serde(rename = "DMA_MEDRC")]
    Medrc,
    #[serde(rename = "DMA_TNR")]
    Tnr,
    #[serde(rename = "VRA")]
    Vra,
}

/// Number of firmware-visible pools
pub const POOL_COUNT: usize = 4;

impl PoolId {
    pub const ALL: [PoolId; POOL_COUNT] = [PoolId::TaaIsp, PoolId::Medrc, PoolId::Tnr, PoolId::Vra];

    pub fn name(self) -> &'static str {
        match self {
            PoolId::TaaIsp => "DMA_TAAISP",
            PoolId::Medrc => "DMA_MEDRC",
            PoolId::Tnr => "DMA_TNR",
            PoolId::Vra => "VRA",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|pool| pool.name() == name)
    }
}

/// Loaded binaries whose version strings firmware may query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    /// Primary imaging library
    Library,
    /// Auxiliary firmware
    Auxiliary,
    /// Face-detection accelerator firmware
    Accelerator,
}

/// Tripped by the firmware `assert` service; never clears itself
#[derive(Debug, Default)]
pub struct FatalLatch(AtomicBool);

impl FatalLatch {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm after the owner has recovered (bridge teardown)
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Debug/event ring capacity in bytes
    pub log_capacity: usize,

    /// Register base per hardware-IP chain
    pub reg_addrs: BTreeMap<HwipChain, u64>,

    /// Directory for firmware `fwrite` dumps
    pub dump_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            reg_addrs: BTreeMap::new(),
            dump_dir: None,
        }
    }
}

pub struct Host {
    config: HostConfig,
    arena: Arc<Arena>,
    pools: RwLock<[Option<PoolHandle>; POOL_COUNT]>,
    scheduler: Arc<TaskScheduler>,
    semaphores: HandleTable<Semaphore>,
    mutexes: HandleTable<BlockingLock>,
    spinlocks: HandleTable<SpinLock>,
    timers: TimerService,
    hwip_irqs: InterruptTable,
    general_irqs: GeneralIrqTable,
    /// Service spin locks, one per firmware image
    svc_locks: [SpinLock; 2],
    clock: Clock,
    log: FirmwareLog,
    fatal: FatalLatch,
    versions: RwLock<HashMap<BinaryKind, String>>,
    faces: RwLock<Option<Weak<dyn FaceDataSource>>>,
}

impl Host {
    /// Build host services and start the timer thread
    ///
    /// # Errors
    /// `Io` if the timer service thread cannot be spawned
    pub fn new(config: HostConfig, arena: Arc<Arena>, scheduler: Arc<TaskScheduler>) -> Result<Self> {
        let clock = Clock::new();
        let log = FirmwareLog::new(clock, config.log_capacity);

        Ok(Self {
            arena,
            pools: RwLock::new([None; POOL_COUNT]),
            scheduler,
            semaphores: HandleTable::new("semaphore"),
            mutexes: HandleTable::new("mutex"),
            spinlocks: HandleTable::new("spinlock"),
            timers: TimerService::new()?,
            hwip_irqs: InterruptTable::new(),
            general_irqs: GeneralIrqTable::new(),
            svc_locks: [SpinLock::new(), SpinLock::new()],
            clock,
            log,
            fatal: FatalLatch::default(),
            versions: RwLock::new(HashMap::new()),
            faces: RwLock::new(None),
            config,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn log(&self) -> &FirmwareLog {
        &self.log
    }

    pub fn fatal(&self) -> &FatalLatch {
        &self.fatal
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    pub fn hwip_irqs(&self) -> &InterruptTable {
        &self.hwip_irqs
    }

    pub fn general_irqs(&self) -> &GeneralIrqTable {
        &self.general_irqs
    }

    // Memory

    /// Make a pool reachable through the firmware memory services
    pub fn bind_pool(&self, pool: PoolId, handle: PoolHandle) {
        self.pools.write()[pool as usize] = Some(handle);
    }

    pub fn pool(&self, pool: PoolId) -> Result<PoolHandle> {
        self.pools.read()[pool as usize].ok_or(AbiError::PoolUnbound(pool.name()))
    }

    pub fn alloc(&self, pool: PoolId, size: usize) -> Result<KernelAddr> {
        let handle = self.pool(pool)?;
        match self.arena.allocate(handle, size) {
            Ok(allocation) => Ok(allocation.kernel_addr),
            Err(e) => {
                log::error!("[{}] alloc of {:#x} bytes failed: {}", pool.name(), size, e);
                Err(e.into())
            }
        }
    }

    pub fn free(&self, pool: PoolId, kva: KernelAddr) -> Result<()> {
        let handle = self.pool(pool)?;
        self.arena.free(handle, kva).map_err(|e| {
            log::error!("[{}] free of {:#x} failed: {}", pool.name(), kva, e);
            e.into()
        })
    }

    pub fn to_device(&self, pool: PoolId, kva: KernelAddr) -> Result<DeviceAddr> {
        Ok(self.arena.translate_to_device(self.pool(pool)?, kva)?)
    }

    pub fn to_kernel(&self, pool: PoolId, dva: DeviceAddr) -> Result<KernelAddr> {
        Ok(self.arena.translate_to_kernel(self.pool(pool)?, dva)?)
    }

    pub fn invalidate(&self, pool: PoolId, kva: KernelAddr, size: usize) -> Result<()> {
        Ok(self.arena.invalidate_for_cpu(self.pool(pool)?, kva, size)?)
    }

    /// Write back CPU caches for a range (the accelerator's `clean`)
    pub fn clean(&self, pool: PoolId, kva: KernelAddr, size: usize) -> Result<()> {
        Ok(self.arena.flush_for_device(self.pool(pool)?, kva, size)?)
    }

    // Semaphores

    pub fn sema_init(&self, count: u32) -> Result<Handle> {
        self.semaphores
            .insert(Semaphore::new(count))
            .ok_or(AbiError::HandleExhausted("semaphore"))
    }

    pub fn sema_finish(&self, handle: Handle) -> Result<()> {
        self.semaphores.remove(handle).map(|_| ())
    }

    pub fn sema_up(&self, handle: Handle) -> Result<()> {
        self.semaphores.get(handle)?.up();
        Ok(())
    }

    pub fn sema_down(&self, handle: Handle) -> Result<()> {
        self.semaphores.get(handle)?.down();
        Ok(())
    }

    // Blocking locks

    pub fn mutex_init(&self) -> Result<Handle> {
        self.mutexes
            .insert(BlockingLock::new())
            .ok_or(AbiError::HandleExhausted("mutex"))
    }

    /// Release a blocking lock; a held lock is unlocked first
    pub fn mutex_finish(&self, handle: Handle) -> Result<()> {
        let lock = self.mutexes.remove(handle)?;
        if lock.is_locked() {
            log::warn!("mutex {} destroyed while held", handle);
            lock.unlock()?;
        }
        Ok(())
    }

    pub fn mutex_lock(&self, handle: Handle) -> Result<()> {
        self.mutexes.get(handle)?.lock();
        Ok(())
    }

    pub fn mutex_try_lock(&self, handle: Handle) -> Result<bool> {
        Ok(self.mutexes.get(handle)?.try_lock())
    }

    pub fn mutex_unlock(&self, handle: Handle) -> Result<()> {
        self.mutexes.get(handle)?.unlock()
    }

    // Spin locks

    pub fn spin_init(&self) -> Result<Handle> {
        self.spinlocks
            .insert(SpinLock::new())
            .ok_or(AbiError::HandleExhausted("spinlock"))
    }

    pub fn spin_finish(&self, handle: Handle) -> Result<()> {
        self.spinlocks.remove(handle).map(|_| ())
    }

    pub fn spin_lock(&self, handle: Handle) -> Result<()> {
        self.spinlocks.get(handle)?.lock();
        Ok(())
    }

    pub fn spin_unlock(&self, handle: Handle) -> Result<()> {
        self.spinlocks.get(handle)?.unlock()
    }

    pub fn spin_lock_irq(&self, handle: Handle) -> Result<()> {
        self.spinlocks.get(handle)?.lock_irq();
        Ok(())
    }

    pub fn spin_unlock_irq(&self, handle: Handle) -> Result<()> {
        self.spinlocks.get(handle)?.unlock_irq()
    }

    pub fn spin_lock_irqsave(&self, handle: Handle) -> Result<IrqFlags> {
        Ok(self.spinlocks.get(handle)?.lock_irqsave())
    }

    pub fn spin_unlock_irqrestore(&self, handle: Handle, flags: IrqFlags) -> Result<()> {
        self.spinlocks.get(handle)?.unlock_irqrestore(flags)
    }

    /// Take the service lock of one firmware image
    pub fn svc_lock_save(&self, variant: TableVariant) -> IrqFlags {
        self.svc_locks[variant as usize].lock_irqsave()
    }

    pub fn svc_unlock_restore(&self, variant: TableVariant, flags: IrqFlags) -> Result<()> {
        self.svc_locks[variant as usize].unlock_irqrestore(flags)
    }

    // Timers

    pub fn timer_create(&self, expires_ms: u64, func: TimerFn, data: usize) -> Result<Handle> {
        self.timers
            .create(Duration::from_millis(expires_ms), func, data)
            .ok_or(AbiError::HandleExhausted("timer"))
    }

    pub fn timer_delete(&self, handle: Handle) -> Result<()> {
        self.timers.delete(handle)
    }

    pub fn timer_reset(&self, handle: Handle, expires_ms: u64) -> Result<()> {
        self.timers.reset(handle, Duration::from_millis(expires_ms))
    }

    /// Milliseconds before the timer fires
    pub fn timer_query(&self, handle: Handle) -> Result<u64> {
        Ok(self.timers.query(handle)?.as_millis() as u64)
    }

    pub fn timer_enable(&self, handle: Handle) -> Result<()> {
        self.timers.enable(handle)
    }

    pub fn timer_disable(&self, handle: Handle) -> Result<()> {
        self.timers.disable(handle)
    }

    // Tasks

    /// Queue deferred work for a firmware producer
    ///
    /// # Returns
    /// `false` if the priority is outside the producer's range or the ring
    /// is full. Under `MisusePolicy::Abort` a range violation aborts.
    pub fn add_task(&self, producer: Producer, priority: i32, func: TaskFn, arg: TaskArg) -> bool {
        match self.scheduler.submit_from(producer, Priority(priority), func, arg) {
            Ok(_) => true,
            Err(e) => {
                log::error!("add_task failed: {}", e);
                false
            }
        }
    }

    pub fn flush_task_handler(&self, priority: i32) -> Result<()> {
        Ok(self.scheduler.flush(Priority(priority))?)
    }

    // Misc

    pub fn get_reg_addr(&self, chain: u32) -> Result<u64> {
        let chain_id = HwipChain::from_raw(chain).map_err(|e| {
            log::warn!("get_reg_addr: invalid id({})", chain);
            e
        })?;

        let addr = self
            .config
            .reg_addrs
            .get(&chain_id)
            .copied()
            .ok_or(AbiError::NoRegister(chain))?;

        log::info!("get_reg_addr: [{:?}]({:#x})", chain_id, addr);
        Ok(addr)
    }

    /// Firmware assertion: latch the fatal flag
    pub fn assert_fatal(&self) {
        log::error!("Firmware assert; bridge latched fatal");
        self.fatal.trip();
    }

    pub fn random(&self) -> u32 {
        rand::random()
    }

    /// Write a dump file into the configured dump directory
    ///
    /// Only the final component of `name` is used.
    pub fn fwrite(&self, name: &str, data: &[u8]) -> Result<usize> {
        let dir = self.config.dump_dir.as_ref().ok_or(AbiError::NoDumpDir)?;
        let file_name = Path::new(name).file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad dump name {:?}", name))
        })?;

        let path = dir.join(file_name);
        fs::write(&path, data)?;
        log::info!("fwrite {} ({} bytes)", path.display(), data.len());

        Ok(data.len())
    }

    // Face data

    pub fn set_face_source(&self, source: Weak<dyn FaceDataSource>) {
        *self.faces.write() = Some(source);
    }

    pub fn clear_face_source(&self) {
        *self.faces.write() = None;
    }

    /// Current face list for `instance`
    ///
    /// An unknown instance or an over-long list yields an empty snapshot.
    pub fn get_fd_data(&self, instance: u32) -> Result<FaceSnapshot> {
        let source = self
            .faces
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(AbiError::NoFaceSource)?;

        let Some(snapshot) = source.face_data(instance) else {
            return Ok(FaceSnapshot::default());
        };

        if snapshot.faces.len() > MAX_FACES {
            log::error!(
                "Exceed MAX_FACES at face source (instance: {} face_num: {})",
                instance,
                snapshot.faces.len()
            );
            return Ok(FaceSnapshot::default());
        }

        Ok(snapshot)
    }

    /// Hybrid (post-detection) faces; hybrid detection is not enabled
    pub fn get_hybrid_fd_data(&self, _instance: u32) -> Result<FaceSnapshot> {
        Ok(FaceSnapshot::default())
    }

    // Versions

    pub fn set_binary_version(&self, kind: BinaryKind, version: String) {
        log::info!("{:?} binary version: {}", kind, version);
        self.versions.write().insert(kind, version);
    }

    /// Version string as reported to firmware
    ///
    /// Library versions carry a bracketed prefix; only the text after the
    /// last `]` is returned for them.
    pub fn binary_version(&self, kind: BinaryKind) -> Option<String> {
        let versions = self.versions.read();
        let version = versions.get(&kind)?.as_str();

        let version = match kind {
            BinaryKind::Library => version.rsplit_once(']').map(|(_, tail)| tail).unwrap_or(version),
            _ => version,
        };

        Some(version.to_string())
    }

    /// Stop background services
    pub fn shutdown(&self) {
        self.timers.shutdown();
    }
}
