//! Firmware image doubles entered by the loader
//!
//! At start-up each double does what a real image does first: announce
//! itself in the debug log, set up its resources and queue a piece of
//! deferred work. The table is kept so tests can keep driving it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use copro_abi::{auxiliary, primary, BinaryKind, Call, FaceSnapshot, Handle, Reply, ServiceTable};
use copro_arena::KernelAddr;
use copro_loader::FirmwareEntry;
use copro_sched::{Priority, TaskFn};

/// Bytes of scratch memory taken by [`MockPrimaryFirmware::alloc_scratch`]
pub const SCRATCH_SIZE: usize = 0x1000;

#[derive(Default)]
struct Boot {
    entries: Vec<KernelAddr>,
    table: Option<ServiceTable>,
    scratch: Option<KernelAddr>,
    sema: Option<Handle>,
    version: Option<String>,
}

fn log_failure(image: &str, what: &str, result: copro_abi::Result<Reply>) -> Option<Reply> {
    match result {
        Ok(reply) => Some(reply),
        Err(e) => {
            log::warn!("{}: {} failed: {}", image, what, e);
            None
        }
    }
}

fn counting_task(counter: &Arc<AtomicUsize>) -> TaskFn {
    let counter = counter.clone();
    Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

/// Imaging library double, entered with the primary table
#[derive(Default)]
pub struct MockPrimaryFirmware {
    boot: Mutex<Boot>,
    starts: AtomicUsize,
    task_runs: Arc<AtomicUsize>,
}

impl MockPrimaryFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> Vec<KernelAddr> {
        self.boot.lock().entries.clone()
    }

    pub fn table(&self) -> Option<ServiceTable> {
        self.boot.lock().table.clone()
    }

    /// Take a scratch buffer from the imaging pool, as the library does
    /// when its first stream opens
    pub fn alloc_scratch(&self) -> Option<KernelAddr> {
        let table = self.table()?;
        let kva = log_failure(
            "primary",
            "alloc",
            table.invoke(primary::TAAISP_ALLOC, Call::Size(SCRATCH_SIZE)),
        )
        .and_then(|reply| reply.as_kva())?;

        self.boot.lock().scratch = Some(kva);
        Some(kva)
    }

    /// Give the scratch buffer back
    pub fn free_scratch(&self) -> bool {
        let (Some(table), Some(kva)) = (self.table(), self.boot.lock().scratch.take()) else {
            return false;
        };
        log_failure("primary", "free", table.invoke(primary::TAAISP_FREE, Call::Kva(kva))).is_some()
    }

    pub fn scratch(&self) -> Option<KernelAddr> {
        self.boot.lock().scratch
    }

    /// Library version string as the host reported it back
    pub fn version(&self) -> Option<String> {
        self.boot.lock().version.clone()
    }

    /// Deferred work items that have run
    pub fn task_runs(&self) -> usize {
        self.task_runs.load(Ordering::SeqCst)
    }

    /// Read one instance's faces the way the auto-exposure algorithm does
    pub fn faces(&self, instance: u32) -> Option<FaceSnapshot> {
        let table = self.table()?;
        match table.invoke(primary::GET_FD_DATA, Call::Instance(instance)) {
            Ok(Reply::Faces(snapshot)) => Some(snapshot),
            Ok(_) => None,
            Err(e) => {
                log::warn!("primary: get_fd_data failed: {}", e);
                None
            }
        }
    }
}

impl FirmwareEntry for MockPrimaryFirmware {
    fn start_up(&self, entry: KernelAddr, table: ServiceTable) {
        self.starts.fetch_add(1, Ordering::SeqCst);

        log_failure(
            "primary",
            "log_write",
            table.invoke(primary::LOG_WRITE, Call::Text(format!("library up at {:#x}", entry))),
        );

        let version = log_failure(
            "primary",
            "get_binary_version",
            table.invoke(
                primary::GET_BINARY_VERSION,
                Call::BinaryVersion {
                    kind: BinaryKind::Library,
                    hint: 0,
                },
            ),
        );

        log_failure(
            "primary",
            "add_task",
            table.invoke(
                primary::ADD_TASK,
                Call::Task {
                    priority: Priority::FIRST.0,
                    func: counting_task(&self.task_runs),
                    arg: 0,
                },
            ),
        );

        let mut boot = self.boot.lock();
        boot.entries.push(entry);
        boot.version = match version {
            Some(Reply::Text(text)) => text,
            _ => None,
        };
        boot.table = Some(table);
    }
}

/// Auxiliary firmware double, entered with the auxiliary table
#[derive(Default)]
pub struct MockAuxFirmware {
    boot: Mutex<Boot>,
    starts: AtomicUsize,
    task_runs: Arc<AtomicUsize>,
}

impl MockAuxFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> Vec<KernelAddr> {
        self.boot.lock().entries.clone()
    }

    pub fn table(&self) -> Option<ServiceTable> {
        self.boot.lock().table.clone()
    }

    /// Semaphore created at start-up; the auxiliary table has no memory services
    pub fn sema(&self) -> Option<Handle> {
        self.boot.lock().sema
    }

    pub fn task_runs(&self) -> usize {
        self.task_runs.load(Ordering::SeqCst)
    }
}

impl FirmwareEntry for MockAuxFirmware {
    fn start_up(&self, entry: KernelAddr, table: ServiceTable) {
        self.starts.fetch_add(1, Ordering::SeqCst);

        log_failure(
            "auxiliary",
            "log_write",
            table.invoke(auxiliary::LOG_WRITE, Call::Text(format!("rta up at {:#x}", entry))),
        );

        let sema = log_failure("auxiliary", "sema_init", table.invoke(auxiliary::SEMA_INIT, Call::Count(0)));

        log_failure(
            "auxiliary",
            "add_task",
            table.invoke(
                auxiliary::ADD_TASK,
                Call::Task {
                    priority: Priority::SIXTH.0,
                    func: counting_task(&self.task_runs),
                    arg: 0,
                },
            ),
        );

        let mut boot = self.boot.lock();
        boot.entries.push(entry);
        boot.sema = sema.and_then(|reply| reply.as_handle());
        boot.table = Some(table);
    }
}
