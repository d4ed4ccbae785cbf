//! Host Service ABI - Frozen callback tables for co-processor firmware
//!
//! # Purpose
//! Closed firmware images reach the host only through an index-addressed
//! table of services: logging, semaphores and locks, timers, interrupt
//! registration, DMA pool access, deferred work, and a few queries. This
//! crate owns those services and the two frozen index layouts.
//!
//! # Integration Points
//! - Depends on: `copro-arena` (pool services), `copro-sched` (add_task,
//!   flush_task_handler)
//! - Provides to: the loader (table handed to firmware entry), the
//!   face-detection pipeline (spin/irq locks, face data seam)
//!
//! # Architecture
//! ```text
//!   firmware ──invoke(index, Call)──► ServiceTable ──► Host ──► Arena / Scheduler / primitives
//! ```
//! Firmware never holds a host pointer: every object it creates is named
//! by a generation-checked handle, and a null or stale handle is an error
//! return, never a dereference.
//!
//! # Testing Strategy
//! - Unit tests: each primitive, handle table, layouts, errno mapping
//! - Integration tests: a scripted firmware driving both tables

mod clock;
mod error;
mod faces;
mod fwlog;
mod handle;
mod host;
mod irq;
mod sync;
mod table;
mod timer;

pub use clock::Clock;
pub use error::{AbiError, Result};
pub use faces::{FaceDataSource, FaceInfo, FaceSnapshot, MAX_FACES};
pub use fwlog::{FirmwareLog, DEFAULT_LOG_CAPACITY, MAX_EVENT_LINE, MAX_LOG_LINE};
pub use handle::{Handle, HandleTable, MAX_HANDLES};
pub use host::{BinaryKind, FatalLatch, Host, HostConfig, PoolId, POOL_COUNT};
pub use irq::{
    GeneralIrq, GeneralIrqFn, GeneralIrqTable, HwipChain, HwipRegistration, InterruptTable, IrqHandler,
    CHAIN_COUNT, GENERAL_IRQ_COUNT, INTR_HWIP_MAX, INTR_ID_BASE_OFFSET,
};
pub use sync::{
    enter_irq, in_irq, irqs_masked, local_irq_restore, local_irq_save, BlockingLock, ExecContext, IrqContextGuard,
    IrqFlags, IrqLock, IrqLockGuard, Semaphore, SpinLock,
};
pub use table::{
    auxiliary, build_auxiliary_table, build_primary_table, primary, Call, Layout, Reply, Service, ServiceTable,
    TableVariant, AUXILIARY_LAYOUT, PRIMARY_LAYOUT, TABLE_SIZE,
};
pub use timer::{TimerFn, TimerService};
