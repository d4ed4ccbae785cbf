//! Frozen service tables
//!
//! Firmware addresses host services by slot index, never by name. The two
//! images were built against different ABI revisions, so each gets its own
//! layout. Slots are never reordered; a retired service leaves its slot
//! empty.

use std::fmt;
use std::sync::Arc;

use copro_arena::{DeviceAddr, KernelAddr};
use copro_sched::{Producer, TaskArg, TaskFn};
use static_assertions::const_assert;

use crate::faces::FaceSnapshot;
use crate::handle::Handle;
use crate::host::{BinaryKind, Host, PoolId};
use crate::irq::{GeneralIrqFn, HwipRegistration};
use crate::sync::{in_irq, IrqFlags};
use crate::timer::TimerFn;
use crate::{AbiError, Result};

/// Slots per table
pub const TABLE_SIZE: usize = 100;

/// Which firmware image a table is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableVariant {
    Primary = 0,
    Auxiliary = 1,
}

impl TableVariant {
    pub fn producer(self) -> Producer {
        match self {
            TableVariant::Primary => Producer::Primary,
            TableVariant::Auxiliary => Producer::Auxiliary,
        }
    }
}

/// Host capability bound to a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    LogConsole,
    LogWrite,
    EventWrite,
    Assert,
    FileWrite,

    SemaInit,
    SemaFinish,
    SemaUp,
    SemaDown,

    MutexInit,
    MutexFinish,
    MutexLock,
    MutexTryLock,
    MutexUnlock,

    TimerCreate,
    TimerDelete,
    TimerReset,
    TimerQuery,
    TimerEnable,
    TimerDisable,

    RegisterIrq,
    UnregisterIrq,
    EnableIrq,
    DisableIrq,
    ClearIrq,
    RegisterGeneralIrq,
    UnregisterGeneralIrq,

    SvcLockSave(TableVariant),
    SvcUnlockRestore(TableVariant),
    SpinInit,
    SpinFinish,
    SpinLock,
    SpinUnlock,
    SpinLockIrq,
    SpinUnlockIrq,
    SpinLockIrqSave,
    SpinUnlockIrqRestore,

    Random,
    AddTask(Producer),
    FlushTaskHandler,
    GetUsec,
    Sleep,
    Usleep,
    Udelay,

    DmaToDevice(PoolId),
    DmaToKernel(PoolId),
    DmaInvalidate(PoolId),
    DmaAlloc(PoolId),
    DmaFree(PoolId),

    GetRegAddr,
    InIrq,
    GetFdData,
    GetHybridFdData,
    GetBinaryVersion,
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Service::LogConsole => "log_console",
            Service::LogWrite => "log_write",
            Service::EventWrite => "event_write",
            Service::Assert => "assert",
            Service::FileWrite => "fwrite",
            Service::SemaInit => "sema_init",
            Service::SemaFinish => "sema_finish",
            Service::SemaUp => "sema_up",
            Service::SemaDown => "sema_down",
            Service::MutexInit => "mutex_init",
            Service::MutexFinish => "mutex_finish",
            Service::MutexLock => "mutex_lock",
            Service::MutexTryLock => "mutex_trylock",
            Service::MutexUnlock => "mutex_unlock",
            Service::TimerCreate => "timer_create",
            Service::TimerDelete => "timer_delete",
            Service::TimerReset => "timer_reset",
            Service::TimerQuery => "timer_query",
            Service::TimerEnable => "timer_enable",
            Service::TimerDisable => "timer_disable",
            Service::RegisterIrq => "register_interrupt",
            Service::UnregisterIrq => "unregister_interrupt",
            Service::EnableIrq => "enable_interrupt",
            Service::DisableIrq => "disable_interrupt",
            Service::ClearIrq => "clear_interrupt",
            Service::RegisterGeneralIrq => "register_general_interrupt",
            Service::UnregisterGeneralIrq => "unregister_general_interrupt",
            Service::SvcLockSave(_) => "svc_spin_lock_save",
            Service::SvcUnlockRestore(_) => "svc_spin_unlock_restore",
            Service::SpinInit => "spin_lock_init",
            Service::SpinFinish => "spin_lock_finish",
            Service::SpinLock => "spin_lock",
            Service::SpinUnlock => "spin_unlock",
            Service::SpinLockIrq => "spin_lock_irq",
            Service::SpinUnlockIrq => "spin_unlock_irq",
            Service::SpinLockIrqSave => "spin_lock_irqsave",
            Service::SpinUnlockIrqRestore => "spin_unlock_irqrestore",
            Service::Random => "random",
            Service::AddTask(_) => "add_task",
            Service::FlushTaskHandler => "flush_task_handler",
            Service::GetUsec => "get_usec",
            Service::Sleep => "sleep",
            Service::Usleep => "usleep",
            Service::Udelay => "udelay",
            Service::DmaToDevice(_) => "dva",
            Service::DmaToKernel(_) => "kva",
            Service::DmaInvalidate(_) => "inv",
            Service::DmaAlloc(_) => "alloc",
            Service::DmaFree(_) => "free",
            Service::GetRegAddr => "get_reg_addr",
            Service::InIrq => "in_irq",
            Service::GetFdData => "get_fd_data",
            Service::GetHybridFdData => "get_hybrid_fd_data",
            Service::GetBinaryVersion => "get_binary_version",
        }
    }
}

/// Primary firmware slot indices
pub mod primary {
    pub const LOG_CONSOLE: usize = 0;
    pub const ASSERT: usize = 3;
    pub const SEMA_INIT: usize = 4;
    pub const SEMA_FINISH: usize = 5;
    pub const SEMA_UP: usize = 6;
    pub const SEMA_DOWN: usize = 7;
    pub const MUTEX_INIT: usize = 8;
    pub const MUTEX_FINISH: usize = 9;
    pub const MUTEX_LOCK: usize = 10;
    pub const MUTEX_TRYLOCK: usize = 11;
    pub const MUTEX_UNLOCK: usize = 12;
    pub const TIMER_CREATE: usize = 13;
    pub const TIMER_DELETE: usize = 14;
    pub const TIMER_RESET: usize = 15;
    pub const TIMER_QUERY: usize = 16;
    pub const TIMER_ENABLE: usize = 17;
    pub const TIMER_DISABLE: usize = 18;
    pub const REGISTER_IRQ: usize = 19;
    pub const UNREGISTER_IRQ: usize = 20;
    pub const ENABLE_IRQ: usize = 21;
    pub const DISABLE_IRQ: usize = 22;
    pub const CLEAR_IRQ: usize = 23;
    pub const SVC_LOCK_SAVE: usize = 24;
    pub const SVC_UNLOCK_RESTORE: usize = 25;
    pub const RANDOM: usize = 26;
    pub const ADD_TASK: usize = 27;
    pub const GET_USEC: usize = 28;
    pub const LOG_WRITE: usize = 29;
    pub const TAAISP_DVA: usize = 30;
    pub const TAAISP_KVA: usize = 31;
    pub const SLEEP: usize = 32;
    pub const TAAISP_INV: usize = 33;
    pub const TAAISP_ALLOC: usize = 34;
    pub const TAAISP_FREE: usize = 35;
    pub const SPIN_INIT: usize = 36;
    pub const SPIN_FINISH: usize = 37;
    pub const SPIN_LOCK: usize = 38;
    pub const SPIN_UNLOCK: usize = 39;
    pub const SPIN_LOCK_IRQ: usize = 40;
    pub const SPIN_UNLOCK_IRQ: usize = 41;
    pub const SPIN_LOCK_IRQSAVE: usize = 42;
    pub const SPIN_UNLOCK_IRQRESTORE: usize = 43;
    pub const GET_REG_ADDR: usize = 46;
    pub const IN_IRQ: usize = 47;
    pub const FLUSH_TASK_HANDLER: usize = 48;
    pub const GET_FD_DATA: usize = 49;
    pub const GET_HYBRID_FD_DATA: usize = 50;
    pub const TNR_DVA: usize = 60;
    pub const TNR_KVA: usize = 61;
    pub const TNR_INV: usize = 62;
    pub const TNR_ALLOC: usize = 63;
    pub const TNR_FREE: usize = 64;
    pub const MEDRC_DVA: usize = 65;
    pub const MEDRC_KVA: usize = 66;
    pub const MEDRC_INV: usize = 67;
    pub const MEDRC_ALLOC: usize = 68;
    pub const MEDRC_FREE: usize = 69;
    pub const GET_BINARY_VERSION: usize = 91;
    pub const EVENT_WRITE: usize = 99;
}

/// Auxiliary firmware slot indices
pub mod auxiliary {
    pub const LOG_WRITE: usize = 0;
    pub const LOG_CONSOLE: usize = 1;
    pub const ASSERT: usize = 2;
    pub const FWRITE: usize = 9;
    /// Reserved for alloc/free; left empty
    pub const ALLOC: usize = 10;
    pub const FREE: usize = 11;
    pub const REGISTER_GENERAL_IRQ: usize = 30;
    pub const UNREGISTER_GENERAL_IRQ: usize = 31;
    pub const ADD_TASK: usize = 40;
    pub const TIMER_CREATE: usize = 50;
    pub const TIMER_DELETE: usize = 51;
    pub const TIMER_RESET: usize = 52;
    pub const TIMER_QUERY: usize = 53;
    pub const TIMER_ENABLE: usize = 54;
    pub const TIMER_DISABLE: usize = 55;
    pub const UDELAY: usize = 56;
    pub const USLEEP: usize = 57;
    pub const SLEEP: usize = 58;
    pub const SEMA_INIT: usize = 60;
    pub const SEMA_FINISH: usize = 61;
    pub const SEMA_UP: usize = 62;
    pub const SEMA_DOWN: usize = 63;
    pub const SVC_LOCK_SAVE: usize = 80;
    pub const SVC_UNLOCK_RESTORE: usize = 81;
    pub const GET_USEC: usize = 90;
    pub const GET_BINARY_VERSION: usize = 91;
}

const_assert!(primary::EVENT_WRITE < TABLE_SIZE);
const_assert!(auxiliary::GET_BINARY_VERSION < TABLE_SIZE);
const_assert!(primary::MEDRC_FREE < primary::GET_BINARY_VERSION);

pub type Layout = [Option<Service>; TABLE_SIZE];

const fn primary_layout() -> Layout {
    use primary::*;

    let mut t: Layout = [None; TABLE_SIZE];
    t[LOG_CONSOLE] = Some(Service::LogConsole);
    t[ASSERT] = Some(Service::Assert);

    t[SEMA_INIT] = Some(Service::SemaInit);
    t[SEMA_FINISH] = Some(Service::SemaFinish);
    t[SEMA_UP] = Some(Service::SemaUp);
    t[SEMA_DOWN] = Some(Service::SemaDown);

    t[MUTEX_INIT] = Some(Service::MutexInit);
    t[MUTEX_FINISH] = Some(Service::MutexFinish);
    t[MUTEX_LOCK] = Some(Service::MutexLock);
    t[MUTEX_TRYLOCK] = Some(Service::MutexTryLock);
    t[MUTEX_UNLOCK] = Some(Service::MutexUnlock);

    t[TIMER_CREATE] = Some(Service::TimerCreate);
    t[TIMER_DELETE] = Some(Service::TimerDelete);
    t[TIMER_RESET] = Some(Service::TimerReset);
    t[TIMER_QUERY] = Some(Service::TimerQuery);
    t[TIMER_ENABLE] = Some(Service::TimerEnable);
    t[TIMER_DISABLE] = Some(Service::TimerDisable);

    t[REGISTER_IRQ] = Some(Service::RegisterIrq);
    t[UNREGISTER_IRQ] = Some(Service::UnregisterIrq);
    t[ENABLE_IRQ] = Some(Service::EnableIrq);
    t[DISABLE_IRQ] = Some(Service::DisableIrq);
    t[CLEAR_IRQ] = Some(Service::ClearIrq);

    t[SVC_LOCK_SAVE] = Some(Service::SvcLockSave(TableVariant::Primary));
    t[SVC_UNLOCK_RESTORE] = Some(Service::SvcUnlockRestore(TableVariant::Primary));
    t[RANDOM] = Some(Service::Random);
    t[ADD_TASK] = Some(Service::AddTask(Producer::Primary));
    t[GET_USEC] = Some(Service::GetUsec);
    t[LOG_WRITE] = Some(Service::LogWrite);

    t[TAAISP_DVA] = Some(Service::DmaToDevice(PoolId::TaaIsp));
    t[TAAISP_KVA] = Some(Service::DmaToKernel(PoolId::TaaIsp));
    t[SLEEP] = Some(Service::Sleep);
    t[TAAISP_INV] = Some(Service::DmaInvalidate(PoolId::TaaIsp));
    t[TAAISP_ALLOC] = Some(Service::DmaAlloc(PoolId::TaaIsp));
    t[TAAISP_FREE] = Some(Service::DmaFree(PoolId::TaaIsp));

    t[SPIN_INIT] = Some(Service::SpinInit);
    t[SPIN_FINISH] = Some(Service::SpinFinish);
    t[SPIN_LOCK] = Some(Service::SpinLock);
    t[SPIN_UNLOCK] = Some(Service::SpinUnlock);
    t[SPIN_LOCK_IRQ] = Some(Service::SpinLockIrq);
    t[SPIN_UNLOCK_IRQ] = Some(Service::SpinUnlockIrq);
    t[SPIN_LOCK_IRQSAVE] = Some(Service::SpinLockIrqSave);
    t[SPIN_UNLOCK_IRQRESTORE] = Some(Service::SpinUnlockIrqRestore);
    t[GET_REG_ADDR] = Some(Service::GetRegAddr);

    t[IN_IRQ] = Some(Service::InIrq);
    t[FLUSH_TASK_HANDLER] = Some(Service::FlushTaskHandler);
    t[GET_FD_DATA] = Some(Service::GetFdData);
    t[GET_HYBRID_FD_DATA] = Some(Service::GetHybridFdData);

    t[TNR_DVA] = Some(Service::DmaToDevice(PoolId::Tnr));
    t[TNR_KVA] = Some(Service::DmaToKernel(PoolId::Tnr));
    t[TNR_INV] = Some(Service::DmaInvalidate(PoolId::Tnr));
    t[TNR_ALLOC] = Some(Service::DmaAlloc(PoolId::Tnr));
    t[TNR_FREE] = Some(Service::DmaFree(PoolId::Tnr));
    t[MEDRC_DVA] = Some(Service::DmaToDevice(PoolId::Medrc));
    t[MEDRC_KVA] = Some(Service::DmaToKernel(PoolId::Medrc));
    t[MEDRC_INV] = Some(Service::DmaInvalidate(PoolId::Medrc));
    t[MEDRC_ALLOC] = Some(Service::DmaAlloc(PoolId::Medrc));
    t[MEDRC_FREE] = Some(Service::DmaFree(PoolId::Medrc));

    t[GET_BINARY_VERSION] = Some(Service::GetBinaryVersion);
    t[EVENT_WRITE] = Some(Service::EventWrite);
    t
}

const fn auxiliary_layout() -> Layout {
    use auxiliary::*;

    let mut t: Layout = [None; TABLE_SIZE];
    t[LOG_WRITE] = Some(Service::LogWrite);
    t[LOG_CONSOLE] = Some(Service::LogConsole);
    t[ASSERT] = Some(Service::Assert);
    t[FWRITE] = Some(Service::FileWrite);

    t[REGISTER_GENERAL_IRQ] = Some(Service::RegisterGeneralIrq);
    t[UNREGISTER_GENERAL_IRQ] = Some(Service::UnregisterGeneralIrq);

    t[ADD_TASK] = Some(Service::AddTask(Producer::Auxiliary));

    t[TIMER_CREATE] = Some(Service::TimerCreate);
    t[TIMER_DELETE] = Some(Service::TimerDelete);
    t[TIMER_RESET] = Some(Service::TimerReset);
    t[TIMER_QUERY] = Some(Service::TimerQuery);
    t[TIMER_ENABLE] = Some(Service::TimerEnable);
    t[TIMER_DISABLE] = Some(Service::TimerDisable);
    t[UDELAY] = Some(Service::Udelay);
    t[USLEEP] = Some(Service::Usleep);
    t[SLEEP] = Some(Service::Sleep);

    t[SEMA_INIT] = Some(Service::SemaInit);
    t[SEMA_FINISH] = Some(Service::SemaFinish);
    t[SEMA_UP] = Some(Service::SemaUp);
    t[SEMA_DOWN] = Some(Service::SemaDown);

    t[SVC_LOCK_SAVE] = Some(Service::SvcLockSave(TableVariant::Auxiliary));
    t[SVC_UNLOCK_RESTORE] = Some(Service::SvcUnlockRestore(TableVariant::Auxiliary));

    t[GET_USEC] = Some(Service::GetUsec);
    t[GET_BINARY_VERSION] = Some(Service::GetBinaryVersion);
    t
}

pub static PRIMARY_LAYOUT: Layout = primary_layout();
pub static AUXILIARY_LAYOUT: Layout = auxiliary_layout();

/// Arguments for one service call
pub enum Call {
    Void,
    Text(String),
    Count(u32),
    Handle(Handle),
    HandleFlags(Handle, IrqFlags),
    Flags(IrqFlags),
    TimerCreate { expires_ms: u64, func: TimerFn, data: usize },
    TimerReset(Handle, u64),
    RegisterIrq(HwipRegistration),
    UnregisterIrq { id: u32, chain: u32 },
    IrqId(u32),
    RegisterGeneralIrq { id: u32, handler: GeneralIrqFn },
    UnregisterGeneralIrq(u32),
    Task { priority: i32, func: TaskFn, arg: TaskArg },
    Priority(i32),
    /// Milliseconds for sleep, microseconds for usleep/udelay
    Delay(u64),
    Size(usize),
    Kva(KernelAddr),
    Dva(DeviceAddr),
    Range { kva: KernelAddr, size: usize },
    Chain(u32),
    Instance(u32),
    BinaryVersion { kind: BinaryKind, hint: u32 },
    FileWrite { name: String, data: Vec<u8> },
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Void => write!(f, "Void"),
            Call::Text(text) => write!(f, "Text({:?})", text),
            Call::Count(count) => write!(f, "Count({})", count),
            Call::Handle(handle) => write!(f, "Handle({})", handle),
            Call::HandleFlags(handle, flags) => write!(f, "HandleFlags({}, {:?})", handle, flags),
            Call::Flags(flags) => write!(f, "Flags({:?})", flags),
            Call::TimerCreate { expires_ms, data, .. } => {
                write!(f, "TimerCreate {{ expires_ms: {}, data: {:#x} }}", expires_ms, data)
            }
            Call::TimerReset(handle, expires_ms) => write!(f, "TimerReset({}, {})", handle, expires_ms),
            Call::RegisterIrq(info) => write!(f, "RegisterIrq {{ chain: {}, id: {} }}", info.chain, info.id),
            Call::UnregisterIrq { id, chain } => write!(f, "UnregisterIrq {{ chain: {}, id: {} }}", chain, id),
            Call::IrqId(id) => write!(f, "IrqId({})", id),
            Call::RegisterGeneralIrq { id, .. } => write!(f, "RegisterGeneralIrq({})", id),
            Call::UnregisterGeneralIrq(id) => write!(f, "UnregisterGeneralIrq({})", id),
            Call::Task { priority, arg, .. } => write!(f, "Task {{ priority: {}, arg: {:#x} }}", priority, arg),
            Call::Priority(priority) => write!(f, "Priority({})", priority),
            Call::Delay(delay) => write!(f, "Delay({})", delay),
            Call::Size(size) => write!(f, "Size({:#x})", size),
            Call::Kva(kva) => write!(f, "Kva({:#x})", kva),
            Call::Dva(dva) => write!(f, "Dva({:#x})", dva),
            Call::Range { kva, size } => write!(f, "Range({:#x}+{:#x})", kva, size),
            Call::Chain(chain) => write!(f, "Chain({})", chain),
            Call::Instance(instance) => write!(f, "Instance({})", instance),
            Call::BinaryVersion { kind, hint } => write!(f, "BinaryVersion({:?}, {})", kind, hint),
            Call::FileWrite { name, data } => write!(f, "FileWrite({:?}, {} bytes)", name, data.len()),
        }
    }
}

/// Result of one service call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Unit,
    Bool(bool),
    Handle(Handle),
    Flags(IrqFlags),
    Word(u64),
    Kva(KernelAddr),
    Dva(DeviceAddr),
    Faces(FaceSnapshot),
    Text(Option<String>),
}

impl Reply {
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Reply::Handle(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_flags(&self) -> Option<IrqFlags> {
        match self {
            Reply::Flags(flags) => Some(*flags),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<u64> {
        match self {
            Reply::Word(word) => Some(*word),
            _ => None,
        }
    }

    pub fn as_kva(&self) -> Option<KernelAddr> {
        match self {
            Reply::Kva(kva) => Some(*kva),
            _ => None,
        }
    }

    pub fn as_dva(&self) -> Option<DeviceAddr> {
        match self {
            Reply::Dva(dva) => Some(*dva),
            _ => None,
        }
    }
}

/// An immutable, index-addressed table bound to one host
#[derive(Clone)]
pub struct ServiceTable {
    variant: TableVariant,
    layout: &'static Layout,
    host: Arc<Host>,
}

/// Build the primary firmware table
pub fn build_primary_table(host: Arc<Host>) -> ServiceTable {
    ServiceTable {
        variant: TableVariant::Primary,
        layout: &PRIMARY_LAYOUT,
        host,
    }
}

/// Build the auxiliary firmware table
pub fn build_auxiliary_table(host: Arc<Host>) -> ServiceTable {
    ServiceTable {
        variant: TableVariant::Auxiliary,
        layout: &AUXILIARY_LAYOUT,
        host,
    }
}

impl ServiceTable {
    pub fn variant(&self) -> TableVariant {
        self.variant
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Service bound to `index`, if any
    pub fn entry(&self, index: usize) -> Option<Service> {
        self.layout.get(index).copied().flatten()
    }

    /// Number of populated slots
    pub fn populated(&self) -> usize {
        self.layout.iter().filter(|slot| slot.is_some()).count()
    }

    /// Invoke the service at `index`
    ///
    /// # Errors
    /// - `NullEntry` for an empty or out-of-range slot
    /// - `BadArguments` if `call` does not match the service's shape
    /// - any error of the service itself
    pub fn invoke(&self, index: usize, call: Call) -> Result<Reply> {
        let service = self.entry(index).ok_or(AbiError::NullEntry {
            variant: self.variant,
            index,
        })?;

        let result = self.dispatch(service, index, call);
        if let Err(e) = &result {
            log::debug!("{:?}[{}] {} failed: {}", self.variant, index, service.name(), e);
        }
        result
    }

    fn dispatch(&self, service: Service, index: usize, call: Call) -> Result<Reply> {
        let host = &self.host;
        let bad = || AbiError::BadArguments {
            index,
            service: service.name(),
        };

        let reply = match (service, call) {
            (Service::LogConsole, Call::Text(text)) => {
                host.log().console(&text);
                Reply::Unit
            }
            (Service::LogWrite, Call::Text(text)) => {
                host.log().write(&text);
                Reply::Unit
            }
            (Service::EventWrite, Call::Text(text)) => {
                host.log().event(&text)?;
                Reply::Unit
            }
            (Service::Assert, Call::Void) => {
                host.assert_fatal();
                Reply::Unit
            }
            (Service::FileWrite, Call::FileWrite { name, data }) => Reply::Word(host.fwrite(&name, &data)? as u64),

            (Service::SemaInit, Call::Count(count)) => Reply::Handle(host.sema_init(count)?),
            (Service::SemaFinish, Call::Handle(handle)) => unit(host.sema_finish(handle))?,
            (Service::SemaUp, Call::Handle(handle)) => unit(host.sema_up(handle))?,
            (Service::SemaDown, Call::Handle(handle)) => unit(host.sema_down(handle))?,

            (Service::MutexInit, Call::Void) => Reply::Handle(host.mutex_init()?),
            (Service::MutexFinish, Call::Handle(handle)) => unit(host.mutex_finish(handle))?,
            (Service::MutexLock, Call::Handle(handle)) => unit(host.mutex_lock(handle))?,
            (Service::MutexTryLock, Call::Handle(handle)) => Reply::Bool(host.mutex_try_lock(handle)?),
            (Service::MutexUnlock, Call::Handle(handle)) => unit(host.mutex_unlock(handle))?,

            (Service::TimerCreate, Call::TimerCreate { expires_ms, func, data }) => {
                Reply::Handle(host.timer_create(expires_ms, func, data)?)
            }
            (Service::TimerDelete, Call::Handle(handle)) => unit(host.timer_delete(handle))?,
            (Service::TimerReset, Call::TimerReset(handle, expires_ms)) => unit(host.timer_reset(handle, expires_ms))?,
            (Service::TimerQuery, Call::Handle(handle)) => Reply::Word(host.timer_query(handle)?),
            (Service::TimerEnable, Call::Handle(handle)) => unit(host.timer_enable(handle))?,
            (Service::TimerDisable, Call::Handle(handle)) => unit(host.timer_disable(handle))?,

            (Service::RegisterIrq, Call::RegisterIrq(info)) => unit(host.hwip_irqs().register(info))?,
            (Service::UnregisterIrq, Call::UnregisterIrq { id, chain }) => unit(host.hwip_irqs().unregister(id, chain))?,
            (Service::EnableIrq | Service::DisableIrq | Service::ClearIrq, Call::IrqId(_)) => Reply::Unit,
            (Service::RegisterGeneralIrq, Call::RegisterGeneralIrq { id, handler }) => {
                unit(host.general_irqs().register(id, handler))?
            }
            (Service::UnregisterGeneralIrq, Call::UnregisterGeneralIrq(id)) => {
                host.general_irqs().unregister(id);
                Reply::Unit
            }

            (Service::SvcLockSave(variant), Call::Void) => Reply::Flags(host.svc_lock_save(variant)),
            (Service::SvcUnlockRestore(variant), Call::Flags(flags)) => unit(host.svc_unlock_restore(variant, flags))?,
            (Service::SpinInit, Call::Void) => Reply::Handle(host.spin_init()?),
            (Service::SpinFinish, Call::Handle(handle)) => unit(host.spin_finish(handle))?,
            (Service::SpinLock, Call::Handle(handle)) => unit(host.spin_lock(handle))?,
            (Service::SpinUnlock, Call::Handle(handle)) => unit(host.spin_unlock(handle))?,
            (Service::SpinLockIrq, Call::Handle(handle)) => unit(host.spin_lock_irq(handle))?,
            (Service::SpinUnlockIrq, Call::Handle(handle)) => unit(host.spin_unlock_irq(handle))?,
            (Service::SpinLockIrqSave, Call::Handle(handle)) => Reply::Flags(host.spin_lock_irqsave(handle)?),
            (Service::SpinUnlockIrqRestore, Call::HandleFlags(handle, flags)) => {
                unit(host.spin_unlock_irqrestore(handle, flags))?
            }

            (Service::Random, Call::Void) => Reply::Word(host.random() as u64),
            (Service::AddTask(producer), Call::Task { priority, func, arg }) => {
                Reply::Bool(host.add_task(producer, priority, func, arg))
            }
            (Service::FlushTaskHandler, Call::Priority(priority)) => unit(host.flush_task_handler(priority))?,
            (Service::GetUsec, Call::Void) => Reply::Word(host.clock().get_usec()),
            (Service::Sleep, Call::Delay(msec)) => {
                host.clock().sleep(msec);
                Reply::Unit
            }
            (Service::Usleep, Call::Delay(usec)) => {
                host.clock().usleep(usec);
                Reply::Unit
            }
            (Service::Udelay, Call::Delay(usec)) => {
                host.clock().udelay(usec);
                Reply::Unit
            }

            (Service::DmaToDevice(pool), Call::Kva(kva)) => Reply::Dva(host.to_device(pool, kva)?),
            (Service::DmaToKernel(pool), Call::Dva(dva)) => Reply::Kva(host.to_kernel(pool, dva)?),
            (Service::DmaInvalidate(pool), Call::Range { kva, size }) => unit(host.invalidate(pool, kva, size))?,
            (Service::DmaAlloc(pool), Call::Size(size)) => Reply::Kva(host.alloc(pool, size)?),
            (Service::DmaFree(pool), Call::Kva(kva)) => unit(host.free(pool, kva))?,

            (Service::GetRegAddr, Call::Chain(chain)) => Reply::Word(host.get_reg_addr(chain)?),
            (Service::InIrq, Call::Void) => Reply::Bool(in_irq()),
            (Service::GetFdData, Call::Instance(instance)) => Reply::Faces(host.get_fd_data(instance)?),
            (Service::GetHybridFdData, Call::Instance(instance)) => Reply::Faces(host.get_hybrid_fd_data(instance)?),
            (Service::GetBinaryVersion, Call::BinaryVersion { kind, .. }) => Reply::Text(host.binary_version(kind)),

            _ => return Err(bad()),
        };

        Ok(reply)
    }
}

fn unit(result: Result<()>) -> Result<Reply> {
    result.map(|_| Reply::Unit)
}
