//! Host service errors and their firmware-visible errno values

use copro_arena::ArenaError;
use copro_sched::SchedError;
use thiserror::Error;

use crate::TableVariant;

/// Error types for service table calls
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("{variant:?} table slot {index} is empty")]
    NullEntry { variant: TableVariant, index: usize },

    #[error("Bad arguments for {service} at slot {index}")]
    BadArguments { index: usize, service: &'static str },

    #[error("Null handle")]
    NullHandle,

    #[error("Stale or unknown handle {0}")]
    BadHandle(u32),

    #[error("Invalid chain id {0}")]
    InvalidChain(u32),

    #[error("Invalid interrupt id {id} for chain {chain} (local index {index})")]
    InvalidIrqIndex { chain: u32, id: u32, index: i64 },

    #[error("Invalid general interrupt id {0}")]
    InvalidGeneralIrq(u32),

    #[error("Interrupt {0} already requested")]
    IrqBusy(&'static str),

    #[error("Interrupts are masked on this thread")]
    IrqMasked,

    #[error("{0} table exhausted")]
    HandleExhausted(&'static str),

    #[error("Lock is not held")]
    NotLocked,

    #[error("Log line too long ({len} bytes)")]
    LogOverflow { len: usize },

    #[error("Pool {0} is not bound")]
    PoolUnbound(&'static str),

    #[error("No register base configured for chain {0}")]
    NoRegister(u32),

    #[error("No dump directory configured")]
    NoDumpDir,

    #[error("No face data source attached")]
    NoFaceSource,

    #[error("Fatal assert latched")]
    Fatal,

    #[error("Arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("Scheduler error: {0}")]
    Sched(#[from] SchedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AbiError {
    /// Negative errno as returned to firmware
    pub fn errno(&self) -> i32 {
        let code = match self {
            AbiError::NullEntry { .. } => libc::ENOSYS,
            AbiError::BadArguments { .. }
            | AbiError::InvalidChain(_)
            | AbiError::InvalidIrqIndex { .. }
            | AbiError::InvalidGeneralIrq(_)
            | AbiError::NotLocked => libc::EINVAL,
            AbiError::NullHandle | AbiError::BadHandle(_) => libc::EBADF,
            AbiError::IrqBusy(_) | AbiError::IrqMasked => libc::EBUSY,
            AbiError::LogOverflow { .. } | AbiError::HandleExhausted(_) => libc::ENOMEM,
            AbiError::PoolUnbound(_)
            | AbiError::NoRegister(_)
            | AbiError::NoDumpDir
            | AbiError::NoFaceSource => libc::ENODEV,
            AbiError::Fatal => libc::EFAULT,
            AbiError::Arena(ArenaError::OutOfMemory { .. }) => libc::ENOMEM,
            AbiError::Arena(_) => libc::EINVAL,
            AbiError::Sched(SchedError::QueueFull { .. }) => libc::EBUSY,
            AbiError::Sched(_) => libc::EINVAL,
            AbiError::Io(_) => libc::EIO,
        };
        -code
    }
}

pub type Result<T> = core::result::Result<T, AbiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(AbiError::NullHandle.errno(), -libc::EBADF);
        assert_eq!(AbiError::LogOverflow { len: 300 }.errno(), -libc::ENOMEM);
        assert_eq!(AbiError::InvalidChain(42).errno(), -libc::EINVAL);
        assert_eq!(AbiError::NoFaceSource.errno(), -libc::ENODEV);

        let oom = ArenaError::OutOfMemory {
            pool: "VRA".into(),
            requested: 64,
            available: 0,
        };
        assert_eq!(AbiError::from(oom).errno(), -libc::ENOMEM);
    }
}
