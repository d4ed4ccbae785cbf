//! Face-detection pipeline errors

use copro_abi::AbiError;
use copro_arena::ArenaError;
use copro_sched::SchedError;
use thiserror::Error;

use crate::status::VraStatus;

/// Error types for pipeline operations
#[derive(Debug, Error)]
pub enum VraError {
    #[error("Pipeline not ready: {0}")]
    NotReady(&'static str),

    #[error("[{instance}] firmware busy ({status})")]
    Busy { instance: u32, status: VraStatus },

    #[error("{op} failed ({status})")]
    Firmware { op: &'static str, status: VraStatus },

    #[error("Not enough memory: firmware needs {requested:#x} bytes, buffer holds {available:#x}")]
    NotEnoughMemory { requested: usize, available: usize },

    #[error("Invalid instance {0}")]
    InvalidInstance(u32),

    #[error("Arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("Scheduler error: {0}")]
    Sched(#[from] SchedError),

    #[error("Host service error: {0}")]
    Abi(#[from] AbiError),
}

pub type Result<T> = core::result::Result<T, VraError>;
