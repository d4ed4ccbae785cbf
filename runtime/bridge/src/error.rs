//! Bridge error type

use thiserror::Error;

use copro_abi::AbiError;
use copro_arena::ArenaError;
use copro_loader::LoaderError;
use copro_sched::SchedError;
use copro_vra::VraError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pool {pool} misconfigured: {reason}")]
    Pool { pool: &'static str, reason: String },

    #[error("Arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("Scheduler error: {0}")]
    Sched(#[from] SchedError),

    #[error("Host service error: {0}")]
    Abi(#[from] AbiError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Face detection error: {0}")]
    Vra(#[from] VraError),

    #[error("Binary loading is latched fatal")]
    Fatal,
}

pub type Result<T> = core::result::Result<T, BridgeError>;
