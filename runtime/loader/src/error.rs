//! Loader errors

use std::io;

use thiserror::Error;

use crate::LoadState;

/// Error types for image loading
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("{name} is bigger than its memory area ({size} > {capacity} bytes)")]
    ImageTooLarge { name: String, size: usize, capacity: usize },

    #[error("{name} is malformed: {reason}")]
    ImageCorrupt { name: String, reason: String },

    #[error("Failed to fetch {name}: {source}")]
    ImageUnavailable { name: String, source: io::Error },

    #[error("Protection change failed for {image} ({step}): {source}")]
    Protection {
        image: String,
        step: &'static str,
        source: io::Error,
    },

    #[error("Protection verifier rejected {image}: {source}")]
    Verifier { image: String, source: io::Error },

    #[error("{image} is {state}, expected {expected}")]
    InvalidState {
        image: String,
        state: LoadState,
        expected: &'static str,
    },

    #[error("Write of {len} bytes at {offset:#x} hits protected code in {window}")]
    WindowProtected { window: String, offset: usize, len: usize },

    #[error("Range {offset:#x}+{len:#x} is outside window {window}")]
    OutOfWindow { window: String, offset: usize, len: usize },

    #[error("Invalid image configuration: {0}")]
    InvalidConfig(String),

    #[error("Binary loading is latched fatal")]
    Fatal,
}

pub type Result<T> = core::result::Result<T, LoaderError>;
