//! Firmware Loader - W^X placement of closed firmware images
//!
//! # Purpose
//! Fetches a firmware image, copies it into its reserved window and hands
//! control to its entry point with the matching service table. Code regions
//! are never writable and executable at the same time.
//!
//! # Integration Points
//! - Depends on: `copro-abi` (service tables, version records, fatal latch),
//!   `copro-arena` (cache maintenance seam, page sizing)
//! - Provides to: the bridge (load orchestration)
//!
//! # Architecture
//! Every image walks the [`LoadState`] machine. Page permissions are
//! changed through a [`ProtectionBackend`]; when a [`ProtectionVerifier`] is
//! present it registers each image and enforces execute permission in place
//! of the local toggle back to executable.
//!
//! # Testing Strategy
//! - Unit tests: layouts, window protection, version carving, providers
//! - Integration tests: full and data-only loads, rollback, verifier path

mod error;
mod image;
mod loader;
mod protect;
mod provider;
mod window;

pub use error::{LoaderError, Result};
pub use image::{
    carve_version, CodeRegion, DataSegment, ImageConfig, ImageKind, LoadKind, LoadState, ProtectionState, CDH_SIZE,
    LIB_START, VERSION_TAIL_LEN,
};
pub use loader::{FirmwareEntry, FirmwareImage, Loader};
pub use protect::{
    NoopProtection, ProtectedRegion, Protection, ProtectionBackend, ProtectionVerifier, VerifierRegistration,
};
pub use provider::{DirectoryProvider, ImageBlob, ImageProvider, ImageSource, DEFAULT_FETCH_RETRIES};
pub use window::MemoryWindow;
