//! Firmware Mock - In-process doubles for closed firmware and platform seams
//!
//! # Purpose
//! Lets the loader, the service tables and the face-detection pipeline be
//! exercised end to end on a development host. Nothing here touches real
//! page tables or hardware.
//!
//! # Integration Points
//! - Depends on: `copro-loader` (provider/protection/entry seams),
//!   `copro-abi` (service tables), `copro-vra` (accelerator firmware seam)
//! - Provides to: integration tests of `copro-vra` and the bridge
//!
//! # Architecture
//! Every double records what it was asked to do and can be scripted to
//! fail. Firmware doubles drive the service table they are entered with the
//! way a real image would at start-up.
//!
//! # Testing Strategy
//! Used only from other crates' integration tests.

mod entry;
mod platform;
mod vra;

pub use entry::{MockAuxFirmware, MockPrimaryFirmware, SCRATCH_SIZE};
pub use platform::{image_bytes, CountingCache, MockImageProvider, MockVerifier, RecordingProtection};
pub use vra::{MockVraFirmware, DEFAULT_SIZES};
