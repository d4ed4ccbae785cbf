//! Bridge - One context tying the co-processor runtime together
//!
//! # Purpose
//! Builds the DMA arena, task workers, host services, service tables,
//! loader and firmware images from one configuration, and runs the boot
//! sequence that brings closed firmware up on the host.
//!
//! # Integration Points
//! - Depends on: `copro-arena`, `copro-sched`, `copro-abi`, `copro-loader`,
//!   `copro-vra`
//! - Provides to: the embedding driver (stream open/close, boot hooks)
//!
//! # Architecture
//! ```text
//!  BridgeConfig (TOML) ──► Bridge::new
//!                             ├─ Arena ◄── pools bound at load
//!                             ├─ TaskScheduler
//!                             ├─ Host ──► primary / auxiliary ServiceTable
//!                             ├─ Loader ──► DDK, VRA, RTA images
//!                             └─ VraPipeline (attach_vra) ──► FaceDataSource
//! ```
//!
//! # Example
//! ```ignore
//! let config = BridgeConfig::from_file("copro.toml")?;
//! let bridge = Bridge::new(config, BridgeDeps::new(provider).with_primary_entry(entry))?;
//! bridge.load_binaries()?;
//! let vra = bridge.attach_vra(firmware)?;
//! ```
//!
//! # Testing Strategy
//! - Unit tests: configuration parsing and validation
//! - Integration tests: boot, reload and teardown against firmware doubles

mod bridge;
mod config;
mod error;

pub use bridge::{Bridge, BridgeDeps, LoadFlags};
pub use config::{BridgeConfig, PoolConfig};
pub use error::{BridgeError, Result};
