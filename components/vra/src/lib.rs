//! VRA - Face-detection accelerator client
//!
//! # Purpose
//! Drives the closed face-detection firmware: sizes and allocates its heaps
//! from the VRA pool, describes input frames, pushes tuning, submits frames
//! and collects the face lists the firmware reports back.
//!
//! # Integration Points
//! - Depends on: `copro-abi` (host services, irq-aware locks, face data
//!   seam), `copro-arena` (DMA heaps), `copro-sched` (firmware event pump)
//! - Provides to: the bridge (pipeline lifecycle), the primary firmware
//!   (face lists through `get_fd_data` via [`FaceDataSource`])
//!
//! # Architecture
//! ```text
//!   camera ──submit_frame──► VraPipeline ──VraFirmware──► firmware
//!                                 ▲                          │
//!                                 └──── VraCallbacks ◄───────┘ (may be irq context)
//! ```
//! Firmware events that must not run in interrupt context are queued on a
//! private single-class scheduler and executed by its worker.
//!
//! # Testing Strategy
//! - Unit tests: status codes, orientation table, descriptors, metadata
//! - Integration tests: the full pipeline lifecycle against a scripted firmware
//!
//! [`FaceDataSource`]: copro_abi::FaceDataSource

mod error;
mod faces;
mod firmware;
mod frame;
mod hooks;
mod pipeline;
mod state;
mod status;
mod tune;

pub use error::{Result, VraError};
pub use faces::{
    scale_score, AfFaceList, FaceBase, FaceDetectMode, FaceList, FaceMetadata, FaceRect, Landmark, OutFace,
    OutListInfo,
};
pub use firmware::{
    AllocInfo, FrameWorkInit, FwAlgsEvent, HeapRegion, MemorySizes, SensorError, VraCallbacks, VraFirmware,
    HW_CLOCK_MHZ, SW_CLOCK_MHZ, VRA_API_VERSION,
};
pub use frame::{
    DmaInput, DramLayout, FrameDescriptor, InputFormat, InputKind, OtfInput, YuvFormat, DEFAULT_HEIGHT,
    DEFAULT_WIDTH,
};
pub use hooks::OsHooks;
pub use pipeline::{DebugCounters, VraConfig, VraPipeline, DEFAULT_INSTANCES, DEFAULT_INTERNAL_BUFFER};
pub use state::{InstState, LibState};
pub use status::{FwResult, VraStatus};
pub use tune::{
    orientation_for, ApiTune, Direction, FrameLock, Orientation, TrackingMode, TuneData, TuneSet,
    SENSOR_POSITION_REAR,
};
