//! Accelerator firmware seam
//!
//! The accelerator library is closed firmware. The pipeline reaches it only
//! through [`VraFirmware`], and the firmware reaches back through the
//! [`VraCallbacks`] registered at frame-work init and the [`OsHooks`] handed
//! over when the pipeline is attached.
//!
//! [`OsHooks`]: crate::OsHooks

use std::sync::Arc;

use copro_arena::{DeviceAddr, KernelAddr};

use crate::faces::{FaceBase, OutFace, OutListInfo};
use crate::frame::FrameDescriptor;
use crate::hooks::OsHooks;
use crate::status::FwResult;
use crate::tune::{ApiTune, Orientation, TrackingMode, TuneSet};

/// API version the host was built against
pub const VRA_API_VERSION: u32 = 113;

/// Accelerator clocks handed to frame-work init (MHz)
pub const HW_CLOCK_MHZ: u32 = 533;
pub const SW_CLOCK_MHZ: u32 = 400;

/// A zeroed buffer from the VRA pool handed to firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRegion {
    pub kva: KernelAddr,
    pub dva: DeviceAddr,
    pub size: usize,
}

/// Resource limits the firmware sizes its memory for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocInfo {
    pub max_width: u32,
    pub max_height: u32,
    pub track_faces: u32,
    pub dt_faces_hw_res: u32,
    pub tr_hw_res_per_face: u32,
    pub ff_hw_res_per_face: u32,
    pub ff_hw_res_per_list: u32,
    pub cache_line_length: u32,
    pub use_pad: bool,
    pub allow_ch0_two_planes: bool,
    pub using_ch0_input: bool,
    pub image_slots: u32,
    pub max_sensors: u32,
    pub max_tr_res_frames: u32,
    pub max_hybrid_faces: u32,
}

impl AllocInfo {
    pub fn new(max_sensors: u32, ch1_only: bool) -> Self {
        Self {
            max_width: 640,
            max_height: 480,
            track_faces: 30,
            dt_faces_hw_res: 2100,
            tr_hw_res_per_face: 100,
            ff_hw_res_per_face: 500,
            ff_hw_res_per_list: 150,
            cache_line_length: 32,
            use_pad: true,
            allow_ch0_two_planes: false,
            using_ch0_input: !ch1_only,
            image_slots: 4,
            max_sensors,
            max_tr_res_frames: 5,
            max_hybrid_faces: 0,
        }
    }
}

/// Buffer sizes requested by the firmware for an [`AllocInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySizes {
    pub fr_work: usize,
    pub frame_desc: usize,
    pub dma_out: usize,
}

/// Frame-work initialisation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWorkInit {
    pub regs_base: u64,
    pub dram_input: bool,
    /// Level rather than pulse interrupts
    pub level_interrupts: bool,
    pub hw_clock_mhz: u32,
    pub sw_clock_mhz: u32,
    pub block_new_fr_on_transaction: bool,
    pub block_new_fr_on_input_set: bool,
    pub wait_on_lock: bool,
    pub reset_unique_id_on_reset_list: bool,
    pub crop_faces_out_of_image: bool,
    pub api_version: u32,
}

/// Per-frame error reported through [`VraCallbacks::frame_error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Frame dropped under load; the info is the lost process channel
    FrameLost,
    /// Faces dropped in hardware; the info is the number lost
    HwFacesLost,
    /// Corrupted input; the info is the frame index
    CorruptedData,
    HybridRequestLost,
}

/// Events firmware raises on its algorithm task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwAlgsEvent {
    Abort = 0,
    Algs = 1,
}

impl FwAlgsEvent {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FwAlgsEvent::Abort),
            1 => Some(FwAlgsEvent::Algs),
            _ => None,
        }
    }
}

/// Asynchronous notifications from firmware
///
/// Any of these may run in interrupt context.
pub trait VraCallbacks: Send + Sync {
    /// Abort requested through `frame_work_abort` has completed
    fn frame_work_aborted(&self);

    fn hw_error(&self, channel: u32, mask: u32);

    /// Final, smoothed face list of a frame
    fn final_output(&self, instance: u32, faces: &[OutFace], info: &OutListInfo);

    /// Unfiltered face list of the current frame
    fn current_frame_output(&self, instance: u32, faces: &[FaceBase], info: &OutListInfo);

    /// Input of a frame fully consumed; a memory-input buffer may be reused
    fn end_input(&self, instance: u32, frame_index: u32, base: DeviceAddr);

    fn frame_error(&self, instance: u32, error: SensorError, info: u32);
}

/// Operations exported by the accelerator firmware
///
/// Every operation returns the firmware's status; a non-zero status is the
/// error side of [`FwResult`].
pub trait VraFirmware: Send + Sync {
    /// Hand the firmware its host hooks; called once when the pipeline is built
    fn set_os_funcs(&self, hooks: OsHooks);

    fn get_memory_sizes(&self, info: &AllocInfo) -> FwResult<MemorySizes>;

    fn frame_work_init(
        &self,
        init: &FrameWorkInit,
        fr_work: HeapRegion,
        dma_out: HeapRegion,
        alloc: &AllocInfo,
        callbacks: Arc<dyn VraCallbacks>,
    ) -> FwResult<()>;

    fn sensor_init(
        &self,
        desc_heap: HeapRegion,
        instance: u32,
        desc: &FrameDescriptor,
        mode: TrackingMode,
    ) -> FwResult<()>;

    /// Replace the input description; tracking data is kept
    fn set_input(&self, desc_heap: HeapRegion, desc: &FrameDescriptor) -> FwResult<()>;

    fn set_orientation(&self, desc_heap: HeapRegion, orientation: Orientation) -> FwResult<()>;

    fn set_parameter(&self, fr_work: HeapRegion, desc_heap: HeapRegion, tune: &ApiTune) -> FwResult<()>;

    fn get_parameter(&self, fr_work: HeapRegion, desc_heap: HeapRegion) -> FwResult<(ApiTune, Orientation)>;

    fn on_new_frame(&self, desc_heap: HeapRegion, frame_index: u32, kva: KernelAddr, dva: DeviceAddr) -> FwResult<()>;

    fn on_interrupt(&self, fr_work: HeapRegion, id: u32) -> FwResult<()>;

    fn on_fw_algs_task_event(&self, fr_work: HeapRegion, event: FwAlgsEvent) -> FwResult<()>;

    fn frame_work_abort(&self, fr_work: HeapRegion, reset: bool) -> FwResult<()>;

    fn frame_work_terminate(&self, fr_work: HeapRegion) -> FwResult<()>;

    fn copy_tune_set(&self, desc_heap: HeapRegion, instance: u32, set: &TuneSet) -> FwResult<()>;

    fn apply_tune_set(&self, desc_heap: HeapRegion, instance: u32, index: u32) -> FwResult<()>;

    /// Recover an instance after an output overflow
    fn recovery(&self, desc_heap: HeapRegion) -> FwResult<()>;
}
