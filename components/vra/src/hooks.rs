//! Firmware-facing handles onto the pipeline
//!
//! Both types hold the pipeline weakly. Firmware may outlive a pipeline
//! that has been dropped; calls then log and do nothing.

use std::sync::{Arc, Weak};

use copro_abi::{in_irq, Host, PoolId};
use copro_arena::{DeviceAddr, KernelAddr};

use crate::faces::{FaceBase, OutFace, OutListInfo};
use crate::firmware::{FwAlgsEvent, SensorError, VraCallbacks};
use crate::pipeline::VraPipeline;
use crate::Result;

/// Host services the accelerator firmware may call
#[derive(Clone)]
pub struct OsHooks {
    pipeline: Weak<VraPipeline>,
    host: Arc<Host>,
}

impl OsHooks {
    pub(crate) fn new(pipeline: Weak<VraPipeline>, host: Arc<Host>) -> Self {
        Self { pipeline, host }
    }

    /// Generic host primitives (spin locks, logging rings)
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Control-task events are no longer used by the firmware
    pub fn control_task_set_event(&self, event: u32) {
        log::warn!("Invalid control event_type ({})", event);
    }

    pub fn fw_algs_task_set_event(&self, event: u32) {
        let Some(pipeline) = self.pipeline.upgrade() else {
            log::error!("fw_algs event {} after pipeline teardown", event);
            return;
        };

        match FwAlgsEvent::from_code(event) {
            Some(event) => pipeline.set_event_fw_algs(event),
            None => log::error!("Invalid fw_algs event_type ({})", event),
        }
    }

    pub fn to_device(&self, kva: KernelAddr) -> Result<DeviceAddr> {
        Ok(self.host.to_device(PoolId::Vra, kva)?)
    }

    pub fn invalidate(&self, kva: KernelAddr, len: usize) -> Result<()> {
        Ok(self.host.invalidate(PoolId::Vra, kva, len)?)
    }

    /// Write CPU caches back before the accelerator reads the range
    pub fn clean(&self, kva: KernelAddr, len: usize) -> Result<()> {
        Ok(self.host.clean(PoolId::Vra, kva, len)?)
    }

    pub fn log_write(&self, text: &str) {
        self.host.log().write(text);
    }

    pub fn log_console(&self, text: &str) {
        self.host.log().console(text);
    }

    pub fn in_irq(&self) -> bool {
        in_irq()
    }

    pub fn lib_assert(&self) {
        self.host.assert_fatal();
    }
}

/// Callback set registered with firmware at frame-work init
pub(crate) struct PipelineCallbacks {
    pipeline: Weak<VraPipeline>,
}

impl PipelineCallbacks {
    pub(crate) fn new(pipeline: Weak<VraPipeline>) -> Self {
        Self { pipeline }
    }

    fn with(&self, what: &str, f: impl FnOnce(&VraPipeline)) {
        match self.pipeline.upgrade() {
            Some(pipeline) => f(&pipeline),
            None => log::error!("{} callback after pipeline teardown", what),
        }
    }
}

impl VraCallbacks for PipelineCallbacks {
    fn frame_work_aborted(&self) {
        log::debug!("vra frame work aborted");
    }

    fn hw_error(&self, channel: u32, mask: u32) {
        log::error!("vra hw error: ch_index({:#x}), err_mask({:#x})", channel, mask);
        self.with("hw_error", |pipeline| pipeline.record_hw_error());
    }

    fn final_output(&self, instance: u32, faces: &[OutFace], info: &OutListInfo) {
        self.with("final_output", |pipeline| pipeline.on_final_output(instance, faces, info));
    }

    fn current_frame_output(&self, instance: u32, faces: &[FaceBase], info: &OutListInfo) {
        self.with("current_frame_output", |pipeline| {
            pipeline.on_current_frame_output(instance, faces, info)
        });
    }

    fn end_input(&self, instance: u32, frame_index: u32, base: DeviceAddr) {
        log::debug!("[{}] vra end input: frame {} base {:#x}", instance, frame_index, base);
    }

    fn frame_error(&self, instance: u32, error: SensorError, info: u32) {
        self.with("frame_error", |pipeline| pipeline.on_frame_error(instance, error, info));
    }
}
