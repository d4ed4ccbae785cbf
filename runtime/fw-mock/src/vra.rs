//! Scriptable face-detection firmware

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use copro_arena::{DeviceAddr, KernelAddr};
use copro_vra::{
    AllocInfo, ApiTune, FaceBase, FrameDescriptor, FrameWorkInit, FwAlgsEvent, FwResult, HeapRegion, MemorySizes,
    Orientation, OsHooks, OutFace, OutListInfo, SensorError, TrackingMode, TuneSet, VraCallbacks, VraFirmware,
    VraStatus,
};

/// Memory the double asks for unless told otherwise
pub const DEFAULT_SIZES: MemorySizes = MemorySizes {
    fr_work: 0x8000,
    frame_desc: 0x2000,
    dma_out: 0x4000,
};

type PendingOutput = (u32, Vec<OutFace>, OutListInfo);

#[derive(Default)]
struct Record {
    calls: Vec<&'static str>,
    init: Option<FrameWorkInit>,
    alloc_info: Option<AllocInfo>,
    sensors: Vec<(u32, FrameDescriptor, TrackingMode)>,
    inputs: Vec<FrameDescriptor>,
    orientations: Vec<Orientation>,
    tune: Option<ApiTune>,
    orientation: Orientation,
    frames: Vec<(u32, KernelAddr, DeviceAddr)>,
    interrupts: Vec<u32>,
    algs_events: Vec<FwAlgsEvent>,
    tune_sets: Vec<(u32, TuneSet)>,
    applied_sets: Vec<(u32, u32)>,
    aborts: Vec<bool>,
}

/// In-process stand-in for the accelerator library
///
/// Every operation succeeds unless a status was scripted for it. Output
/// queued with [`MockVraFirmware::queue_output`] is delivered on the next
/// interrupt, which also raises an algorithm event the way the real
/// firmware does after a frame completes.
pub struct MockVraFirmware {
    sizes: Mutex<MemorySizes>,
    script: Mutex<HashMap<&'static str, VraStatus>>,
    record: Mutex<Record>,
    hooks: Mutex<Option<OsHooks>>,
    callbacks: Mutex<Option<Arc<dyn VraCallbacks>>>,
    pending: Mutex<Vec<PendingOutput>>,
}

impl Default for MockVraFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVraFirmware {
    pub fn new() -> Self {
        Self {
            sizes: Mutex::new(DEFAULT_SIZES),
            script: Mutex::new(HashMap::new()),
            record: Mutex::new(Record::default()),
            hooks: Mutex::new(None),
            callbacks: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn set_sizes(&self, sizes: MemorySizes) {
        *self.sizes.lock() = sizes;
    }

    /// Make `op` return `status` until cleared
    pub fn script(&self, op: &'static str, status: VraStatus) {
        self.script.lock().insert(op, status);
    }

    pub fn clear_script(&self, op: &'static str) {
        self.script.lock().remove(op);
    }

    fn enter(&self, op: &'static str) -> FwResult<()> {
        self.record.lock().calls.push(op);
        match self.script.lock().get(op) {
            Some(&status) if !status.is_ok() => Err(status),
            _ => Ok(()),
        }
    }

    /// Operation names in call order
    pub fn calls(&self) -> Vec<&'static str> {
        self.record.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.record.lock().calls.iter().filter(|&&call| call == op).count()
    }

    pub fn init(&self) -> Option<FrameWorkInit> {
        self.record.lock().init
    }

    pub fn alloc_info(&self) -> Option<AllocInfo> {
        self.record.lock().alloc_info
    }

    pub fn sensors(&self) -> Vec<(u32, FrameDescriptor, TrackingMode)> {
        self.record.lock().sensors.clone()
    }

    pub fn inputs(&self) -> Vec<FrameDescriptor> {
        self.record.lock().inputs.clone()
    }

    pub fn orientations(&self) -> Vec<Orientation> {
        self.record.lock().orientations.clone()
    }

    /// Parameters from the last successful `set_parameter`
    pub fn tune(&self) -> Option<ApiTune> {
        self.record.lock().tune
    }

    pub fn frames(&self) -> Vec<(u32, KernelAddr, DeviceAddr)> {
        self.record.lock().frames.clone()
    }

    pub fn interrupts(&self) -> Vec<u32> {
        self.record.lock().interrupts.clone()
    }

    pub fn algs_events(&self) -> Vec<FwAlgsEvent> {
        self.record.lock().algs_events.clone()
    }

    pub fn tune_sets(&self) -> Vec<(u32, TuneSet)> {
        self.record.lock().tune_sets.clone()
    }

    pub fn applied_sets(&self) -> Vec<(u32, u32)> {
        self.record.lock().applied_sets.clone()
    }

    pub fn aborts(&self) -> Vec<bool> {
        self.record.lock().aborts.clone()
    }

    pub fn hooks(&self) -> Option<OsHooks> {
        self.hooks.lock().clone()
    }

    fn callbacks(&self) -> Option<Arc<dyn VraCallbacks>> {
        let callbacks = self.callbacks.lock().clone();
        if callbacks.is_none() {
            log::warn!("vra mock: no callbacks registered");
        }
        callbacks
    }

    /// Queue a final face list for delivery on the next interrupt
    pub fn queue_output(&self, instance: u32, faces: Vec<OutFace>, info: OutListInfo) {
        self.pending.lock().push((instance, faces, info));
    }

    /// Deliver a final face list right away
    pub fn emit_faces(&self, instance: u32, faces: &[OutFace], info: OutListInfo) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.final_output(instance, faces, &info);
        }
    }

    pub fn emit_af_faces(&self, instance: u32, faces: &[FaceBase], info: OutListInfo) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.current_frame_output(instance, faces, &info);
        }
    }

    pub fn emit_frame_error(&self, instance: u32, error: SensorError, info: u32) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.frame_error(instance, error, info);
        }
    }

    pub fn emit_hw_error(&self, channel: u32, mask: u32) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.hw_error(channel, mask);
        }
    }

    /// Raise an event on the firmware algorithm task through the OS hooks
    pub fn raise_algs_event(&self, event: FwAlgsEvent) {
        match self.hooks() {
            Some(hooks) => hooks.fw_algs_task_set_event(event as u32),
            None => log::warn!("vra mock: no os hooks"),
        }
    }
}

impl VraFirmware for MockVraFirmware {
    fn set_os_funcs(&self, hooks: OsHooks) {
        self.record.lock().calls.push("set_os_funcs");
        *self.hooks.lock() = Some(hooks);
    }

    fn get_memory_sizes(&self, info: &AllocInfo) -> FwResult<MemorySizes> {
        self.enter("get_memory_sizes")?;
        self.record.lock().alloc_info = Some(*info);
        Ok(*self.sizes.lock())
    }

    fn frame_work_init(
        &self,
        init: &FrameWorkInit,
        fr_work: HeapRegion,
        dma_out: HeapRegion,
        _alloc: &AllocInfo,
        callbacks: Arc<dyn VraCallbacks>,
    ) -> FwResult<()> {
        self.enter("frame_work_init")?;
        log::debug!("vra mock: fr_work {:#x}, dma_out {:#x}", fr_work.kva, dma_out.kva);

        self.record.lock().init = Some(*init);
        *self.callbacks.lock() = Some(callbacks);
        Ok(())
    }

    fn sensor_init(
        &self,
        _desc_heap: HeapRegion,
        instance: u32,
        desc: &FrameDescriptor,
        mode: TrackingMode,
    ) -> FwResult<()> {
        self.enter("sensor_init")?;
        self.record.lock().sensors.push((instance, *desc, mode));
        Ok(())
    }

    fn set_input(&self, _desc_heap: HeapRegion, desc: &FrameDescriptor) -> FwResult<()> {
        self.enter("set_input")?;
        self.record.lock().inputs.push(*desc);
        Ok(())
    }

    fn set_orientation(&self, _desc_heap: HeapRegion, orientation: Orientation) -> FwResult<()> {
        self.enter("set_orientation")?;
        let mut record = self.record.lock();
        record.orientations.push(orientation);
        record.orientation = orientation;
        Ok(())
    }

    fn set_parameter(&self, _fr_work: HeapRegion, _desc_heap: HeapRegion, tune: &ApiTune) -> FwResult<()> {
        self.enter("set_parameter")?;
        self.record.lock().tune = Some(*tune);
        Ok(())
    }

    fn get_parameter(&self, _fr_work: HeapRegion, _desc_heap: HeapRegion) -> FwResult<(ApiTune, Orientation)> {
        self.enter("get_parameter")?;
        let record = self.record.lock();
        Ok((record.tune.unwrap_or_default(), record.orientation))
    }

    fn on_new_frame(&self, _desc_heap: HeapRegion, frame_index: u32, kva: KernelAddr, dva: DeviceAddr) -> FwResult<()> {
        self.enter("on_new_frame")?;
        self.record.lock().frames.push((frame_index, kva, dva));
        Ok(())
    }

    fn on_interrupt(&self, _fr_work: HeapRegion, id: u32) -> FwResult<()> {
        self.enter("on_interrupt")?;
        self.record.lock().interrupts.push(id);

        let pending: Vec<PendingOutput> = self.pending.lock().drain(..).collect();
        if pending.is_empty() {
            return Ok(());
        }

        for (instance, faces, info) in pending {
            self.emit_faces(instance, &faces, info);
        }
        self.raise_algs_event(FwAlgsEvent::Algs);
        Ok(())
    }

    fn on_fw_algs_task_event(&self, _fr_work: HeapRegion, event: FwAlgsEvent) -> FwResult<()> {
        self.enter("on_fw_algs_task_event")?;
        self.record.lock().algs_events.push(event);
        Ok(())
    }

    fn frame_work_abort(&self, _fr_work: HeapRegion, reset: bool) -> FwResult<()> {
        self.enter("frame_work_abort")?;
        self.record.lock().aborts.push(reset);

        if let Some(callbacks) = self.callbacks.lock().clone() {
            callbacks.frame_work_aborted();
        }
        Ok(())
    }

    fn frame_work_terminate(&self, _fr_work: HeapRegion) -> FwResult<()> {
        self.enter("frame_work_terminate")
    }

    fn copy_tune_set(&self, _desc_heap: HeapRegion, instance: u32, set: &TuneSet) -> FwResult<()> {
        self.enter("copy_tune_set")?;
        self.record.lock().tune_sets.push((instance, *set));
        Ok(())
    }

    fn apply_tune_set(&self, _desc_heap: HeapRegion, instance: u32, index: u32) -> FwResult<()> {
        self.enter("apply_tune_set")?;
        self.record.lock().applied_sets.push((instance, index));
        Ok(())
    }

    fn recovery(&self, _desc_heap: HeapRegion) -> FwResult<()> {
        self.enter("recovery")
    }
}
