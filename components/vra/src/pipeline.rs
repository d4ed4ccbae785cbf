//! Face-detection frame pipeline
//!
//! ```text
//!  Uninitialized ─init_frame_descriptor─► FrameDescriptorReady ─submit_frame─► Streaming
//!        ▲                                                                         │
//!        └──────────────── terminate_frame_work ◄──────── stop / stop_all ◄────────┘
//! ```
//! `init_frame_work` runs once per pipeline and must precede every
//! instance's descriptor. Face lists arrive asynchronously through the
//! callback set and are copied under a per-instance lock that both the
//! callback and the readers take in the variant matching their context.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;

use copro_abi::{in_irq, ExecContext, FaceDataSource, FaceSnapshot, Host, IrqLock, PoolId, MAX_FACES};
use copro_arena::{DeviceAddr, KernelAddr};
use copro_sched::{Priority, SchedulerConfig, TaskFn, TaskScheduler, DEFAULT_RING_CAPACITY};

use crate::faces::{AfFaceList, FaceBase, FaceDetectMode, FaceList, FaceMetadata, OutFace, OutListInfo};
use crate::firmware::{
    AllocInfo, FrameWorkInit, FwAlgsEvent, HeapRegion, MemorySizes, SensorError, VraCallbacks, VraFirmware,
    HW_CLOCK_MHZ, SW_CLOCK_MHZ, VRA_API_VERSION,
};
use crate::frame::{DmaInput, FrameDescriptor, InputKind, OtfInput};
use crate::hooks::{OsHooks, PipelineCallbacks};
use crate::state::{InstState, LibState};
use crate::status::VraStatus;
use crate::tune::{orientation_for, Direction, TrackingMode, TuneData, TuneSet};
use crate::{Result, VraError};

/// Camera instances served by default
pub const DEFAULT_INSTANCES: u32 = 4;

/// Default size of the accelerator's internal output buffer
pub const DEFAULT_INTERNAL_BUFFER: usize = 0x10_0000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VraConfig {
    /// Camera instances (sensors) the firmware is sized for
    pub instances: u32,

    /// Upper bound for the firmware's DMA output buffer
    pub internal_buffer_size: usize,

    /// Hardware reads only channel 1 (two-plane YUV422, single-frame tracking)
    pub ch1_only: bool,

    /// Slots in the firmware-event pump ring
    pub pump_ring_capacity: usize,
}

impl Default for VraConfig {
    fn default() -> Self {
        Self {
            instances: DEFAULT_INSTANCES,
            internal_buffer_size: DEFAULT_INTERNAL_BUFFER,
            ch1_only: false,
            pump_ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

/// Error bookkeeping fed by firmware callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugCounters {
    /// Lost frames per processing channel
    pub lost_frames: [u64; 2],
    pub errors: u64,
    pub last_error: Option<(SensorError, u32)>,
    pub hw_errors: u64,
}

struct Heaps {
    dma_out: HeapRegion,
    fr_work: HeapRegion,
    frame_desc: Vec<HeapRegion>,
}

impl Heaps {
    fn regions(&self) -> impl Iterator<Item = &HeapRegion> {
        [&self.dma_out, &self.fr_work].into_iter().chain(self.frame_desc.iter())
    }
}

struct Instance {
    state: Mutex<InstState>,
    desc: Mutex<Option<FrameDescriptor>>,
    direction: Mutex<Direction>,
    faces: IrqLock<FaceList>,
    af_faces: IrqLock<AfFaceList>,
}

impl Instance {
    fn new() -> Self {
        Self {
            state: Mutex::new(InstState::empty()),
            desc: Mutex::new(None),
            direction: Mutex::new(Direction::Rear),
            faces: IrqLock::new(FaceList::default()),
            af_faces: IrqLock::new(AfFaceList::default()),
        }
    }

    fn reset_output(&self) {
        let ctx = context();
        *self.faces.lock(ctx) = FaceList::default();
        *self.af_faces.lock(ctx) = AfFaceList::default();
        self.state.lock().remove(InstState::APPLY_TUNE_SET);
    }
}

fn context() -> ExecContext {
    if in_irq() {
        ExecContext::Interrupt
    } else {
        ExecContext::Thread
    }
}

fn firmware_failed(op: &'static str, instance: Option<u32>, status: VraStatus) -> VraError {
    match instance {
        Some(instance) => log::error!("[{}] {} is fail ({})", instance, op, status),
        None => log::error!("{} is fail ({})", op, status),
    }
    VraError::Firmware { op, status }
}

/// Client of the face-detection accelerator firmware
pub struct VraPipeline {
    config: VraConfig,
    host: Arc<Host>,
    firmware: Arc<dyn VraFirmware>,
    me: Weak<VraPipeline>,

    /// Runs firmware algorithm events off the interrupt path
    pump: TaskScheduler,

    state: Mutex<LibState>,
    input: Mutex<InputKind>,
    heaps: Mutex<Option<Heaps>>,
    instances: Vec<Instance>,

    /// Serialises parameter changes against each other
    slock: IrqLock<()>,
    algs_lock: IrqLock<()>,
    intr_lock: spin::Mutex<()>,
    algs_event: Mutex<FwAlgsEvent>,

    max_face_num: AtomicU32,
    fr_index: AtomicU32,
    debug: Mutex<DebugCounters>,
}

impl VraPipeline {
    /// Build the pipeline and hand the firmware its OS hooks
    ///
    /// # Errors
    /// `Sched` if the event pump configuration is rejected
    pub fn new(config: VraConfig, host: Arc<Host>, firmware: Arc<dyn VraFirmware>) -> Result<Arc<Self>> {
        let mut pump_config = SchedulerConfig::single("vra", Priority::FIRST);
        pump_config.ring_capacity = config.pump_ring_capacity;
        let pump = TaskScheduler::new(pump_config)?;

        let default_max = TuneData::default_for(config.ch1_only).api.max_face_count;
        let pipeline = Arc::new_cyclic(|me| Self {
            instances: (0..config.instances).map(|_| Instance::new()).collect(),
            config,
            host: host.clone(),
            firmware: firmware.clone(),
            me: me.clone(),
            pump,
            state: Mutex::new(LibState::empty()),
            input: Mutex::new(InputKind::Otf),
            heaps: Mutex::new(None),
            slock: IrqLock::new(()),
            algs_lock: IrqLock::new(()),
            intr_lock: spin::Mutex::new(()),
            algs_event: Mutex::new(FwAlgsEvent::Abort),
            max_face_num: AtomicU32::new(default_max),
            fr_index: AtomicU32::new(0),
            debug: Mutex::new(DebugCounters::default()),
        });

        firmware.set_os_funcs(OsHooks::new(Arc::downgrade(&pipeline), host));
        log::info!("VRA pipeline created ({} instances)", pipeline.config.instances);

        Ok(pipeline)
    }

    pub fn config(&self) -> &VraConfig {
        &self.config
    }

    pub fn state(&self) -> LibState {
        *self.state.lock()
    }

    pub fn instance_state(&self, instance: u32) -> Result<InstState> {
        Ok(*self.instance(instance)?.state.lock())
    }

    pub fn frame_descriptor(&self, instance: u32) -> Result<Option<FrameDescriptor>> {
        Ok(*self.instance(instance)?.desc.lock())
    }

    /// Face limit from the most recently applied tuning
    pub fn max_face_num(&self) -> u32 {
        self.max_face_num.load(Ordering::SeqCst)
    }

    pub fn debug_counters(&self) -> DebugCounters {
        *self.debug.lock()
    }

    pub fn memory_allocated(&self) -> bool {
        self.heaps.lock().is_some()
    }

    fn instance(&self, instance: u32) -> Result<&Instance> {
        self.instances
            .get(instance as usize)
            .ok_or(VraError::InvalidInstance(instance))
    }

    fn fr_work(&self) -> Result<HeapRegion> {
        self.heaps
            .lock()
            .as_ref()
            .map(|heaps| heaps.fr_work)
            .ok_or(VraError::NotReady("memory not allocated"))
    }

    fn desc_heap(&self, instance: u32) -> Result<HeapRegion> {
        self.heaps
            .lock()
            .as_ref()
            .and_then(|heaps| heaps.frame_desc.get(instance as usize).copied())
            .ok_or(VraError::NotReady("memory not allocated"))
    }

    fn frame_work_ready(&self) -> Result<()> {
        if self.state.lock().contains(LibState::FRAME_WORK_INIT) {
            Ok(())
        } else {
            Err(VraError::NotReady("frame work not initialised"))
        }
    }

    // Memory

    /// Size and allocate the firmware heaps from the VRA pool
    ///
    /// Allocation is all-or-nothing; a second call is a no-op.
    ///
    /// # Errors
    /// - `Firmware` if the firmware cannot size its memory
    /// - `NotEnoughMemory` if the output buffer exceeds the internal buffer
    /// - `Abi`/`Arena` if the VRA pool is unbound or exhausted
    pub fn alloc_memory(&self) -> Result<()> {
        let mut heaps = self.heaps.lock();
        if heaps.is_some() {
            return Ok(());
        }

        let info = AllocInfo::new(self.config.instances, self.config.ch1_only);
        let sizes = self
            .firmware
            .get_memory_sizes(&info)
            .map_err(|status| firmware_failed("get_memory_sizes", None, status))?;

        if sizes.dma_out > self.config.internal_buffer_size {
            log::error!(
                "VRA internal buffer ({:#x}) < requested dma size ({:#x})",
                self.config.internal_buffer_size,
                sizes.dma_out
            );
            return Err(VraError::NotEnoughMemory {
                requested: sizes.dma_out,
                available: self.config.internal_buffer_size,
            });
        }

        log::debug!(
            "vra memory: dma_out {:#x}, fr_work {:#x}, frame_desc {:#x} x{}",
            sizes.dma_out,
            sizes.fr_work,
            sizes.frame_desc,
            self.config.instances
        );

        let mut taken = Vec::new();
        match self.alloc_heaps(&sizes, &mut taken) {
            Ok(allocated) => {
                *heaps = Some(allocated);
                Ok(())
            }
            Err(e) => {
                for region in taken {
                    self.release(region);
                }
                Err(e)
            }
        }
    }

    fn alloc_heaps(&self, sizes: &MemorySizes, taken: &mut Vec<HeapRegion>) -> Result<Heaps> {
        let mut alloc = |size: usize| -> Result<HeapRegion> {
            let pool = self.host.pool(PoolId::Vra)?;
            let allocation = self.host.arena().allocate(pool, size)?;
            let region = HeapRegion {
                kva: allocation.kernel_addr,
                dva: allocation.device_addr,
                size,
            };
            taken.push(region);
            Ok(region)
        };

        let dma_out = alloc(sizes.dma_out)?;
        let fr_work = alloc(sizes.fr_work)?;
        let frame_desc = (0..self.config.instances)
            .map(|_| alloc(sizes.frame_desc))
            .collect::<Result<Vec<_>>>()?;

        Ok(Heaps {
            dma_out,
            fr_work,
            frame_desc,
        })
    }

    fn release(&self, region: HeapRegion) {
        if let Err(e) = self.host.free(PoolId::Vra, region.kva) {
            log::warn!("vra heap {:#x} not released: {}", region.kva, e);
        }
    }

    pub fn free_memory(&self) {
        if let Some(heaps) = self.heaps.lock().take() {
            for region in heaps.regions() {
                self.release(*region);
            }
        }
    }

    // Frame work

    /// One-time firmware setup; later calls only re-arm the abort bit
    ///
    /// Allocates the heaps if needed, starts the event pump and registers
    /// the callback set. On failure the heaps are freed again.
    pub fn init_frame_work(&self, regs_base: u64, input: InputKind) -> Result<()> {
        if !self.state.lock().contains(LibState::FRAME_WORK_INIT) {
            self.alloc_memory()?;
            self.pump.start()?;

            if let Err(e) = self.start_frame_work(regs_base, input) {
                self.free_memory();
                return Err(e);
            }
            self.state.lock().insert(LibState::FRAME_WORK_INIT);
            log::info!("VRA frame work initialised ({:?} input)", input);
        }

        self.state.lock().insert(LibState::FWALGS_ABORT);
        Ok(())
    }

    fn start_frame_work(&self, regs_base: u64, input: InputKind) -> Result<()> {
        let (fr_work, dma_out) = {
            let heaps = self.heaps.lock();
            let heaps = heaps.as_ref().ok_or(VraError::NotReady("memory not allocated"))?;
            (heaps.fr_work, heaps.dma_out)
        };

        *self.input.lock() = input;
        self.fr_index.store(0, Ordering::SeqCst);

        let init = FrameWorkInit {
            regs_base,
            dram_input: input == InputKind::Memory,
            level_interrupts: true,
            hw_clock_mhz: HW_CLOCK_MHZ,
            sw_clock_mhz: SW_CLOCK_MHZ,
            block_new_fr_on_transaction: false,
            block_new_fr_on_input_set: false,
            wait_on_lock: true,
            reset_unique_id_on_reset_list: true,
            crop_faces_out_of_image: true,
            api_version: VRA_API_VERSION,
        };
        let info = AllocInfo::new(self.config.instances, self.config.ch1_only);
        let callbacks: Arc<dyn VraCallbacks> = Arc::new(PipelineCallbacks::new(self.me.clone()));

        self.firmware
            .frame_work_init(&init, fr_work, dma_out, &info, callbacks)
            .map_err(|status| firmware_failed("frame_work_init", None, status))?;

        for instance in &self.instances {
            instance.state.lock().remove(InstState::FRAME_DESC_INIT);
        }
        Ok(())
    }

    /// Create an instance's frame descriptor; idempotent per instance
    ///
    /// # Errors
    /// - `InvalidInstance` for an instance outside the configured range
    /// - `NotReady` before `init_frame_work`
    /// - `Firmware` if the firmware rejects the sensor
    pub fn init_frame_descriptor(&self, instance: u32) -> Result<()> {
        let inst = self.instance(instance)?;
        self.frame_work_ready()?;

        if inst.state.lock().contains(InstState::FRAME_DESC_INIT) {
            return Ok(());
        }

        let desc = FrameDescriptor::initial(*self.input.lock(), self.config.ch1_only);
        let heap = self.desc_heap(instance)?;
        self.firmware
            .sensor_init(heap, instance, &desc, TrackingMode::FullFrameTrack)
            .map_err(|status| firmware_failed("sensor_init", Some(instance), status))?;

        *inst.desc.lock() = Some(desc);
        inst.state.lock().insert(InstState::FRAME_DESC_INIT);
        log::debug!("[{}] vra frame descriptor ready", instance);
        Ok(())
    }

    /// Push detection parameters, substituting defaults for `None`
    pub fn apply_tuning(&self, instance: u32, tune: Option<&TuneData>) -> Result<()> {
        let inst = self.instance(instance)?;
        let fr_work = self.fr_work()?;
        let heap = self.desc_heap(instance)?;

        let tune = match tune {
            Some(tune) => {
                inst.state.lock().insert(InstState::APPLY_TUNE_SET);
                *tune
            }
            None => {
                log::debug!("[{}] vra tune uses default setting", instance);
                TuneData::default_for(self.config.ch1_only)
            }
        };

        let _guard = self.slock.lock(context());
        self.max_face_num.store(tune.api.max_face_count, Ordering::SeqCst);
        *inst.direction.lock() = tune.direction;

        if let Err(status) = self.firmware.set_parameter(fr_work, heap, &tune.api) {
            log::info!("[{}] VRA set parameter: {:?}, frame_lock {:?}", instance, tune.api, tune.frame_lock);
            return Err(firmware_failed("set_parameter", Some(instance), status));
        }

        match self.firmware.get_parameter(fr_work, heap) {
            Ok((applied, orientation)) => {
                log::debug!("[{}] vra parameter {:?}, orientation {:?}", instance, applied, orientation);
                Ok(())
            }
            Err(status) => {
                log::info!("[{}] VRA set parameter: {:?}, frame_lock {:?}", instance, tune.api, tune.frame_lock);
                Err(firmware_failed("get_parameter", Some(instance), status))
            }
        }
    }

    /// Map a scaler rotation through the instance's camera facing
    pub fn set_orientation(&self, instance: u32, rotation: u32) -> Result<()> {
        let inst = self.instance(instance)?;
        let orientation = orientation_for(*inst.direction.lock(), rotation);
        let heap = self.desc_heap(instance)?;

        log::debug!("[{}] scaler orientation {} -> {:?}", instance, rotation, orientation);

        let _guard = self.slock.lock(context());
        self.firmware
            .set_orientation(heap, orientation)
            .map_err(|status| firmware_failed("set_orientation", Some(instance), status))
    }

    fn reconfigure(&self, instance: u32, update: impl FnOnce(&mut FrameDescriptor)) -> Result<()> {
        let inst = self.instance(instance)?;
        let heap = self.desc_heap(instance)?;

        let desc = {
            let mut desc = inst.desc.lock();
            let desc = desc.get_or_insert_with(|| FrameDescriptor::initial(*self.input.lock(), self.config.ch1_only));
            update(desc);
            *desc
        };

        self.firmware
            .set_input(heap, &desc)
            .map_err(|status| firmware_failed("set_input", Some(instance), status))
    }

    pub fn configure_otf_input(&self, instance: u32, input: &OtfInput, fcount: u32) -> Result<()> {
        self.reconfigure(instance, |desc| desc.configure_otf(instance, input, fcount))
    }

    pub fn configure_dma_input(&self, instance: u32, input: &DmaInput, fcount: u32) -> Result<()> {
        let ch1_only = self.config.ch1_only;
        self.reconfigure(instance, |desc| desc.configure_dma(instance, input, ch1_only, fcount))
    }

    // Streaming

    /// Hand one input frame to firmware
    ///
    /// # Errors
    /// - `NotReady` before frame work or the instance descriptor exist
    /// - `Busy` if firmware is busy, aborting, or still holds a request
    ///
    /// Other non-zero statuses are logged and the frame counts as accepted.
    pub fn submit_frame(&self, instance: u32, kva: KernelAddr, dva: DeviceAddr) -> Result<()> {
        let inst = self.instance(instance)?;
        self.frame_work_ready()?;
        if !inst.state.lock().contains(InstState::FRAME_DESC_INIT) {
            return Err(VraError::NotReady("frame descriptor not initialised"));
        }

        let heap = self.desc_heap(instance)?;
        let index = self.fr_index.load(Ordering::SeqCst);

        match self.firmware.on_new_frame(heap, index, kva, dva) {
            Ok(()) => {}
            Err(status) if status.rejects_frame() => {
                log::error!("[{}] on_new_frame is fail ({})", instance, status);
                return Err(VraError::Busy { instance, status });
            }
            Err(status) => log::warn!("[{}] on_new_frame returned {}", instance, status),
        }

        self.fr_index.fetch_add(1, Ordering::SeqCst);
        self.state.lock().remove(LibState::FWALGS_ABORT);
        Ok(())
    }

    /// Forward one hardware interrupt into the firmware
    pub fn handle_interrupt(&self, id: u32) -> Result<()> {
        let fr_work = self.fr_work()?;

        let _guard = self.intr_lock.lock();
        self.firmware
            .on_interrupt(fr_work, id)
            .map_err(|status| firmware_failed("on_interrupt", None, status))
    }

    /// Most recent final face list of an instance
    pub fn get_faces(&self, instance: u32) -> Result<FaceList> {
        Ok(self.instance(instance)?.faces.lock(context()).clone())
    }

    /// Most recent unfiltered face list of an instance
    pub fn get_af_faces(&self, instance: u32) -> Result<AfFaceList> {
        Ok(self.instance(instance)?.af_faces.lock(context()).clone())
    }

    /// Face statistics for a frame's result metadata
    pub fn update_metadata(&self, instance: u32, requested: FaceDetectMode) -> Result<FaceMetadata> {
        let list = self.get_faces(instance)?;
        Ok(FaceMetadata::from_list(requested, &list))
    }

    // Tuning sets

    pub fn copy_tune_set(&self, instance: u32, set: &TuneSet) -> Result<()> {
        self.instance(instance)?;
        let heap = self.desc_heap(instance)?;

        self.firmware
            .copy_tune_set(heap, instance, set)
            .map_err(|status| firmware_failed("copy_tune_set", Some(instance), status))?;
        log::info!("[{}] vra_copy_tune_set index({})", instance, set.index);
        Ok(())
    }

    pub fn apply_tune_set(&self, instance: u32, index: u32) -> Result<()> {
        self.instance(instance)?;
        let heap = self.desc_heap(instance)?;

        let _guard = self.slock.lock(context());
        self.firmware
            .apply_tune_set(heap, instance, index)
            .map_err(|status| firmware_failed("apply_tune_set", Some(instance), status))
    }

    pub fn reset_recovery(&self, instance: u32) -> Result<()> {
        self.instance(instance)?;
        let heap = self.desc_heap(instance)?;

        self.firmware
            .recovery(heap)
            .map_err(|status| firmware_failed("recovery", Some(instance), status))?;
        log::info!("[{}] vra_reset_recovery done", instance);
        Ok(())
    }

    // Firmware events

    /// Firmware raised an event on its algorithm task
    pub(crate) fn set_event_fw_algs(&self, event: FwAlgsEvent) {
        match event {
            FwAlgsEvent::Abort => log::info!("FWALGS_TASK_SET_ABORT"),
            FwAlgsEvent::Algs => {
                *self.algs_event.lock() = FwAlgsEvent::Algs;

                let me = self.me.clone();
                let task: TaskFn = Arc::new(move |_| {
                    if let Some(pipeline) = me.upgrade() {
                        if let Err(e) = pipeline.invoke_fwalgs_event() {
                            log::error!("vra fw_algs event failed: {}", e);
                        }
                    }
                });

                if let Err(e) = self.pump.submit(Priority::FIRST, task, 0) {
                    log::error!("vra fw_algs event dropped: {}", e);
                }
            }
        }
    }

    fn invoke_fwalgs_event(&self) -> Result<()> {
        let fr_work = self.fr_work()?;
        let event = *self.algs_event.lock();
        log::debug!("vra fw_algs event {:?}", event);

        let _guard = self.algs_lock.lock(context());
        self.firmware
            .on_fw_algs_task_event(fr_work, event)
            .map_err(|status| firmware_failed("on_fw_algs_task_event", None, status))
    }

    /// Block until every queued firmware algorithm event has run
    pub fn flush_events(&self) -> Result<()> {
        Ok(self.pump.flush(Priority::FIRST)?)
    }

    fn fwalgs_stop(&self) -> Result<()> {
        *self.algs_event.lock() = FwAlgsEvent::Abort;
        self.invoke_fwalgs_event()?;
        self.state.lock().insert(LibState::FWALGS_ABORT);
        Ok(())
    }

    // Callbacks

    pub(crate) fn on_final_output(&self, instance: u32, faces: &[OutFace], info: &OutListInfo) {
        let Ok(inst) = self.instance(instance) else {
            log::error!("final output for invalid instance {}", instance);
            return;
        };

        if faces.len() > MAX_FACES {
            log::warn!(
                "[{}] {} faces exceed MAX_FACES ({}); truncated",
                instance,
                faces.len(),
                MAX_FACES
            );
        }
        let kept = &faces[..faces.len().min(MAX_FACES)];

        {
            let mut out = inst.faces.lock(context());
            out.info = *info;
            out.faces.clear();
            out.faces.extend_from_slice(kept);
        }

        let overlap = kept.iter().enumerate().any(|(i, face)| {
            let center = face.base.rect.center();
            kept.iter()
                .enumerate()
                .any(|(j, other)| i != j && other.base.rect.contains(center))
        });
        if overlap {
            log::info!("[{}] vra output: overlapping faces", instance);
        }

        let max = self.max_face_num();
        if faces.len() > max as usize || overlap {
            log::info!("[{}] vra output: num_all_faces({}) > MAX({})", instance, faces.len(), max);
            for (i, face) in kept.iter().enumerate() {
                let rect = face.base.rect;
                log::info!(
                    "[{}] id[{}]; x,y,w,h,score; {},{},{},{},{}",
                    instance,
                    i,
                    rect.left,
                    rect.top,
                    rect.width,
                    rect.height,
                    face.base.score
                );
            }
        }
    }

    pub(crate) fn on_current_frame_output(&self, instance: u32, faces: &[FaceBase], info: &OutListInfo) {
        let Ok(inst) = self.instance(instance) else {
            log::error!("current frame output for invalid instance {}", instance);
            return;
        };

        let mut out = inst.af_faces.lock(context());
        out.info = *info;
        out.faces.clear();
        out.faces.extend_from_slice(&faces[..faces.len().min(MAX_FACES)]);
    }

    pub(crate) fn on_frame_error(&self, instance: u32, error: SensorError, info: u32) {
        let mut debug = self.debug.lock();
        match (error, debug.lost_frames.get_mut(info as usize)) {
            (SensorError::FrameLost, Some(lost)) => *lost += 1,
            _ => {
                debug.errors += 1;
                debug.last_error = Some((error, info));
                log::debug!("[{}] vra frame error {:?} ({})", instance, error, info);
            }
        }
    }

    pub(crate) fn record_hw_error(&self) {
        self.debug.lock().hw_errors += 1;
    }

    // Teardown

    /// Clear one instance's output and tuning-file bit
    pub fn stop(&self, instance: u32) -> Result<()> {
        self.instance(instance)?.reset_output();
        Ok(())
    }

    /// Abort firmware work and reset every instance
    pub fn stop_all(&self) -> Result<()> {
        let fr_work = self.fr_work()?;
        self.firmware
            .frame_work_abort(fr_work, true)
            .map_err(|status| firmware_failed("frame_work_abort", None, status))?;

        self.fwalgs_stop()?;

        for instance in &self.instances {
            instance.reset_output();
        }
        Ok(())
    }

    /// Terminate firmware, stop the pump and release every heap
    pub fn terminate_frame_work(&self) -> Result<()> {
        if !self.state.lock().contains(LibState::FRAME_WORK_INIT) {
            log::debug!("vra frame work not initialised; nothing to terminate");
            return Ok(());
        }

        let fr_work = self.fr_work()?;
        self.firmware
            .frame_work_terminate(fr_work)
            .map_err(|status| firmware_failed("frame_work_terminate", None, status))?;

        self.fwalgs_stop()?;
        self.pump.shutdown();
        self.free_memory();

        *self.state.lock() = LibState::empty();
        for instance in &self.instances {
            instance.state.lock().remove(InstState::FRAME_DESC_INIT | InstState::APPLY_TUNE_SET);
        }

        log::info!("VRA frame work terminated");
        Ok(())
    }
}

impl FaceDataSource for VraPipeline {
    fn face_data(&self, instance: u32) -> Option<FaceSnapshot> {
        self.instances
            .get(instance as usize)
            .map(|inst| inst.faces.lock(context()).to_snapshot())
    }
}

impl Drop for VraPipeline {
    fn drop(&mut self) {
        if let Some(heaps) = self.heaps.get_mut().take() {
            log::warn!("VRA pipeline dropped with heaps allocated; releasing");
            for region in heaps.regions() {
                self.release(*region);
            }
        }
    }
}
