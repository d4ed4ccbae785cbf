//! Detection tuning and orientation mapping

use copro_arena::KernelAddr;

/// Detection tracking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// Reset previous results and run full-frame detection on every frame
    SingleFrame = 0,
    /// Full-frame detection on every frame
    #[default]
    FullFrameTrack = 1,
    /// Track previous results; full-frame detection at the configured frequency
    RoiTrack = 2,
}

/// Camera facing of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Rear,
    Front,
}

/// Image orientation codes understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    TopLeftToRight = 0,
    TopRightToLeft = 1,
    BottomLeftToTop = 2,
    TopLeftToBottom = 3,
    BottomRightToLeft = 4,
    BottomLeftToRight = 5,
    TopRightToBottom = 6,
    BottomRightToTop = 7,
}

impl Orientation {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Firmware orientation for a scaler rotation in degrees
///
/// Unknown rotations warn and fall back to the unrotated orientation.
pub fn orientation_for(direction: Direction, rotation: u32) -> Orientation {
    use Orientation::*;

    match (direction, rotation) {
        (_, 0) => TopLeftToRight,
        (_, 180) => BottomRightToLeft,
        (Direction::Rear, 90) | (Direction::Front, 270) => TopRightToBottom,
        (Direction::Rear, 270) | (Direction::Front, 90) => BottomLeftToTop,
        _ => {
            log::warn!("{:?}: unknown scaler orientation {}", direction, rotation);
            TopLeftToRight
        }
    }
}

/// Sensor position reported to firmware for the rear camera
pub const SENSOR_POSITION_REAR: u32 = 0;

/// Detection parameters pushed into firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApiTune {
    pub tracking_mode: TrackingMode,
    pub enable_features: u32,
    pub min_face_size: u32,
    pub max_face_count: u32,
    pub full_frame_detection_freq: u32,
    pub face_priority: u32,
    pub disable_frontal_rot_mask: u32,
    pub disable_profile_rot_mask: u32,
    pub working_point: u32,
    pub tracking_smoothness: u32,
    pub selfie_working_point: u32,
    pub sensor_position: u32,
}

/// Frame locking cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLock {
    pub lock_frame_num: u32,
    pub init_frames_per_lock: u32,
    pub normal_frames_per_lock: u32,
}

/// Full tuning of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TuneData {
    pub api: ApiTune,
    pub frame_lock: FrameLock,
    pub direction: Direction,
}

impl TuneData {
    /// Tuning used when no tuning file supplies one
    pub fn default_for(ch1_only: bool) -> Self {
        let (tracking_mode, min_face_size) = if ch1_only {
            (TrackingMode::SingleFrame, 24)
        } else {
            (TrackingMode::FullFrameTrack, 40)
        };

        Self {
            api: ApiTune {
                tracking_mode,
                enable_features: 0,
                min_face_size,
                max_face_count: 10,
                full_frame_detection_freq: 1,
                face_priority: 0,
                disable_frontal_rot_mask: 0x28,
                disable_profile_rot_mask: 0xFE,
                working_point: 900,
                tracking_smoothness: 10,
                selfie_working_point: 0,
                sensor_position: SENSOR_POSITION_REAR,
            },
            frame_lock: FrameLock {
                lock_frame_num: 0,
                init_frames_per_lock: 1,
                normal_frames_per_lock: 1,
            },
            direction: Direction::Rear,
        }
    }
}

/// A tuning set blob staged in memory for the firmware to copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneSet {
    pub index: u32,
    pub addr: KernelAddr,
    pub size: u32,
    pub decrypt: bool,
}
