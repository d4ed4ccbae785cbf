//! Firmware status codes

use std::fmt;

/// Status returned by every accelerator firmware operation; zero is success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VraStatus(pub u32);

impl VraStatus {
    pub const NO_ERROR: VraStatus = VraStatus(0);
    pub const BUSY: VraStatus = VraStatus(0x1);
    pub const FRWORK_NOT_VALID: VraStatus = VraStatus(0x2);
    pub const SENSOR_NOT_VALID: VraStatus = VraStatus(0x3);
    pub const INIT_NOT_ENOUGH_MEMORY: VraStatus = VraStatus(0x15);
    pub const INIT_FRWORK_ALREADY_EXIST: VraStatus = VraStatus(0x17);
    pub const BAD_INPUT_FORMAT: VraStatus = VraStatus(0x30);
    pub const WRONG_MAX_FACES: VraStatus = VraStatus(0x34);
    pub const INTR_NOT_EXPECTED: VraStatus = VraStatus(0x53);
    pub const ALREADY_ABORTED: VraStatus = VraStatus(0x55);
    pub const FRWORK_ABORTING: VraStatus = VraStatus(0x61);
    pub const NEW_FR_PREV_REQ_NOT_HANDLED: VraStatus = VraStatus(0x62);
    pub const NEW_FR_NEXT_EXIST: VraStatus = VraStatus(0x63);
    pub const WRONG_TUNING_GROUP: VraStatus = VraStatus(0x92);

    pub fn is_ok(self) -> bool {
        self == Self::NO_ERROR
    }

    /// Statuses that refuse a new frame without being a fault
    pub fn rejects_frame(self) -> bool {
        matches!(
            self,
            Self::BUSY | Self::FRWORK_ABORTING | Self::NEW_FR_PREV_REQ_NOT_HANDLED | Self::NEW_FR_NEXT_EXIST
        )
    }
}

impl fmt::Display for VraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {:#x}", self.0)
    }
}

/// Result of a firmware operation; the error side is never `NO_ERROR`
pub type FwResult<T> = core::result::Result<T, VraStatus>;
