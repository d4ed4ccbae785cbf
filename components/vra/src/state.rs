//! Pipeline and per-instance state bits

use bitflags::bitflags;

bitflags! {
    /// Pipeline-wide state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LibState: u32 {
        /// Firmware frame work initialised (once per pipeline)
        const FRAME_WORK_INIT = 1 << 0;
        /// Firmware algorithms aborted; cleared by the next accepted frame
        const FWALGS_ABORT = 1 << 1;
        const BYPASS_REQUESTED = 1 << 2;
    }
}

bitflags! {
    /// Per camera instance state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InstState: u32 {
        /// Frame descriptor handed to firmware
        const FRAME_DESC_INIT = 1 << 0;
        /// Tuning came from a tuning file rather than defaults
        const APPLY_TUNE_SET = 1 << 1;
    }
}
