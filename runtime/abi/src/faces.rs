//! Face data seam between the face-detection pipeline and firmware
//!
//! The primary firmware's auto-exposure/auto-focus algorithms read the
//! latest face list through the service table. The pipeline owns that data;
//! the host only holds a weak reference to whoever registered as source.

/// Upper bound on faces reported per frame
pub const MAX_FACES: usize = 16;

/// One detected face in source-image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceInfo {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub id: u32,
    pub score: u32,
    pub rotation: u32,
}

/// Face list for one camera instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FaceSnapshot {
    pub faces: Vec<FaceInfo>,
    pub frame_count: u32,
    pub in_width: u32,
    pub in_height: u32,
}

impl FaceSnapshot {
    pub fn face_num(&self) -> usize {
        self.faces.len()
    }
}

/// Provider of the current face list per instance
pub trait FaceDataSource: Send + Sync {
    /// Latest faces for `instance`, or `None` if the instance is unknown
    fn face_data(&self, instance: u32) -> Option<FaceSnapshot>;
}
