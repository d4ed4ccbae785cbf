//! Face lists delivered by firmware and the metadata derived from them

use copro_abi::{FaceInfo, FaceSnapshot, MAX_FACES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl FaceRect {
    /// `[left, top, right, bottom]`, clamped to the i32 range
    pub fn corners(&self) -> [i32; 4] {
        [
            self.left,
            self.top,
            self.left.saturating_add(self.width),
            self.top.saturating_add(self.height),
        ]
    }

    pub fn center(&self) -> (i32, i32) {
        let [l, t, r, b] = self.corners();
        (midpoint(l, r), midpoint(t, b))
    }

    pub fn contains(&self, (x, y): (i32, i32)) -> bool {
        let [l, t, r, b] = self.corners();
        l <= x && x <= r && t <= y && y <= b
    }
}

fn midpoint(a: i32, b: i32) -> i32 {
    ((a as i64 + b as i64) >> 1) as i32
}

/// Detection result without facial features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceBase {
    pub rect: FaceRect,
    /// Confidence, 0..=1000
    pub score: i32,
    pub id: u32,
    pub rotation: u32,
    pub yaw: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Landmark {
    pub left: i32,
    pub top: i32,
}

/// Final detection result with eye and mouth locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutFace {
    pub base: FaceBase,
    pub left_eye: Landmark,
    pub right_eye: Landmark,
    pub mouth: Landmark,
}

/// Header of a delivered face list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutListInfo {
    pub frame_index: u32,
    pub in_width: u32,
    pub in_height: u32,
}

/// Final face list of one instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FaceList {
    pub info: OutListInfo,
    pub faces: Vec<OutFace>,
}

impl FaceList {
    pub fn face_num(&self) -> usize {
        self.faces.len()
    }

    /// Form read by firmware through the service table
    pub fn to_snapshot(&self) -> FaceSnapshot {
        FaceSnapshot {
            faces: self
                .faces
                .iter()
                .map(|face| FaceInfo {
                    left: face.base.rect.left,
                    top: face.base.rect.top,
                    width: face.base.rect.width,
                    height: face.base.rect.height,
                    id: face.base.id,
                    score: face.base.score.max(0) as u32,
                    rotation: face.base.rotation,
                })
                .collect(),
            frame_count: self.info.frame_index,
            in_width: self.info.in_width,
            in_height: self.info.in_height,
        }
    }
}

/// Unfiltered current-frame faces used for auto focus
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AfFaceList {
    pub info: OutListInfo,
    pub faces: Vec<FaceBase>,
}

/// Face detection mode requested per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceDetectMode {
    #[default]
    Off,
    Simple,
    Full,
}

/// Face statistics attached to a frame's result metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FaceMetadata {
    pub mode: FaceDetectMode,
    pub src_width: u32,
    pub src_height: u32,
    pub ids: Vec<u32>,
    /// `[x_min, y_min, x_max, y_max]`
    pub rectangles: Vec<[i32; 4]>,
    pub scores: Vec<u8>,
    /// Left eye, right eye and mouth as `[x, y]` pairs
    pub landmarks: Vec<[i32; 6]>,
}

/// Scale a 0..=1000 firmware score to 0..=255
pub fn scale_score(score: i32) -> u8 {
    (score.max(0) as i64 * 0xff / 1000).min(0xff) as u8
}

impl FaceMetadata {
    /// Metadata for a frame given the requested mode and the current list
    ///
    /// Full detection is not supported; it is reported as simple.
    pub fn from_list(requested: FaceDetectMode, list: &FaceList) -> Self {
        if requested == FaceDetectMode::Off {
            return Self::default();
        }

        let faces = &list.faces[..list.faces.len().min(MAX_FACES)];
        Self {
            mode: FaceDetectMode::Simple,
            src_width: list.info.in_width,
            src_height: list.info.in_height,
            ids: faces.iter().map(|f| f.base.id).collect(),
            rectangles: faces.iter().map(|f| f.base.rect.corners()).collect(),
            scores: faces.iter().map(|f| scale_score(f.base.score)).collect(),
            landmarks: faces
                .iter()
                .map(|f| {
                    [
                        f.left_eye.left,
                        f.left_eye.top,
                        f.right_eye.left,
                        f.right_eye.top,
                        f.mouth.left,
                        f.mouth.top,
                    ]
                })
                .collect(),
        }
    }
}
