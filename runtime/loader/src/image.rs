//! Image descriptions and load states

use std::fmt;

use copro_abi::{BinaryKind, TableVariant};
use copro_arena::KernelAddr;
use serde::Deserialize;

use crate::{LoaderError, Result};

/// Header prepended to each data segment inside an image
pub const CDH_SIZE: usize = 0x80;

/// Bytes at the end of an image holding its version string
pub const VERSION_TAIL_LEN: usize = 60;

/// Base of the reserved firmware address range
pub const LIB_START: KernelAddr = 0x4000_0000;

/// The loadable firmware images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Imaging library ("DDK"); entered with the primary table
    Primary,
    /// Real-time algorithm library ("RTA"); entered with the auxiliary table
    Auxiliary,
    /// Face-detection accelerator library ("VRA"); never entered directly
    Accelerator,
}

impl ImageKind {
    pub const ALL: [ImageKind; 3] = [ImageKind::Primary, ImageKind::Auxiliary, ImageKind::Accelerator];

    pub fn label(self) -> &'static str {
        match self {
            ImageKind::Primary => "DDK",
            ImageKind::Auxiliary => "RTA",
            ImageKind::Accelerator => "VRA",
        }
    }

    pub fn binary_kind(self) -> BinaryKind {
        match self {
            ImageKind::Primary => BinaryKind::Library,
            ImageKind::Auxiliary => BinaryKind::Auxiliary,
            ImageKind::Accelerator => BinaryKind::Accelerator,
        }
    }

    /// Service table handed to the image's entry point, if it has one
    pub fn table_variant(self) -> Option<TableVariant> {
        match self {
            ImageKind::Primary => Some(TableVariant::Primary),
            ImageKind::Auxiliary => Some(TableVariant::Auxiliary),
            ImageKind::Accelerator => None,
        }
    }
}

/// What part of an image to (re)load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Code and data, with protection toggles
    All,
    /// Data segments only, into an image whose code is already loaded
    DataOnly,
}

/// Protection state of an image's code regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionState {
    Writable,
    Executable,
}

/// Load state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Validating,
    ProtectionToggled(ProtectionState),
    Copied,
    Running,
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Unloaded => write!(f, "unloaded"),
            LoadState::Validating => write!(f, "validating"),
            LoadState::ProtectionToggled(ProtectionState::Writable) => write!(f, "writable"),
            LoadState::ProtectionToggled(ProtectionState::Executable) => write!(f, "executable"),
            LoadState::Copied => write!(f, "copied"),
            LoadState::Running => write!(f, "running"),
            LoadState::Failed => write!(f, "failed"),
        }
    }
}

/// Code region, as an offset into the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CodeRegion {
    pub offset: usize,
    pub size: usize,
}

/// Data segment reloaded on a data-only load
///
/// The same offset is used in the image and in the window. A segment
/// without a length runs to the end of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DataSegment {
    pub offset: usize,
    pub len: Option<usize>,
}

/// Placement of one image
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageConfig {
    /// File name requested from the image provider
    pub name: String,

    /// Kernel address of the destination window
    pub base: KernelAddr,

    /// Window size; larger images are rejected
    pub capacity: usize,

    /// Regions toggled between writable and executable
    pub code: Vec<CodeRegion>,

    /// Entry point, as an offset into the window
    pub entry_offset: usize,

    /// Images must be larger than this for a data-only reload
    pub data_offset: usize,

    #[serde(default)]
    pub data_segments: Vec<DataSegment>,
}

impl ImageConfig {
    /// Combined imaging library: accelerator code, its data, ISP code, DDK data
    pub fn primary() -> Self {
        const VRA_CODE_SIZE: usize = 0x4_0000;
        const VRA_DATA_OFFSET: usize = 0x4_0000;
        const VRA_DATA_SIZE: usize = 0x2_0000;
        const ISP_CODE_OFFSET: usize = 0x8_0000;
        const ISP_CODE_SIZE: usize = 0x28_0000;
        const DDK_DATA_OFFSET: usize = 0x30_0000;

        Self {
            name: "fimc_is_lib.bin".into(),
            base: LIB_START,
            capacity: 0x48_0000,
            code: vec![
                CodeRegion { offset: ISP_CODE_OFFSET, size: ISP_CODE_SIZE },
                CodeRegion { offset: 0, size: VRA_CODE_SIZE },
            ],
            entry_offset: ISP_CODE_OFFSET,
            data_offset: DDK_DATA_OFFSET,
            data_segments: vec![
                DataSegment {
                    offset: VRA_DATA_OFFSET + CDH_SIZE,
                    len: Some(VRA_DATA_SIZE),
                },
                DataSegment {
                    offset: DDK_DATA_OFFSET + CDH_SIZE,
                    len: None,
                },
            ],
        }
    }

    pub fn auxiliary() -> Self {
        const RTA_CODE_SIZE: usize = 0x18_0000;

        Self {
            name: "fimc_is_rta.bin".into(),
            base: LIB_START + 0x48_0000,
            capacity: 0x40_0000,
            code: vec![CodeRegion { offset: 0, size: RTA_CODE_SIZE }],
            entry_offset: 0,
            data_offset: RTA_CODE_SIZE,
            data_segments: vec![DataSegment {
                offset: RTA_CODE_SIZE,
                len: None,
            }],
        }
    }

    pub fn accelerator() -> Self {
        Self {
            name: "fimc_is_lib_vra.bin".into(),
            base: LIB_START + 0x88_0000,
            capacity: 0x8_0000,
            code: vec![CodeRegion { offset: 0, size: 0x4_0000 }],
            entry_offset: 0,
            data_offset: 0,
            data_segments: Vec::new(),
        }
    }

    pub fn for_kind(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Primary => Self::primary(),
            ImageKind::Auxiliary => Self::auxiliary(),
            ImageKind::Accelerator => Self::accelerator(),
        }
    }

    /// Check that every region lies in the window and data never overlaps code
    pub fn validate(&self) -> Result<()> {
        let bad = |reason: String| Err(LoaderError::InvalidConfig(format!("{}: {}", self.name, reason)));

        if self.capacity == 0 {
            return bad("zero capacity".into());
        }
        if self.code.is_empty() {
            return bad("no code region".into());
        }

        for region in &self.code {
            match region.offset.checked_add(region.size) {
                Some(end) if region.size > 0 && end <= self.capacity => {}
                _ => return bad(format!("code region {:#x}+{:#x} outside window", region.offset, region.size)),
            }
        }

        if !self
            .code
            .iter()
            .any(|r| (r.offset..r.offset + r.size).contains(&self.entry_offset))
        {
            return bad(format!("entry {:#x} is not inside a code region", self.entry_offset));
        }

        for segment in &self.data_segments {
            let end = match segment.len {
                Some(len) => segment.offset.checked_add(len),
                None => Some(self.capacity),
            };
            let Some(end) = end.filter(|&end| end <= self.capacity && end > segment.offset) else {
                return bad(format!("data segment at {:#x} outside window", segment.offset));
            };

            if self
                .code
                .iter()
                .any(|r| segment.offset < r.offset + r.size && r.offset < end)
            {
                return bad(format!("data segment at {:#x} overlaps code", segment.offset));
            }
        }

        Ok(())
    }
}

/// Version string stored in the last bytes of an image
pub fn carve_version(data: &[u8]) -> Option<String> {
    let tail = &data[data.len().saturating_sub(VERSION_TAIL_LEN)..];
    let text = String::from_utf8_lossy(tail);
    let version = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());

    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}
