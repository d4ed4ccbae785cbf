//! Input frame descriptors
//!
//! A descriptor tells the accelerator how one camera instance's frames are
//! laid out. Descriptors start from fixed defaults and are reconfigured
//! whenever the stream's OTF or DMA input parameters change.

use serde::Deserialize;

/// Default descriptor geometry
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Pixel layout understood by the accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YuvFormat {
    Yuv444 = 0,
    #[default]
    Yuv422 = 1,
    Yuv420 = 2,
    Yuv400 = 3,
}

/// Where the accelerator reads frames from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Streamed on the fly from the ISP
    #[default]
    Otf,
    /// Read from DRAM buffers
    Memory,
}

/// Format code carried by the stream's input parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Yuv444,
    Yuv422,
    Yuv420,
    Unknown(u32),
}

/// On-the-fly input parameters of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtfInput {
    pub width: u32,
    pub height: u32,
    pub format: InputFormat,
}

/// Memory input parameters of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaInput {
    pub width: u32,
    pub height: u32,
    pub format: InputFormat,
    pub planes: u32,
    pub bitwidth: u32,
}

/// DRAM layout of a memory-input frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DramLayout {
    pub store_bits: u32,
    pub data_bits: u32,
    pub planes: u32,
    pub line_ofs_first: u32,
    pub line_ofs_other: u32,
    pub unpack: bool,
    /// Byte distance between planes
    pub plane_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub hdr_lines: u32,
    pub yuv_format: YuvFormat,
    pub u_before_v: bool,
    /// Present for memory input only
    pub dram: Option<DramLayout>,
}

impl FrameDescriptor {
    /// Initial descriptor for a new instance
    ///
    /// Channel-1-only hardware reads YUV422 as two planes.
    pub fn initial(input: InputKind, ch1_only: bool) -> Self {
        let dram = match input {
            InputKind::Otf => None,
            InputKind::Memory => {
                let (planes, line_ofs_first, line_ofs_other) = if ch1_only {
                    (2, DEFAULT_WIDTH, DEFAULT_WIDTH)
                } else {
                    (1, DEFAULT_WIDTH * 2, 0)
                };
                Some(DramLayout {
                    store_bits: 8,
                    data_bits: 8,
                    planes,
                    line_ofs_first,
                    line_ofs_other,
                    unpack: false,
                    plane_offset: DEFAULT_HEIGHT * line_ofs_first,
                })
            }
        };

        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            hdr_lines: 0,
            yuv_format: YuvFormat::Yuv422,
            u_before_v: true,
            dram,
        }
    }

    fn log_resize(&self, width: u32, height: u32, fcount: u32) {
        if self.width != width || self.height != height {
            log::info!(
                "VRA input size {}x{} -> {}x{} [F:{}]",
                self.width,
                self.height,
                width,
                height,
                fcount
            );
        }
    }

    /// Apply OTF input parameters
    ///
    /// An unknown format is logged and leaves the previous format in place.
    pub fn configure_otf(&mut self, instance: u32, input: &OtfInput, fcount: u32) {
        self.log_resize(input.width, input.height, fcount);

        self.width = input.width;
        self.height = input.height;
        self.hdr_lines = 0;

        match input.format {
            InputFormat::Yuv444 => self.yuv_format = YuvFormat::Yuv444,
            InputFormat::Yuv422 => self.yuv_format = YuvFormat::Yuv422,
            InputFormat::Yuv420 => self.yuv_format = YuvFormat::Yuv420,
            InputFormat::Unknown(code) => {
                log::error!("[{}] invalid otf input format {}", instance, code);
                return;
            }
        }
        self.u_before_v = true;
    }

    /// Apply memory input parameters
    ///
    /// Line offsets follow the format: 444 is three bytes per pixel, 422 two
    /// (or one per plane on channel-1-only hardware, which always uses two
    /// planes) and 420 one. Planes are `height` lines of the first plane apart.
    pub fn configure_dma(&mut self, instance: u32, input: &DmaInput, ch1_only: bool, fcount: u32) {
        self.log_resize(input.width, input.height, fcount);

        self.width = input.width;
        self.height = input.height;
        self.hdr_lines = 0;

        let mut dram = self.dram.unwrap_or_default();
        let mut planes = input.planes;

        match input.format {
            InputFormat::Yuv444 => {
                self.yuv_format = YuvFormat::Yuv444;
                self.u_before_v = true;
                dram.line_ofs_first = input.width * 3;
                dram.line_ofs_other = 0;
            }
            InputFormat::Yuv422 if ch1_only => {
                self.yuv_format = YuvFormat::Yuv422;
                self.u_before_v = true;
                planes = 2;
                dram.line_ofs_first = input.width;
                dram.line_ofs_other = input.width;
            }
            InputFormat::Yuv422 => {
                self.yuv_format = YuvFormat::Yuv422;
                self.u_before_v = input.planes != 2;
                dram.line_ofs_first = input.width * 2;
                dram.line_ofs_other = 0;
            }
            InputFormat::Yuv420 => {
                self.yuv_format = YuvFormat::Yuv420;
                self.u_before_v = true;
                dram.line_ofs_first = input.width;
                dram.line_ofs_other = 0;
            }
            InputFormat::Unknown(code) => {
                log::error!("[{}] invalid dma input format {}", instance, code);
            }
        }

        dram.store_bits = input.bitwidth;
        dram.data_bits = input.bitwidth;
        dram.planes = planes;
        dram.unpack = false;
        dram.plane_offset = input.height * dram.line_ofs_first;
        self.dram = Some(dram);
    }
}
