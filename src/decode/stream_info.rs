//! Stream metadata reported by an open frame source.

use std::fmt;
use crate::core::time::Rational;

/// Container layout detected at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// `DKIF` header followed by 12-byte frame headers
    Ivf,
    /// Bare frames, each prefixed by a u32 little-endian size
    Raw,
    /// Matroska/WebM, EBML based
    WebM,
}

impl ContainerKind {
    /// Only the track-based container can reposition to an arbitrary time.
    pub fn supports_seek(&self) -> bool {
        matches!(self, ContainerKind::WebM)
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerKind::Ivf => "ivf",
            ContainerKind::Raw => "raw",
            ContainerKind::WebM => "webm",
        };
        f.write_str(name)
    }
}

/// Compressed (or uncompressed) payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Vp8,
    Vp9,
    /// Uncompressed planar 4:2:0, optionally followed by a full-size alpha plane
    RawI420,
}

impl CodecKind {
    /// Map an IVF fourcc.
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"VP80" => Some(CodecKind::Vp8),
            b"VP90" => Some(CodecKind::Vp9),
            b"I420" | b"IYUV" => Some(CodecKind::RawI420),
            _ => None,
        }
    }

    /// Map a Matroska CodecID.
    pub fn from_codec_id(id: &str) -> Option<Self> {
        match id {
            "V_VP8" => Some(CodecKind::Vp8),
            "V_VP9" => Some(CodecKind::Vp9),
            "V_UNCOMPRESSED" => Some(CodecKind::RawI420),
            _ => None,
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecKind::Vp8 => "vp8",
            CodecKind::Vp9 => "vp9",
            CodecKind::RawI420 => "i420",
        };
        f.write_str(name)
    }
}

/// Information about the open video stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub container: ContainerKind,
    pub codec: CodecKind,
    /// Reported width, rounded down to a multiple of 4
    pub width: u32,
    /// Reported height, rounded down to a multiple of 4
    pub height: u32,
    /// Dimensions of the decoded planes
    pub coded_width: u32,
    pub coded_height: u32,
    pub frame_rate: Rational,
    /// Duration in seconds, when the container knows it
    pub duration: Option<f64>,
}

impl StreamInfo {
    pub fn new(
        container: ContainerKind,
        codec: CodecKind,
        coded_width: u32,
        coded_height: u32,
        frame_rate: Rational,
        duration: Option<f64>,
    ) -> Self {
        Self {
            container,
            codec,
            width: align_down_4(coded_width),
            height: align_down_4(coded_height),
            coded_width,
            coded_height,
            frame_rate,
            duration,
        }
    }

    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }
}

/// Colour conversion on the render side works on 4-pixel groups.
#[inline]
pub fn align_down_4(value: u32) -> u32 {
    (value >> 2) << 2
}
