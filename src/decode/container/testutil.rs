//! Synthetic media streams for tests. Every frame is uncompressed I420
//! filled with its frame index, so tests can tell which frame was shown.

use crate::decode::container::ebml;
use crate::decode::frame::PlanarImage;

/// I420 frame filled with `value`.
pub fn i420_frame(width: u32, height: u32, value: u8) -> Vec<u8> {
    let (size, _) = PlanarImage::i420_sizes(width, height);
    vec![value; size]
}

/// IVF with `count` I420 frames at `fps`.
pub fn ivf_i420(width: u16, height: u16, fps: u32, count: u32) -> Vec<u8> {
    let pts: Vec<u64> = (0..count as u64).collect();
    ivf_with_timebase(width, height, fps, 1, &pts)
}

/// IVF with explicit `rate/scale` header fields and frame timestamps.
pub fn ivf_with_timebase(width: u16, height: u16, rate: u32, scale: u32, pts: &[u64]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"DKIF");
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(b"I420");
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&scale.to_le_bytes());
    out.extend_from_slice(&(pts.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    for (index, stamp) in pts.iter().enumerate() {
        let frame = i420_frame(width as u32, height as u32, index as u8);
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&stamp.to_le_bytes());
        out.extend_from_slice(&frame);
    }
    out
}

/// Length-prefixed VP8 key frame headers; only demuxable, not decodable
/// without the FFmpeg backend.
pub fn raw_vp8(width: u16, height: u16, count: usize) -> Vec<u8> {
    let frame = crate::decode::codec::tests::vp8_keyframe(width, height);
    let mut out = Vec::new();
    for _ in 0..count {
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&frame);
    }
    out
}

fn id_bytes(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    bytes[skip..].to_vec()
}

/// Element with an 8-byte size field, so sizes never change layout.
fn element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = id_bytes(id);
    out.push(0x01);
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    out
}

fn unknown_size_header(id: u32) -> Vec<u8> {
    let mut out = id_bytes(id);
    out.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    out
}

fn uint(id: u32, value: u64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

fn float(id: u32, value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

/// Just an EBML header, no segment.
pub fn ebml_header_only() -> Vec<u8> {
    element(ebml::ID_EBML, &element(0x4282, b"webm"))
}

/// Builder for single-track WebM files with 1 ms timecodes.
pub struct WebmBuilder {
    width: u32,
    height: u32,
    frames: usize,
    interval_ms: u64,
    per_cluster: usize,
    cues: bool,
    default_duration: bool,
    unknown_sizes: bool,
    codec_id: String,
}

impl WebmBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: 0,
            interval_ms: 40,
            per_cluster: 10,
            cues: true,
            default_duration: true,
            unknown_sizes: false,
            codec_id: "V_UNCOMPRESSED".into(),
        }
    }

    pub fn frames(mut self, count: usize, interval_ms: u64) -> Self {
        self.frames = count;
        self.interval_ms = interval_ms;
        self
    }

    pub fn frames_per_cluster(mut self, count: usize) -> Self {
        self.per_cluster = count.max(1);
        self
    }

    pub fn cues(mut self, enabled: bool) -> Self {
        self.cues = enabled;
        self
    }

    pub fn default_duration(mut self, enabled: bool) -> Self {
        self.default_duration = enabled;
        self
    }

    pub fn unknown_sizes(mut self, enabled: bool) -> Self {
        self.unknown_sizes = enabled;
        self
    }

    pub fn codec_id(mut self, id: &str) -> Self {
        self.codec_id = id.into();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut info = uint(ebml::ID_TIMECODE_SCALE, 1_000_000);
        info.extend(float(
            ebml::ID_DURATION,
            (self.frames as u64 * self.interval_ms) as f64,
        ));
        let info = element(ebml::ID_INFO, &info);

        let mut video = uint(ebml::ID_PIXEL_WIDTH, self.width as u64);
        video.extend(uint(ebml::ID_PIXEL_HEIGHT, self.height as u64));
        let mut entry = uint(ebml::ID_TRACK_NUMBER, 1);
        entry.extend(uint(ebml::ID_TRACK_TYPE, ebml::TRACK_TYPE_VIDEO));
        entry.extend(element(ebml::ID_CODEC_ID, self.codec_id.as_bytes()));
        if self.default_duration {
            entry.extend(uint(ebml::ID_DEFAULT_DURATION, self.interval_ms * 1_000_000));
        }
        entry.extend(element(ebml::ID_VIDEO, &video));
        let tracks = element(ebml::ID_TRACKS, &element(ebml::ID_TRACK_ENTRY, &entry));

        let mut clusters: Vec<(u64, Vec<u8>)> = Vec::new();
        for start in (0..self.frames).step_by(self.per_cluster) {
            let cluster_time = start as u64 * self.interval_ms;
            let mut body = uint(ebml::ID_TIMECODE, cluster_time);
            for index in start..(start + self.per_cluster).min(self.frames) {
                let relative = (index as u64 * self.interval_ms - cluster_time) as i16;
                let mut block = vec![0x81];
                block.extend_from_slice(&relative.to_be_bytes());
                block.push(0x80);
                block.extend(i420_frame(self.width, self.height, index as u8));
                body.extend(element(ebml::ID_SIMPLE_BLOCK, &block));
            }
            let cluster = if self.unknown_sizes {
                let mut out = unknown_size_header(ebml::ID_CLUSTER);
                out.extend(body);
                out
            } else {
                element(ebml::ID_CLUSTER, &body)
            };
            clusters.push((cluster_time, cluster));
        }

        // Cue points sit before the clusters; their size is layout-independent
        let cue_len = if self.cues { self.cues_element(&clusters, 0).len() } else { 0 };
        let clusters_start = (info.len() + tracks.len() + cue_len) as u64;

        let mut segment = info;
        segment.extend(tracks);
        if self.cues {
            segment.extend(self.cues_element(&clusters, clusters_start));
        }
        for (_, cluster) in &clusters {
            segment.extend_from_slice(cluster);
        }

        let mut out = ebml_header_only();
        if self.unknown_sizes {
            out.extend(unknown_size_header(ebml::ID_SEGMENT));
            out.extend(segment);
        } else {
            out.extend(element(ebml::ID_SEGMENT, &segment));
        }
        out
    }

    fn cues_element(&self, clusters: &[(u64, Vec<u8>)], clusters_start: u64) -> Vec<u8> {
        let mut points = Vec::new();
        let mut offset = clusters_start;
        for (time, cluster) in clusters {
            let mut positions = uint(ebml::ID_CUE_TRACK, 1);
            positions.extend(uint(ebml::ID_CUE_CLUSTER_POSITION, offset));
            let mut point = uint(ebml::ID_CUE_TIME, *time);
            point.extend(element(ebml::ID_CUE_TRACK_POSITIONS, &positions));
            points.extend(element(ebml::ID_CUE_POINT, &point));
            offset += cluster.len() as u64;
        }
        element(ebml::ID_CUES, &points)
    }
}
