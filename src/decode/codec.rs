//! Video codecs behind a small trait, plus bitstream peeking for bare streams.
//!
//! The built-in [`RawPlanarCodec`] handles uncompressed I420. VP8/VP9 decode
//! goes through FFmpeg when the `ffmpeg` feature is enabled.

use crate::decode::decoder::DecodeError;
use crate::decode::frame::PlanarImage;
use crate::decode::stream_info::CodecKind;

/// A video decoder fed one compressed unit at a time.
pub trait Codec: Send {
    /// Decode one compressed unit. The resulting image (if any) is fetched
    /// separately so callers can decode without producing output.
    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError>;

    /// Take the most recently decoded image, if one is pending.
    fn next_image(&mut self) -> Option<PlanarImage>;

    /// Forget reference state after the container repositions.
    fn reset(&mut self);
}

/// Create a codec for `kind` with the given coded dimensions.
pub fn create_codec(kind: CodecKind, width: u32, height: u32) -> Result<Box<dyn Codec>, DecodeError> {
    match kind {
        CodecKind::RawI420 => Ok(Box::new(RawPlanarCodec::new(width, height)?)),
        #[cfg(feature = "ffmpeg")]
        CodecKind::Vp8 | CodecKind::Vp9 => Ok(Box::new(crate::decode::ffmpeg::FfmpegCodec::new(kind)?)),
        #[cfg(not(feature = "ffmpeg"))]
        CodecKind::Vp8 | CodecKind::Vp9 => Err(DecodeError::CodecInit(format!(
            "{} decoding requires the `ffmpeg` feature",
            kind
        ))),
    }
}

/// Uncompressed I420 frames, optionally carrying a trailing alpha plane.
pub struct RawPlanarCodec {
    width: u32,
    height: u32,
    pending: Option<PlanarImage>,
}

impl RawPlanarCodec {
    pub fn new(width: u32, height: u32) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::CodecInit(format!(
                "invalid frame size {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            pending: None,
        })
    }
}

impl Codec for RawPlanarCodec {
    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let image = PlanarImage::from_i420(self.width, self.height, data).ok_or_else(|| {
            DecodeError::Decode(format!(
                "{} byte frame does not match {}x{} I420",
                data.len(),
                self.width,
                self.height
            ))
        })?;
        self.pending = Some(image);
        Ok(())
    }

    fn next_image(&mut self) -> Option<PlanarImage> {
        self.pending.take()
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}

/// Identify a VP8 or VP9 key frame and read its dimensions.
///
/// Used to recognise headerless streams, which carry no container metadata.
pub fn peek_stream_info(data: &[u8]) -> Option<(CodecKind, u32, u32)> {
    peek_vp8(data)
        .map(|(w, h)| (CodecKind::Vp8, w, h))
        .or_else(|| peek_vp9(data).map(|(w, h)| (CodecKind::Vp9, w, h)))
}

fn peek_vp8(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 10 {
        return None;
    }
    // bit 0 of the frame tag is clear on key frames
    if data[0] & 0x01 != 0 || data[3..6] != [0x9d, 0x01, 0x2a] {
        return None;
    }
    let width = u16::from_le_bytes([data[6], data[7]]) & 0x3fff;
    let height = u16::from_le_bytes([data[8], data[9]]) & 0x3fff;
    (width > 0 && height > 0).then_some((width as u32, height as u32))
}

fn peek_vp9(data: &[u8]) -> Option<(u32, u32)> {
    let mut bits = BitReader::new(data);
    if bits.read(2)? != 0b10 {
        return None;
    }
    let profile = bits.read(1)? | (bits.read(1)? << 1);
    if profile == 3 {
        bits.read(1)?;
    }
    if bits.read(1)? == 1 {
        // show_existing_frame
        return None;
    }
    let frame_type = bits.read(1)?;
    bits.read(2)?; // show_frame, error_resilient_mode
    if frame_type != 0 || bits.read(24)? != 0x49_83_42 {
        return None;
    }
    if profile >= 2 {
        bits.read(1)?; // ten_or_twelve_bit
    }
    let color_space = bits.read(3)?;
    if color_space != 7 {
        bits.read(1)?; // color_range
        if profile == 1 || profile == 3 {
            bits.read(3)?; // subsampling_x, subsampling_y, reserved
        }
    } else if profile == 1 || profile == 3 {
        bits.read(1)?;
    }
    let width = bits.read(16)? + 1;
    let height = bits.read(16)? + 1;
    Some((width, height))
}

/// MSB-first bit reader over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read(&mut self, count: u32) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = *self.data.get(self.pos / 8)?;
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Some(value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal VP8 key frame header for the given size.
    pub(crate) fn vp8_keyframe(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a];
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(&[0u8; 22]);
        data
    }

    #[test]
    fn test_raw_codec_decodes_i420() {
        let mut codec = RawPlanarCodec::new(4, 4).unwrap();
        let (size, _) = PlanarImage::i420_sizes(4, 4);
        codec.decode(&vec![128u8; size]).unwrap();
        let image = codec.next_image().unwrap();
        assert_eq!((image.width, image.height), (4, 4));
        assert!(codec.next_image().is_none());
    }

    #[test]
    fn test_raw_codec_rejects_truncated_frame() {
        let mut codec = RawPlanarCodec::new(4, 4).unwrap();
        let err = codec.decode(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, DecodeError::Decode(_)));
    }

    #[test]
    fn test_raw_codec_reset_drops_pending() {
        let mut codec = RawPlanarCodec::new(2, 2).unwrap();
        codec.decode(&[0u8; 6]).unwrap();
        codec.reset();
        assert!(codec.next_image().is_none());
    }

    #[test]
    fn test_zero_size_is_codec_init_error() {
        assert!(matches!(
            RawPlanarCodec::new(0, 16),
            Err(DecodeError::CodecInit(_))
        ));
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_vp8_without_backend_fails_init() {
        assert!(matches!(
            create_codec(CodecKind::Vp8, 320, 240),
            Err(DecodeError::CodecInit(_))
        ));
    }

    #[test]
    fn test_peek_vp8_keyframe() {
        let frame = vp8_keyframe(320, 240);
        assert_eq!(peek_stream_info(&frame), Some((CodecKind::Vp8, 320, 240)));
    }

    #[test]
    fn test_peek_vp8_interframe_rejected() {
        let mut frame = vp8_keyframe(320, 240);
        frame[0] |= 0x01;
        assert_eq!(peek_stream_info(&frame), None);
    }

    #[test]
    fn test_peek_vp9_keyframe() {
        // profile 0 key frame, BT.601, 64x48
        let mut bits: Vec<u8> = Vec::new();
        let mut push = |value: u32, count: u32| {
            for i in (0..count).rev() {
                bits.push(((value >> i) & 1) as u8);
            }
        };
        push(0b10, 2); // frame marker
        push(0, 2); // profile
        push(0, 1); // show_existing_frame
        push(0, 1); // key frame
        push(0b11, 2); // show_frame, error_resilient
        push(0x49_83_42, 24);
        push(1, 3); // color space
        push(0, 1); // color range
        push(63, 16);
        push(47, 16);
        let mut data = vec![0u8; (bits.len() + 7) / 8];
        for (i, bit) in bits.iter().enumerate() {
            data[i / 8] |= bit << (7 - i % 8);
        }
        assert_eq!(peek_stream_info(&data), Some((CodecKind::Vp9, 64, 48)));
    }

    #[test]
    fn test_peek_garbage() {
        assert_eq!(peek_stream_info(&[0xff; 32]), None);
        assert_eq!(peek_stream_info(&[]), None);
    }
}
