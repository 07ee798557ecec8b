//! VP8/VP9 decoding through FFmpeg (feature `ffmpeg`).
//! All FFmpeg interaction is isolated in this module.

use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::Pixel;
use crate::decode::codec::Codec;
use crate::decode::decoder::DecodeError;
use crate::decode::frame::{PlanarImage, Plane};
use crate::decode::stream_info::CodecKind;

/// FFmpeg-backed VP8/VP9 decoder
pub struct FfmpegCodec {
    decoder: ffmpeg::decoder::Video,
    frame: ffmpeg::frame::Video,
    pending: Option<PlanarImage>,
}

impl FfmpegCodec {
    pub fn new(kind: CodecKind) -> Result<Self, DecodeError> {
        ffmpeg::init().map_err(|e| DecodeError::CodecInit(format!("FFmpeg init failed: {}", e)))?;

        let id = match kind {
            CodecKind::Vp8 => codec::Id::VP8,
            CodecKind::Vp9 => codec::Id::VP9,
            CodecKind::RawI420 => {
                return Err(DecodeError::CodecInit("raw frames need no FFmpeg decoder".into()))
            }
        };
        let found = ffmpeg::decoder::find(id)
            .ok_or_else(|| DecodeError::CodecInit(format!("no FFmpeg decoder for {}", kind)))?;
        let context = codec::context::Context::new_with_codec(found);
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| DecodeError::CodecInit(format!("failed to open {} decoder: {}", kind, e)))?;

        Ok(Self {
            decoder,
            frame: ffmpeg::frame::Video::empty(),
            pending: None,
        })
    }

    fn convert(frame: &ffmpeg::frame::Video) -> Result<PlanarImage, DecodeError> {
        let has_alpha = match frame.format() {
            Pixel::YUV420P => false,
            Pixel::YUVA420P => true,
            other => {
                return Err(DecodeError::Decode(format!(
                    "unsupported decoder output format {:?}",
                    other
                )))
            }
        };
        let plane = |index: usize| Plane {
            data: frame.data(index).to_vec(),
            stride: frame.stride(index),
            width: frame.plane_width(index),
            height: frame.plane_height(index),
        };

        Ok(PlanarImage {
            width: frame.width(),
            height: frame.height(),
            y: plane(0),
            u: plane(1),
            v: plane(2),
            alpha: has_alpha.then(|| plane(3)),
        })
    }
}

impl Codec for FfmpegCodec {
    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let packet = ffmpeg::Packet::copy(data);
        self.decoder
            .send_packet(&packet)
            .map_err(|e| DecodeError::Decode(e.to_string()))?;

        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => {
                self.pending = Some(Self::convert(&self.frame)?);
                Ok(())
            }
            // decoder wants more input before it can emit a picture
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(DecodeError::Decode(e.to_string())),
        }
    }

    fn next_image(&mut self) -> Option<PlanarImage> {
        self.pending.take()
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.pending = None;
    }
}
