//! Container demuxers and signature probing.
//!
//! Probe order is fixed: IVF, then headerless length-prefixed frames, then
//! WebM. The first layout that recognises the leading bytes wins.

pub mod ebml;
pub mod ivf;
pub mod raw;
pub mod webm;

#[cfg(test)]
pub(crate) mod testutil;

use std::io::{Read, Seek, SeekFrom};
use log::debug;
use crate::core::time::{Rational, Time};
use crate::decode::decoder::DecodeError;
use crate::decode::stream_info::{CodecKind, ContainerKind};

pub use ivf::IvfDemuxer;
pub use raw::RawDemuxer;
pub use webm::WebmDemuxer;

/// Frames larger than this are treated as corrupt.
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// Byte source a demuxer can own.
pub trait MediaRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> MediaRead for T {}

/// One compressed unit pulled from a container.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Presentation time, if the container carries one
    pub timestamp: Option<Time>,
}

/// What a container reports about its video track at open time.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHeader {
    pub codec: CodecKind,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<Rational>,
    pub duration: Option<Time>,
}

/// A demuxer yields the packets of one video track in decode order.
pub trait Demuxer: Send {
    fn kind(&self) -> ContainerKind;

    fn header(&self) -> &ContainerHeader;

    /// Next packet of the video track; `Ok(None)` at end of stream.
    fn next_packet(&mut self) -> Result<Option<Packet>, DecodeError>;

    /// Reposition to the entry point at or before `target`.
    fn seek(&mut self, _target: Time) -> Result<(), DecodeError> {
        Err(DecodeError::SeekUnsupported)
    }

    /// Return to the first packet.
    fn rewind(&mut self) -> Result<(), DecodeError>;

    /// Give back the underlying reader, e.g. to probe it again.
    fn into_reader(self: Box<Self>) -> Box<dyn MediaRead>;
}

/// Detect the container layout of `reader` and open a demuxer for it.
pub fn probe(mut reader: Box<dyn MediaRead>) -> Result<Box<dyn Demuxer>, DecodeError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut head = [0u8; 32];
    let len = read_up_to(&mut reader, &mut head)?;
    let head = &head[..len];
    reader.seek(SeekFrom::Start(0))?;

    if ivf::is_ivf(head) {
        debug!("Detected IVF container");
        return Ok(Box::new(IvfDemuxer::open(reader)?));
    }
    if raw::is_raw(head) {
        debug!("Detected headerless frame stream");
        return Ok(Box::new(RawDemuxer::open(reader)?));
    }
    if ebml::is_ebml(head) {
        debug!("Detected WebM container");
        return Ok(Box::new(WebmDemuxer::open(reader)?));
    }
    Err(DecodeError::Format("no recognized container signature".into()))
}

/// Fill as much of `buf` as the stream allows; returns the byte count.
pub(crate) fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize, DecodeError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::decode::container::testutil;

    #[test]
    fn test_probe_ivf() {
        let bytes = testutil::ivf_i420(8, 8, 25, 3);
        let demuxer = probe(Box::new(Cursor::new(bytes))).unwrap();
        assert_eq!(demuxer.kind(), ContainerKind::Ivf);
    }

    #[test]
    fn test_probe_webm() {
        let bytes = testutil::WebmBuilder::new(8, 8).frames(3, 40).build();
        let demuxer = probe(Box::new(Cursor::new(bytes))).unwrap();
        assert_eq!(demuxer.kind(), ContainerKind::WebM);
    }

    #[test]
    fn test_probe_raw_vp8() {
        let bytes = testutil::raw_vp8(320, 240, 2);
        let demuxer = probe(Box::new(Cursor::new(bytes))).unwrap();
        assert_eq!(demuxer.kind(), ContainerKind::Raw);
        assert_eq!(demuxer.header().codec, CodecKind::Vp8);
    }

    #[test]
    fn test_probe_unknown_is_format_error() {
        let bytes = b"RIFF\x00\x00\x00\x00AVI LIST".to_vec();
        let err = probe(Box::new(Cursor::new(bytes))).err().unwrap();
        assert!(matches!(err, DecodeError::Format(_)));
    }

    #[test]
    fn test_probe_empty_is_format_error() {
        let err = probe(Box::new(Cursor::new(Vec::new()))).err().unwrap();
        assert!(matches!(err, DecodeError::Format(_)));
    }
}
