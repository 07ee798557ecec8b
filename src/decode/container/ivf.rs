//! IVF: a 32-byte `DKIF` file header, then frames with 12-byte headers
//! (u32 size, u64 timestamp in `scale/rate` second units).

use std::io::{Read, Seek, SeekFrom};
use log::warn;
use crate::core::time::{rescale_to_nanos, Rational};
use crate::decode::container::{read_up_to, ContainerHeader, Demuxer, MediaRead, Packet, MAX_FRAME_SIZE};
use crate::decode::decoder::DecodeError;
use crate::decode::stream_info::{CodecKind, ContainerKind};

const SIGNATURE: &[u8; 4] = b"DKIF";
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;

/// Frame count probed when the header rate looks like a timebase
const RATE_PROBE_FRAMES: usize = 50;

pub fn is_ivf(head: &[u8]) -> bool {
    head.len() >= FILE_HEADER_LEN && &head[..4] == SIGNATURE
}

pub struct IvfDemuxer {
    reader: Box<dyn MediaRead>,
    header: ContainerHeader,
    data_offset: u64,
    /// Timestamp unit as (numerator, denominator) seconds
    timebase: (u64, u64),
}

impl IvfDemuxer {
    pub fn open(mut reader: Box<dyn MediaRead>) -> Result<Self, DecodeError> {
        let mut head = [0u8; FILE_HEADER_LEN];
        reader.read_exact(&mut head)?;
        if !is_ivf(&head) {
            return Err(DecodeError::Format("missing DKIF signature".into()));
        }

        let u16_at = |at: usize| u16::from_le_bytes([head[at], head[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([head[at], head[at + 1], head[at + 2], head[at + 3]]);

        let header_len = (u16_at(6) as u64).max(FILE_HEADER_LEN as u64);
        let fourcc = [head[8], head[9], head[10], head[11]];
        let codec = CodecKind::from_fourcc(&fourcc).ok_or_else(|| {
            DecodeError::CodecInit(format!(
                "unsupported IVF fourcc {}",
                String::from_utf8_lossy(&fourcc)
            ))
        })?;
        let width = u16_at(12) as u32;
        let height = u16_at(14) as u32;
        let rate = u32_at(16);
        let scale = u32_at(20);
        let frame_count = u32_at(24);

        let mut demuxer = Self {
            reader,
            header: ContainerHeader {
                codec,
                width,
                height,
                frame_rate: None,
                duration: None,
            },
            data_offset: header_len,
            timebase: (scale.max(1) as u64, rate.max(1) as u64),
        };
        demuxer.rewind()?;

        // Large rates are timebases (e.g. 1/1000), not frame rates
        let frame_rate = if rate > 0 && scale > 0 && rate < 1000 {
            Some(reduce(rate, scale))
        } else {
            demuxer.probe_frame_rate()?
        };
        let frame_rate = frame_rate.unwrap_or_default();
        demuxer.header.frame_rate = Some(frame_rate);
        if frame_count > 0 {
            demuxer.header.duration = Some(rescale_to_nanos(
                frame_count as i64,
                frame_rate.den as u64,
                frame_rate.num as u64,
            ));
        }
        Ok(demuxer)
    }

    fn probe_frame_rate(&mut self) -> Result<Option<Rational>, DecodeError> {
        let mut stamps = Vec::with_capacity(RATE_PROBE_FRAMES);
        while stamps.len() < RATE_PROBE_FRAMES {
            match self.next_packet()? {
                Some(packet) => stamps.extend(packet.timestamp),
                None => break,
            }
        }
        self.rewind()?;

        let (Some(first), Some(last)) = (stamps.first(), stamps.last()) else {
            return Ok(None);
        };
        let span_micros = (last - first) / 1000;
        if stamps.len() < 2 || span_micros <= 0 {
            return Ok(None);
        }
        let frames = (stamps.len() - 1) as u64 * 1_000_000;
        Ok(u32::try_from(span_micros)
            .ok()
            .and_then(|den| u32::try_from(frames).ok().map(|num| reduce(num, den))))
    }
}

impl Demuxer for IvfDemuxer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Ivf
    }

    fn header(&self) -> &ContainerHeader {
        &self.header
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        let mut frame_header = [0u8; FRAME_HEADER_LEN];
        let got = read_up_to(&mut self.reader, &mut frame_header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < FRAME_HEADER_LEN {
            warn!("Truncated IVF frame header, treating as end of stream");
            return Ok(None);
        }

        let size = u32::from_le_bytes([frame_header[0], frame_header[1], frame_header[2], frame_header[3]]);
        let mut pts = [0u8; 8];
        pts.copy_from_slice(&frame_header[4..]);
        let pts = u64::from_le_bytes(pts);
        if size > MAX_FRAME_SIZE {
            return Err(DecodeError::Decode(format!("IVF frame of {} bytes is implausible", size)));
        }

        let mut data = vec![0u8; size as usize];
        let got = read_up_to(&mut self.reader, &mut data)?;
        if got < data.len() {
            warn!("Truncated IVF frame, treating as end of stream");
            return Ok(None);
        }

        let (num, den) = self.timebase;
        Ok(Some(Packet {
            data,
            timestamp: Some(rescale_to_nanos(pts as i64, num, den)),
        }))
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.reader.seek(SeekFrom::Start(self.data_offset))?;
        Ok(())
    }

    fn into_reader(self: Box<Self>) -> Box<dyn MediaRead> {
        self.reader
    }
}

pub(crate) fn reduce(num: u32, den: u32) -> Rational {
    let divisor = gcd(num, den).max(1);
    Rational::new(num / divisor, den / divisor)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::core::time::from_seconds;
    use crate::decode::container::testutil;

    fn open(bytes: Vec<u8>) -> IvfDemuxer {
        IvfDemuxer::open(Box::new(Cursor::new(bytes))).unwrap()
    }

    #[test]
    fn test_header_fields() {
        let demuxer = open(testutil::ivf_i420(16, 8, 25, 10));
        let header = demuxer.header();
        assert_eq!(header.codec, CodecKind::RawI420);
        assert_eq!((header.width, header.height), (16, 8));
        assert_eq!(header.frame_rate, Some(Rational::new(25, 1)));
        assert_eq!(header.duration, Some(from_seconds(0.4)));
    }

    #[test]
    fn test_packets_in_order_then_eos() {
        let mut demuxer = open(testutil::ivf_i420(8, 8, 25, 3));
        let stamps: Vec<_> = std::iter::from_fn(|| demuxer.next_packet().unwrap())
            .map(|p| p.timestamp.unwrap())
            .collect();
        assert_eq!(stamps, vec![0, 40_000_000, 80_000_000]);
        assert!(demuxer.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_rewind_restarts() {
        let mut demuxer = open(testutil::ivf_i420(8, 8, 25, 2));
        demuxer.next_packet().unwrap();
        demuxer.next_packet().unwrap();
        demuxer.rewind().unwrap();
        assert_eq!(demuxer.next_packet().unwrap().unwrap().timestamp, Some(0));
    }

    #[test]
    fn test_seek_is_unsupported() {
        let mut demuxer = open(testutil::ivf_i420(8, 8, 25, 2));
        assert!(matches!(demuxer.seek(0), Err(DecodeError::SeekUnsupported)));
    }

    #[test]
    fn test_millisecond_timebase_probes_rate() {
        let bytes = testutil::ivf_with_timebase(8, 8, 1000, 1, &[0, 40, 80, 120]);
        let demuxer = open(bytes);
        assert_eq!(demuxer.header().frame_rate, Some(Rational::new(25, 1)));
    }

    #[test]
    fn test_unknown_fourcc_is_codec_error() {
        let mut bytes = testutil::ivf_i420(8, 8, 25, 1);
        bytes[8..12].copy_from_slice(b"H264");
        let err = IvfDemuxer::open(Box::new(Cursor::new(bytes))).err().unwrap();
        assert!(matches!(err, DecodeError::CodecInit(_)));
    }

    #[test]
    fn test_truncated_frame_is_eos() {
        let mut bytes = testutil::ivf_i420(8, 8, 25, 2);
        bytes.truncate(bytes.len() - 5);
        let mut demuxer = open(bytes);
        assert!(demuxer.next_packet().unwrap().is_some());
        assert!(demuxer.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(30000, 1001), 1);
        assert_eq!(gcd(50, 2), 2);
        assert_eq!(reduce(50, 2), Rational::new(25, 1));
    }
}
