//! Headerless stream: each frame is a u32 little-endian size followed by the
//! payload. The codec and dimensions come from peeking the first key frame.

use std::io::{Seek, SeekFrom};
use log::warn;
use crate::core::time::Rational;
use crate::decode::codec::peek_stream_info;
use crate::decode::container::{read_up_to, ContainerHeader, Demuxer, MediaRead, Packet, MAX_FRAME_SIZE};
use crate::decode::decoder::DecodeError;
use crate::decode::stream_info::ContainerKind;

/// Raw streams carry no timing; frames are assumed to run at 30 fps.
pub const RAW_FRAME_RATE: Rational = Rational::new(30, 1);

pub fn is_raw(head: &[u8]) -> bool {
    parse_head(head).is_some()
}

fn parse_head(head: &[u8]) -> Option<ContainerHeader> {
    if head.len() < 8 {
        return None;
    }
    let size = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    if size == 0 || size >= MAX_FRAME_SIZE {
        return None;
    }
    let (codec, width, height) = peek_stream_info(&head[4..])?;
    Some(ContainerHeader {
        codec,
        width,
        height,
        frame_rate: Some(RAW_FRAME_RATE),
        duration: None,
    })
}

pub struct RawDemuxer {
    reader: Box<dyn MediaRead>,
    header: ContainerHeader,
}

impl RawDemuxer {
    pub fn open(mut reader: Box<dyn MediaRead>) -> Result<Self, DecodeError> {
        let mut head = [0u8; 32];
        let len = read_up_to(&mut reader, &mut head)?;
        let header = parse_head(&head[..len])
            .ok_or_else(|| DecodeError::Format("not a length-prefixed VP8/VP9 stream".into()))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, header })
    }
}

impl Demuxer for RawDemuxer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Raw
    }

    fn header(&self) -> &ContainerHeader {
        &self.header
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        let mut size = [0u8; 4];
        let got = read_up_to(&mut self.reader, &mut size)?;
        if got < size.len() {
            return Ok(None);
        }
        let size = u32::from_le_bytes(size);
        if size >= MAX_FRAME_SIZE {
            return Err(DecodeError::Decode(format!("raw frame of {} bytes is implausible", size)));
        }
        let mut data = vec![0u8; size as usize];
        if read_up_to(&mut self.reader, &mut data)? < data.len() {
            warn!("Truncated raw frame, treating as end of stream");
            return Ok(None);
        }
        Ok(Some(Packet { data, timestamp: None }))
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.reader.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn into_reader(self: Box<Self>) -> Box<dyn MediaRead> {
        self.reader
    }
}
