//! Minimal EBML element reader used by the WebM demuxer.

use std::io::{Read, Seek};
use crate::decode::decoder::DecodeError;

pub const ID_EBML: u32 = 0x1A45_DFA3;
pub const ID_SEGMENT: u32 = 0x1853_8067;
pub const ID_SEEK_HEAD: u32 = 0x114D_9B74;
pub const ID_SEEK: u32 = 0x4DBB;
pub const ID_SEEK_ID: u32 = 0x53AB;
pub const ID_SEEK_POSITION: u32 = 0x53AC;
pub const ID_INFO: u32 = 0x1549_A966;
pub const ID_TIMECODE_SCALE: u32 = 0x2A_D7B1;
pub const ID_DURATION: u32 = 0x4489;
pub const ID_TRACKS: u32 = 0x1654_AE6B;
pub const ID_TRACK_ENTRY: u32 = 0xAE;
pub const ID_TRACK_NUMBER: u32 = 0xD7;
pub const ID_TRACK_TYPE: u32 = 0x83;
pub const ID_CODEC_ID: u32 = 0x86;
pub const ID_DEFAULT_DURATION: u32 = 0x23_E383;
pub const ID_VIDEO: u32 = 0xE0;
pub const ID_PIXEL_WIDTH: u32 = 0xB0;
pub const ID_PIXEL_HEIGHT: u32 = 0xBA;
pub const ID_CUES: u32 = 0x1C53_BB6B;
pub const ID_CUE_POINT: u32 = 0xBB;
pub const ID_CUE_TIME: u32 = 0xB3;
pub const ID_CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const ID_CUE_TRACK: u32 = 0xF7;
pub const ID_CUE_CLUSTER_POSITION: u32 = 0xF1;
pub const ID_CLUSTER: u32 = 0x1F43_B675;
pub const ID_TIMECODE: u32 = 0xE7;
pub const ID_SIMPLE_BLOCK: u32 = 0xA3;
pub const ID_BLOCK_GROUP: u32 = 0xA0;
pub const ID_BLOCK: u32 = 0xA1;

pub const TRACK_TYPE_VIDEO: u64 = 1;

/// Header of one EBML element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// Absolute offset of the element's first ID byte
    pub offset: u64,
    /// Payload size; `None` for the reserved "unknown size" value
    pub size: Option<u64>,
    /// Absolute offset of the first payload byte
    pub data_offset: u64,
}

impl ElementHeader {
    pub fn end(&self) -> Option<u64> {
        self.size.map(|size| self.data_offset + size)
    }
}

pub fn is_ebml(head: &[u8]) -> bool {
    head.len() >= 4 && head[..4] == ID_EBML.to_be_bytes()
}

/// Read an element header. Returns `Ok(None)` on a clean end of stream.
pub fn read_header<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Option<ElementHeader>, DecodeError> {
    let offset = reader.stream_position()?;
    let Some((id, _)) = read_vint(reader, true)? else {
        return Ok(None);
    };
    let Some((size, len)) = read_vint(reader, false)? else {
        return Err(DecodeError::Format("truncated EBML element header".into()));
    };
    let unknown = size == (1u64 << (7 * len)) - 1;
    Ok(Some(ElementHeader {
        id: id as u32,
        offset,
        size: (!unknown).then_some(size),
        data_offset: reader.stream_position()?,
    }))
}

/// Read a variable-length integer. IDs keep their length marker bit.
fn read_vint<R: Read + ?Sized>(reader: &mut R, keep_marker: bool) -> Result<Option<(u64, usize)>, DecodeError> {
    let mut first = [0u8; 1];
    if reader.read(&mut first)? == 0 {
        return Ok(None);
    }
    let len = first[0].leading_zeros() as usize + 1;
    if len > 8 {
        return Err(DecodeError::Format("invalid EBML variable-length integer".into()));
    }
    let mut value = if keep_marker {
        first[0] as u64
    } else {
        (first[0] & (0xFFu16 >> len) as u8) as u64
    };
    let mut rest = [0u8; 7];
    reader.read_exact(&mut rest[..len - 1])?;
    for byte in &rest[..len - 1] {
        value = (value << 8) | *byte as u64;
    }
    Ok(Some((value, len)))
}

/// Parse an unsigned vint (marker stripped) from a byte slice.
pub fn parse_vint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let len = first.leading_zeros() as usize + 1;
    if len > 8 || buf.len() < len {
        return None;
    }
    let mut value = (first & (0xFFu16 >> len) as u8) as u64;
    for byte in &buf[1..len] {
        value = (value << 8) | *byte as u64;
    }
    Some((value, len))
}

/// Parse a signed vint as used by EBML lacing size differences.
pub fn parse_signed_vint(buf: &[u8]) -> Option<(i64, usize)> {
    let (value, len) = parse_vint(buf)?;
    let bias = (1i64 << (7 * len - 1)) - 1;
    Some((value as i64 - bias, len))
}

fn read_payload<R: Read + ?Sized>(reader: &mut R, size: u64, limit: u64) -> Result<Vec<u8>, DecodeError> {
    if size > limit {
        return Err(DecodeError::Format(format!("EBML element of {} bytes too large", size)));
    }
    let mut buf = vec![0u8; size as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_uint<R: Read + ?Sized>(reader: &mut R, size: u64) -> Result<u64, DecodeError> {
    let buf = read_payload(reader, size, 8)?;
    Ok(buf.iter().fold(0u64, |acc, byte| (acc << 8) | *byte as u64))
}

pub fn read_float<R: Read + ?Sized>(reader: &mut R, size: u64) -> Result<f64, DecodeError> {
    let buf = read_payload(reader, size, 8)?;
    match buf.len() {
        0 => Ok(0.0),
        4 => Ok(f32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf);
            Ok(f64::from_be_bytes(bytes))
        }
        n => Err(DecodeError::Format(format!("invalid EBML float size {}", n))),
    }
}

pub fn read_string<R: Read + ?Sized>(reader: &mut R, size: u64) -> Result<String, DecodeError> {
    let buf = read_payload(reader, size, 4096)?;
    let text = String::from_utf8_lossy(&buf);
    Ok(text.trim_end_matches('\0').to_string())
}

pub fn read_binary<R: Read + ?Sized>(reader: &mut R, size: u64) -> Result<Vec<u8>, DecodeError> {
    read_payload(reader, size, super::MAX_FRAME_SIZE as u64)
}

/// Skip over an element's payload. Unknown-size elements cannot be skipped.
pub fn skip<R: Read + Seek + ?Sized>(reader: &mut R, header: &ElementHeader) -> Result<(), DecodeError> {
    match header.end() {
        Some(end) => {
            reader.seek(std::io::SeekFrom::Start(end))?;
            Ok(())
        }
        None => Err(DecodeError::Format(format!(
            "cannot skip unknown-size element 0x{:X}",
            header.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_header_known_size() {
        let mut cursor = Cursor::new(vec![0x1A, 0x45, 0xDF, 0xA3, 0x84, 1, 2, 3, 4]);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.id, ID_EBML);
        assert_eq!(header.size, Some(4));
        assert_eq!(header.offset, 0);
        assert_eq!(header.data_offset, 5);
        assert_eq!(header.end(), Some(9));
    }

    #[test]
    fn test_read_header_unknown_size() {
        let mut cursor = Cursor::new(vec![0x1F, 0x43, 0xB6, 0x75, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let header = read_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.id, ID_CLUSTER);
        assert_eq!(header.size, None);
        assert!(skip(&mut cursor, &header).is_err());
    }

    #[test]
    fn test_read_header_eof() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_header(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_parse_vint() {
        assert_eq!(parse_vint(&[0x81]), Some((1, 1)));
        assert_eq!(parse_vint(&[0x40, 0x02]), Some((2, 2)));
        assert_eq!(parse_vint(&[0x40]), None);
        assert_eq!(parse_vint(&[0x00]), None);
    }

    #[test]
    fn test_parse_signed_vint() {
        // one-byte signed vints are biased by 63
        assert_eq!(parse_signed_vint(&[0x80 | 63]), Some((0, 1)));
        assert_eq!(parse_signed_vint(&[0x80 | 60]), Some((-3, 1)));
        assert_eq!(parse_signed_vint(&[0x80 | 70]), Some((7, 1)));
    }

    #[test]
    fn test_read_values() {
        let mut cursor = Cursor::new(vec![0x0F, 0x42, 0x40]);
        assert_eq!(read_uint(&mut cursor, 3).unwrap(), 1_000_000);

        let mut cursor = Cursor::new(2.5f64.to_be_bytes().to_vec());
        assert_eq!(read_float(&mut cursor, 8).unwrap(), 2.5);

        let mut cursor = Cursor::new(1.5f32.to_be_bytes().to_vec());
        assert_eq!(read_float(&mut cursor, 4).unwrap(), 1.5);

        let mut cursor = Cursor::new(b"V_VP8\0".to_vec());
        assert_eq!(read_string(&mut cursor, 6).unwrap(), "V_VP8");
    }

    #[test]
    fn test_read_uint_rejects_oversized() {
        let mut cursor = Cursor::new(vec![0u8; 16]);
        assert!(read_uint(&mut cursor, 9).is_err());
    }
}
