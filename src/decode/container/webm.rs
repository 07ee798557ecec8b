//! WebM/Matroska demuxer for the first video track.
//!
//! Reads segment info, tracks and cues up front, then streams clusters
//! lazily. Clusters and segments of unknown size are supported while
//! streaming; seeking uses cue points, or a cluster scan when the file has none.

use std::collections::VecDeque;
use std::io::{Seek, SeekFrom};
use log::{debug, warn};
use crate::core::time::{from_seconds, rescale_to_nanos, Rational, Time};
use crate::decode::container::ebml::{self, ElementHeader};
use crate::decode::container::ivf::reduce;
use crate::decode::container::{ContainerHeader, Demuxer, MediaRead, Packet};
use crate::decode::decoder::DecodeError;
use crate::decode::stream_info::{CodecKind, ContainerKind};

const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Packets inspected when the track has no DefaultDuration
const RATE_PROBE_PACKETS: usize = 50;
const RATE_PROBE_SPAN: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CuePoint {
    time: Time,
    track: Option<u64>,
    cluster_offset: u64,
}

#[derive(Debug, Default)]
struct TrackEntry {
    number: u64,
    track_type: u64,
    codec_id: String,
    default_duration: Option<u64>,
    width: u32,
    height: u32,
}

pub struct WebmDemuxer {
    reader: Box<dyn MediaRead>,
    header: ContainerHeader,
    track_number: u64,
    timecode_scale: u64,
    default_duration: Option<u64>,
    segment_end: Option<u64>,
    first_cluster: u64,
    cues: Vec<CuePoint>,
    cluster_timecode: i64,
    pending: VecDeque<Packet>,
}

impl WebmDemuxer {
    pub fn open(mut reader: Box<dyn MediaRead>) -> Result<Self, DecodeError> {
        reader.seek(SeekFrom::Start(0))?;
        let head = ebml::read_header(&mut *reader)?
            .filter(|h| h.id == ebml::ID_EBML)
            .ok_or_else(|| DecodeError::Format("missing EBML header".into()))?;
        ebml::skip(&mut *reader, &head)?;

        let segment = loop {
            let element = ebml::read_header(&mut *reader)?
                .ok_or_else(|| DecodeError::Format("no Segment element".into()))?;
            if element.id == ebml::ID_SEGMENT {
                break element;
            }
            ebml::skip(&mut *reader, &element)?;
        };

        let mut timecode_scale = DEFAULT_TIMECODE_SCALE;
        let mut duration_units: Option<f64> = None;
        let mut track: Option<TrackEntry> = None;
        let mut cues = Vec::new();
        let mut cues_position: Option<u64> = None;

        // Level 1 elements up to the first cluster
        let first_cluster = loop {
            let here = reader.stream_position()?;
            if segment.end().is_some_and(|end| here >= end) {
                break here;
            }
            let Some(element) = ebml::read_header(&mut *reader)? else {
                break here;
            };
            match element.id {
                ebml::ID_INFO => {
                    for_each_child(&mut *reader, &element, |r, child| {
                        match child.id {
                            ebml::ID_TIMECODE_SCALE => timecode_scale = uint(r, child)?,
                            ebml::ID_DURATION => duration_units = Some(float(r, child)?),
                            _ => {}
                        }
                        Ok(())
                    })?;
                }
                ebml::ID_TRACKS => track = parse_tracks(&mut *reader, &element)?,
                ebml::ID_CUES => cues = parse_cues(&mut *reader, &element, segment.data_offset)?,
                ebml::ID_SEEK_HEAD => cues_position = parse_seek_head(&mut *reader, &element)?,
                ebml::ID_CLUSTER => break element.offset,
                _ => ebml::skip(&mut *reader, &element)?,
            }
        };

        // Cues usually trail the clusters; the seek head says where
        if cues.is_empty() {
            if let Some(position) = cues_position {
                match read_cues_at(&mut *reader, segment.data_offset + position, segment.data_offset) {
                    Ok(found) => cues = found,
                    Err(e) => warn!("Ignoring unreadable WebM cues: {}", e),
                }
            }
        }

        let track = track.ok_or_else(|| DecodeError::Format("no video track".into()))?;
        let codec = CodecKind::from_codec_id(&track.codec_id).ok_or_else(|| {
            DecodeError::CodecInit(format!("unsupported WebM codec {}", track.codec_id))
        })?;
        if timecode_scale == 0 {
            timecode_scale = DEFAULT_TIMECODE_SCALE;
        }
        for cue in &mut cues {
            cue.time = rescale_to_nanos(cue.time, timecode_scale, 1_000_000_000);
        }
        cues.retain(|cue| cue.track.map_or(true, |t| t == track.number));
        cues.sort_by_key(|cue| cue.time);

        let mut demuxer = Self {
            reader,
            header: ContainerHeader {
                codec,
                width: track.width,
                height: track.height,
                frame_rate: None,
                duration: duration_units.map(|units| (units * timecode_scale as f64) as Time),
            },
            track_number: track.number,
            timecode_scale,
            default_duration: track.default_duration.filter(|d| *d > 0),
            segment_end: segment.end(),
            first_cluster,
            cues,
            cluster_timecode: 0,
            pending: VecDeque::new(),
        };
        demuxer.rewind()?;

        let frame_rate = match demuxer.default_duration {
            Some(nanos) => rate_from_interval(nanos),
            None => demuxer.probe_frame_rate()?,
        };
        demuxer.header.frame_rate = Some(frame_rate.unwrap_or_default());
        Ok(demuxer)
    }

    /// Estimate the rate from up to 50 packets or one second of timestamps,
    /// then return to the origin.
    fn probe_frame_rate(&mut self) -> Result<Option<Rational>, DecodeError> {
        let mut count = 0usize;
        let mut first: Option<Time> = None;
        let mut last: Time = 0;
        while count < RATE_PROBE_PACKETS && last - first.unwrap_or(0) < from_seconds(RATE_PROBE_SPAN) {
            let Some(packet) = self.next_packet()? else {
                break;
            };
            let Some(ts) = packet.timestamp else {
                continue;
            };
            first.get_or_insert(ts);
            last = ts;
            count += 1;
        }

        // Track-seek back to the origin, or failing that, reposition directly
        if let Err(e) = self.seek(0) {
            debug!("WebM seek to origin failed after rate probe: {}", e);
            self.rewind()?;
        }

        let span_micros = (last - first.unwrap_or(0)) / 1000;
        if count < 2 || span_micros <= 0 {
            return Ok(None);
        }
        let frames = (count - 1) as u64 * 1_000_000;
        Ok(match (u32::try_from(frames), u32::try_from(span_micros)) {
            (Ok(num), Ok(den)) => Some(reduce(num, den)),
            _ => None,
        })
    }

    fn reset_stream_state(&mut self) {
        self.pending.clear();
        self.cluster_timecode = 0;
    }

    fn timecode_to_nanos(&self, timecode: i64) -> Time {
        rescale_to_nanos(timecode, self.timecode_scale, 1_000_000_000)
    }

    /// Cluster to resume from for `target`: best cue, else a cluster scan.
    fn find_cluster(&mut self, target: Time) -> Result<u64, DecodeError> {
        if !self.cues.is_empty() {
            let cue = self
                .cues
                .iter()
                .rev()
                .find(|cue| cue.time <= target)
                .or_else(|| self.cues.first())
                .copied();
            if let Some(cue) = cue {
                return Ok(cue.cluster_offset);
            }
        }
        self.scan_clusters(target)
    }

    fn scan_clusters(&mut self, target: Time) -> Result<u64, DecodeError> {
        let mut position = self.first_cluster;
        let mut best = None;
        loop {
            self.reader.seek(SeekFrom::Start(position))?;
            let Some(element) = ebml::read_header(&mut *self.reader)? else {
                break;
            };
            if self.segment_end.is_some_and(|end| element.offset >= end) {
                break;
            }
            if element.id == ebml::ID_CLUSTER {
                let timecode = match ebml::read_header(&mut *self.reader)? {
                    Some(child) if child.id == ebml::ID_TIMECODE => {
                        Some(uint(&mut *self.reader, &child)?)
                    }
                    _ => None,
                };
                if let Some(timecode) = timecode {
                    if self.timecode_to_nanos(timecode as i64) > target {
                        best.get_or_insert(element.offset);
                        break;
                    }
                }
                best = Some(element.offset);
            }
            match element.end() {
                Some(end) => position = end,
                // an unknown-size cluster hides whatever follows it
                None => break,
            }
        }
        best.ok_or_else(|| DecodeError::SeekFailed("no clusters in stream".into()))
    }

    fn parse_block(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let malformed = || DecodeError::Format("malformed WebM block".into());
        let (track, n) = ebml::parse_vint(data).ok_or_else(malformed)?;
        if track != self.track_number {
            return Ok(());
        }
        if data.len() < n + 3 {
            return Err(malformed());
        }
        let relative = i16::from_be_bytes([data[n], data[n + 1]]) as i64;
        let flags = data[n + 2];
        let body = &data[n + 3..];
        let timestamp = self.timecode_to_nanos(self.cluster_timecode + relative);
        let step = self.default_duration.unwrap_or(0) as i64;

        for (index, frame) in split_laces(body, (flags >> 1) & 0x03).ok_or_else(malformed)?.into_iter().enumerate() {
            self.pending.push_back(Packet {
                data: frame.to_vec(),
                timestamp: Some(timestamp + index as i64 * step),
            });
        }
        Ok(())
    }
}

impl Demuxer for WebmDemuxer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::WebM
    }

    fn header(&self) -> &ContainerHeader {
        &self.header
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, DecodeError> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }
            let here = self.reader.stream_position()?;
            if self.segment_end.is_some_and(|end| here >= end) {
                return Ok(None);
            }
            let Some(element) = ebml::read_header(&mut *self.reader)? else {
                return Ok(None);
            };
            match element.id {
                // Masters whose children we stream through
                ebml::ID_CLUSTER => self.cluster_timecode = 0,
                ebml::ID_BLOCK_GROUP => {}
                ebml::ID_TIMECODE => {
                    self.cluster_timecode = uint(&mut *self.reader, &element)? as i64;
                }
                ebml::ID_SIMPLE_BLOCK | ebml::ID_BLOCK => {
                    let size = element
                        .size
                        .ok_or_else(|| DecodeError::Format("block of unknown size".into()))?;
                    let data = match ebml::read_binary(&mut *self.reader, size) {
                        Ok(data) => data,
                        Err(DecodeError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            warn!("Truncated WebM block, treating as end of stream");
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };
                    self.parse_block(&data)?;
                }
                _ => ebml::skip(&mut *self.reader, &element)?,
            }
        }
    }

    fn seek(&mut self, target: Time) -> Result<(), DecodeError> {
        let offset = self.find_cluster(target.max(0))?;
        self.reader.seek(SeekFrom::Start(offset))?;
        match ebml::read_header(&mut *self.reader)? {
            Some(element) if element.id == ebml::ID_CLUSTER => {}
            _ => {
                return Err(DecodeError::SeekFailed(format!(
                    "no cluster at offset {}",
                    offset
                )))
            }
        }
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reset_stream_state();
        Ok(())
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.reader.seek(SeekFrom::Start(self.first_cluster))?;
        self.reset_stream_state();
        Ok(())
    }

    fn into_reader(self: Box<Self>) -> Box<dyn MediaRead> {
        self.reader
    }
}

/// Visit the children of a sized master element, leaving the reader after it.
fn for_each_child<F>(reader: &mut dyn MediaRead, parent: &ElementHeader, mut visit: F) -> Result<(), DecodeError>
where
    F: FnMut(&mut dyn MediaRead, &ElementHeader) -> Result<(), DecodeError>,
{
    let end = parent.end().ok_or_else(|| {
        DecodeError::Format(format!("master element 0x{:X} of unknown size", parent.id))
    })?;
    reader.seek(SeekFrom::Start(parent.data_offset))?;
    while reader.stream_position()? < end {
        let Some(child) = ebml::read_header(reader)? else {
            break;
        };
        visit(reader, &child)?;
        ebml::skip(reader, &child)?;
    }
    reader.seek(SeekFrom::Start(end))?;
    Ok(())
}

fn sized(element: &ElementHeader) -> Result<u64, DecodeError> {
    element
        .size
        .ok_or_else(|| DecodeError::Format(format!("element 0x{:X} of unknown size", element.id)))
}

fn uint(reader: &mut dyn MediaRead, element: &ElementHeader) -> Result<u64, DecodeError> {
    ebml::read_uint(reader, sized(element)?)
}

fn float(reader: &mut dyn MediaRead, element: &ElementHeader) -> Result<f64, DecodeError> {
    ebml::read_float(reader, sized(element)?)
}

fn string(reader: &mut dyn MediaRead, element: &ElementHeader) -> Result<String, DecodeError> {
    ebml::read_string(reader, sized(element)?)
}

fn parse_tracks(reader: &mut dyn MediaRead, tracks: &ElementHeader) -> Result<Option<TrackEntry>, DecodeError> {
    let mut video: Option<TrackEntry> = None;
    for_each_child(reader, tracks, |r, entry| {
        if entry.id != ebml::ID_TRACK_ENTRY {
            return Ok(());
        }
        let mut track = TrackEntry::default();
        for_each_child(r, entry, |r, field| {
            match field.id {
                ebml::ID_TRACK_NUMBER => track.number = uint(r, field)?,
                ebml::ID_TRACK_TYPE => track.track_type = uint(r, field)?,
                ebml::ID_CODEC_ID => track.codec_id = string(r, field)?,
                ebml::ID_DEFAULT_DURATION => {
                    track.default_duration = Some(uint(r, field)?)
                }
                ebml::ID_VIDEO => for_each_child(r, field, |r, dim| {
                    match dim.id {
                        ebml::ID_PIXEL_WIDTH => track.width = uint(r, dim)? as u32,
                        ebml::ID_PIXEL_HEIGHT => track.height = uint(r, dim)? as u32,
                        _ => {}
                    }
                    Ok(())
                })?,
                _ => {}
            }
            Ok(())
        })?;
        if video.is_none() && track.track_type == ebml::TRACK_TYPE_VIDEO {
            video = Some(track);
        }
        Ok(())
    })?;
    Ok(video)
}

fn parse_cues(reader: &mut dyn MediaRead, cues: &ElementHeader, segment_start: u64) -> Result<Vec<CuePoint>, DecodeError> {
    let mut points = Vec::new();
    for_each_child(reader, cues, |r, point| {
        if point.id != ebml::ID_CUE_POINT {
            return Ok(());
        }
        let mut time = None;
        let mut positions: Vec<(Option<u64>, u64)> = Vec::new();
        for_each_child(r, point, |r, field| {
            match field.id {
                ebml::ID_CUE_TIME => time = Some(uint(r, field)?),
                ebml::ID_CUE_TRACK_POSITIONS => {
                    let mut track = None;
                    let mut cluster = None;
                    for_each_child(r, field, |r, pos| {
                        match pos.id {
                            ebml::ID_CUE_TRACK => track = Some(uint(r, pos)?),
                            ebml::ID_CUE_CLUSTER_POSITION => cluster = Some(uint(r, pos)?),
                            _ => {}
                        }
                        Ok(())
                    })?;
                    if let Some(cluster) = cluster {
                        positions.push((track, cluster));
                    }
                }
                _ => {}
            }
            Ok(())
        })?;
        if let Some(time) = time {
            points.extend(positions.into_iter().map(|(track, cluster)| CuePoint {
                // scaled once the timecode scale is known
                time: time as Time,
                track,
                cluster_offset: segment_start + cluster,
            }));
        }
        Ok(())
    })?;
    Ok(points)
}

fn read_cues_at(reader: &mut dyn MediaRead, offset: u64, segment_start: u64) -> Result<Vec<CuePoint>, DecodeError> {
    let resume = reader.stream_position()?;
    reader.seek(SeekFrom::Start(offset))?;
    let result = match ebml::read_header(reader)? {
        Some(element) if element.id == ebml::ID_CUES => parse_cues(reader, &element, segment_start),
        _ => Err(DecodeError::Format("seek head points at no Cues element".into())),
    };
    reader.seek(SeekFrom::Start(resume))?;
    result
}

fn parse_seek_head(reader: &mut dyn MediaRead, head: &ElementHeader) -> Result<Option<u64>, DecodeError> {
    let mut cues_position = None;
    for_each_child(reader, head, |r, seek| {
        if seek.id != ebml::ID_SEEK {
            return Ok(());
        }
        let mut id = None;
        let mut position = None;
        for_each_child(r, seek, |r, field| {
            match field.id {
                ebml::ID_SEEK_ID => id = Some(uint(r, field)?),
                ebml::ID_SEEK_POSITION => position = Some(uint(r, field)?),
                _ => {}
            }
            Ok(())
        })?;
        if id == Some(ebml::ID_CUES as u64) {
            cues_position = position;
        }
        Ok(())
    })?;
    Ok(cues_position)
}

/// Split a block body into frames according to its lacing mode.
fn split_laces(body: &[u8], lacing: u8) -> Option<Vec<&[u8]>> {
    if lacing == 0 {
        return Some(vec![body]);
    }
    let count = *body.first()? as usize + 1;
    let mut pos = 1;
    let mut sizes: Vec<usize> = Vec::with_capacity(count);
    match lacing {
        // Xiph
        1 => {
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let byte = *body.get(pos)?;
                    pos += 1;
                    size += byte as usize;
                    if byte != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
        }
        // fixed-size
        2 => {
            let each = (body.len() - 1) / count;
            sizes.extend(std::iter::repeat(each).take(count - 1));
        }
        // EBML
        _ => {
            if count > 1 {
                let (first, len) = ebml::parse_vint(body.get(pos..)?)?;
                pos += len;
                sizes.push(first as usize);
                for _ in 1..count - 1 {
                    let (diff, len) = ebml::parse_signed_vint(body.get(pos..)?)?;
                    pos += len;
                    let previous = *sizes.last()? as i64;
                    sizes.push(usize::try_from(previous + diff).ok()?);
                }
            }
        }
    }

    let laced: usize = sizes.iter().sum();
    let last = body.len().checked_sub(pos + laced)?;
    sizes.push(last);

    let mut frames = Vec::with_capacity(count);
    for size in sizes {
        frames.push(body.get(pos..pos + size)?);
        pos += size;
    }
    Some(frames)
}

fn rate_from_interval(nanos: u64) -> Option<Rational> {
    let den = u32::try_from(nanos).ok()?;
    Some(reduce(1_000_000_000, den))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::decode::container::testutil::{self, WebmBuilder};

    fn open(bytes: Vec<u8>) -> WebmDemuxer {
        WebmDemuxer::open(Box::new(Cursor::new(bytes))).unwrap()
    }

    fn drain(demuxer: &mut WebmDemuxer) -> Vec<Packet> {
        std::iter::from_fn(|| demuxer.next_packet().unwrap()).collect()
    }

    #[test]
    fn test_header_from_tracks_and_info() {
        let demuxer = open(WebmBuilder::new(16, 8).frames(10, 40).build());
        let header = demuxer.header();
        assert_eq!(header.codec, CodecKind::RawI420);
        assert_eq!((header.width, header.height), (16, 8));
        assert_eq!(header.frame_rate, Some(Rational::new(25, 1)));
        assert_eq!(header.duration, Some(from_seconds(0.4)));
    }

    #[test]
    fn test_packets_carry_cluster_relative_timestamps() {
        let mut demuxer = open(WebmBuilder::new(8, 8).frames(6, 40).frames_per_cluster(4).build());
        let packets = drain(&mut demuxer);
        let stamps: Vec<_> = packets.iter().map(|p| p.timestamp.unwrap() / 1_000_000).collect();
        assert_eq!(stamps, vec![0, 40, 80, 120, 160, 200]);
        assert_eq!(packets[5].data[0], 5);
    }

    #[test]
    fn test_rate_probed_without_default_duration() {
        let mut demuxer = open(WebmBuilder::new(8, 8).frames(10, 50).default_duration(false).build());
        assert_eq!(demuxer.header().frame_rate, Some(Rational::new(20, 1)));
        // probing must leave the stream at its origin
        assert_eq!(demuxer.next_packet().unwrap().unwrap().timestamp, Some(0));
    }

    #[test]
    fn test_seek_with_cues() {
        let mut demuxer = open(WebmBuilder::new(8, 8).frames(20, 40).frames_per_cluster(5).build());
        demuxer.seek(from_seconds(0.5)).unwrap();
        let packet = demuxer.next_packet().unwrap().unwrap();
        // cluster 2 starts at frame 10 = 400 ms
        assert_eq!(packet.timestamp, Some(from_seconds(0.4)));
    }

    #[test]
    fn test_seek_without_cues_scans_clusters() {
        let mut demuxer = open(
            WebmBuilder::new(8, 8)
                .frames(20, 40)
                .frames_per_cluster(5)
                .cues(false)
                .build(),
        );
        demuxer.seek(from_seconds(0.25)).unwrap();
        assert_eq!(demuxer.next_packet().unwrap().unwrap().timestamp, Some(from_seconds(0.2)));
        demuxer.seek(0).unwrap();
        assert_eq!(demuxer.next_packet().unwrap().unwrap().timestamp, Some(0));
    }

    #[test]
    fn test_unknown_size_clusters_stream() {
        let mut demuxer = open(
            WebmBuilder::new(8, 8)
                .frames(6, 40)
                .frames_per_cluster(2)
                .unknown_sizes(true)
                .build(),
        );
        assert_eq!(drain(&mut demuxer).len(), 6);
        demuxer.rewind().unwrap();
        assert_eq!(drain(&mut demuxer).len(), 6);
    }

    #[test]
    fn test_unsupported_codec_id() {
        let bytes = WebmBuilder::new(8, 8).frames(1, 40).codec_id("V_MPEG4/ISO/AVC").build();
        let err = WebmDemuxer::open(Box::new(Cursor::new(bytes))).err().unwrap();
        assert!(matches!(err, DecodeError::CodecInit(_)));
    }

    #[test]
    fn test_missing_segment_is_format_error() {
        let bytes = testutil::ebml_header_only();
        let err = WebmDemuxer::open(Box::new(Cursor::new(bytes))).err().unwrap();
        assert!(matches!(err, DecodeError::Format(_)));
    }

    #[test]
    fn test_split_laces_xiph() {
        let body = [2, 3, 1, b'a', b'a', b'a', b'b', b'c', b'c'];
        let frames = split_laces(&body, 1).unwrap();
        assert_eq!(frames, vec![&b"aaa"[..], &b"b"[..], &b"cc"[..]]);
    }

    #[test]
    fn test_split_laces_fixed() {
        let body = [1, 1, 2, 3, 4];
        let frames = split_laces(&body, 2).unwrap();
        assert_eq!(frames, vec![&[1u8, 2][..], &[3u8, 4][..]]);
    }

    #[test]
    fn test_split_laces_ebml() {
        // three frames: 2 bytes, 2 + 1 = 3 bytes, remainder 1 byte
        let body = [2, 0x82, 0x80 | 64, 1, 1, 2, 2, 2, 3];
        let frames = split_laces(&body, 3).unwrap();
        assert_eq!(frames, vec![&[1u8, 1][..], &[2u8, 2, 2][..], &[3u8][..]]);
    }

    #[test]
    fn test_split_laces_rejects_overrun() {
        assert!(split_laces(&[1, 200, 1, 2], 1).is_none());
    }
}
