//! Frame source: owns one container demuxer and its codec.
//!
//! Decode-time notifications (start, frame, seek, end) are queued as
//! [`SourceEvent`]s rather than delivered through callbacks; the owning
//! session drains them once its tick's decode work is done.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use crate::core::time::{format_time, from_seconds, to_seconds, Rational, EPSILON};
use crate::decode::codec::{create_codec, Codec};
use crate::decode::container::{self, Demuxer, MediaRead, Packet};
use crate::decode::frame::PlanarImage;
use crate::decode::stream_info::StreamInfo;

/// Error type for decoding operations
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unrecognized media format: {0}")]
    Format(String),
    #[error("Codec initialization failed: {0}")]
    CodecInit(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Seeking is not supported by this container")]
    SeekUnsupported,
    #[error("Seek failed: {0}")]
    SeekFailed(String),
    #[error("No media is open")]
    NotOpen,
}

/// Notification queued by the frame source during open/seek/read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceEvent {
    /// Playback (re)started at the configured start point
    Start,
    /// A new image was produced
    Frame,
    /// The source was repositioned
    Seek { position: f64 },
    /// End of stream (or of the trim range) was reached
    End { position: f64 },
}

/// Options for [`FrameSource::open`]. Trim points below a millisecond are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpenOptions {
    pub looping: bool,
    pub start_at: f64,
    pub end_after: f64,
}

/// Demuxer + codec pair with the playback position state machine.
pub struct FrameSource {
    path: Option<PathBuf>,
    demuxer: Option<Box<dyn Demuxer>>,
    codec: Option<Box<dyn Codec>>,
    info: Option<StreamInfo>,
    options: OpenOptions,
    position: f64,
    frames_decoded: u64,
    frames_output: u64,
    last_reported_end: Option<f64>,
    start_announced: bool,
    /// First packet at or after the last seek target, not yet decoded
    pending: Option<Packet>,
    events: VecDeque<SourceEvent>,
}

impl FrameSource {
    pub fn new() -> Self {
        Self {
            path: None,
            demuxer: None,
            codec: None,
            info: None,
            options: OpenOptions::default(),
            position: 0.0,
            frames_decoded: 0,
            frames_output: 0,
            last_reported_end: None,
            start_announced: false,
            pending: None,
            events: VecDeque::new(),
        }
    }

    /// Open a media file, closing whatever was open before.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, options: OpenOptions) -> Result<(), DecodeError> {
        self.close();
        let path = path.as_ref();
        let file = File::open(path)?;
        self.open_reader(Box::new(BufReader::new(file)), options)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Open from any seekable byte source.
    pub fn open_reader(&mut self, reader: Box<dyn MediaRead>, options: OpenOptions) -> Result<(), DecodeError> {
        self.close();
        self.events.clear();

        let demuxer = container::probe(reader)?;
        let header = demuxer.header().clone();
        let codec = create_codec(header.codec, header.width, header.height)?;

        let frame_rate = header
            .frame_rate
            .filter(Rational::is_valid)
            .unwrap_or_default();
        let info = StreamInfo::new(
            demuxer.kind(),
            header.codec,
            header.width,
            header.height,
            frame_rate,
            header.duration.map(to_seconds),
        );
        info!(
            "Opened {} {} stream {}x{} @ {} fps, duration {}",
            info.container,
            info.codec,
            info.width,
            info.height,
            info.frame_rate,
            info.duration.map_or_else(|| "unknown".to_string(), format_time)
        );

        self.demuxer = Some(demuxer);
        self.codec = Some(codec);
        self.info = Some(info);
        self.options = options;
        Ok(())
    }

    /// Release codec and container. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.demuxer.is_some() {
            debug!("Closing frame source {:?}", self.path);
        }
        self.demuxer = None;
        self.codec = None;
        self.info = None;
        self.path = None;
        self.position = 0.0;
        self.frames_decoded = 0;
        self.frames_output = 0;
        self.last_reported_end = None;
        self.start_announced = false;
        self.pending = None;
    }

    pub fn is_open(&self) -> bool {
        self.demuxer.is_some()
    }

    pub fn info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current position in seconds
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn duration(&self) -> Option<f64> {
        self.info.as_ref().and_then(|info| info.duration)
    }

    pub fn frame_rate(&self) -> Rational {
        self.info.as_ref().map(|info| info.frame_rate).unwrap_or_default()
    }

    /// Seconds per frame at normal speed
    pub fn frame_duration(&self) -> f64 {
        self.frame_rate().frame_duration()
    }

    /// Configured start trim, `0.0` if none
    pub fn start(&self) -> f64 {
        self.options.start_at.max(0.0)
    }

    /// Effective end: the end trim when configured, bounded by the duration.
    /// `0.0` when neither is known.
    pub fn end(&self) -> f64 {
        let duration = self.duration().unwrap_or(0.0);
        if self.options.end_after > EPSILON {
            if duration > EPSILON {
                duration.min(self.options.end_after)
            } else {
                self.options.end_after
            }
        } else {
            duration
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn frames_output(&self) -> u64 {
        self.frames_output
    }

    pub fn is_looping(&self) -> bool {
        self.options.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.options.looping = looping;
    }

    /// True once the position has passed a configured end trim.
    pub fn custom_end_reached(&self) -> bool {
        self.is_open() && self.options.end_after >= EPSILON && self.position >= self.options.end_after
    }

    /// Take every queued event in order.
    pub fn drain_events(&mut self) -> Vec<SourceEvent> {
        self.events.drain(..).collect()
    }

    /// Move to `target` seconds, clamped into the trim range and the duration.
    ///
    /// Only the track-based container seeks freely; the others can only
    /// return to the origin. The container lands on a cluster at or before
    /// the target, so the frames in between are decoded and discarded and the
    /// position becomes that of the first frame at or after the target.
    /// A failed seek leaves the position unchanged.
    pub fn seek(&mut self, target: f64) -> Result<(), DecodeError> {
        if !self.is_open() {
            return Err(DecodeError::NotOpen);
        }

        let mut target = target;
        if self.options.start_at > EPSILON {
            target = target.max(self.options.start_at);
        }
        if self.options.end_after > EPSILON {
            target = target.min(self.options.end_after);
        }
        if let Some(duration) = self.duration() {
            target = target.min(duration);
        }
        if target < EPSILON {
            target = 0.0;
        }

        let demuxer = self.demuxer.as_mut().ok_or(DecodeError::NotOpen)?;
        let seekable = demuxer.kind().supports_seek();
        let result = if seekable {
            demuxer.seek(from_seconds(target))
        } else if target == 0.0 {
            demuxer.rewind()
        } else {
            Err(DecodeError::SeekUnsupported)
        };

        match result {
            Ok(()) => {}
            Err(DecodeError::SeekUnsupported) => return Err(DecodeError::SeekUnsupported),
            Err(e) if target == 0.0 => {
                warn!("Seek to origin failed ({}), rewinding and re-probing", e);
                self.reprobe()?;
            }
            Err(e) => return Err(e),
        }

        self.pending = None;
        if let Some(codec) = self.codec.as_mut() {
            codec.reset();
        }
        let position = if seekable { self.roll_forward(target)? } else { target };
        let position = match self.duration() {
            Some(duration) => position.clamp(0.0, duration),
            None => position.max(0.0),
        };

        self.position = position;
        self.frames_decoded = (position * self.frame_rate().as_f64()).round() as u64;
        self.frames_output = self.frames_decoded;
        self.last_reported_end = None;
        self.start_announced = false;
        self.events.push_back(SourceEvent::Seek { position });
        debug!("Seeked to {} (requested {})", format_time(position), format_time(target));
        Ok(())
    }

    /// Decode without output up to `target` and keep the first packet at or
    /// after it for the next read. Returns the time of that packet, or of the
    /// last packet when the stream ends first.
    fn roll_forward(&mut self, target: f64) -> Result<f64, DecodeError> {
        let mut landed = target;
        let mut skipped = 0usize;
        loop {
            let demuxer = self.demuxer.as_mut().ok_or(DecodeError::NotOpen)?;
            let Some(packet) = demuxer.next_packet()? else {
                break;
            };
            let Some(time) = packet.timestamp.map(to_seconds) else {
                self.pending = Some(packet);
                break;
            };
            landed = time;
            if time + EPSILON >= target {
                self.pending = Some(packet);
                break;
            }
            if let Some(codec) = self.codec.as_mut() {
                codec.decode(&packet.data)?;
            }
            skipped += 1;
        }
        if skipped > 0 {
            debug!("Decoded {} frames ahead of seek target {}", skipped, format_time(target));
        }
        Ok(landed)
    }

    /// Reopen the container from byte zero; recovers from a corrupt seek index.
    fn reprobe(&mut self) -> Result<(), DecodeError> {
        let demuxer = self.demuxer.take().ok_or(DecodeError::NotOpen)?;
        let mut reader = demuxer.into_reader();
        reader.seek(SeekFrom::Start(0))?;
        match container::probe(reader) {
            Ok(demuxer) => {
                if let Some(info) = self.info.as_mut() {
                    let header = demuxer.header();
                    *info = StreamInfo::new(
                        demuxer.kind(),
                        header.codec,
                        header.width,
                        header.height,
                        info.frame_rate,
                        info.duration,
                    );
                }
                self.demuxer = Some(demuxer);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Read one compressed unit and optionally decode and output it.
    ///
    /// Returns the decoded image when one was produced. Reaching the end of
    /// the stream (or of the trim range) is not an error: it queues one
    /// `End` per distinct position and, when looping, restarts at the start
    /// trim.
    pub fn read_frame(&mut self, drop_decode: bool, drop_output: bool) -> Result<Option<PlanarImage>, DecodeError> {
        if !self.is_open() {
            return Err(DecodeError::NotOpen);
        }
        let drop_output = drop_output || drop_decode;

        if self.custom_end_reached() {
            return self.reach_end();
        }

        let mut starting = false;
        if self.options.start_at > EPSILON && self.position + EPSILON < self.options.start_at {
            if let Err(e) = self.seek(self.options.start_at) {
                warn!("Could not seek to start trim {}: {}", format_time(self.options.start_at), e);
            }
            starting = true;
        }
        starting |= self.frames_decoded == 0;
        if starting && !self.start_announced {
            self.start_announced = true;
            self.events.push_back(SourceEvent::Start);
        }

        let packet = match (self.pending.take(), self.demuxer.as_mut()) {
            (Some(packet), _) => Some(packet),
            (None, Some(demuxer)) => demuxer.next_packet()?,
            (None, None) => return Err(DecodeError::NotOpen),
        };
        let Some(packet) = packet else {
            return self.reach_end();
        };

        let fps = self.frame_rate().as_f64();
        let position = match packet.timestamp {
            Some(ts) => to_seconds(ts),
            None if fps > 0.0 => self.frames_decoded as f64 / fps,
            None => self.position,
        };
        self.position = match self.duration() {
            Some(duration) => position.clamp(0.0, duration),
            None => position.max(0.0),
        };

        let codec = self.codec.as_mut().ok_or(DecodeError::NotOpen)?;
        if !drop_decode {
            codec.decode(&packet.data)?;
        }
        self.frames_decoded += 1;

        let mut image = None;
        if !drop_output {
            image = codec.next_image();
            if image.is_some() {
                self.frames_output += 1;
            }
        }

        // The first frame actually reached becomes the start point
        if self.options.start_at > EPSILON && self.position < self.options.start_at {
            self.options.start_at = self.position;
        }

        if image.is_some() {
            self.events.push_back(SourceEvent::Frame);
        }
        Ok(image)
    }

    /// Treat the current position as end of stream, as if the container ran dry.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        if !self.is_open() {
            return Err(DecodeError::NotOpen);
        }
        self.reach_end().map(|_| ())
    }

    fn reach_end(&mut self) -> Result<Option<PlanarImage>, DecodeError> {
        if self.last_reported_end != Some(self.position) {
            self.last_reported_end = Some(self.position);
            info!("End of stream at {}", format_time(self.position));
            self.events.push_back(SourceEvent::End { position: self.position });
        }
        if self.options.looping {
            match self.seek(self.options.start_at) {
                Ok(()) => {
                    self.start_announced = true;
                    self.events.push_back(SourceEvent::Start);
                }
                Err(e) => warn!("Loop restart failed: {}", e),
            }
        }
        Ok(None)
    }
}

impl Default for FrameSource {
    fn default() -> Self {
        Self::new()
    }
}
