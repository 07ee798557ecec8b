//! Playback session: one frame source, its pacer and an optional synced sound.
//!
//! The host calls [`PlaybackSession::advance`] once per tick. Decode-time
//! events are queued by the frame source and only dispatched at the end of
//! `advance`, after all pacing work for the tick is finished. Subscribers get
//! them over crossbeam channels.

use std::path::PathBuf;
use std::sync::Arc;
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, info, warn};
use crate::audio::sink::SyncedAudio;
use crate::core::time::{format_time, Rational};
use crate::decode::container::MediaRead;
use crate::decode::decoder::{DecodeError, FrameSource, OpenOptions, SourceEvent};
use crate::decode::frame::PlanarImage;
use crate::decode::stream_info::StreamInfo;
use crate::playback::flags::{DropPolicy, TimeSource};
use crate::playback::pacer::{PaceOutcome, Pacer};
use crate::playback::state::{PacerState, SessionStatus};
use crate::playback::sync::{Resolution, TickInput, TimeArbiter, WallTimer};
use crate::render::renderer::{FrameSink, RenderError};
use crate::render::resources::QueuedFrameSink;
use crate::system::PlaybackContext;

/// Speed changes smaller than this around 1.0 are ignored
const SPEED_TOLERANCE: f64 = 0.05;

/// Error type for playback sessions
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Session {0} is not open")]
    NotOpen(SessionId),
}

/// Process-unique session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event broadcast to session subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub kind: SourceEvent,
}

/// Everything needed to open a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub video: PathBuf,
    pub sound: Option<PathBuf>,
    pub looping: bool,
    pub skippable: bool,
    /// The host should suspend its own loop while this plays
    pub blocks_host: bool,
    pub time_source: TimeSource,
    pub drop_policy: DropPolicy,
    pub start_at: f64,
    pub end_after: f64,
    /// Override the reported dimensions
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub speed: f64,
}

impl SessionOptions {
    pub fn new<P: Into<PathBuf>>(video: P) -> Self {
        Self {
            video: video.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            video: PathBuf::new(),
            sound: None,
            looping: false,
            skippable: true,
            blocks_host: false,
            time_source: TimeSource::DEFAULT,
            drop_policy: DropPolicy::DEFAULT,
            start_at: 0.0,
            end_after: 0.0,
            width: None,
            height: None,
            speed: 1.0,
        }
    }
}

/// One playable video unit
pub struct PlaybackSession {
    id: SessionId,
    context: Arc<PlaybackContext>,
    source: FrameSource,
    pacer: Pacer,
    arbiter: TimeArbiter,
    state: PacerState,
    status: SessionStatus,
    time_source: TimeSource,
    skippable: bool,
    blocks_host: bool,
    custom_size: (Option<u32>, Option<u32>),
    audio: Option<SyncedAudio>,
    wall_timer: WallTimer,
    sink: Option<Box<dyn FrameSink>>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl PlaybackSession {
    pub fn new(context: Arc<PlaybackContext>) -> Self {
        let config = context.config();
        Self {
            id: context.next_session_id(),
            pacer: Pacer::new(config, DropPolicy::DEFAULT),
            arbiter: TimeArbiter::from_config(config),
            context,
            source: FrameSource::new(),
            state: PacerState::default(),
            status: SessionStatus::Closed,
            time_source: TimeSource::DEFAULT,
            skippable: true,
            blocks_host: false,
            custom_size: (None, None),
            audio: None,
            wall_timer: WallTimer::new(),
            sink: None,
            subscribers: Vec::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Open the video file in `options`. The session starts paused.
    pub fn open(&mut self, options: SessionOptions) -> Result<(), PlaybackError> {
        self.close();
        self.source.open(&options.video, open_options(&options))?;
        self.configure(options);
        Ok(())
    }

    /// Open from an in-memory or otherwise custom byte source.
    pub fn open_reader(&mut self, reader: Box<dyn MediaRead>, options: SessionOptions) -> Result<(), PlaybackError> {
        self.close();
        self.source.open_reader(reader, open_options(&options))?;
        self.configure(options);
        Ok(())
    }

    fn configure(&mut self, options: SessionOptions) {
        self.time_source = options.time_source;
        self.pacer = Pacer::new(self.context.config(), options.drop_policy);
        self.state = PacerState {
            speed: if options.speed > 0.0 { options.speed } else { 1.0 },
            ..PacerState::default()
        };
        self.skippable = options.skippable;
        self.blocks_host = options.blocks_host;
        self.custom_size = (options.width, options.height);
        self.status = SessionStatus::Paused;

        self.audio = options.sound.as_ref().and_then(|path| {
            let sink = self.context.audio_backend().and_then(|backend| backend.open(path));
            if sink.is_none() {
                warn!("Session {}: sound {:?} unavailable, playing without audio", self.id, path);
            }
            sink.map(|sink| SyncedAudio::new(sink, path.clone(), options.looping))
        });
        self.sink = Some(Box::new(QueuedFrameSink::new(
            Arc::clone(self.context.resources()),
            self.width(),
            self.height(),
        )));

        info!(
            "Open session {} video {:?} sound {:?} duration {}",
            self.id,
            options.video,
            options.sound,
            self.duration().map_or_else(|| "unknown".to_string(), format_time)
        );
    }

    /// Release the source, the sound and the render resource. Never fails.
    pub fn close(&mut self) {
        if self.status.is_closed() && !self.source.is_open() {
            return;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.pause();
        }
        self.audio = None;
        self.sink = None;
        self.source.close();
        self.status = SessionStatus::Closed;
        self.state = PacerState::default();
        self.skippable = true;
        debug!("Closed session {}", self.id);
    }

    /// Start or continue playback from the current position.
    pub fn resume(&mut self) {
        if !self.source.is_open() {
            return;
        }
        self.status = SessionStatus::Playing;
        let position = self.source.position();
        self.state.reset(position, self.frame_duration());
        self.wall_timer.restart();
        if let Some(audio) = self.audio.as_mut() {
            audio.resume(position);
        }
        info!(
            "Resume session {} video {} sound {}",
            self.id,
            format_time(position),
            format_time(self.audio.as_ref().map_or(0.0, |a| a.position()))
        );
    }

    /// Suspend decode work; the position is kept.
    pub fn pause(&mut self) {
        if !self.source.is_open() {
            return;
        }
        self.status = SessionStatus::Paused;
        if let Some(audio) = self.audio.as_mut() {
            audio.pause();
        }
        info!("Pause session {} at {}", self.id, format_time(self.source.position()));
    }

    /// Reposition the video. Pacing timers follow on the next `advance`.
    pub fn seek(&mut self, position: f64) -> Result<(), PlaybackError> {
        if !self.source.is_open() {
            return Err(PlaybackError::NotOpen(self.id));
        }
        self.source.seek(position)?;
        Ok(())
    }

    /// Request a skip; honoured on the next `advance` if skippable or forced.
    pub fn skip(&mut self, force: bool) {
        if self.skippable || force {
            self.state.skip_requested = true;
        }
    }

    pub fn set_speed(&mut self, speed: f64) {
        if (self.state.speed - 1.0).abs() > SPEED_TOLERANCE || (speed - 1.0).abs() > SPEED_TOLERANCE {
            self.state.speed = speed;
        }
    }

    /// Switch clocks; a playing session is resynchronized.
    pub fn set_time_source(&mut self, time_source: TimeSource) {
        if self.is_playing() {
            self.pause();
            self.time_source = time_source;
            self.resume();
        } else {
            self.time_source = time_source;
        }
    }

    pub fn set_drop_policy(&mut self, policy: DropPolicy) {
        self.pacer.policy = policy;
    }

    /// Replace where decoded frames go (by default the shared resource queue).
    pub fn set_frame_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.sink = Some(sink);
    }

    /// Receive this session's events from now on.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Run one host tick of `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        if self.context.is_shutting_down() {
            return;
        }
        if self.state.skip_requested {
            self.state.skip_requested = false;
            if self.source.is_open() {
                self.dispatch_events();
                let position = self.source.position();
                info!("Skipping session {} at {}", self.id, format_time(position));
                self.handle_event(SourceEvent::End { position });
            }
            self.close();
            return;
        }
        if self.is_playing() {
            self.tick(dt as f64);
        }
        self.dispatch_events();
    }

    fn tick(&mut self, host_delta: f64) {
        let position = self.source.position();
        let (audio_playing, audio_active, audio_position) = match self.audio.as_mut() {
            Some(audio) => (audio.ensure_playing(position), audio.is_active(), audio.position()),
            None => (false, false, 0.0),
        };
        let wall = self.wall_timer.lap();
        let input = TickInput {
            selector: self.time_source,
            editor_playback: self.context.editor_playback(),
            audio_playing,
            audio_active,
            audio_position,
            last_target: self.state.target_time,
            wall_elapsed: wall.elapsed,
            first_wall_sample: wall.first,
            host_delta,
            speed: self.state.speed,
        };

        let resolution = self.arbiter.resolve(&input);
        if resolution == Resolution::AudioEnded {
            debug!("Session {}: audio ended at {:.3}s", self.id, audio_position);
            self.finish_stream();
            return;
        }
        if self.source.custom_end_reached() {
            self.finish_stream();
            return;
        }

        let frame_duration = self.frame_duration();
        match self
            .pacer
            .step(&mut self.state, &mut self.source, resolution.delta(), host_delta, frame_duration)
        {
            Ok(PaceOutcome::Ended) => self.finish_stream(),
            Ok(PaceOutcome::Decoded { frame: Some(image), .. }) => self.upload(&image),
            Ok(_) => {}
            Err(e) => warn!(
                "Session {}: decode failed at {}: {}",
                self.id,
                format_time(self.source.position()),
                e
            ),
        }
    }

    fn upload(&mut self, image: &PlanarImage) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.upload_frame(image) {
                warn!("Session {}: frame upload failed: {}", self.id, e);
            }
        }
    }

    fn finish_stream(&mut self) {
        if let Err(e) = self.source.finish() {
            warn!("Session {}: could not end stream: {}", self.id, e);
        }
    }

    fn dispatch_events(&mut self) {
        for event in self.source.drain_events() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Start => {
                self.resume();
                info!("Start session {} at {}", self.id, format_time(self.source.position()));
            }
            SourceEvent::End { position } => {
                if self.source.is_looping() {
                    if let Some(audio) = self.audio.as_mut() {
                        audio.pause();
                    }
                } else {
                    self.pause();
                }
                info!("End session {} at {}", self.id, format_time(position));
            }
            SourceEvent::Seek { .. } => {
                let position = self.source.position();
                self.state.reset(position, self.frame_duration());
                if let Some(audio) = self.audio.as_mut() {
                    audio.seek(position);
                }
                self.wall_timer.restart();
                info!("Seek session {} to {}", self.id, format_time(position));
            }
            SourceEvent::Frame => {}
        }

        let message = SessionEvent {
            session: self.id,
            kind: event,
        };
        self.subscribers.retain(|tx| tx.send(message).is_ok());
    }

    /// Seconds per frame at the current speed; audio-synced sessions ignore speed.
    pub fn frame_duration(&self) -> f64 {
        let fps = self.source.frame_rate().as_f64();
        if fps <= 0.0 {
            return 0.0;
        }
        if self.audio.as_ref().is_some_and(|a| a.is_active()) {
            1.0 / fps
        } else {
            1.0 / (self.state.speed * fps)
        }
    }

    pub fn is_playing(&self) -> bool {
        self.source.is_open() && self.status.is_playing()
    }

    pub fn is_active(&self) -> bool {
        self.source.is_open()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn position(&self) -> Option<f64> {
        self.source.is_open().then(|| self.source.position())
    }

    pub fn duration(&self) -> Option<f64> {
        self.source.duration()
    }

    pub fn start(&self) -> Option<f64> {
        self.source.is_open().then(|| self.source.start())
    }

    pub fn end(&self) -> Option<f64> {
        self.source.is_open().then(|| self.source.end())
    }

    pub fn frame_rate(&self) -> Option<Rational> {
        self.source.is_open().then(|| self.source.frame_rate())
    }

    pub fn info(&self) -> Option<&StreamInfo> {
        self.source.info()
    }

    pub fn width(&self) -> u32 {
        self.custom_size
            .0
            .filter(|w| *w > 0)
            .or_else(|| self.source.info().map(|info| info.width))
            .unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.custom_size
            .1
            .filter(|h| *h > 0)
            .or_else(|| self.source.info().map(|info| info.height))
            .unwrap_or(0)
    }

    pub fn speed(&self) -> f64 {
        self.state.speed
    }

    pub fn time_source(&self) -> TimeSource {
        self.time_source
    }

    pub fn drop_policy(&self) -> DropPolicy {
        self.pacer.policy
    }

    pub fn blocks_host(&self) -> bool {
        self.blocks_host && self.is_active()
    }

    pub fn is_skippable(&self) -> bool {
        self.skippable
    }

    pub fn pacer_state(&self) -> &PacerState {
        &self.state
    }

    pub fn frame_source(&self) -> &FrameSource {
        &self.source
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_options(options: &SessionOptions) -> OpenOptions {
    OpenOptions {
        looping: options.looping,
        start_at: options.start_at,
        end_after: options.end_after,
    }
}
