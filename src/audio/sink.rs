//! Audio collaborator interface.
//!
//! The pacing core never plays sound itself. It reads the position of an
//! [`AudioSink`] to drive its clock and tells it when to resume, pause and seek.

use std::path::{Path, PathBuf};
use log::debug;

/// Playback surface of one synchronized sound.
pub trait AudioSink: Send {
    /// Current playback position in seconds
    fn position(&self) -> f64;

    fn duration(&self) -> Option<f64>;

    /// A sound is loaded and able to play
    fn is_active(&self) -> bool;

    fn is_playing(&self) -> bool;

    /// Start or continue `path` at `start` seconds.
    fn resume(&mut self, path: &Path, start: f64);

    fn pause(&mut self);

    fn seek(&mut self, position: f64);
}

/// Opens sinks for sound files referenced by sessions.
pub trait AudioBackend: Send + Sync {
    /// `None` when the sound cannot be played; the session then runs without audio.
    fn open(&self, path: &Path) -> Option<Box<dyn AudioSink>>;
}

/// A sink bound to a session, tracking whether the session wants it paused.
pub struct SyncedAudio {
    sink: Box<dyn AudioSink>,
    path: PathBuf,
    paused: bool,
    looping: bool,
}

impl SyncedAudio {
    pub fn new(sink: Box<dyn AudioSink>, path: PathBuf, looping: bool) -> Self {
        Self {
            sink,
            path,
            paused: true,
            looping,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_active(&self) -> bool {
        self.sink.is_active()
    }

    pub fn is_playing(&self) -> bool {
        self.sink.is_active() && self.sink.is_playing()
    }

    pub fn position(&self) -> f64 {
        self.sink.position()
    }

    pub fn duration(&self) -> Option<f64> {
        self.sink.duration()
    }

    pub fn resume(&mut self, position: f64) {
        self.paused = false;
        self.sink.resume(&self.path, position);
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.sink.pause();
    }

    pub fn seek(&mut self, position: f64) {
        self.sink.seek(position);
    }

    /// Restart a sound that stopped by itself while it should be playing.
    /// Returns whether it is playing afterwards.
    pub fn ensure_playing(&mut self, position: f64) -> bool {
        if !self.paused && self.sink.is_active() && !self.sink.is_playing() {
            debug!("Audio {:?} stopped unexpectedly, resuming at {:.3}s", self.path, position);
            self.sink.resume(&self.path, position);
        }
        self.is_playing()
    }
}
