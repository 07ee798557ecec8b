//! Clock arbitration.
//!
//! Every tick a session asks [`TimeArbiter::resolve`] how far its target time
//! should move. The synchronized audio position wins when it is healthy;
//! otherwise the wall clock or the host tick drives playback.

use std::time::Instant;
use crate::core::config::PlaybackConfig;
use crate::core::time::EPSILON;
use crate::playback::flags::TimeSource;

/// Everything the arbiter looks at for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    pub selector: TimeSource,
    /// Editor fallback playback: neither audio nor host time is reliable
    pub editor_playback: bool,
    pub audio_playing: bool,
    pub audio_active: bool,
    pub audio_position: f64,
    /// Target time resolved on the previous tick
    pub last_target: f64,
    /// Wall time since the previous sample
    pub wall_elapsed: f64,
    /// True for the first wall sample after the timer was (re)started
    pub first_wall_sample: bool,
    /// Host-supplied tick delta
    pub host_delta: f64,
    pub speed: f64,
}

/// Which clock drove this tick, and by how much.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Audio { delta: f64 },
    Wall { delta: f64 },
    Host { delta: f64 },
    /// Nothing usable selected; unscaled host delta, never below epsilon
    Fallback { delta: f64 },
    /// The audio fell implausibly far behind the video: its stream ended
    AudioEnded,
}

impl Resolution {
    pub fn delta(&self) -> f64 {
        match self {
            Resolution::Audio { delta }
            | Resolution::Wall { delta }
            | Resolution::Host { delta }
            | Resolution::Fallback { delta } => *delta,
            Resolution::AudioEnded => 0.0,
        }
    }
}

/// Picks one clock per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeArbiter {
    /// Audio this far behind the last target counts as ended
    end_timeout: f64,
    /// Wall samples above this are startup glitches
    startup_clamp: f64,
}

impl TimeArbiter {
    pub fn new(end_timeout: f64, startup_clamp: f64) -> Self {
        Self {
            end_timeout,
            startup_clamp,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.end_timeout, config.drop_threshold)
    }

    pub fn resolve(&self, input: &TickInput) -> Resolution {
        let selector = input.selector;

        // Audio pitch does not follow speed, so speed only scales the other clocks
        let scale = |delta: f64| if input.audio_active { delta } else { delta * input.speed };

        if !input.editor_playback
            && selector.contains(TimeSource::SOUND)
            && input.audio_playing
            && input.last_target > EPSILON
            && input.audio_position > EPSILON
        {
            let delta = input.audio_position - input.last_target;
            if delta < -self.end_timeout {
                return Resolution::AudioEnded;
            }
            return Resolution::Audio { delta };
        }

        if input.editor_playback || selector.uses_wall_clock() {
            let mut elapsed = input.wall_elapsed;
            if (input.editor_playback || input.first_wall_sample) && elapsed.abs() > self.startup_clamp {
                elapsed = 0.0;
            }
            return Resolution::Wall { delta: scale(elapsed) };
        }

        if selector.contains(TimeSource::GAME_TIME) {
            return Resolution::Host { delta: scale(input.host_delta) };
        }

        Resolution::Fallback {
            delta: input.host_delta.max(EPSILON),
        }
    }
}

impl Default for TimeArbiter {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

/// One reading of a [`WallTimer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSample {
    pub elapsed: f64,
    pub first: bool,
}

/// Lap timer restarted on every sample.
#[derive(Debug, Default)]
pub struct WallTimer {
    started: Option<Instant>,
    laps: u64,
}

impl WallTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart(&mut self) {
        self.started = Some(Instant::now());
        self.laps = 0;
    }

    /// Seconds since the last lap (or restart), then start a new lap.
    pub fn lap(&mut self) -> WallSample {
        let now = Instant::now();
        let elapsed = self
            .started
            .map_or(0.0, |started| now.duration_since(started).as_secs_f64());
        let first = self.laps == 0;
        self.started = Some(now);
        self.laps += 1;
        WallSample { elapsed, first }
    }
}
