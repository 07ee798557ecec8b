//! Session status and per-session pacing state.

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// No media open
    #[default]
    Closed,
    /// Open, decode work suspended; position is kept
    Paused,
    /// Open and advancing every tick
    Playing,
}

impl SessionStatus {
    pub fn is_playing(&self) -> bool {
        matches!(self, SessionStatus::Playing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, SessionStatus::Paused)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionStatus::Closed)
    }
}

/// Mutable pacing state of one session (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacerState {
    /// Authoritative clock value for this tick
    pub target_time: f64,
    /// When the most recently shown frame should be superseded.
    /// Only moves when a frame is actually emitted.
    pub next_frame_due: f64,
    /// Rate multiplier, ignored while synced to audio
    pub speed: f64,
    pub skip_requested: bool,
}

impl PacerState {
    /// Restart pacing at `position`, due one frame early so the next tick outputs.
    pub fn reset(&mut self, position: f64, frame_duration: f64) {
        self.target_time = position;
        self.next_frame_due = position - frame_duration;
    }

    /// How far the shown frame lags the clock; never negative.
    pub fn drift(&self) -> f64 {
        (self.target_time - self.next_frame_due).max(0.0)
    }
}

impl Default for PacerState {
    fn default() -> Self {
        Self {
            target_time: 0.0,
            next_frame_due: 0.0,
            speed: 1.0,
            skip_requested: false,
        }
    }
}
