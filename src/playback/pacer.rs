//! Per-tick seek/drop/output decision.
//!
//! Given how far the clock moved, the pacer either seeks the source to the
//! target time, drops frames to catch up, outputs the next frame, or does
//! nothing. At most one seek-or-output happens per step.

use log::{debug, warn};
use crate::core::config::PlaybackConfig;
use crate::core::time::{round_half_up, EPSILON};
use crate::decode::decoder::{DecodeError, FrameSource};
use crate::decode::frame::PlanarImage;
use crate::playback::flags::DropPolicy;
use crate::playback::state::PacerState;

/// What the pacer drives: a frame source as seen from the pacing loop.
pub trait PacedSource {
    fn seek(&mut self, target: f64) -> Result<(), DecodeError>;

    fn read_frame(&mut self, drop_decode: bool, drop_output: bool) -> Result<Option<PlanarImage>, DecodeError>;

    /// Current position in seconds
    fn position(&self) -> f64;

    /// Effective end in seconds, `0.0` when unknown
    fn end(&self) -> f64;
}

impl PacedSource for FrameSource {
    fn seek(&mut self, target: f64) -> Result<(), DecodeError> {
        FrameSource::seek(self, target)
    }

    fn read_frame(&mut self, drop_decode: bool, drop_output: bool) -> Result<Option<PlanarImage>, DecodeError> {
        FrameSource::read_frame(self, drop_decode, drop_output)
    }

    fn position(&self) -> f64 {
        FrameSource::position(self)
    }

    fn end(&self) -> f64 {
        FrameSource::end(self)
    }
}

/// Result of one pacing step
#[derive(Debug, Clone, PartialEq)]
pub enum PaceOutcome {
    /// Ran past the end by more than the timeout; treat as end of stream
    Ended,
    /// Repositioned the source; nothing decoded this step
    Seeked { target: f64 },
    /// Frames were read. `frame` is the image to show, if one was produced
    Decoded { dropped: u32, frame: Option<PlanarImage> },
    /// Not yet time for another frame
    Idle,
}

/// Drift thresholds plus the corrective actions a session permits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacer {
    pub seek_threshold: f64,
    pub drop_threshold: f64,
    pub drop_max_duration: f64,
    pub end_timeout: f64,
    pub policy: DropPolicy,
}

impl Pacer {
    pub fn new(config: &PlaybackConfig, policy: DropPolicy) -> Self {
        Self {
            seek_threshold: config.seek_threshold,
            drop_threshold: config.drop_threshold,
            drop_max_duration: config.drop_max_duration,
            end_timeout: config.end_timeout,
            policy,
        }
    }

    /// Advance `state` by `delta` seconds of clock time and bring `source` in line.
    ///
    /// `host_delta` is the raw host tick, used to keep moving near the end
    /// when the selected clock has stalled.
    pub fn step<S: PacedSource + ?Sized>(
        &self,
        state: &mut PacerState,
        source: &mut S,
        delta: f64,
        host_delta: f64,
        frame_duration: f64,
    ) -> Result<PaceOutcome, DecodeError> {
        let mut delta = delta;
        let end = source.end();
        if end > EPSILON {
            if state.next_frame_due > end + self.end_timeout {
                debug!("Overshot end {:.3}s (next frame due {:.3}s)", end, state.next_frame_due);
                return Ok(PaceOutcome::Ended);
            }
            // Make sure the last frame is reached even if the clock stopped
            if end < state.next_frame_due + frame_duration && delta < EPSILON {
                delta = host_delta.max(EPSILON);
            }
        }

        state.target_time += delta.max(0.0);
        if frame_duration <= 0.0 || !frame_duration.is_finite() {
            return Ok(PaceOutcome::Idle);
        }

        let drift = state.drift();
        let mut frames = round_half_up(drift / frame_duration);
        let mut max_drop = round_half_up(self.drop_max_duration / frame_duration);

        if drift >= self.seek_threshold && self.policy.allows_seek() {
            debug!(
                "Seek: drift {:.3}s, {} frames behind, target {:.3}s",
                drift, frames, state.target_time
            );
            match source.seek(state.target_time) {
                Ok(()) => return Ok(PaceOutcome::Seeked { target: state.target_time }),
                Err(e) => warn!("Seek to {:.3}s failed, continuing without correction: {}", state.target_time, e),
            }
        }

        let mut dropped = 0;
        if drift >= self.drop_threshold && self.policy.allows_drop() {
            while frames > 1 && max_drop > 0 {
                source.read_frame(false, true)?;
                frames -= 1;
                max_drop -= 1;
                dropped += 1;
            }
            debug!("Dropped {} frames, drift {:.3}s", dropped, drift);
        }

        if frames >= 1 {
            let frame = source.read_frame(false, false)?;
            if frame.is_some() {
                state.next_frame_due = source.position() + frame_duration;
            }
            return Ok(PaceOutcome::Decoded { dropped, frame });
        }

        if dropped > 0 {
            Ok(PaceOutcome::Decoded { dropped, frame: None })
        } else {
            Ok(PaceOutcome::Idle)
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(&PlaybackConfig::default(), DropPolicy::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Seek(f64),
        Read { drop_decode: bool, drop_output: bool },
    }

    /// Constant-rate source that records every call.
    struct MockSource {
        pub fps: f64,
        pub frames: u64,
        pub next: u64,
        pub position: f64,
        pub fail_seek: bool,
        pub calls: Vec<Call>,
    }

    impl MockSource {
        pub fn new(fps: f64, frames: u64) -> Self {
            Self {
                fps,
                frames,
                next: 0,
                position: 0.0,
                fail_seek: false,
                calls: Vec::new(),
            }
        }

        fn count(&self, wanted: fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| wanted(c)).count()
        }

        pub fn seeks(&self) -> usize {
            self.count(|c| matches!(c, Call::Seek(_)))
        }

        pub fn drops(&self) -> usize {
            self.count(|c| matches!(c, Call::Read { drop_output: true, .. }))
        }

        pub fn outputs(&self) -> usize {
            self.count(|c| matches!(c, Call::Read { drop_output: false, .. }))
        }
    }

    impl PacedSource for MockSource {
        fn seek(&mut self, target: f64) -> Result<(), DecodeError> {
            self.calls.push(Call::Seek(target));
            if self.fail_seek {
                return Err(DecodeError::SeekUnsupported);
            }
            self.next = (target * self.fps) as u64;
            self.position = target;
            Ok(())
        }

        fn read_frame(&mut self, drop_decode: bool, drop_output: bool) -> Result<Option<PlanarImage>, DecodeError> {
            self.calls.push(Call::Read { drop_decode, drop_output });
            if self.next >= self.frames {
                return Ok(None);
            }
            self.position = self.next as f64 / self.fps;
            self.next += 1;
            Ok((!drop_output).then(|| PlanarImage::from_i420(2, 2, &[self.next as u8; 6])).flatten())
        }

        fn position(&self) -> f64 {
            self.position
        }

        fn end(&self) -> f64 {
            self.frames as f64 / self.fps
        }
    }

    const FD: f64 = 0.04;

    fn steady(source: &mut MockSource, pacer: &Pacer) -> PacerState {
        let mut state = PacerState::default();
        state.reset(0.0, FD);
        for _ in 0..5 {
            pacer.step(&mut state, source, FD, FD, FD).unwrap();
        }
        source.calls.clear();
        state
    }

    #[test]
    fn test_outputs_one_frame_per_period() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 100);
        let mut state = PacerState::default();
        state.reset(0.0, FD);

        let outcome = pacer.step(&mut state, &mut source, 0.0, 0.0, FD).unwrap();
        assert!(matches!(outcome, PaceOutcome::Decoded { dropped: 0, frame: Some(_) }));
        assert!((state.next_frame_due - FD).abs() < 1e-9);

        // half a frame later nothing is due
        let outcome = pacer.step(&mut state, &mut source, 0.01, 0.01, FD).unwrap();
        assert_eq!(outcome, PaceOutcome::Idle);
        assert_eq!(source.outputs(), 1);
    }

    #[test]
    fn test_drop_threshold_catches_up() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 1000);
        let mut state = steady(&mut source, &pacer);

        pacer.step(&mut state, &mut source, 0.5, 0.5, FD).unwrap();
        assert!(source.drops() >= 1);
        assert_eq!(source.outputs(), 1);
        assert_eq!(source.seeks(), 0);
        assert!(state.drift() < pacer.drop_threshold);
    }

    #[test]
    fn test_drop_bounded_by_budget() {
        let pacer = Pacer {
            drop_max_duration: 0.2,
            ..Pacer::default()
        };
        let mut source = MockSource::new(25.0, 1000);
        let mut state = steady(&mut source, &pacer);

        pacer.step(&mut state, &mut source, 2.0, 2.0, FD).unwrap();
        assert_eq!(source.drops(), 5);
        assert_eq!(source.outputs(), 1);
    }

    #[test]
    fn test_seek_threshold_jumps() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 1000);
        let mut state = steady(&mut source, &pacer);
        let target = state.target_time + 10.0;

        let outcome = pacer.step(&mut state, &mut source, 10.0, 0.02, FD).unwrap();
        assert_eq!(outcome, PaceOutcome::Seeked { target });
        assert_eq!(source.seeks(), 1);
        assert_eq!(source.outputs(), 0);
        assert_eq!(source.drops(), 0);
    }

    #[test]
    fn test_failed_seek_falls_through_to_drop() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 1000);
        let mut state = steady(&mut source, &pacer);
        source.fail_seek = true;

        let outcome = pacer.step(&mut state, &mut source, 10.0, 0.02, FD).unwrap();
        assert!(matches!(outcome, PaceOutcome::Decoded { dropped: 25, .. }));
        assert_eq!(source.seeks(), 1);
        assert_eq!(source.outputs(), 1);
    }

    #[test]
    fn test_no_correction_policy_falls_behind() {
        let pacer = Pacer {
            policy: DropPolicy::empty(),
            ..Pacer::default()
        };
        let mut source = MockSource::new(25.0, 10_000);
        let mut state = steady(&mut source, &pacer);

        let mut lag = state.target_time - state.next_frame_due;
        for _ in 0..20 {
            pacer.step(&mut state, &mut source, 0.2, 0.2, FD).unwrap();
            let now = state.target_time - state.next_frame_due;
            assert!(now > lag);
            lag = now;
        }
        assert_eq!(source.seeks(), 0);
        assert_eq!(source.drops(), 0);
        assert_eq!(source.outputs(), 20);
    }

    #[test]
    fn test_overshoot_ends() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 25);
        let mut state = PacerState {
            next_frame_due: 2.5,
            target_time: 2.5,
            ..PacerState::default()
        };
        let outcome = pacer.step(&mut state, &mut source, 0.04, 0.04, FD).unwrap();
        assert_eq!(outcome, PaceOutcome::Ended);
        assert!(source.calls.is_empty());
    }

    #[test]
    fn test_stalled_clock_still_reaches_last_frame() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 25);
        let mut state = PacerState::default();
        state.reset(0.96, FD);
        state.next_frame_due = 0.98;
        source.next = 24;
        source.position = 0.92;

        // zero clock delta, but the host is still ticking
        let before = state.target_time;
        pacer.step(&mut state, &mut source, 0.0, 0.05, FD).unwrap();
        assert!((state.target_time - before - 0.05).abs() < 1e-9);
        assert_eq!(source.outputs(), 1);
    }

    #[test]
    fn test_negative_delta_ignored() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 1000);
        let mut state = steady(&mut source, &pacer);
        let before = state.target_time;
        pacer.step(&mut state, &mut source, -0.5, 0.02, FD).unwrap();
        assert_eq!(state.target_time, before);
    }

    #[test]
    fn test_end_of_stream_keeps_due_time() {
        let pacer = Pacer::default();
        let mut source = MockSource::new(25.0, 1);
        let mut state = PacerState::default();
        state.reset(0.0, FD);
        pacer.step(&mut state, &mut source, 0.0, 0.0, FD).unwrap();
        let due = state.next_frame_due;

        let outcome = pacer.step(&mut state, &mut source, 0.08, 0.08, FD).unwrap();
        assert_eq!(outcome, PaceOutcome::Decoded { dropped: 0, frame: None });
        assert_eq!(state.next_frame_due, due);
    }
}
