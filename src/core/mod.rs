//! Core types shared by every subsystem.
//!
//! Time representation, frame-rate rationals, and the pacing configuration.

pub mod config;
pub mod time;

pub use config::{ConfigError, PlaybackConfig, PlaybackMode};
pub use time::{Rational, Time};
