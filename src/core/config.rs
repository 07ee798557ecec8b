//! Pacing thresholds and playback mode, loadable from JSON.

use std::path::Path;
use serde::{Deserialize, Serialize};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How playback behaves while the host is in an editing mode.
///
/// Only [`PlaybackMode::KeepPlaying`] turns on editor playback, where wall time
/// drives every session regardless of its configured time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    #[default]
    Default,
    Restore,
    DontRestore,
    KeepPlaying,
}

/// Thresholds steering the frame pacer. All values in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Drift at which the pacer seeks instead of decoding
    pub seek_threshold: f64,
    /// Drift at which the pacer starts dropping frames
    pub drop_threshold: f64,
    /// Upper bound on media time dropped within one tick
    pub drop_max_duration: f64,
    /// Overshoot past the end (or audio lagging behind) treated as end of stream
    pub end_timeout: f64,
    pub playback_mode: PlaybackMode,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            seek_threshold: 5.0,
            drop_threshold: 0.1,
            drop_max_duration: 1.0,
            end_timeout: 1.0,
            playback_mode: PlaybackMode::Default,
        }
    }
}

impl PlaybackConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("seek_threshold", self.seek_threshold),
            ("drop_threshold", self.drop_threshold),
            ("drop_max_duration", self.drop_max_duration),
            ("end_timeout", self.end_timeout),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlaybackConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.seek_threshold, 5.0);
        assert_eq!(config.drop_threshold, 0.1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PlaybackConfig::from_json_str(
            r#"{ "seek_threshold": 2.5, "playback_mode": "keep_playing" }"#,
        )
        .unwrap();
        assert_eq!(config.seek_threshold, 2.5);
        assert_eq!(config.drop_threshold, 0.1);
        assert_eq!(config.playback_mode, PlaybackMode::KeepPlaying);
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let err = PlaybackConfig::from_json_str(r#"{ "drop_threshold": -1.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_non_finite_timeout() {
        let config = PlaybackConfig {
            end_timeout: f64::INFINITY,
            ..PlaybackConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json() {
        let err = PlaybackConfig::from_json_str("{ seek_threshold").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "drop_max_duration": 0.5 }}"#).unwrap();
        let config = PlaybackConfig::load(file.path()).unwrap();
        assert_eq!(config.drop_max_duration, 0.5);
    }

    #[test]
    fn test_load_missing_file() {
        let err = PlaybackConfig::load("/nonexistent/framepace.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
