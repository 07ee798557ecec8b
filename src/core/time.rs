//! Time representation shared by the demuxers and the pacing core.
//!
//! Containers carry timestamps as integer nanoseconds ([`Time`]); the pacer and
//! the session work in `f64` seconds. Conversions between the two live here.

use std::fmt;

/// Container timestamp in nanoseconds since stream origin
pub type Time = i64;

/// Time constants for conversions
pub mod constants {
    use super::Time;

    pub const NANOS_PER_SECOND: Time = 1_000_000_000;
    pub const NANOS_PER_MILLI: Time = 1_000_000;
    pub const NANOS_PER_MICRO: Time = 1_000;
}

/// Smallest meaningful time step in seconds; trims and positions below it count as zero
pub const EPSILON: f64 = 0.001;

/// Convert seconds (f64) to nanoseconds (i64)
#[inline]
pub fn from_seconds(seconds: f64) -> Time {
    (seconds * constants::NANOS_PER_SECOND as f64) as Time
}

/// Convert nanoseconds (i64) to seconds (f64)
#[inline]
pub fn to_seconds(nanos: Time) -> f64 {
    nanos as f64 / constants::NANOS_PER_SECOND as f64
}

/// Convert nanoseconds to milliseconds
#[inline]
pub fn to_millis(nanos: Time) -> i64 {
    nanos / constants::NANOS_PER_MILLI
}

/// Rescale `value` expressed in units of `num/den` seconds to nanoseconds.
///
/// Uses i128 intermediates so large IVF/WebM timestamps don't overflow.
pub fn rescale_to_nanos(value: i64, num: u64, den: u64) -> Time {
    if den == 0 {
        return 0;
    }
    let nanos = value as i128 * num as i128 * constants::NANOS_PER_SECOND as i128 / den as i128;
    nanos.clamp(i64::MIN as i128, i64::MAX as i128) as Time
}

/// Round-half-up of a non-negative ratio, as used for frame counting.
#[inline]
pub fn round_half_up(value: f64) -> u32 {
    if value <= 0.0 || !value.is_finite() {
        return 0;
    }
    (0.5 + value) as u32
}

/// Frame rate as an exact rational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Frames per second as a float; `0.0` for a degenerate rate.
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Seconds per frame; `0.0` for a degenerate rate.
    pub fn frame_duration(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.den as f64 / self.num as f64
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl Default for Rational {
    /// 30/1, used whenever a container gives no usable rate
    fn default() -> Self {
        Self::new(30, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Format seconds as HH:MM:SS.mmm (log output)
pub fn format_time(seconds: f64) -> String {
    let nanos = from_seconds(seconds.max(0.0));
    let total_seconds = to_seconds(nanos);
    let hours = (total_seconds / 3600.0).floor() as i64;
    let minutes = ((total_seconds % 3600.0) / 60.0).floor() as i64;
    let secs = (total_seconds % 60.0).floor() as i64;
    let millis = to_millis(nanos) % 1000;

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_conversion() {
        let time = from_seconds(1.5);
        assert_eq!(time, 1_500_000_000);
        assert!((to_seconds(time) - 1.5).abs() < 0.000001);
    }

    #[test]
    fn test_rescale_ivf_units() {
        // 25 fps IVF: pts counted in 1/25 s
        assert_eq!(rescale_to_nanos(25, 1, 25), 1_000_000_000);
        // WebM default timecode scale: 1 ms units
        assert_eq!(rescale_to_nanos(40, 1_000_000, 1_000_000_000), 40_000_000);
        assert_eq!(rescale_to_nanos(7, 1, 0), 0);
    }

    #[test]
    fn test_rescale_large_values() {
        let big = i64::MAX / 2;
        assert_eq!(rescale_to_nanos(big, 1, constants::NANOS_PER_SECOND as u64), big);
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(0.49), 0);
        assert_eq!(round_half_up(0.5), 1);
        assert_eq!(round_half_up(12.5), 13);
        assert_eq!(round_half_up(-3.0), 0);
        assert_eq!(round_half_up(f64::NAN), 0);
    }

    #[test]
    fn test_rational() {
        let rate = Rational::new(25, 1);
        assert_eq!(rate.as_f64(), 25.0);
        assert!((rate.frame_duration() - 0.04).abs() < 1e-12);
        assert!(rate.is_valid());
        assert!(!Rational::new(0, 1).is_valid());
        assert_eq!(Rational::new(0, 1).frame_duration(), 0.0);
        assert_eq!(Rational::default(), Rational::new(30, 1));
        assert_eq!(Rational::new(30000, 1001).to_string(), "30000/1001");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(3661.5), "01:01:01.500");
        assert_eq!(format_time(-2.0), "00:00:00.000");
    }
}
