//! Typed flag sets for clock selection and drift correction.
//!
//! Both accept either their integer bit value or `|`-separated names when
//! deserialized, so playlist documents can write `"sound|systemtime"` or `6`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $flag:ident = $bits:expr, $label:literal; )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self($bits); )+

            const NAMED: &'static [(&'static str, Self)] = &[$( ($label, Self::$flag) ),+];

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn bits(&self) -> u32 {
                self.0
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            /// True when every bit of `other` is set.
            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0 && other.0 != 0
            }

            /// True when any bit of `other` is set.
            pub const fn intersects(&self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Parse `|`-separated, case-insensitive flag names or a decimal bit value.
            pub fn parse(text: &str) -> Option<Self> {
                let text = text.trim();
                if let Ok(bits) = text.parse::<u32>() {
                    return Some(Self(bits));
                }
                let mut flags = Self::empty();
                for part in text.split('|').map(str::trim).filter(|p| !p.is_empty()) {
                    let (_, flag) = Self::NAMED
                        .iter()
                        .find(|(label, _)| label.eq_ignore_ascii_case(part))?;
                    flags |= *flag;
                }
                Some(flags)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let names: Vec<&str> = Self::NAMED
                    .iter()
                    .filter(|(_, flag)| self.contains(*flag))
                    .map(|(label, _)| *label)
                    .collect();
                if names.is_empty() {
                    write!(f, "{}", self.0)
                } else {
                    f.write_str(&names.join("|"))
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u32(self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct FlagVisitor;

                impl<'de> Visitor<'de> for FlagVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("an integer or `|`-separated flag names")
                    }

                    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                        u32::try_from(value)
                            .map($name::from_bits)
                            .map_err(|_| E::custom(format!("flag value {} out of range", value)))
                    }

                    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                        u32::try_from(value)
                            .map($name::from_bits)
                            .map_err(|_| E::custom(format!("flag value {} out of range", value)))
                    }

                    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                        $name::parse(value)
                            .ok_or_else(|| E::custom(format!("unknown flag in {:?}", value)))
                    }
                }

                deserializer.deserialize_any(FlagVisitor)
            }
        }
    };
}

flag_set! {
    /// Clock preference for a session. Several sources may be set; the
    /// arbiter picks one each tick and falls back when a source is unhealthy.
    TimeSource {
        /// Host-supplied tick delta
        GAME_TIME = 1 << 0, "gametime";
        /// Position of the synchronized audio sink
        SOUND = 1 << 1, "sound";
        /// Wall clock, for hosts whose tick cannot be trusted
        SYSTEM_TIME = 1 << 2, "systemtime";
        LIVE = 1 << 3, "live";
    }
}

impl TimeSource {
    /// Sessions opened directly
    pub const DEFAULT: Self = Self(Self::GAME_TIME.0 | Self::SOUND.0);
    /// Sessions opened from a playlist document
    pub const DEFAULT_PLAYLIST: Self = Self(Self::SYSTEM_TIME.0 | Self::SOUND.0);

    /// Live sources follow the wall clock.
    pub fn uses_wall_clock(&self) -> bool {
        self.intersects(Self::SYSTEM_TIME | Self::LIVE)
    }
}

flag_set! {
    /// Corrective actions a session may take when it falls behind its clock.
    DropPolicy {
        /// Decode frames without showing them
        DROP = 1 << 0, "drop";
        /// Jump straight to the target time
        SEEK = 1 << 1, "seek";
        /// Decode frames but skip output
        DROP_OUTPUT = 1 << 2, "dropoutput";
        LIVE = 1 << 3, "live";
    }
}

impl DropPolicy {
    pub const DEFAULT: Self = Self(Self::DROP_OUTPUT.0 | Self::SEEK.0);

    pub fn allows_seek(&self) -> bool {
        self.intersects(Self::SEEK | Self::LIVE)
    }

    pub fn allows_drop(&self) -> bool {
        self.intersects(Self::DROP | Self::DROP_OUTPUT | Self::LIVE)
    }
}
