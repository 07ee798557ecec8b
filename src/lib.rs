//! framepace: paced video playback against host, wall-clock or audio time.
//!
//! A [`PlaybackSession`] owns one [`FrameSource`] and decides on every host
//! tick whether to seek, drop frames or show the next frame. A [`Playlist`]
//! sequences scenes of concurrent sessions. Both share one
//! [`PlaybackContext`], normally owned by a [`PlaybackSystem`].

pub mod audio;
pub mod core;
pub mod decode;
pub mod playback;
pub mod playlist;
pub mod render;
pub mod system;

pub use crate::core::config::{ConfigError, PlaybackConfig, PlaybackMode};
pub use crate::decode::{DecodeError, FrameSource, OpenOptions, PlanarImage, SourceEvent};
pub use crate::playback::{DropPolicy, PlaybackError, PlaybackSession, SessionEvent, SessionId, SessionOptions, TimeSource};
pub use crate::playlist::{Playlist, PlaylistError, PlaylistEvent, PlaylistOptions};
pub use crate::system::{PlaybackContext, PlaybackSystem};
