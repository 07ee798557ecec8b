//! Playlist document model.
//!
//! A playlist is a JSON tree of scenes, each holding the inputs that play
//! concurrently in it. Output descriptors are not interpreted here; they are
//! handed to the presentation layer as parsed.

use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::playback::flags::{DropPolicy, TimeSource};
use crate::playback::session::SessionOptions;
use crate::playlist::PlaylistError;

/// Root of a playlist file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistDocument {
    pub scene: Vec<SceneDescriptor>,
}

impl PlaylistDocument {
    pub fn from_json_str(text: &str) -> Result<Self, PlaylistError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PlaylistError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescriptor {
    #[serde(rename = "loop")]
    pub looping: bool,
    pub skippable: bool,
    pub input: Vec<InputDescriptor>,
}

impl Default for SceneDescriptor {
    fn default() -> Self {
        Self {
            looping: false,
            skippable: true,
            input: Vec::new(),
        }
    }
}

/// One session of a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputDescriptor {
    pub class: String,
    pub video: PathBuf,
    /// Empty means no sound
    pub sound: PathBuf,
    #[serde(rename = "startat")]
    pub start_at: f64,
    #[serde(rename = "endafter")]
    pub end_after: f64,
    pub speed: f64,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub skippable: bool,
    #[serde(rename = "blockgame")]
    pub blocks_host: bool,
    /// Non-positive or missing keeps the stream size
    pub width: Option<i64>,
    pub height: Option<i64>,
    #[serde(rename = "timesource")]
    pub time_source: TimeSource,
    #[serde(rename = "dropmode")]
    pub drop_policy: DropPolicy,
    pub output: Vec<OutputDescriptor>,
}

/// The only input class this crate can play.
pub const WEBM_INPUT_CLASS: &str = "inputwebm";

impl Default for InputDescriptor {
    fn default() -> Self {
        Self {
            class: WEBM_INPUT_CLASS.to_string(),
            video: PathBuf::new(),
            sound: PathBuf::new(),
            start_at: 0.0,
            end_after: 0.0,
            speed: 1.0,
            looping: false,
            skippable: true,
            blocks_host: false,
            width: None,
            height: None,
            time_source: TimeSource::DEFAULT_PLAYLIST,
            drop_policy: DropPolicy::DEFAULT,
            output: Vec::new(),
        }
    }
}

impl InputDescriptor {
    pub fn is_supported(&self) -> bool {
        self.class.eq_ignore_ascii_case(WEBM_INPUT_CLASS)
    }

    /// Session settings for this input, with media paths resolved against `base_dir`.
    pub fn session_options(&self, base_dir: &Path) -> SessionOptions {
        let size = |value: Option<i64>| value.filter(|v| *v > 0).and_then(|v| u32::try_from(v).ok());
        SessionOptions {
            video: resolve(base_dir, &self.video),
            sound: (!self.sound.as_os_str().is_empty()).then(|| resolve(base_dir, &self.sound)),
            looping: self.looping,
            skippable: self.skippable,
            blocks_host: self.blocks_host,
            time_source: self.time_source,
            drop_policy: self.drop_policy,
            start_at: self.start_at,
            end_after: self.end_after,
            width: size(self.width),
            height: size(self.height),
            speed: self.speed,
        }
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Where a session's picture goes on screen, in relative coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDescriptor {
    #[serde(rename = "soundsource")]
    pub sound_source: bool,
    #[serde(rename = "resizemode")]
    pub resize_mode: ResizeMode,
    #[serde(rename = "customar")]
    pub custom_aspect: f64,
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    pub angle: f64,
    pub rgba: [u8; 4],
    #[serde(rename = "backgroundrgba")]
    pub background_rgba: [u8; 4],
    #[serde(rename = "zorder")]
    pub z_order: ZOrder,
}

impl Default for OutputDescriptor {
    fn default() -> Self {
        Self {
            sound_source: true,
            resize_mode: ResizeMode::default(),
            custom_aspect: 0.0,
            top: 0.0,
            left: 0.0,
            width: 1.0,
            height: 1.0,
            angle: 0.0,
            rgba: [255, 255, 255, 255],
            background_rgba: [0, 0, 0, 255],
            z_order: ZOrder::default(),
        }
    }
}

/// Either an enum index or its name, as found in documents.
#[derive(Deserialize)]
#[serde(untagged)]
enum EnumRepr {
    Index(u64),
    Name(String),
}

macro_rules! document_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $index:literal => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "EnumRepr")]
        pub enum $name {
            $(#[serde(rename = $label)] $variant = $index),+
        }

        impl $name {
            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl TryFrom<EnumRepr> for $name {
            type Error = String;

            fn try_from(repr: EnumRepr) -> Result<Self, Self::Error> {
                match repr {
                    $(EnumRepr::Index($index) => Ok($name::$variant),)+
                    EnumRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                        $($label => Ok($name::$variant),)+
                        _ => Err(format!("unknown {} '{}'", stringify!($name), name)),
                    },
                    EnumRepr::Index(other) => Err(format!("unknown {} {}", stringify!($name), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

document_enum! {
    /// How the picture is fitted into its output rectangle
    ResizeMode {
        Original = 0 => "original",
        Stretch = 1 => "stretch",
        TouchInside = 2 => "touchinside",
        TouchOutside = 3 => "touchoutside",
    }
}

impl Default for ResizeMode {
    fn default() -> Self {
        ResizeMode::TouchInside
    }
}

document_enum! {
    /// Draw order relative to the host's menus
    ZOrder {
        BelowMenu = 0 => "belowmenu",
        AboveMenu = 1 => "abovemenu",
    }
}

impl Default for ZOrder {
    fn default() -> Self {
        ZOrder::BelowMenu
    }
}
