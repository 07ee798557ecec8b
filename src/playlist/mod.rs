pub mod document;
pub mod playlist;
pub mod scene;

pub use document::{InputDescriptor, OutputDescriptor, PlaylistDocument, ResizeMode, SceneDescriptor, ZOrder};
pub use playlist::{Playlist, PlaylistError, PlaylistEvent, PlaylistId, PlaylistOptions, PlaylistStatus};
pub use scene::Scene;
