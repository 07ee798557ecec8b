pub mod codec;
pub mod container;
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod stream_info;

pub use codec::{create_codec, Codec, RawPlanarCodec};
pub use decoder::{DecodeError, FrameSource, OpenOptions, SourceEvent};
pub use frame::{PlanarImage, Plane};
pub use stream_info::{CodecKind, ContainerKind, StreamInfo};
