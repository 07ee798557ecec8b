pub mod sink;

pub use sink::{AudioBackend, AudioSink, SyncedAudio};
