//! Clock arbitration, frame pacing and the playback session built on them.

pub mod flags;
pub mod pacer;
pub mod session;
pub mod state;
pub mod sync;

pub use flags::{DropPolicy, TimeSource};
pub use pacer::{PaceOutcome, PacedSource, Pacer};
pub use session::{PlaybackError, PlaybackSession, SessionEvent, SessionId, SessionOptions};
pub use state::{PacerState, SessionStatus};
pub use sync::{Resolution, TickInput, TimeArbiter, WallSample, WallTimer};
