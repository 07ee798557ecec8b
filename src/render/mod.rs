pub mod renderer;
pub mod resources;

pub use renderer::{validate_frame, FrameSink, RenderError};
pub use resources::{QueuedFrameSink, ResourceId, ResourceQueue, ResourceUpdate};
