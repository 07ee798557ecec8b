//! Renderer-facing interface for decoded frames.
//! Colour conversion and texture upload happen on the other side of [`FrameSink`].

use crate::decode::frame::PlanarImage;

/// Error type for frame hand-off
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Render resource {0} was already released")]
    Released(u32),
}

/// Receives at most one decoded image per session per tick.
pub trait FrameSink: Send {
    fn upload_frame(&mut self, image: &PlanarImage) -> Result<(), RenderError>;
}

/// Reject images whose planes cannot hold their stated dimensions.
pub fn validate_frame(image: &PlanarImage) -> Result<(), RenderError> {
    if image.width == 0 || image.height == 0 {
        return Err(RenderError::InvalidFrame(format!(
            "zero dimensions {}x{}",
            image.width, image.height
        )));
    }
    let planes = [("Y", Some(&image.y)), ("U", Some(&image.u)), ("V", Some(&image.v)), ("A", image.alpha.as_ref())];
    for (name, plane) in planes {
        let Some(plane) = plane else {
            continue;
        };
        let needed = plane.stride * plane.height.saturating_sub(1) as usize + plane.width as usize;
        if plane.stride < plane.width as usize || plane.data.len() < needed {
            return Err(RenderError::InvalidFrame(format!(
                "{} plane holds {} bytes, {}x{} with stride {} needs {}",
                name,
                plane.data.len(),
                plane.width,
                plane.height,
                plane.stride,
                needed
            )));
        }
    }
    Ok(())
}
