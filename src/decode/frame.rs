//! Decoded planar images handed to the renderer.

/// One image plane with its row stride in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

impl Plane {
    /// Row `y` without the stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize]
    }
}

/// Decoded 4:2:0 image: Y, U, V and an optional full-size alpha plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanarImage {
    pub width: u32,
    pub height: u32,
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
    pub alpha: Option<Plane>,
}

impl PlanarImage {
    /// Byte size of a tightly packed I420 image, without and with alpha.
    pub fn i420_sizes(width: u32, height: u32) -> (usize, usize) {
        let luma = width as usize * height as usize;
        let chroma = chroma_dim(width) as usize * chroma_dim(height) as usize;
        let base = luma + 2 * chroma;
        (base, base + luma)
    }

    /// Split a tightly packed I420 (+alpha) buffer into planes.
    ///
    /// Returns `None` if `bytes` matches neither layout.
    pub fn from_i420(width: u32, height: u32, bytes: &[u8]) -> Option<Self> {
        let (base, with_alpha) = Self::i420_sizes(width, height);
        if bytes.len() != base && bytes.len() != with_alpha {
            return None;
        }
        let luma = width as usize * height as usize;
        let (cw, ch) = (chroma_dim(width), chroma_dim(height));
        let chroma = cw as usize * ch as usize;

        let plane = |offset: usize, len: usize, w: u32, h: u32| Plane {
            data: bytes[offset..offset + len].to_vec(),
            stride: w as usize,
            width: w,
            height: h,
        };

        Some(Self {
            width,
            height,
            y: plane(0, luma, width, height),
            u: plane(luma, chroma, cw, ch),
            v: plane(luma + chroma, chroma, cw, ch),
            alpha: (bytes.len() == with_alpha).then(|| plane(base, luma, width, height)),
        })
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }
}

#[inline]
fn chroma_dim(value: u32) -> u32 {
    (value + 1) / 2
}
