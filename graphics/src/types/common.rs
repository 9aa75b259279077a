//! Common types shared across the graphics system.

use bytemuck::{Pod, Zeroable};

// ============================================================================
// Viewport
// ============================================================================

/// Viewport configuration for a draw.
///
/// Sprig draws 2D geometry in pixel space, so the viewport always covers the
/// whole destination image with the `[0, 1]` depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// X coordinate of the viewport's top-left corner.
    pub x: f32,
    /// Y coordinate of the viewport's top-left corner.
    pub y: f32,
    /// Width of the viewport.
    pub width: f32,
    /// Height of the viewport.
    pub height: f32,
    /// Minimum depth value.
    pub min_depth: f32,
    /// Maximum depth value.
    pub max_depth: f32,
}

impl Viewport {
    /// Create a viewport from dimensions with origin at (0, 0).
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

// ============================================================================
// Region
// ============================================================================

/// Pixel rectangle with its origin at the top-left corner.
///
/// Used as the scissor of a draw and as the target area of a pixel upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    /// X coordinate of the top-left corner.
    pub x: u32,
    /// Y coordinate of the top-left corner.
    pub y: u32,
    /// Width of the rectangle.
    pub width: u32,
    /// Height of the rectangle.
    pub height: u32,
}

impl Region {
    /// Create a new region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering `width × height` from the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Whether the region covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region lies inside a `width × height` surface.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x
            .checked_add(self.width)
            .is_some_and(|right| right <= width)
            && self
                .y
                .checked_add(self.height)
                .is_some_and(|bottom| bottom <= height)
    }
}

// ============================================================================
// Formats and states
// ============================================================================

/// Color formats a render target can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// 8-bit RGBA, the format of every offscreen image.
    #[default]
    Rgba8Unorm,
    /// 8-bit BGRA, common for swap chains.
    Bgra8Unorm,
}

impl TextureFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> u32 {
        4
    }
}

/// Access state of a GPU image.
///
/// Every image is in exactly one of these at any point of the recorded command
/// stream; moving between them requires a transition barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Sampled by a fragment shader.
    ShaderReadable,
    /// Written as a color attachment.
    RenderTarget,
    /// Handed to the presentation engine.
    Present,
    /// Destination of a buffer-to-texture copy.
    CopyDest,
    /// Source of a texture-to-buffer copy.
    CopySource,
}

// ============================================================================
// Vertex and constant layouts
// ============================================================================

/// One vertex of a 2D triangle batch.
///
/// Coordinates are in destination pixels; color is straight (not
/// premultiplied) alpha and gets premultiplied by the vertex program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    /// Byte stride of one vertex in a vertex buffer.
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(position: [f32; 2], tex_coord: [f32; 2], color: [f32; 4]) -> Self {
        Self {
            position,
            tex_coord,
            color,
        }
    }
}

/// Size of one index in an index buffer.
pub const INDEX_SIZE: u32 = std::mem::size_of::<u16>() as u32;

/// Size of the per-draw constant block.
pub const CONSTANT_BUFFER_SIZE: u64 = 256;

/// Per-draw shader constants, stored at the start of a constant block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ShaderParameters {
    /// Destination size in pixels, used to build the orthographic projection.
    pub viewport_size: [f32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<Vertex>(), 32);
static_assertions::const_assert!(
    std::mem::size_of::<ShaderParameters>() as u64 <= CONSTANT_BUFFER_SIZE
);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::full(Region::from_size(64, 64), true)]
    #[case::inner(Region::new(10, 20, 30, 40), true)]
    #[case::past_right(Region::new(60, 0, 5, 1), false)]
    #[case::past_bottom(Region::new(0, 64, 1, 1), false)]
    #[case::overflow(Region::new(u32::MAX, 0, 2, 1), false)]
    fn test_region_fits(#[case] region: Region, #[case] fits: bool) {
        assert_eq!(region.fits_within(64, 64), fits);
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(Vertex::STRIDE, 32);
        let vertex = Vertex::new([1.0, 2.0], [0.5, 0.5], [1.0, 0.0, 0.0, 1.0]);
        let bytes: &[u8] = bytemuck::bytes_of(&vertex);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[16..20], &1.0f32.to_ne_bytes());
    }
}
