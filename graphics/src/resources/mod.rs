//! GPU resources owned by the renderer.
//!
//! - [`TransientBufferPool`] - per-frame-slot arena of upload buffers
//! - [`GpuImage`] - an image with its backing texture(s) and tracked access state

mod image;
mod transient;

pub use image::{GpuImage, ImageBacking, ImageId, TrackedTexture, internal_image_size};
pub use transient::{TransientBuffer, TransientBufferPool, TransientKind};
