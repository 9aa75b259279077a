//! # Sprig Graphics
//!
//! Double-buffered 2D renderer core: frame pacing, transient GPU memory,
//! binding tables and pipeline caching over an abstract GPU device.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Graphics`] - The renderer context: images, frames and draws
//! - [`GpuDevice`] - Trait the native graphics backends implement
//! - [`FrameScheduler`] - Two frames in flight, fence-paced slot reuse
//! - [`PipelineCache`] - Lazily built pipelines keyed by composite mode and target
//! - [`BindingTable`] - Per-draw regions of one fixed-size view table
//! - Backends: Dummy (for testing) and Vulkan
//!
//! ## Example
//!
//! ```ignore
//! use sprig_graphics::{Graphics, GraphicsConfig, DummyDevice};
//!
//! let mut graphics = Graphics::new(DummyDevice::new(), GraphicsConfig::default())?;
//! let image = graphics.new_image(64, 64)?;
//! graphics.begin_frame()?;
//! // replace_pixels, set_vertices, draw_triangles...
//! graphics.end_frame(false)?;
//! ```

pub mod backend;
pub mod binding;
pub mod config;
pub mod error;
pub mod graphics;
pub mod pipeline;
pub mod resources;
pub mod scheduler;
pub mod shader;
pub mod types;

// Re-export main types for convenience
#[cfg(feature = "dummy")]
pub use backend::dummy::DummyDevice;
#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanDevice;
pub use backend::{GpuDevice, SurfaceTarget};
pub use binding::BindingTable;
pub use config::{FRAMES_IN_FLIGHT, GraphicsConfig};
pub use error::GraphicsError;
pub use graphics::{Graphics, PixelRegion};
pub use pipeline::{PipelineCache, PipelineEntry, PipelineKey};
pub use resources::ImageId;
pub use scheduler::{FrameScheduler, SlotState};
pub use types::{BlendOperation, CompositeMode, Region, Vertex};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "dummy")]
static_assertions::assert_impl_all!(Graphics<DummyDevice>: Send);
static_assertions::assert_impl_all!(PipelineEntry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_graphics_creation() {
        let graphics = Graphics::new(DummyDevice::new(), GraphicsConfig::default()).unwrap();
        assert!(!graphics.is_recording());
        assert!(graphics.pipeline_cache().is_empty());
    }
}
