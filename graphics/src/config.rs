//! Renderer configuration.

use std::time::Duration;

use crate::error::GraphicsError;

/// Number of frame slots. CPU recording of one slot overlaps GPU execution of the other.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Configuration for a [`Graphics`](crate::Graphics) context.
///
/// # Example
///
/// ```ignore
/// let config = GraphicsConfig::new()
///     .with_max_draws_per_frame(512)
///     .with_vsync(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsConfig {
    /// Draw calls allowed per frame slot before the binding table runs out.
    pub max_draws_per_frame: u32,
    /// Upper bound on every blocking fence wait.
    pub fence_timeout: Duration,
    /// Vertices a single `set_vertices` batch may hold.
    pub max_vertices: u32,
    /// Indices a single `set_vertices` batch may hold.
    pub max_indices: u32,
    /// Largest accepted image edge, in pixels.
    pub max_image_size: u32,
    /// Transient buffers of one kind a frame slot may hold.
    pub max_transient_buffers_per_slot: usize,
    /// Wait for vertical blank on present.
    pub vsync: bool,
    /// Enable native API validation where the backend supports it.
    pub validation: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            max_draws_per_frame: 256,
            fence_timeout: Duration::from_secs(10),
            max_vertices: 1 << 16,
            max_indices: (1 << 16) / 3 * 3,
            max_image_size: 4096,
            max_transient_buffers_per_slot: 1024,
            vsync: true,
            validation: cfg!(debug_assertions),
        }
    }
}

impl GraphicsConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-frame draw budget.
    pub fn with_max_draws_per_frame(mut self, draws: u32) -> Self {
        self.max_draws_per_frame = draws;
        self
    }

    /// Set the fence wait timeout.
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// Set the vertex and index capacity of one geometry batch.
    pub fn with_batch_capacity(mut self, vertices: u32, indices: u32) -> Self {
        self.max_vertices = vertices;
        self.max_indices = indices;
        self
    }

    /// Set the largest accepted image edge.
    pub fn with_max_image_size(mut self, size: u32) -> Self {
        self.max_image_size = size;
        self
    }

    /// Set the transient buffer budget per slot and kind.
    pub fn with_max_transient_buffers(mut self, count: usize) -> Self {
        self.max_transient_buffers_per_slot = count;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Reject configurations no frame could be rendered with.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.max_draws_per_frame == 0 {
            return Err(GraphicsError::state("max_draws_per_frame must be non-zero"));
        }
        if self.fence_timeout.is_zero() {
            return Err(GraphicsError::state("fence_timeout must be non-zero"));
        }
        if self.max_vertices == 0 || self.max_indices == 0 {
            return Err(GraphicsError::state("batch capacity must be non-zero"));
        }
        // Indices are u16.
        if self.max_vertices > 1 << 16 {
            return Err(GraphicsError::state(format!(
                "max_vertices {} is not addressable with 16-bit indices",
                self.max_vertices
            )));
        }
        if self.max_image_size == 0 || self.max_transient_buffers_per_slot == 0 {
            return Err(GraphicsError::state(
                "image size and transient buffer limits must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = GraphicsConfig::default();
        assert_eq!(config.max_draws_per_frame, 256);
        assert_eq!(config.fence_timeout, Duration::from_secs(10));
        assert_eq!(config.max_indices % 3, 0);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::no_draws(GraphicsConfig::new().with_max_draws_per_frame(0))]
    #[case::zero_timeout(GraphicsConfig::new().with_fence_timeout(Duration::ZERO))]
    #[case::empty_batch(GraphicsConfig::new().with_batch_capacity(0, 3))]
    #[case::wide_vertices(GraphicsConfig::new().with_batch_capacity(70_000, 3))]
    #[case::no_images(GraphicsConfig::new().with_max_image_size(0))]
    fn test_invalid_configs_rejected(#[case] config: GraphicsConfig) {
        assert!(matches!(config.validate(), Err(GraphicsError::State(_))));
    }
}
