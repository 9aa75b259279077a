//! Pipeline state cache.
//!
//! Every draw runs against a pipeline chosen by a [`PipelineKey`]: the
//! composite mode of the draw and whether it targets the screen. The key space
//! is small and closed (`CompositeMode::ALL.len() × 2`), so entries are built
//! lazily on first use and kept for the lifetime of the renderer.
//!
//! # Building an entry
//!
//! ```text
//! get_or_build(key)
//!     │
//!     ├── cached? ──────────────────────────────► Arc<PipelineEntry>
//!     │
//!     ▼
//! ┌──────────────────────┐
//! │ 1. binding layout    │  constants | textures ×4 | sampler
//! ├──────────────────────┤
//! │ 2. shader program    │  WGSL → SPIR-V (naga)
//! ├──────────────────────┤
//! │ 3. blend state       │  (src, dst) operations → native factors
//! ├──────────────────────┤
//! │ 4. rasterizer state  │  solid, no culling, no depth clip, 1 sample
//! ├──────────────────────┤
//! │ 5. pipeline object   │  one color target in the key's format
//! └──────────────────────┘
//! ```
//!
//! A failure at any step releases what the build created so far and nothing
//! is inserted into the cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{
    BindingLayoutHandle, BlendEquation, BlendFactor, BlendState, GpuDevice, PipelineDescriptor,
    PipelineHandle, RasterizerState, ShaderStageDescriptor,
};
use crate::binding;
use crate::error::GraphicsError;
use crate::shader::{
    self, FRAGMENT_ENTRY_POINT, SPRITE_SHADER_SOURCE, VERTEX_ENTRY_POINT,
};
use crate::types::{CompositeMode, TextureFormat, Vertex};

/// Lookup key of a cached pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipelineKey {
    pub composite_mode: CompositeMode,
    /// Whether the pipeline renders into the swap chain.
    pub screen: bool,
}

impl PipelineKey {
    pub fn new(composite_mode: CompositeMode, screen: bool) -> Self {
        Self {
            composite_mode,
            screen,
        }
    }
}

/// Fixed-function state and the device pipeline built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledState {
    pub pipeline: PipelineHandle,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub target_format: TextureFormat,
}

/// A fully built pipeline. Immutable once cached.
#[derive(Debug, PartialEq, Eq)]
pub struct PipelineEntry {
    pub binding_layout: BindingLayoutHandle,
    pub vertex_program: Vec<u32>,
    pub fragment_program: Vec<u32>,
    pub state: CompiledState,
}

/// Blend state of `mode`, identical for color and alpha.
pub fn blend_state(mode: CompositeMode) -> BlendState {
    let (src, dst) = mode.operations();
    let src = BlendFactor::from(src);
    let dst = BlendFactor::from(dst);
    BlendState {
        src_color: src,
        dst_color: dst,
        color_equation: BlendEquation::Add,
        src_alpha: src,
        dst_alpha: dst,
        alpha_equation: BlendEquation::Add,
    }
}

/// Process-lifetime cache of pipelines, keyed by [`PipelineKey`].
///
/// Only the recording thread touches the cache, so there is no locking.
#[derive(Debug, Default)]
pub struct PipelineCache {
    entries: HashMap<PipelineKey, Arc<PipelineEntry>>,
    shader_compilations: usize,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `key`, building it on first use.
    ///
    /// `screen_format` is the format of the swap chain's back buffers; it is
    /// only consulted for screen keys.
    pub fn get_or_build(
        &mut self,
        device: &mut dyn GpuDevice,
        key: PipelineKey,
        screen_format: TextureFormat,
    ) -> Result<Arc<PipelineEntry>, GraphicsError> {
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(entry));
        }

        let target_format = if key.screen {
            screen_format
        } else {
            TextureFormat::Rgba8Unorm
        };
        let entry = Arc::new(self.build(device, key, target_format)?);
        log::debug!(
            "Built pipeline {:?} (screen: {}, format: {:?}); {} cached",
            key.composite_mode,
            key.screen,
            target_format,
            self.entries.len() + 1
        );
        self.entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Cached entry for `key`, if it was built.
    pub fn get(&self, key: &PipelineKey) -> Option<&Arc<PipelineEntry>> {
        self.entries.get(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many times the shader program was compiled.
    pub fn shader_compilations(&self) -> usize {
        self.shader_compilations
    }

    /// Release every cached pipeline and layout. The GPU must be idle.
    pub fn release_all(&mut self, device: &mut dyn GpuDevice) {
        for (_, entry) in self.entries.drain() {
            device.release(entry.state.pipeline.into());
            device.release(entry.binding_layout.into());
        }
    }

    fn build(
        &mut self,
        device: &mut dyn GpuDevice,
        key: PipelineKey,
        target_format: TextureFormat,
    ) -> Result<PipelineEntry, GraphicsError> {
        let binding_layout = device.create_binding_layout(&binding::binding_layout())?;

        match self.build_with_layout(device, key, target_format, binding_layout) {
            Ok(entry) => Ok(entry),
            Err(e) => {
                log::warn!("Pipeline build for {key:?} failed: {e}");
                device.release(binding_layout.into());
                Err(e)
            }
        }
    }

    fn build_with_layout(
        &mut self,
        device: &mut dyn GpuDevice,
        key: PipelineKey,
        target_format: TextureFormat,
        binding_layout: BindingLayoutHandle,
    ) -> Result<PipelineEntry, GraphicsError> {
        let program = shader::compile_program(
            SPRITE_SHADER_SOURCE,
            VERTEX_ENTRY_POINT,
            FRAGMENT_ENTRY_POINT,
        )?;
        self.shader_compilations += 1;

        let blend = blend_state(key.composite_mode);
        let rasterizer = RasterizerState::default();
        let label = format!(
            "{:?}{}",
            key.composite_mode,
            if key.screen { "_screen" } else { "" }
        );

        let pipeline = device.create_pipeline(&PipelineDescriptor {
            label: &label,
            layout: binding_layout,
            vertex: ShaderStageDescriptor {
                code: &program.vertex,
                entry_point: VERTEX_ENTRY_POINT,
            },
            fragment: ShaderStageDescriptor {
                code: &program.fragment,
                entry_point: FRAGMENT_ENTRY_POINT,
            },
            vertex_stride: Vertex::STRIDE,
            blend,
            rasterizer,
            target_format,
        })?;

        Ok(PipelineEntry {
            binding_layout,
            vertex_program: program.vertex,
            fragment_program: program.fragment,
            state: CompiledState {
                pipeline,
                blend,
                rasterizer,
                target_format,
            },
        })
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, FailurePoint};
    use crate::backend::{CullMode, FillMode};
    use crate::types::BlendOperation;
    use rstest::rstest;

    #[test]
    fn test_get_or_build_is_idempotent() {
        let mut device = DummyDevice::new();
        let mut cache = PipelineCache::new();
        let key = PipelineKey::new(CompositeMode::SourceOver, false);

        let first = cache
            .get_or_build(&mut device, key, TextureFormat::Rgba8Unorm)
            .unwrap();
        let second = cache
            .get_or_build(&mut device, key, TextureFormat::Rgba8Unorm)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.shader_compilations(), 1);
        assert_eq!(device.stats().pipelines_created, 1);
    }

    #[rstest]
    #[case::source_over(CompositeMode::SourceOver, BlendFactor::One, BlendFactor::InvSrcAlpha)]
    #[case::clear(CompositeMode::Clear, BlendFactor::Zero, BlendFactor::Zero)]
    #[case::source_in(CompositeMode::SourceIn, BlendFactor::DestAlpha, BlendFactor::Zero)]
    #[case::destination_in(CompositeMode::DestinationIn, BlendFactor::Zero, BlendFactor::SrcAlpha)]
    #[case::xor(CompositeMode::Xor, BlendFactor::InvDestAlpha, BlendFactor::InvSrcAlpha)]
    #[case::multiply(CompositeMode::Multiply, BlendFactor::DestColor, BlendFactor::InvSrcAlpha)]
    #[case::screen(CompositeMode::Screen, BlendFactor::One, BlendFactor::InvSrcColor)]
    fn test_blend_factors_reach_device(
        #[case] mode: CompositeMode,
        #[case] src: BlendFactor,
        #[case] dst: BlendFactor,
    ) {
        let mut device = DummyDevice::new();
        let mut cache = PipelineCache::new();
        let entry = cache
            .get_or_build(
                &mut device,
                PipelineKey::new(mode, false),
                TextureFormat::Rgba8Unorm,
            )
            .unwrap();

        let record = device.pipeline_record(entry.state.pipeline).unwrap();
        assert_eq!(record.blend, entry.state.blend);
        assert_eq!((record.blend.src_color, record.blend.dst_color), (src, dst));
        assert_eq!((record.blend.src_alpha, record.blend.dst_alpha), (src, dst));
        assert_eq!(record.blend.color_equation, BlendEquation::Add);
        assert_eq!(record.blend.alpha_equation, BlendEquation::Add);
    }

    #[test]
    fn test_every_operation_maps_to_a_distinct_factor() {
        let factors: std::collections::HashSet<_> = BlendOperation::ALL
            .iter()
            .map(|op| BlendFactor::from(*op))
            .collect();
        assert_eq!(factors.len(), BlendOperation::ALL.len());
    }

    #[test]
    fn test_rasterizer_and_layout() {
        let mut device = DummyDevice::new();
        let mut cache = PipelineCache::new();
        let entry = cache
            .get_or_build(
                &mut device,
                PipelineKey::default(),
                TextureFormat::Rgba8Unorm,
            )
            .unwrap();
        let record = device.pipeline_record(entry.state.pipeline).unwrap();
        assert_eq!(record.rasterizer.fill, FillMode::Solid);
        assert_eq!(record.rasterizer.cull, CullMode::None);
        assert!(!record.rasterizer.depth_clip);
        assert_eq!(record.rasterizer.sample_count, 1);
        assert_eq!(record.layout, entry.binding_layout);
        assert_eq!(record.vertex_stride, Vertex::STRIDE);
    }

    #[rstest]
    #[case::offscreen(false, TextureFormat::Rgba8Unorm)]
    #[case::screen(true, TextureFormat::Bgra8Unorm)]
    fn test_target_format(#[case] screen: bool, #[case] expected: TextureFormat) {
        let mut device = DummyDevice::new();
        let mut cache = PipelineCache::new();
        let entry = cache
            .get_or_build(
                &mut device,
                PipelineKey::new(CompositeMode::Copy, screen),
                TextureFormat::Bgra8Unorm,
            )
            .unwrap();
        assert_eq!(entry.state.target_format, expected);
        assert_eq!(
            device.pipeline_record(entry.state.pipeline).unwrap().target_format,
            expected
        );
    }

    #[test]
    fn test_every_key_builds_once() {
        let mut device = DummyDevice::new();
        let mut cache = PipelineCache::new();
        for _ in 0..2 {
            for mode in CompositeMode::ALL {
                for screen in [false, true] {
                    cache
                        .get_or_build(
                            &mut device,
                            PipelineKey::new(mode, screen),
                            TextureFormat::Rgba8Unorm,
                        )
                        .unwrap();
                }
            }
        }
        assert_eq!(cache.len(), CompositeMode::ALL.len() * 2);
        assert_eq!(cache.shader_compilations(), cache.len());
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut device = DummyDevice::new();
        let mut cache = PipelineCache::new();
        let key = PipelineKey::new(CompositeMode::Lighter, true);

        device.fail_next(FailurePoint::Pipeline);
        assert!(
            cache
                .get_or_build(&mut device, key, TextureFormat::Rgba8Unorm)
                .is_err()
        );
        assert!(cache.get(&key).is_none());
        // The layout created before the failure was released.
        assert_eq!(device.live_object_count(), 0);
        assert_eq!(device.released().len(), 1);

        cache
            .get_or_build(&mut device, key, TextureFormat::Rgba8Unorm)
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_release_all() {
        let mut device = DummyDevice::new();
        let mut cache = PipelineCache::new();
        cache
            .get_or_build(&mut device, PipelineKey::default(), TextureFormat::Rgba8Unorm)
            .unwrap();
        cache.release_all(&mut device);
        assert!(cache.is_empty());
        assert_eq!(device.live_object_count(), 0);
        assert!(device.hazards().is_empty());
    }
}
