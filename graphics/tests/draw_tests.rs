//! Draw path integration tests.
//!
//! Verify pipeline caching, binding table budgets and the commands a draw
//! records against the dummy device.

#![cfg(feature = "dummy")]

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{QUAD_INDICES, draw_quad, graphics, graphics_with_config, graphics_with_screen, quad};
use sprig_graphics::backend::dummy::{RecordedCommand, TimelineMode};
use sprig_graphics::backend::{BlendFactor, ResourceHandle};
use sprig_graphics::types::{ResourceState, TextureFormat};
use sprig_graphics::{
    CompositeMode, GraphicsConfig, GraphicsError, PipelineKey, Region,
};

// ============================================================================
// Pipeline cache
// ============================================================================

#[test]
fn test_source_over_scenario() {
    let (mut graphics, screen) = graphics_with_screen(TimelineMode::Immediate, 128, 128);
    let image = graphics.new_image(64, 64).unwrap();
    let source = graphics.new_image(16, 16).unwrap();

    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(64.0, 64.0), &QUAD_INDICES).unwrap();
    graphics
        .draw_triangles(
            image,
            &[source],
            CompositeMode::SourceOver,
            0..6,
            Region::from_size(64, 64),
        )
        .unwrap();

    let key = PipelineKey::new(CompositeMode::SourceOver, false);
    let entry = Arc::clone(graphics.pipeline_cache().get(&key).unwrap());
    assert_eq!(entry.state.blend.src_color, BlendFactor::One);
    assert_eq!(entry.state.blend.dst_color, BlendFactor::InvSrcAlpha);
    assert_eq!(graphics.pipeline_cache().shader_compilations(), 1);

    graphics
        .draw_triangles(
            image,
            &[source],
            CompositeMode::SourceOver,
            0..6,
            Region::from_size(64, 64),
        )
        .unwrap();
    assert_eq!(graphics.pipeline_cache().shader_compilations(), 1);
    assert!(Arc::ptr_eq(
        &entry,
        graphics.pipeline_cache().get(&key).unwrap()
    ));
    assert!(
        graphics
            .pipeline_cache()
            .get(&PipelineKey::new(CompositeMode::SourceOver, true))
            .is_none()
    );

    graphics.end_frame(true).unwrap();
    let _ = screen;
    assert!(graphics.device().hazards().is_empty());
}

#[test]
fn test_screen_pipeline_uses_swap_chain_format() {
    common::init_logger();
    let device = sprig_graphics::DummyDevice::new().with_swap_chain_format(TextureFormat::Bgra8Unorm);
    let mut graphics = sprig_graphics::Graphics::new(device, GraphicsConfig::default()).unwrap();
    graphics.set_window(common::test_surface(), 32, 32).unwrap();
    let screen = graphics.new_screen_image(32, 32).unwrap();
    let source = graphics.new_image(8, 8).unwrap();

    graphics.begin_frame().unwrap();
    draw_quad(&mut graphics, screen, source).unwrap();
    graphics.end_frame(true).unwrap();

    let entry = graphics
        .pipeline_cache()
        .get(&PipelineKey::new(CompositeMode::SourceOver, true))
        .unwrap();
    assert_eq!(entry.state.target_format, TextureFormat::Bgra8Unorm);
}

#[rstest]
#[case::copy(CompositeMode::Copy)]
#[case::lighter(CompositeMode::Lighter)]
#[case::destination_out(CompositeMode::DestinationOut)]
fn test_each_mode_builds_its_own_pipeline(#[case] mode: CompositeMode) {
    let mut graphics = graphics(TimelineMode::Immediate);
    let source = graphics.new_image(8, 8).unwrap();
    let target = graphics.new_image(8, 8).unwrap();

    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
    for mode in [CompositeMode::SourceOver, mode] {
        graphics
            .draw_triangles(target, &[source], mode, 0..6, Region::from_size(8, 8))
            .unwrap();
    }
    graphics.end_frame(false).unwrap();

    assert_eq!(graphics.pipeline_cache().len(), 2);
    assert_eq!(graphics.device().stats().pipelines_created, 2);
}

// ============================================================================
// Binding table budget
// ============================================================================

#[test]
fn test_draw_budget_is_capacity_error() {
    let config = GraphicsConfig::default().with_max_draws_per_frame(4);
    let mut graphics = graphics_with_config(TimelineMode::Deferred, config);
    let source = graphics.new_image(8, 8).unwrap();
    let target = graphics.new_image(8, 8).unwrap();

    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
    let draw = |graphics: &mut sprig_graphics::Graphics<sprig_graphics::DummyDevice>| {
        graphics.draw_triangles(
            target,
            &[source],
            CompositeMode::SourceOver,
            0..6,
            Region::from_size(8, 8),
        )
    };
    for _ in 0..4 {
        draw(&mut graphics).unwrap();
    }
    let commands = graphics.device().commands().len();

    let err = draw(&mut graphics).unwrap_err();
    assert_eq!(
        err,
        GraphicsError::Capacity {
            resource: "draws per frame",
            requested: 5,
            limit: 4,
        }
    );
    assert!(!err.is_fatal());
    assert_eq!(graphics.device().commands().len(), commands);

    // Already recorded draws are intact and the next frame has a fresh budget.
    graphics.end_frame(false).unwrap();
    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
    for _ in 0..4 {
        draw(&mut graphics).unwrap();
    }
    graphics.end_frame(false).unwrap();
    assert!(graphics.device().hazards().is_empty());
}

#[test]
fn test_draws_use_disjoint_regions() {
    let mut graphics = graphics(TimelineMode::Immediate);
    let source = graphics.new_image(8, 8).unwrap();
    let target = graphics.new_image(8, 8).unwrap();

    for _ in 0..2 {
        graphics.begin_frame().unwrap();
        graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
        for _ in 0..3 {
            graphics
                .draw_triangles(
                    target,
                    &[source],
                    CompositeMode::SourceOver,
                    0..6,
                    Region::from_size(8, 8),
                )
                .unwrap();
        }
        graphics.end_frame(false).unwrap();
    }

    let offsets: Vec<u64> = graphics
        .device()
        .commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BindViews {
                root_index: 0,
                byte_offset,
                ..
            } => Some(*byte_offset),
            _ => None,
        })
        .collect();
    let mut unique = offsets.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(offsets.len(), 6);
    assert_eq!(unique.len(), 6);
}

// ============================================================================
// Recorded commands
// ============================================================================

#[test]
fn test_draw_records_barriers_then_draw() {
    let mut graphics = graphics(TimelineMode::Immediate);
    let source = graphics.new_image(20, 10).unwrap();
    let target = graphics.new_image(100, 50).unwrap();
    let target_texture = graphics.image(target).unwrap().owned_texture().unwrap();

    graphics.begin_frame().unwrap();
    graphics.device_mut().clear_commands();
    graphics.set_vertices(&quad(100.0, 50.0), &QUAD_INDICES).unwrap();
    graphics
        .draw_triangles(
            target,
            &[source],
            CompositeMode::SourceOver,
            3..6,
            Region::new(10, 10, 20, 20),
        )
        .unwrap();
    graphics.end_frame(false).unwrap();

    let commands = graphics.device().commands();
    assert_eq!(
        commands[0],
        RecordedCommand::Transition {
            texture: target_texture,
            before: ResourceState::ShaderReadable,
            after: ResourceState::RenderTarget,
        }
    );
    assert_eq!(commands[1], RecordedCommand::SetRenderTarget(target_texture));
    assert!(commands.contains(&RecordedCommand::SetScissor(Region::new(10, 10, 20, 20))));
    // The viewport covers the power-of-two texture.
    assert!(commands.iter().any(|c| matches!(
        c,
        RecordedCommand::SetViewport(viewport) if viewport.width == 128.0 && viewport.height == 64.0
    )));
    assert_eq!(
        commands.last(),
        Some(&RecordedCommand::DrawIndexed {
            index_count: 3,
            first_index: 3,
        })
    );
    assert!(graphics.device().hazards().is_empty());
}

#[test]
fn test_source_image_returns_to_shader_readable() {
    let mut graphics = graphics(TimelineMode::Immediate);
    let a = graphics.new_image(8, 8).unwrap();
    let b = graphics.new_image(8, 8).unwrap();

    graphics.begin_frame().unwrap();
    draw_quad(&mut graphics, a, b).unwrap();
    draw_quad(&mut graphics, b, a).unwrap();
    graphics.end_frame(false).unwrap();

    let state = |id| {
        let texture = graphics.image(id).unwrap().owned_texture().unwrap();
        graphics.device().texture_state(texture).unwrap()
    };
    assert_eq!(state(a), ResourceState::ShaderReadable);
    assert_eq!(state(b), ResourceState::RenderTarget);
    assert!(graphics.device().hazards().is_empty());
}

#[test]
fn test_screen_back_buffers_are_tracked_separately() {
    let (mut graphics, screen) = graphics_with_screen(TimelineMode::Deferred, 16, 16);
    let source = graphics.new_image(8, 8).unwrap();
    let buffers: Vec<_> = graphics.back_buffers().iter().map(|b| b.handle()).collect();
    assert_eq!(buffers.len(), 2);

    for _ in 0..4 {
        graphics.begin_frame().unwrap();
        draw_quad(&mut graphics, screen, source).unwrap();
        graphics.end_frame(true).unwrap();
    }

    for buffer in &buffers {
        let to_present = graphics
            .device()
            .commands()
            .iter()
            .filter(|c| {
                **c == RecordedCommand::Transition {
                    texture: *buffer,
                    before: ResourceState::RenderTarget,
                    after: ResourceState::Present,
                }
            })
            .count();
        assert_eq!(to_present, 2);
    }
    assert_eq!(graphics.device().stats().presents, 4);
    assert!(graphics.device().hazards().is_empty());
}

#[test]
fn test_four_sources_fill_the_texture_region() {
    let mut graphics = graphics(TimelineMode::Immediate);
    let target = graphics.new_image(8, 8).unwrap();
    let sources: Vec<_> = (0..4).map(|_| graphics.new_image(8, 8).unwrap()).collect();

    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
    graphics
        .draw_triangles(
            target,
            &sources,
            CompositeMode::SourceOver,
            0..6,
            Region::from_size(8, 8),
        )
        .unwrap();
    graphics.end_frame(false).unwrap();

    for source in sources {
        assert_eq!(
            graphics.image(source).unwrap().last_used_frame(),
            Some(1)
        );
    }
}

// ============================================================================
// Validation
// ============================================================================

#[rstest]
#[case::no_sources(0, false)]
#[case::too_many_sources(5, true)]
fn test_source_count_is_checked(#[case] count: usize, #[case] capacity: bool) {
    let mut graphics = graphics(TimelineMode::Immediate);
    let target = graphics.new_image(8, 8).unwrap();
    let sources: Vec<_> = (0..count).map(|_| graphics.new_image(8, 8).unwrap()).collect();

    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
    let err = graphics
        .draw_triangles(
            target,
            &sources,
            CompositeMode::SourceOver,
            0..6,
            Region::from_size(8, 8),
        )
        .unwrap_err();
    assert_eq!(matches!(err, GraphicsError::Capacity { .. }), capacity);
    graphics.end_frame(false).unwrap();
}

#[test]
fn test_draw_before_set_vertices_is_state_error() {
    let mut graphics = graphics(TimelineMode::Immediate);
    let source = graphics.new_image(8, 8).unwrap();
    let target = graphics.new_image(8, 8).unwrap();

    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
    graphics.end_frame(false).unwrap();

    // Staged vertices do not carry over into the next frame.
    graphics.begin_frame().unwrap();
    assert!(matches!(
        graphics.draw_triangles(
            target,
            &[source],
            CompositeMode::SourceOver,
            0..6,
            Region::from_size(8, 8)
        ),
        Err(GraphicsError::State(_))
    ));
    graphics.end_frame(false).unwrap();
}

#[rstest]
#[case::into_itself("self")]
#[case::index_range("indices")]
#[case::region("region")]
#[case::screen_source("screen")]
fn test_invalid_draws_are_state_errors(#[case] problem: &str) {
    let (mut graphics, screen) = graphics_with_screen(TimelineMode::Immediate, 16, 16);
    let image = graphics.new_image(8, 8).unwrap();

    graphics.begin_frame().unwrap();
    graphics.set_vertices(&quad(8.0, 8.0), &QUAD_INDICES).unwrap();
    let (dst, source, range, region) = match problem {
        "self" => (image, image, 0..6, Region::from_size(8, 8)),
        "indices" => (screen, image, 3..7, Region::from_size(8, 8)),
        "region" => (image, screen, 0..6, Region::new(4, 4, 8, 8)),
        _ => (image, screen, 0..6, Region::from_size(8, 8)),
    };
    let err = graphics
        .draw_triangles(dst, &[source], CompositeMode::SourceOver, range, region)
        .unwrap_err();
    assert!(matches!(err, GraphicsError::State(_)), "{err:?}");
    graphics.end_frame(true).unwrap();
    assert!(graphics.device().hazards().is_empty());
}

#[rstest]
#[case::vertices(65_537, 3)]
#[case::indices(3, 65_538)]
fn test_batch_capacity(#[case] vertices: usize, #[case] indices: usize) {
    let mut graphics = graphics(TimelineMode::Immediate);
    let vertex = quad(1.0, 1.0)[0];
    graphics.begin_frame().unwrap();
    let err = graphics
        .set_vertices(&vec![vertex; vertices], &vec![0; indices])
        .unwrap_err();
    assert!(matches!(err, GraphicsError::Capacity { .. }), "{err:?}");
    graphics.end_frame(false).unwrap();
}

#[test]
fn test_out_of_range_index_is_rejected() {
    let mut graphics = graphics(TimelineMode::Immediate);
    graphics.begin_frame().unwrap();
    assert!(matches!(
        graphics.set_vertices(&quad(1.0, 1.0), &[0, 1, 4]),
        Err(GraphicsError::State(_))
    ));
    graphics.end_frame(false).unwrap();
}

#[rstest]
#[case::empty(0, 16, false)]
#[case::too_large(4097, 16, true)]
fn test_image_size_limits(#[case] width: u32, #[case] height: u32, #[case] capacity: bool) {
    let mut graphics = graphics(TimelineMode::Immediate);
    let err = graphics.new_image(width, height).unwrap_err();
    assert_eq!(matches!(err, GraphicsError::Capacity { .. }), capacity);
    assert_eq!(graphics.device().stats().textures_created, 0);
}

#[test]
fn test_screen_image_needs_window() {
    let mut graphics = graphics(TimelineMode::Immediate);
    assert!(matches!(
        graphics.new_screen_image(16, 16),
        Err(GraphicsError::State(_))
    ));
    graphics.set_window(common::test_surface(), 16, 16).unwrap();
    assert!(matches!(
        graphics.new_screen_image(32, 32),
        Err(GraphicsError::State(_))
    ));
    let screen = graphics.new_screen_image(16, 16).unwrap();
    assert!(graphics.image(screen).unwrap().is_screen());
    assert!(matches!(
        graphics.new_screen_image(16, 16),
        Err(GraphicsError::State(_))
    ));
}

#[test]
fn test_resize_rebinds_screen_image() {
    let (mut graphics, screen) = graphics_with_screen(TimelineMode::Immediate, 16, 16);
    let old = graphics.back_buffers()[0].handle();

    graphics.set_window(common::test_surface(), 40, 30).unwrap();
    let image = graphics.image(screen).unwrap();
    assert_eq!(image.size(), (40, 30));
    assert_eq!(image.internal_size(), (40, 30));
    assert_ne!(graphics.back_buffers()[0].handle(), old);
    assert!(!graphics.device().is_live(ResourceHandle::from(old)));
}
