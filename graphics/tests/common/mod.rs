//! Common utilities for graphics integration tests.
//!
//! Every test runs against the dummy device, which simulates the GPU timeline
//! and records misuse as hazards instead of corrupting memory.

#![allow(dead_code)]

use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};

use sprig_graphics::backend::dummy::TimelineMode;
use sprig_graphics::{DummyDevice, Graphics, GraphicsConfig, ImageId, Region, SurfaceTarget, Vertex};

/// Install a test logger once per process.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Graphics on a dummy device with the given timeline mode.
pub fn graphics(mode: TimelineMode) -> Graphics<DummyDevice> {
    graphics_with_config(mode, GraphicsConfig::default())
}

/// Graphics on a dummy device with a custom configuration.
pub fn graphics_with_config(mode: TimelineMode, config: GraphicsConfig) -> Graphics<DummyDevice> {
    init_logger();
    Graphics::new(DummyDevice::new().with_timeline_mode(mode), config)
        .expect("dummy graphics should initialize")
}

/// A surface the dummy device accepts.
pub fn test_surface() -> SurfaceTarget {
    SurfaceTarget {
        window: RawWindowHandle::Web(WebWindowHandle::new(1)),
        display: RawDisplayHandle::Web(WebDisplayHandle::new()),
    }
}

/// Graphics with a `width × height` window and its screen image.
pub fn graphics_with_screen(
    mode: TimelineMode,
    width: u32,
    height: u32,
) -> (Graphics<DummyDevice>, ImageId) {
    let mut graphics = graphics(mode);
    graphics
        .set_window(test_surface(), width, height)
        .expect("set_window");
    let screen = graphics
        .new_screen_image(width, height)
        .expect("new_screen_image");
    (graphics, screen)
}

/// Two triangles covering `width × height` pixels from the origin.
pub fn quad(width: f32, height: f32) -> [Vertex; 4] {
    let white = [1.0, 1.0, 1.0, 1.0];
    [
        Vertex::new([0.0, 0.0], [0.0, 0.0], white),
        Vertex::new([width, 0.0], [1.0, 0.0], white),
        Vertex::new([0.0, height], [0.0, 1.0], white),
        Vertex::new([width, height], [1.0, 1.0], white),
    ]
}

/// Indices of the two triangles of [`quad`].
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];

/// Stage a quad and draw it from `source` into the whole of `dst`.
pub fn draw_quad(
    graphics: &mut Graphics<DummyDevice>,
    dst: ImageId,
    source: ImageId,
) -> Result<(), sprig_graphics::GraphicsError> {
    let (width, height) = graphics.image(dst).expect("destination").size();
    graphics.set_vertices(&quad(width as f32, height as f32), &QUAD_INDICES)?;
    graphics.draw_triangles(
        dst,
        &[source],
        sprig_graphics::CompositeMode::SourceOver,
        0..QUAD_INDICES.len() as u32,
        Region::from_size(width, height),
    )
}

/// Deterministic RGBA8 test pattern.
pub fn test_pattern(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| {
            let x = i % width;
            let y = i / width;
            [x as u8, y as u8, (x ^ y) as u8, 255]
        })
        .collect()
}

/// RGBA value of the pixel at `(x, y)` of tightly packed `pixels`.
pub fn get_pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    [
        pixels[offset],
        pixels[offset + 1],
        pixels[offset + 2],
        pixels[offset + 3],
    ]
}
