//! Pixel upload and readback integration tests.

#![cfg(feature = "dummy")]

mod common;

use rstest::rstest;

use common::{draw_quad, get_pixel, graphics, graphics_with_screen, test_pattern};
use sprig_graphics::backend::dummy::{FailurePoint, TimelineMode};
use sprig_graphics::{GraphicsError, PixelRegion, Region};

#[rstest]
#[case::immediate(TimelineMode::Immediate, 64, 64)]
#[case::deferred(TimelineMode::Deferred, 64, 64)]
#[case::non_power_of_two(TimelineMode::Deferred, 65, 3)]
#[case::single_pixel(TimelineMode::Immediate, 1, 1)]
fn test_replace_then_read_round_trips(
    #[case] mode: TimelineMode,
    #[case] width: u32,
    #[case] height: u32,
) {
    let mut graphics = graphics(mode);
    let image = graphics.new_image(width, height).unwrap();
    let pattern = test_pattern(width, height);

    graphics.begin_frame().unwrap();
    graphics
        .replace_pixels(
            image,
            &[PixelRegion::new(Region::from_size(width, height), &pattern)],
        )
        .unwrap();
    let pixels = graphics.read_pixels(image).unwrap();
    graphics.end_frame(false).unwrap();

    assert_eq!(pixels.len(), (width * height * 4) as usize);
    assert_eq!(pixels, pattern);
    assert!(graphics.device().hazards().is_empty());
}

#[test]
fn test_partial_regions_leave_other_pixels() {
    let mut graphics = graphics(TimelineMode::Deferred);
    let image = graphics.new_image(32, 32).unwrap();
    let pattern = test_pattern(32, 32);
    let red = [255u8, 0, 0, 255].repeat(4 * 4);
    let blue = [0u8, 0, 255, 255].repeat(2 * 3);

    graphics.begin_frame().unwrap();
    graphics
        .replace_pixels(image, &[PixelRegion::new(Region::from_size(32, 32), &pattern)])
        .unwrap();
    graphics
        .replace_pixels(
            image,
            &[
                PixelRegion::new(Region::new(8, 8, 4, 4), &red),
                PixelRegion::new(Region::new(30, 29, 2, 3), &blue),
            ],
        )
        .unwrap();
    let pixels = graphics.read_pixels(image).unwrap();
    graphics.end_frame(false).unwrap();

    assert_eq!(get_pixel(&pixels, 32, 8, 8), [255, 0, 0, 255]);
    assert_eq!(get_pixel(&pixels, 32, 11, 11), [255, 0, 0, 255]);
    assert_eq!(get_pixel(&pixels, 32, 31, 31), [0, 0, 255, 255]);
    assert_eq!(get_pixel(&pixels, 32, 12, 8), get_pixel(&pattern, 32, 12, 8));
    assert_eq!(get_pixel(&pixels, 32, 7, 8), get_pixel(&pattern, 32, 7, 8));
    assert_eq!(get_pixel(&pixels, 32, 29, 31), get_pixel(&pattern, 32, 29, 31));
}

#[test]
fn test_pixels_persist_across_frames() {
    let mut graphics = graphics(TimelineMode::Deferred);
    let image = graphics.new_image(16, 16).unwrap();
    let pattern = test_pattern(16, 16);

    graphics.begin_frame().unwrap();
    graphics
        .replace_pixels(image, &[PixelRegion::new(Region::from_size(16, 16), &pattern)])
        .unwrap();
    graphics.end_frame(false).unwrap();

    for _ in 0..3 {
        graphics.begin_frame().unwrap();
        graphics.end_frame(false).unwrap();
    }

    graphics.begin_frame().unwrap();
    assert_eq!(graphics.read_pixels(image).unwrap(), pattern);
    graphics.end_frame(false).unwrap();
    assert!(graphics.device().hazards().is_empty());
}

#[test]
fn test_frame_keeps_recording_after_read() {
    let (mut graphics, screen) = graphics_with_screen(TimelineMode::Deferred, 32, 32);
    let image = graphics.new_image(32, 32).unwrap();
    let pattern = test_pattern(32, 32);

    for _ in 0..3 {
        graphics.begin_frame().unwrap();
        graphics
            .replace_pixels(image, &[PixelRegion::new(Region::from_size(32, 32), &pattern)])
            .unwrap();
        assert_eq!(graphics.read_pixels(image).unwrap(), pattern);
        assert!(graphics.is_recording());
        draw_quad(&mut graphics, screen, image).unwrap();
        graphics.end_frame(true).unwrap();
    }

    let device = graphics.device();
    assert!(device.hazards().is_empty(), "{:?}", device.hazards());
    assert!(device.stats().maps >= 3);
}

#[test]
fn test_empty_region_list_is_noop() {
    let mut graphics = graphics(TimelineMode::Immediate);
    let image = graphics.new_image(8, 8).unwrap();
    graphics.begin_frame().unwrap();
    graphics.device_mut().clear_commands();
    graphics.replace_pixels(image, &[]).unwrap();
    assert!(graphics.device().commands().is_empty());
    graphics.end_frame(false).unwrap();
}

#[rstest]
#[case::short_data(Region::from_size(4, 4), 63)]
#[case::long_data(Region::from_size(4, 4), 65)]
#[case::outside(Region::new(6, 6, 4, 4), 64)]
#[case::empty(Region::new(0, 0, 0, 4), 0)]
fn test_invalid_region_is_state_error(#[case] region: Region, #[case] bytes: usize) {
    let mut graphics = graphics(TimelineMode::Immediate);
    let image = graphics.new_image(8, 8).unwrap();
    let data = vec![0u8; bytes];

    graphics.begin_frame().unwrap();
    let before = graphics.device().commands().len();
    let err = graphics
        .replace_pixels(image, &[PixelRegion::new(region, &data)])
        .unwrap_err();
    assert!(matches!(err, GraphicsError::State(_)), "{err:?}");
    assert_eq!(graphics.device().commands().len(), before);
    graphics.end_frame(false).unwrap();
}

#[test]
fn test_screen_image_pixels_are_not_accessible() {
    let (mut graphics, screen) = graphics_with_screen(TimelineMode::Immediate, 8, 8);
    let data = vec![0u8; 8 * 8 * 4];

    graphics.begin_frame().unwrap();
    assert!(matches!(
        graphics.replace_pixels(screen, &[PixelRegion::new(Region::from_size(8, 8), &data)]),
        Err(GraphicsError::State(_))
    ));
    assert!(matches!(
        graphics.read_pixels(screen),
        Err(GraphicsError::State(_))
    ));
    graphics.end_frame(false).unwrap();
}

#[test]
fn test_failed_readback_releases_buffer_later() {
    let mut graphics = graphics(TimelineMode::Deferred);
    let image = graphics.new_image(8, 8).unwrap();

    graphics.begin_frame().unwrap();
    graphics.device_mut().fail_next(FailurePoint::Map);
    let err = graphics.read_pixels(image).unwrap_err();
    assert!(matches!(err, GraphicsError::Device { .. }));
    graphics.end_frame(false).unwrap();

    for _ in 0..2 {
        graphics.begin_frame().unwrap();
        graphics.end_frame(false).unwrap();
    }
    graphics.shutdown().unwrap();

    let device = graphics.device();
    assert_eq!(device.live_object_count(), 0);
    assert!(device.hazards().is_empty(), "{:?}", device.hazards());
}
