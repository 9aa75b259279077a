//! GPU images and their access-state tracking.

use crate::backend::{CopyFootprint, GpuDevice, TextureHandle};
use crate::error::GraphicsError;
use crate::types::ResourceState;

/// Identifier of an image created by [`Graphics`](crate::Graphics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value of the identifier.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A texture together with the access state it was last transitioned to.
///
/// The tracked state only changes through [`ensure_state`](Self::ensure_state),
/// which records the matching barrier, so it always equals the state the
/// texture is in at the end of the recorded command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedTexture {
    handle: TextureHandle,
    state: ResourceState,
}

impl TrackedTexture {
    /// Track `handle`, which the device created in `state`.
    pub fn new(handle: TextureHandle, state: ResourceState) -> Self {
        Self { handle, state }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Transition to `required` unless already there.
    ///
    /// Returns whether a barrier was recorded.
    pub fn ensure_state(
        &mut self,
        device: &mut dyn GpuDevice,
        required: ResourceState,
    ) -> Result<bool, GraphicsError> {
        if self.state == required {
            return Ok(false);
        }
        device.cmd_transition(self.handle, self.state, required)?;
        log::trace!(
            "Texture {}: {:?} -> {:?}",
            self.handle.raw(),
            self.state,
            required
        );
        self.state = required;
        Ok(true)
    }
}

/// GPU memory behind an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageBacking {
    /// A texture owned by the image.
    Texture(TrackedTexture),
    /// Whichever swap chain back buffer the current frame acquired. The back
    /// buffers and their states belong to the swap chain, not to the image.
    SwapChain,
}

/// An image known to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuImage {
    id: ImageId,
    width: u32,
    height: u32,
    internal_width: u32,
    internal_height: u32,
    backing: ImageBacking,
    footprint: CopyFootprint,
    last_used_frame: Option<u64>,
}

impl GpuImage {
    /// An offscreen image backed by its own texture of the internal size.
    pub fn offscreen(
        id: ImageId,
        width: u32,
        height: u32,
        texture: TrackedTexture,
        footprint: CopyFootprint,
    ) -> Self {
        Self {
            id,
            width,
            height,
            internal_width: internal_image_size(width),
            internal_height: internal_image_size(height),
            backing: ImageBacking::Texture(texture),
            footprint,
            last_used_frame: None,
        }
    }

    /// The screen image, backed by the swap chain.
    pub fn screen(id: ImageId, width: u32, height: u32, footprint: CopyFootprint) -> Self {
        Self {
            id,
            width,
            height,
            internal_width: width,
            internal_height: height,
            backing: ImageBacking::SwapChain,
            footprint,
            last_used_frame: None,
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Size requested by the caller.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Size of the backing texture.
    pub fn internal_size(&self) -> (u32, u32) {
        (self.internal_width, self.internal_height)
    }

    pub fn is_screen(&self) -> bool {
        matches!(self.backing, ImageBacking::SwapChain)
    }

    /// Copy footprint of the backing texture.
    pub fn footprint(&self) -> &CopyFootprint {
        &self.footprint
    }

    /// The owned texture and its state; `None` for the screen image.
    pub fn texture(&self) -> Option<&TrackedTexture> {
        match &self.backing {
            ImageBacking::Texture(texture) => Some(texture),
            ImageBacking::SwapChain => None,
        }
    }

    pub fn texture_mut(&mut self) -> Option<&mut TrackedTexture> {
        match &mut self.backing {
            ImageBacking::Texture(texture) => Some(texture),
            ImageBacking::SwapChain => None,
        }
    }

    /// Record that frame `frame` references this image.
    pub fn mark_used(&mut self, frame: u64) {
        self.last_used_frame = Some(frame);
    }

    /// Serial of the last frame that referenced this image.
    pub fn last_used_frame(&self) -> Option<u64> {
        self.last_used_frame
    }

    /// The texture this image owns, if it is not the screen.
    pub fn owned_texture(&self) -> Option<TextureHandle> {
        self.texture().map(TrackedTexture::handle)
    }
}

/// Texture edge used for an image edge of `size` pixels.
pub fn internal_image_size(size: u32) -> u32 {
    size.max(1).next_power_of_two()
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, RecordedCommand};
    use crate::types::TextureFormat;
    use rstest::rstest;

    fn open_device() -> (DummyDevice, TrackedTexture) {
        let mut device = DummyDevice::new();
        let handle = device
            .create_texture(16, 16, TextureFormat::Rgba8Unorm, ResourceState::ShaderReadable)
            .unwrap();
        let allocator = device.create_command_allocator().unwrap();
        device.reset_command_list(allocator).unwrap();
        (device, TrackedTexture::new(handle, ResourceState::ShaderReadable))
    }

    #[rstest]
    #[case::same(ResourceState::ShaderReadable, false)]
    #[case::render_target(ResourceState::RenderTarget, true)]
    #[case::copy_dest(ResourceState::CopyDest, true)]
    fn test_ensure_state(#[case] required: ResourceState, #[case] emitted: bool) {
        let (mut device, mut texture) = open_device();
        assert_eq!(texture.ensure_state(&mut device, required).unwrap(), emitted);
        assert_eq!(texture.state(), required);
        assert_eq!(device.commands().len(), usize::from(emitted));
    }

    #[test]
    fn test_barrier_names_prior_state() {
        let (mut device, mut texture) = open_device();
        texture
            .ensure_state(&mut device, ResourceState::RenderTarget)
            .unwrap();
        texture
            .ensure_state(&mut device, ResourceState::RenderTarget)
            .unwrap();
        texture
            .ensure_state(&mut device, ResourceState::ShaderReadable)
            .unwrap();

        let barriers: Vec<_> = device
            .commands()
            .iter()
            .filter(|c| c.is_transition())
            .cloned()
            .collect();
        assert_eq!(
            barriers,
            vec![
                RecordedCommand::Transition {
                    texture: texture.handle(),
                    before: ResourceState::ShaderReadable,
                    after: ResourceState::RenderTarget,
                },
                RecordedCommand::Transition {
                    texture: texture.handle(),
                    before: ResourceState::RenderTarget,
                    after: ResourceState::ShaderReadable,
                },
            ]
        );
        assert!(device.hazards().is_empty());
    }

    #[test]
    fn test_screen_image_owns_no_texture() {
        let footprint = CopyFootprint::aligned(8, 8, TextureFormat::Rgba8Unorm);
        let mut image = GpuImage::screen(ImageId::new(1), 8, 8, footprint);
        assert!(image.is_screen());
        assert_eq!(image.internal_size(), (8, 8));
        assert!(image.texture_mut().is_none());
        assert_eq!(image.owned_texture(), None);
    }

    #[test]
    fn test_offscreen_texture_state_is_tracked() {
        let (mut device, texture) = open_device();
        let footprint = CopyFootprint::aligned(16, 16, TextureFormat::Rgba8Unorm);
        let mut image = GpuImage::offscreen(ImageId::new(2), 10, 12, texture, footprint);
        assert_eq!(image.internal_size(), (16, 16));

        let tracked = image.texture_mut().unwrap();
        tracked
            .ensure_state(&mut device, ResourceState::CopyDest)
            .unwrap();
        assert_eq!(image.texture().unwrap().state(), ResourceState::CopyDest);
        assert_eq!(image.owned_texture(), Some(texture.handle()));
    }

    #[rstest]
    #[case(1, 1)]
    #[case(64, 64)]
    #[case(65, 128)]
    #[case(0, 1)]
    fn test_internal_image_size(#[case] size: u32, #[case] expected: u32) {
        assert_eq!(internal_image_size(size), expected);
    }
}
