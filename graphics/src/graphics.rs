//! The rendering front end.
//!
//! [`Graphics`] is the explicit context object that owns the device and every
//! renderer component. It is constructed once and driven from a single
//! recording thread:
//!
//! ```text
//! Graphics::new(device, config)
//!     │
//!     ├── set_window(target, w, h)          swap chain
//!     ├── new_image / new_screen_image
//!     │
//!     └── loop {
//!             begin_frame()
//!             replace_pixels / set_vertices / draw_triangles / read_pixels
//!             end_frame(present)
//!         }
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut graphics = Graphics::new(DummyDevice::new(), GraphicsConfig::default())?;
//! let sprite = graphics.new_image(64, 64)?;
//! let target = graphics.new_image(256, 256)?;
//!
//! graphics.begin_frame()?;
//! graphics.replace_pixels(sprite, &[PixelRegion::new(Region::from_size(64, 64), &pixels)])?;
//! graphics.set_vertices(&quad, &[0, 1, 2, 2, 1, 3])?;
//! graphics.draw_triangles(target, &[sprite], CompositeMode::SourceOver, 0..6, Region::from_size(256, 256))?;
//! graphics.end_frame(false)?;
//! ```

use std::collections::HashMap;
use std::ops::Range;

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, CopyFootprint, GpuDevice, MemoryLocation,
    SurfaceTarget, TEXTURE_ROW_PITCH_ALIGNMENT, TextureHandle,
};
use crate::binding::{BindingTable, MAX_SOURCE_IMAGES};
use crate::config::{FRAMES_IN_FLIGHT, GraphicsConfig};
use crate::error::GraphicsError;
use crate::pipeline::{PipelineCache, PipelineKey};
use crate::resources::{
    GpuImage, ImageId, TrackedTexture, TransientBuffer, TransientKind, internal_image_size,
};
use crate::scheduler::FrameScheduler;
use crate::types::{
    CONSTANT_BUFFER_SIZE, CompositeMode, INDEX_SIZE, Region, ResourceState, ShaderParameters,
    TextureFormat, Vertex, Viewport,
};

/// Format of every offscreen image.
const IMAGE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Tightly packed RGBA8 pixels for one region of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion<'a> {
    pub region: Region,
    /// `region.width × region.height × 4` bytes, rows top to bottom.
    pub pixels: &'a [u8],
}

impl<'a> PixelRegion<'a> {
    pub fn new(region: Region, pixels: &'a [u8]) -> Self {
        Self { region, pixels }
    }
}

/// Vertices and indices staged by the last `set_vertices` of the frame.
#[derive(Debug, Clone, Copy)]
struct VertexBatch {
    vertices: TransientBuffer,
    indices: TransientBuffer,
    vertex_count: u32,
    index_count: u32,
}

/// The window's swap chain as the renderer tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SwapChainInfo {
    width: u32,
    height: u32,
    /// Every back buffer with its state, whether or not a screen image exists.
    back_buffers: Vec<TrackedTexture>,
    /// Back buffer acquired for the frame being recorded.
    current: Option<usize>,
}

impl SwapChainInfo {
    fn acquired_mut(&mut self) -> Result<&mut TrackedTexture, GraphicsError> {
        match self.current {
            Some(index) if index < self.back_buffers.len() => Ok(&mut self.back_buffers[index]),
            _ => Err(GraphicsError::state("no back buffer was acquired")),
        }
    }
}

/// The renderer context, generic over the device backend.
#[derive(Debug)]
pub struct Graphics<D: GpuDevice> {
    device: D,
    config: GraphicsConfig,
    frames: FrameScheduler,
    bindings: BindingTable,
    pipelines: PipelineCache,
    images: HashMap<ImageId, GpuImage>,
    next_image_id: u64,
    screen: Option<ImageId>,
    swap_chain: Option<SwapChainInfo>,
    batch: Option<VertexBatch>,
    shut_down: bool,
}

impl<D: GpuDevice> Graphics<D> {
    /// Create the renderer on `device`.
    ///
    /// Creates the frame slots and the binding table. If any creation fails,
    /// the objects created before it are released and the error is returned.
    pub fn new(mut device: D, config: GraphicsConfig) -> Result<Self, GraphicsError> {
        config.validate()?;
        log::info!("Initializing graphics on {}", device.name());

        let mut frames = FrameScheduler::new(&mut device, &config)?;
        let bindings = match BindingTable::new(&mut device, config.max_draws_per_frame) {
            Ok(bindings) => bindings,
            Err(e) => {
                frames.shutdown(&mut device);
                return Err(e);
            }
        };

        log::info!(
            "Graphics initialized: {} frames in flight, {} draws per frame",
            FRAMES_IN_FLIGHT,
            config.max_draws_per_frame
        );

        Ok(Self {
            device,
            config,
            frames,
            bindings,
            pipelines: PipelineCache::new(),
            images: HashMap::new(),
            next_image_id: 1,
            screen: None,
            swap_chain: None,
            batch: None,
            shut_down: false,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn frame_scheduler(&self) -> &FrameScheduler {
        &self.frames
    }

    pub fn binding_table(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn image(&self, id: ImageId) -> Option<&GpuImage> {
        self.images.get(&id)
    }

    /// The screen image, if one was created.
    pub fn screen_image(&self) -> Option<ImageId> {
        self.screen
    }

    /// The swap chain's back buffers with their tracked states.
    pub fn back_buffers(&self) -> &[TrackedTexture] {
        match &self.swap_chain {
            Some(swap_chain) => &swap_chain.back_buffers,
            None => &[],
        }
    }

    /// Index of the back buffer acquired for the current or last frame.
    pub fn current_back_buffer(&self) -> Option<usize> {
        self.swap_chain.as_ref().and_then(|swap_chain| swap_chain.current)
    }

    pub fn is_recording(&self) -> bool {
        self.frames.is_recording()
    }

    // ------------------------------------------------------------------
    // Window and images
    // ------------------------------------------------------------------

    /// Create or recreate the swap chain for `target`.
    ///
    /// Waits for all in-flight frames first. An existing screen image is
    /// rebound to the new back buffers at the new size.
    pub fn set_window(
        &mut self,
        target: SurfaceTarget,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        self.check_alive()?;
        if self.frames.is_recording() {
            return Err(GraphicsError::state("set_window called while a frame is recording"));
        }
        self.check_image_size(width, height)?;

        self.frames.wait_idle(&mut self.device)?;
        self.swap_chain = None;
        self.device
            .create_swap_chain(&target, width, height, FRAMES_IN_FLIGHT as u32)?;

        // The device may create more back buffers than requested.
        let count = self.device.swap_chain_buffer_count();
        if count == 0 {
            return Err(GraphicsError::device("create swap chain", "no back buffers"));
        }
        let mut back_buffers = Vec::with_capacity(count);
        for index in 0..count {
            let handle = self.device.swap_chain_buffer(index)?;
            back_buffers.push(TrackedTexture::new(handle, ResourceState::Present));
        }
        self.swap_chain = Some(SwapChainInfo {
            width,
            height,
            back_buffers,
            current: None,
        });
        log::info!("Swap chain created: {width}x{height}, {count} buffers");

        if let Some(id) = self.screen {
            let image = self.build_screen_image(id, width, height);
            self.images.insert(id, image);
        }
        Ok(())
    }

    /// Create an offscreen RGBA8 image.
    ///
    /// The backing texture is allocated at the next power of two of each edge.
    pub fn new_image(&mut self, width: u32, height: u32) -> Result<ImageId, GraphicsError> {
        self.check_alive()?;
        self.check_image_size(width, height)?;

        let internal_width = internal_image_size(width);
        let internal_height = internal_image_size(height);
        let texture = self.device.create_texture(
            internal_width,
            internal_height,
            IMAGE_FORMAT,
            ResourceState::ShaderReadable,
        )?;
        let footprint = self
            .device
            .copyable_footprint(internal_width, internal_height, IMAGE_FORMAT);

        let id = self.allocate_image_id();
        self.images.insert(
            id,
            GpuImage::offscreen(
                id,
                width,
                height,
                TrackedTexture::new(texture, ResourceState::ShaderReadable),
                footprint,
            ),
        );
        log::debug!(
            "Created image {} ({width}x{height}, texture {internal_width}x{internal_height})",
            id.raw()
        );
        Ok(id)
    }

    /// Create the image that draws into the swap chain.
    ///
    /// Requires a window of exactly `width × height`; there is at most one
    /// screen image.
    pub fn new_screen_image(&mut self, width: u32, height: u32) -> Result<ImageId, GraphicsError> {
        self.check_alive()?;
        let Some(swap_chain) = &self.swap_chain else {
            return Err(GraphicsError::state(
                "a screen image needs a window; call set_window first",
            ));
        };
        if self.screen.is_some() {
            return Err(GraphicsError::state("a screen image already exists"));
        }
        if (width, height) != (swap_chain.width, swap_chain.height) {
            return Err(GraphicsError::state(format!(
                "screen image {width}x{height} does not match the {}x{} window",
                swap_chain.width, swap_chain.height
            )));
        }

        let id = self.allocate_image_id();
        let image = self.build_screen_image(id, width, height);
        self.images.insert(id, image);
        self.screen = Some(id);
        log::debug!("Created screen image {} ({width}x{height})", id.raw());
        Ok(id)
    }

    /// Dispose of an image.
    ///
    /// The backing texture is released immediately if no frame ever referenced
    /// it, otherwise once the GPU has finished the current frame slot.
    pub fn dispose_image(&mut self, id: ImageId) -> Result<(), GraphicsError> {
        self.check_alive()?;
        let Some(image) = self.images.remove(&id) else {
            return Err(GraphicsError::state(format!("unknown image {}", id.raw())));
        };

        let Some(texture) = image.owned_texture() else {
            // The swap chain owns the back buffers and keeps tracking them.
            self.screen = None;
            log::debug!("Disposed screen image {}", id.raw());
            return Ok(());
        };

        match image.last_used_frame() {
            None => {
                self.device.release(texture.into());
                log::debug!("Disposed unused image {}", id.raw());
            }
            Some(frame) => {
                self.frames.defer_release(texture);
                log::debug!(
                    "Disposed image {} (last used in frame {frame}), release deferred",
                    id.raw()
                );
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Start recording a frame.
    pub fn begin_frame(&mut self) -> Result<(), GraphicsError> {
        self.check_alive()?;
        if self.frames.is_recording() {
            return Err(GraphicsError::state(
                "begin_frame called while a frame is already recording",
            ));
        }

        let back_buffer = match &self.swap_chain {
            Some(swap_chain) => {
                let index = self.device.current_back_buffer_index()?;
                if index >= swap_chain.back_buffers.len() {
                    return Err(GraphicsError::device(
                        "acquire back buffer",
                        format!(
                            "index {index} is outside the {} back buffers",
                            swap_chain.back_buffers.len()
                        ),
                    ));
                }
                Some(index)
            }
            None => None,
        };
        self.frames.begin(&mut self.device, back_buffer)?;
        if let Some(swap_chain) = &mut self.swap_chain {
            swap_chain.current = back_buffer;
        }
        self.batch = None;
        Ok(())
    }

    /// Submit the recorded frame, presenting the swap chain when `present` is set.
    ///
    /// Calling this without a matching [`begin_frame`](Self::begin_frame) is a
    /// [`GraphicsError::State`] error.
    pub fn end_frame(&mut self, present: bool) -> Result<(), GraphicsError> {
        self.check_alive()?;
        if !self.frames.is_recording() {
            return Err(GraphicsError::state(
                "end_frame called without a matching begin_frame",
            ));
        }
        if present {
            let Some(swap_chain) = &mut self.swap_chain else {
                return Err(GraphicsError::state("cannot present without a window"));
            };
            // Even without a screen image: one may have drawn into the back
            // buffer and been disposed of during this frame.
            let back_buffer = swap_chain.acquired_mut()?;
            back_buffer.ensure_state(&mut self.device, ResourceState::Present)?;
        }

        self.batch = None;
        self.frames
            .end(&mut self.device, present, self.config.vsync)
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Stage vertices and indices for the following draws of this frame.
    pub fn set_vertices(&mut self, vertices: &[Vertex], indices: &[u16]) -> Result<(), GraphicsError> {
        self.check_recording("set_vertices")?;
        if vertices.is_empty() || indices.is_empty() {
            return Err(GraphicsError::state(
                "set_vertices needs at least one vertex and one index",
            ));
        }
        check_capacity("vertices", vertices.len(), self.config.max_vertices as usize)?;
        check_capacity("indices", indices.len(), self.config.max_indices as usize)?;
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(GraphicsError::state(format!(
                "index {index} is out of range for {} vertices",
                vertices.len()
            )));
        }

        let vertex_capacity = self.config.max_vertices as u64 * Vertex::STRIDE as u64;
        let index_capacity = self.config.max_indices as u64 * INDEX_SIZE as u64;
        let pool = self.frames.transients_mut();
        let vertex_buffer = pool.acquire(&mut self.device, TransientKind::Vertex, vertex_capacity)?;
        let index_buffer = pool.acquire(&mut self.device, TransientKind::Index, index_capacity)?;
        vertex_buffer.write(&mut self.device, 0, bytemuck::cast_slice(vertices))?;
        index_buffer.write(&mut self.device, 0, bytemuck::cast_slice(indices))?;

        self.batch = Some(VertexBatch {
            vertices: vertex_buffer,
            indices: index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        });
        log::trace!("Staged {} vertices, {} indices", vertices.len(), indices.len());
        Ok(())
    }

    /// Draw `index_range` of the staged batch from `sources` into `dst`.
    ///
    /// `sources` holds one to [`MAX_SOURCE_IMAGES`] images; the program samples
    /// the first. Pixels outside `dst_region` are left untouched.
    pub fn draw_triangles(
        &mut self,
        dst: ImageId,
        sources: &[ImageId],
        composite_mode: CompositeMode,
        index_range: Range<u32>,
        dst_region: Region,
    ) -> Result<(), GraphicsError> {
        self.check_recording("draw_triangles")?;
        let Some(batch) = self.batch else {
            return Err(GraphicsError::state(
                "draw_triangles called before set_vertices in this frame",
            ));
        };
        if index_range.is_empty() || index_range.end > batch.index_count {
            return Err(GraphicsError::state(format!(
                "index range {index_range:?} is not within the {} staged indices",
                batch.index_count
            )));
        }
        if sources.is_empty() {
            return Err(GraphicsError::state("draw_triangles needs a source image"));
        }
        if sources.len() > MAX_SOURCE_IMAGES {
            return Err(GraphicsError::Capacity {
                resource: "source images per draw",
                requested: sources.len(),
                limit: MAX_SOURCE_IMAGES,
            });
        }
        if sources.contains(&dst) {
            return Err(GraphicsError::state("an image cannot be drawn into itself"));
        }

        let (dst_screen, dst_size, dst_internal) = {
            let image = self.lookup(dst)?;
            (image.is_screen(), image.size(), image.internal_size())
        };
        for &source in sources {
            if self.lookup(source)?.is_screen() {
                return Err(GraphicsError::state("the screen image cannot be sampled"));
            }
        }
        if dst_region.is_empty() || !dst_region.fits_within(dst_size.0, dst_size.1) {
            return Err(GraphicsError::state(format!(
                "region {dst_region:?} is not inside the {}x{} destination",
                dst_size.0, dst_size.1
            )));
        }

        let slot = self.frames.current_slot();
        let draw_index = self.frames.transients_mut().len(TransientKind::Constant) as u32;
        if draw_index >= self.bindings.max_draws_per_frame() {
            return Err(GraphicsError::Capacity {
                resource: "draws per frame",
                requested: draw_index as usize + 1,
                limit: self.bindings.max_draws_per_frame() as usize,
            });
        }

        let screen_format = self.device.swap_chain_format();
        let entry = self.pipelines.get_or_build(
            &mut self.device,
            PipelineKey::new(composite_mode, dst_screen),
            screen_format,
        )?;

        let target = self.transition(dst, ResourceState::RenderTarget)?;
        self.device.cmd_set_render_target(target)?;
        let mut textures = Vec::with_capacity(sources.len());
        for &source in sources {
            textures.push(self.transition(source, ResourceState::ShaderReadable)?);
        }

        let constants = self.frames.transients_mut().acquire(
            &mut self.device,
            TransientKind::Constant,
            CONSTANT_BUFFER_SIZE,
        )?;
        let parameters = ShaderParameters {
            viewport_size: [dst_internal.0 as f32, dst_internal.1 as f32],
        };
        constants.write(&mut self.device, 0, bytemuck::bytes_of(&parameters))?;
        if constants.newly_allocated {
            self.bindings
                .register_constant_view(&mut self.device, slot, draw_index, constants.buffer)?;
        }

        self.device
            .cmd_set_pipeline(entry.binding_layout, entry.state.pipeline)?;
        self.bindings.bind_for_draw(
            &mut self.device,
            slot,
            draw_index,
            constants.buffer,
            &textures,
        )?;
        self.device
            .cmd_set_viewport(&Viewport::from_dimensions(dst_internal.0, dst_internal.1))?;
        self.device.cmd_set_scissor(dst_region)?;
        self.device.cmd_set_vertex_buffer(
            batch.vertices.buffer,
            batch.vertex_count as u64 * Vertex::STRIDE as u64,
            Vertex::STRIDE,
        )?;
        self.device.cmd_set_index_buffer(
            batch.indices.buffer,
            batch.index_count as u64 * INDEX_SIZE as u64,
        )?;
        self.device
            .cmd_draw_indexed(index_range.end - index_range.start, index_range.start)?;

        let frame = self.frames.frame_serial();
        for id in std::iter::once(dst).chain(sources.iter().copied()) {
            if let Some(image) = self.images.get_mut(&id) {
                image.mark_used(frame);
            }
        }
        log::trace!(
            "Draw {draw_index} (slot {slot}): {composite_mode:?} into image {}",
            dst.raw()
        );
        Ok(())
    }

    /// Overwrite regions of an offscreen image with RGBA8 pixels.
    pub fn replace_pixels(
        &mut self,
        id: ImageId,
        regions: &[PixelRegion<'_>],
    ) -> Result<(), GraphicsError> {
        self.check_recording("replace_pixels")?;
        let image = self.lookup(id)?;
        if image.is_screen() {
            return Err(GraphicsError::state("cannot replace pixels of the screen image"));
        }
        let (width, height) = image.size();
        if regions.is_empty() {
            return Ok(());
        }

        // Stage every region back to back with aligned row pitch.
        let mut placements = Vec::with_capacity(regions.len());
        let mut total = 0u64;
        for update in regions {
            let region = update.region;
            if region.is_empty() || !region.fits_within(width, height) {
                return Err(GraphicsError::state(format!(
                    "region {region:?} is not inside the {width}x{height} image"
                )));
            }
            let expected = region.width as usize * region.height as usize * 4;
            if update.pixels.len() != expected {
                return Err(GraphicsError::state(format!(
                    "region {region:?} needs {expected} bytes, got {}",
                    update.pixels.len()
                )));
            }
            let footprint = CopyFootprint::aligned(region.width, region.height, IMAGE_FORMAT);
            placements.push((total, footprint));
            total = (total + footprint.total_bytes)
                .next_multiple_of(TEXTURE_ROW_PITCH_ALIGNMENT as u64);
        }

        let mut staging = vec![0u8; total as usize];
        for (update, (offset, footprint)) in regions.iter().zip(&placements) {
            pitch_rows(update.pixels, &mut staging[*offset as usize..], footprint);
        }
        let upload = self
            .frames
            .transients_mut()
            .acquire(&mut self.device, TransientKind::Upload, total)?;
        upload.write(&mut self.device, 0, &staging)?;

        let slot = self.frames.current_slot();
        let texture = self.transition(id, ResourceState::CopyDest)?;
        for (update, (offset, footprint)) in regions.iter().zip(&placements) {
            self.device.cmd_copy_buffer_to_texture(
                upload.buffer,
                footprint.layout(*offset),
                texture,
                update.region,
            )?;
        }

        let frame = self.frames.frame_serial();
        if let Some(image) = self.images.get_mut(&id) {
            image.mark_used(frame);
        }
        log::trace!("Replaced {} regions of image {}", regions.len(), id.raw());
        Ok(())
    }

    /// Read back the pixels of an offscreen image as tightly packed RGBA8.
    ///
    /// Flushes the work recorded so far and blocks until the GPU finished it;
    /// the frame keeps recording afterwards.
    pub fn read_pixels(&mut self, id: ImageId) -> Result<Vec<u8>, GraphicsError> {
        self.check_recording("read_pixels")?;
        let image = self.lookup(id)?;
        if image.is_screen() {
            return Err(GraphicsError::state("cannot read pixels of the screen image"));
        }
        let (width, height) = image.size();
        let footprint = CopyFootprint::aligned(width, height, IMAGE_FORMAT);

        let readback = self.device.create_buffer(&BufferDescriptor {
            label: "readback",
            size: footprint.total_bytes,
            usage: BufferUsage::COPY_DST,
            location: MemoryLocation::Readback,
        })?;

        match self.read_into(id, Region::from_size(width, height), readback, &footprint) {
            Ok(pixels) => {
                self.device.release(readback.into());
                Ok(pixels)
            }
            Err(e) => {
                // The copy may still be queued.
                self.frames.defer_release(readback);
                Err(e)
            }
        }
    }

    fn read_into(
        &mut self,
        id: ImageId,
        region: Region,
        readback: BufferHandle,
        footprint: &CopyFootprint,
    ) -> Result<Vec<u8>, GraphicsError> {
        let slot = self.frames.current_slot();
        let texture = self.transition(id, ResourceState::CopySource)?;
        self.device
            .cmd_copy_texture_to_buffer(texture, region, readback, footprint.layout(0))?;
        let frame = self.frames.frame_serial();
        if let Some(image) = self.images.get_mut(&id) {
            image.mark_used(frame);
        }

        self.frames.flush_and_wait(&mut self.device)?;
        let mapped = self.device.map_buffer(readback)?;
        let pixels = unpitch_rows(mapped, footprint);
        self.device.unmap_buffer(readback)?;
        Ok(pixels)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Wait for the GPU and release every device object.
    ///
    /// Called by `Drop`; calling it again is a no-op. If the GPU does not
    /// become idle the objects are leaked rather than released in flight.
    pub fn shutdown(&mut self) -> Result<(), GraphicsError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.batch = None;

        if let Err(e) = self.frames.wait_idle(&mut self.device) {
            log::warn!("GPU did not become idle during shutdown, leaking device objects: {e}");
            return Err(e);
        }

        for (_, image) in self.images.drain() {
            if let Some(texture) = image.owned_texture() {
                self.device.release(texture.into());
            }
        }
        self.screen = None;
        self.pipelines.release_all(&mut self.device);
        self.bindings.release(&mut self.device);
        self.frames.shutdown(&mut self.device);
        log::info!("Graphics shut down");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn check_alive(&self) -> Result<(), GraphicsError> {
        if self.shut_down {
            return Err(GraphicsError::state("graphics has been shut down"));
        }
        Ok(())
    }

    fn check_recording(&self, operation: &str) -> Result<(), GraphicsError> {
        self.check_alive()?;
        if !self.frames.is_recording() {
            return Err(GraphicsError::state(format!(
                "{operation} requires a frame between begin_frame and end_frame"
            )));
        }
        Ok(())
    }

    fn check_image_size(&self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::state(format!(
                "image size {width}x{height} is empty"
            )));
        }
        let limit = self.config.max_image_size;
        check_capacity("image size", width.max(height) as usize, limit as usize)
    }

    fn lookup(&self, id: ImageId) -> Result<&GpuImage, GraphicsError> {
        self.images
            .get(&id)
            .ok_or_else(|| GraphicsError::state(format!("unknown image {}", id.raw())))
    }

    /// Bring image `id` into `state` and return the texture it resolves to.
    ///
    /// The screen image resolves to the back buffer acquired for this frame.
    fn transition(
        &mut self,
        id: ImageId,
        state: ResourceState,
    ) -> Result<TextureHandle, GraphicsError> {
        let image = self
            .images
            .get_mut(&id)
            .ok_or_else(|| GraphicsError::state(format!("unknown image {}", id.raw())))?;
        let texture = match (image.texture_mut(), self.swap_chain.as_mut()) {
            (Some(texture), _) => texture,
            (None, Some(swap_chain)) => swap_chain.acquired_mut()?,
            (None, None) => return Err(GraphicsError::state("the screen image has no window")),
        };
        texture.ensure_state(&mut self.device, state)?;
        Ok(texture.handle())
    }

    fn allocate_image_id(&mut self) -> ImageId {
        let id = ImageId::new(self.next_image_id);
        self.next_image_id += 1;
        id
    }

    fn build_screen_image(&self, id: ImageId, width: u32, height: u32) -> GpuImage {
        let footprint =
            self.device
                .copyable_footprint(width, height, self.device.swap_chain_format());
        GpuImage::screen(id, width, height, footprint)
    }
}

impl<D: GpuDevice> Drop for Graphics<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Graphics shutdown failed: {e}");
        }
    }
}

fn check_capacity(resource: &'static str, requested: usize, limit: usize) -> Result<(), GraphicsError> {
    if requested > limit {
        return Err(GraphicsError::Capacity {
            resource,
            requested,
            limit,
        });
    }
    Ok(())
}

/// Copy tightly packed rows into `dst` laid out with `footprint`'s row pitch.
fn pitch_rows(src: &[u8], dst: &mut [u8], footprint: &CopyFootprint) {
    let row_size = footprint.row_size as usize;
    let row_pitch = footprint.row_pitch as usize;
    for (y, row) in src.chunks_exact(row_size).enumerate() {
        dst[y * row_pitch..y * row_pitch + row_size].copy_from_slice(row);
    }
}

/// Gather the meaningful bytes of each pitched row of `src`.
fn unpitch_rows(src: &[u8], footprint: &CopyFootprint) -> Vec<u8> {
    let row_size = footprint.row_size as usize;
    let row_pitch = footprint.row_pitch as usize;
    let mut pixels = Vec::with_capacity(row_size * footprint.rows as usize);
    for y in 0..footprint.rows as usize {
        pixels.extend_from_slice(&src[y * row_pitch..y * row_pitch + row_size]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::narrow(1, 3)]
    #[case::exact_pitch(64, 2)]
    #[case::wide(65, 4)]
    fn test_pitch_and_unpitch(#[case] width: u32, #[case] height: u32) {
        let footprint = CopyFootprint::aligned(width, height, IMAGE_FORMAT);
        let pixels: Vec<u8> = (0..width * height * 4).map(|i| i as u8).collect();
        let mut staging = vec![0xAA; footprint.total_bytes as usize];

        pitch_rows(&pixels, &mut staging, &footprint);
        assert_eq!(staging.len() % TEXTURE_ROW_PITCH_ALIGNMENT as usize, 0);
        assert_eq!(unpitch_rows(&staging, &footprint), pixels);
    }

    #[rstest]
    #[case::within(10, 10, true)]
    #[case::above(11, 10, false)]
    fn test_check_capacity(#[case] requested: usize, #[case] limit: usize, #[case] ok: bool) {
        assert_eq!(check_capacity("test", requested, limit).is_ok(), ok);
    }
}
