//! GPU device abstraction layer.
//!
//! The renderer core never talks to a native graphics API directly. Everything
//! it needs from the device/surface layer goes through the [`GpuDevice`] trait:
//! object creation, a single command list, the queue, fences and the swap chain.
//!
//! # Available Backends
//!
//! - `dummy` (default): No GPU; simulates a GPU timeline for tests
//! - `vulkan-backend`: Native Vulkan backend using ash
//!
//! # Handles
//!
//! Objects are referred to by opaque `Copy` handles such as [`BufferHandle`].
//! A backend owns the native objects behind them until [`GpuDevice::release`]
//! is called. Handles carry no lifetime; keeping them valid while the GPU may
//! still use them is the caller's job.

mod descriptors;

#[cfg(feature = "dummy")]
pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::time::Duration;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::GraphicsError;
use crate::types::{Region, ResourceState, SamplerDescriptor, TextureFormat, Viewport};

pub use descriptors::{
    BindingKind, BindingLayoutDescriptor, BindingLayoutHandle, BindingRegionLayout, BlendEquation,
    BlendFactor, BlendState, BufferDescriptor, BufferHandle, BufferLayout, BufferUsage,
    CommandAllocatorHandle, CopyFootprint, CullMode, FenceHandle, FillMode, MemoryLocation,
    PipelineDescriptor, PipelineHandle, RasterizerState, ResourceHandle, SamplerTableHandle,
    ShaderStageDescriptor, ShaderVisibility, TEXTURE_ROW_PITCH_ALIGNMENT, TextureHandle,
    ViewTableHandle,
};

/// Native window a swap chain presents to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceTarget {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

/// Device, queue and surface operations consumed by the renderer.
///
/// Recording is single-threaded: there is one command list, reset against an
/// allocator at the start of a frame and closed before submission. `cmd_*`
/// methods append to it and fail if it is not open.
pub trait GpuDevice {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// Create a host-visible buffer.
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError>;

    /// Map a buffer for CPU access. Must be paired with [`unmap_buffer`](Self::unmap_buffer).
    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8], GraphicsError>;

    /// Unmap a buffer, making CPU writes visible to the GPU.
    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<(), GraphicsError>;

    /// Create a render-target capable texture in `initial_state`.
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        initial_state: ResourceState,
    ) -> Result<TextureHandle, GraphicsError>;

    /// Buffer footprint for copying a whole `width × height` texture.
    fn copyable_footprint(&self, width: u32, height: u32, format: TextureFormat) -> CopyFootprint {
        CopyFootprint::aligned(width, height, format)
    }

    // ------------------------------------------------------------------
    // Views and binding
    // ------------------------------------------------------------------

    /// Create a GPU-visible view table holding `capacity` views.
    fn create_view_table(&mut self, capacity: u32) -> Result<ViewTableHandle, GraphicsError>;

    /// Distance in bytes between consecutive views of a view table.
    fn view_increment_size(&self) -> u32;

    /// Write a constant-buffer view at `byte_offset` into `table`.
    fn write_constant_view(
        &mut self,
        table: ViewTableHandle,
        byte_offset: u64,
        buffer: BufferHandle,
        size: u64,
    ) -> Result<(), GraphicsError>;

    /// Write a shader-readable texture view at `byte_offset` into `table`.
    fn write_texture_view(
        &mut self,
        table: ViewTableHandle,
        byte_offset: u64,
        texture: TextureHandle,
    ) -> Result<(), GraphicsError>;

    /// Create a one-entry sampler table.
    fn create_sampler_table(
        &mut self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerTableHandle, GraphicsError>;

    /// Create a binding layout; region `i` is bound at root index `i`.
    fn create_binding_layout(
        &mut self,
        descriptor: &BindingLayoutDescriptor,
    ) -> Result<BindingLayoutHandle, GraphicsError>;

    /// Compile a pipeline state object.
    fn create_pipeline(
        &mut self,
        descriptor: &PipelineDescriptor<'_>,
    ) -> Result<PipelineHandle, GraphicsError>;

    // ------------------------------------------------------------------
    // Command recording
    // ------------------------------------------------------------------

    fn create_command_allocator(&mut self) -> Result<CommandAllocatorHandle, GraphicsError>;

    /// Reclaim the memory of everything recorded against `allocator`.
    ///
    /// The GPU must have finished every submission recorded with it.
    fn reset_command_allocator(
        &mut self,
        allocator: CommandAllocatorHandle,
    ) -> Result<(), GraphicsError>;

    /// Open the command list for recording against `allocator`.
    fn reset_command_list(&mut self, allocator: CommandAllocatorHandle)
    -> Result<(), GraphicsError>;

    /// Close the command list so it can be submitted.
    fn close_command_list(&mut self) -> Result<(), GraphicsError>;

    /// Record a transition barrier.
    fn cmd_transition(
        &mut self,
        texture: TextureHandle,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), GraphicsError>;

    fn cmd_set_render_target(&mut self, texture: TextureHandle) -> Result<(), GraphicsError>;

    fn cmd_set_viewport(&mut self, viewport: &Viewport) -> Result<(), GraphicsError>;

    fn cmd_set_scissor(&mut self, scissor: Region) -> Result<(), GraphicsError>;

    fn cmd_set_pipeline(
        &mut self,
        layout: BindingLayoutHandle,
        pipeline: PipelineHandle,
    ) -> Result<(), GraphicsError>;

    /// Point root index `root_index` at the view at `byte_offset` of `table`.
    fn cmd_bind_views(
        &mut self,
        root_index: u32,
        table: ViewTableHandle,
        byte_offset: u64,
    ) -> Result<(), GraphicsError>;

    /// Point root index `root_index` at `table`.
    fn cmd_bind_samplers(
        &mut self,
        root_index: u32,
        table: SamplerTableHandle,
    ) -> Result<(), GraphicsError>;

    fn cmd_set_vertex_buffer(
        &mut self,
        buffer: BufferHandle,
        size: u64,
        stride: u32,
    ) -> Result<(), GraphicsError>;

    /// Bind a 16-bit index buffer.
    fn cmd_set_index_buffer(&mut self, buffer: BufferHandle, size: u64)
    -> Result<(), GraphicsError>;

    fn cmd_draw_indexed(&mut self, index_count: u32, first_index: u32)
    -> Result<(), GraphicsError>;

    /// Copy rows laid out as `layout` in `src` into `region` of `dst`.
    fn cmd_copy_buffer_to_texture(
        &mut self,
        src: BufferHandle,
        layout: BufferLayout,
        dst: TextureHandle,
        region: Region,
    ) -> Result<(), GraphicsError>;

    /// Copy `region` of `src` into `dst` with rows laid out as `layout`.
    fn cmd_copy_texture_to_buffer(
        &mut self,
        src: TextureHandle,
        region: Region,
        dst: BufferHandle,
        layout: BufferLayout,
    ) -> Result<(), GraphicsError>;

    // ------------------------------------------------------------------
    // Queue and synchronization
    // ------------------------------------------------------------------

    /// Submit the closed command list to the queue.
    fn execute_command_list(&mut self) -> Result<(), GraphicsError>;

    fn create_fence(&mut self, initial_value: u64) -> Result<FenceHandle, GraphicsError>;

    /// Queue a signal of `fence` to `value` after all prior submissions.
    fn signal_fence(&mut self, fence: FenceHandle, value: u64) -> Result<(), GraphicsError>;

    /// Highest value the GPU has signaled on `fence`.
    fn fence_completed_value(&self, fence: FenceHandle) -> Result<u64, GraphicsError>;

    /// Block until `fence` reaches `value`. Returns `false` on timeout.
    fn wait_fence(
        &mut self,
        fence: FenceHandle,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError>;

    // ------------------------------------------------------------------
    // Swap chain
    // ------------------------------------------------------------------

    /// Create (or recreate) the swap chain for `target`.
    ///
    /// `buffer_count` is a minimum; the presentation engine may require more.
    fn create_swap_chain(
        &mut self,
        target: &SurfaceTarget,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> Result<(), GraphicsError>;

    /// Format of the swap chain's back buffers.
    fn swap_chain_format(&self) -> TextureFormat {
        TextureFormat::Rgba8Unorm
    }

    /// Number of back buffers the swap chain actually holds.
    fn swap_chain_buffer_count(&self) -> usize;

    /// Texture of back buffer `index`, owned by the swap chain.
    fn swap_chain_buffer(&self, index: usize) -> Result<TextureHandle, GraphicsError>;

    /// Index of the back buffer the next frame renders into.
    fn current_back_buffer_index(&mut self) -> Result<usize, GraphicsError>;

    /// Present the current back buffer after all prior submissions.
    fn present(&mut self, vsync: bool) -> Result<(), GraphicsError>;

    // ------------------------------------------------------------------
    // Lifetime
    // ------------------------------------------------------------------

    /// Destroy a device object. The GPU must no longer be using it.
    fn release(&mut self, resource: ResourceHandle);
}

/// Write `bytes` into `buffer` at `offset` through a scoped map/unmap.
pub fn write_buffer(
    device: &mut dyn GpuDevice,
    buffer: BufferHandle,
    offset: u64,
    bytes: &[u8],
) -> Result<(), GraphicsError> {
    let mapped = device.map_buffer(buffer)?;
    let start = offset as usize;
    let Some(target) = mapped.get_mut(start..start + bytes.len()) else {
        let len = mapped.len();
        device.unmap_buffer(buffer)?;
        return Err(GraphicsError::Capacity {
            resource: "buffer write",
            requested: start + bytes.len(),
            limit: len,
        });
    };
    target.copy_from_slice(bytes);
    device.unmap_buffer(buffer)
}
