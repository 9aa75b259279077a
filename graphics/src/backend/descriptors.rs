//! Descriptors and handles passed across the device seam.

use bitflags::bitflags;

use crate::types::{BlendOperation, TextureFormat};

/// Declare an opaque, copyable device handle.
macro_rules! gpu_handle {
    ($($(#[$meta:meta])* $name:ident => $variant:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                /// Wrap a backend-assigned identifier.
                pub fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// The backend-assigned identifier.
                pub fn raw(self) -> u64 {
                    self.0
                }
            }

            impl From<$name> for ResourceHandle {
                fn from(handle: $name) -> Self {
                    ResourceHandle::$variant(handle)
                }
            }
        )*

        /// Any device object that can be released.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResourceHandle {
            $($variant($name),)*
        }

        impl ResourceHandle {
            /// The backend-assigned identifier of the wrapped handle.
            pub fn raw(self) -> u64 {
                match self {
                    $(Self::$variant(handle) => handle.raw(),)*
                }
            }
        }
    };
}

gpu_handle! {
    /// CPU-writable or CPU-readable memory block.
    BufferHandle => Buffer;
    /// Two-dimensional color image.
    TextureHandle => Texture;
    /// Backing memory for one command list recording.
    CommandAllocatorHandle => CommandAllocator;
    /// Monotonic completion counter signaled by the queue.
    FenceHandle => Fence;
    /// GPU-visible array of buffer and texture views.
    ViewTableHandle => ViewTable;
    /// GPU-visible sampler array.
    SamplerTableHandle => SamplerTable;
    /// Binding layout (root signature / pipeline layout).
    BindingLayoutHandle => BindingLayout;
    /// Compiled pipeline state object.
    PipelineHandle => Pipeline;
}

// ============================================================================
// Buffers
// ============================================================================

bitflags! {
    /// How a buffer is used by the GPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const COPY_SRC = 1 << 3;
        const COPY_DST = 1 << 4;
    }
}

/// Where buffer memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Written by the CPU, read by the GPU.
    Upload,
    /// Written by the GPU, read by the CPU.
    Readback,
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

/// Placement of texel rows inside a buffer for copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Byte offset of the first row.
    pub offset: u64,
    /// Bytes between the starts of consecutive rows.
    pub row_pitch: u32,
}

/// Row alignment required for buffer/texture copies.
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u32 = 256;

/// Buffer footprint of a `width × height` texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFootprint {
    /// Bytes per row including alignment padding.
    pub row_pitch: u32,
    /// Meaningful bytes per row.
    pub row_size: u32,
    /// Number of rows.
    pub rows: u32,
    /// Buffer size needed to hold every row.
    pub total_bytes: u64,
}

impl CopyFootprint {
    /// Footprint with rows padded to [`TEXTURE_ROW_PITCH_ALIGNMENT`].
    pub fn aligned(width: u32, height: u32, format: TextureFormat) -> Self {
        let row_size = width * format.bytes_per_pixel();
        let row_pitch = row_size.div_ceil(TEXTURE_ROW_PITCH_ALIGNMENT) * TEXTURE_ROW_PITCH_ALIGNMENT;
        Self {
            row_pitch,
            row_size,
            rows: height,
            total_bytes: row_pitch as u64 * height as u64,
        }
    }

    /// Buffer layout of this footprint starting at `offset`.
    pub fn layout(&self, offset: u64) -> BufferLayout {
        BufferLayout {
            offset,
            row_pitch: self.row_pitch,
        }
    }
}

// ============================================================================
// Binding layouts
// ============================================================================

bitflags! {
    /// Shader stages that can see a binding region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderVisibility: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const ALL = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Kind of views a binding region holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ConstantBuffer,
    Texture,
    Sampler,
}

/// One region of a binding layout; region `i` is bound at root index `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingRegionLayout {
    pub kind: BindingKind,
    pub count: u32,
    pub visibility: ShaderVisibility,
}

/// Descriptor for creating a binding layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingLayoutDescriptor {
    pub regions: Vec<BindingRegionLayout>,
}

// ============================================================================
// Pipelines
// ============================================================================

/// Native blend factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    DestAlpha,
    InvSrcAlpha,
    InvDestAlpha,
    DestColor,
    InvSrcColor,
}

impl From<BlendOperation> for BlendFactor {
    fn from(operation: BlendOperation) -> Self {
        match operation {
            BlendOperation::Zero => Self::Zero,
            BlendOperation::One => Self::One,
            BlendOperation::SrcAlpha => Self::SrcAlpha,
            BlendOperation::DstAlpha => Self::DestAlpha,
            BlendOperation::OneMinusSrcAlpha => Self::InvSrcAlpha,
            BlendOperation::OneMinusDstAlpha => Self::InvDestAlpha,
            BlendOperation::DstColor => Self::DestColor,
            BlendOperation::OneMinusSrcColor => Self::InvSrcColor,
        }
    }
}

/// Native blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendEquation {
    #[default]
    Add,
}

/// Blend state of the single color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_equation: BlendEquation,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_equation: BlendEquation,
}

/// Polygon fill mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Face culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Rasterizer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerState {
    pub fill: FillMode,
    pub cull: CullMode,
    pub depth_clip: bool,
    pub sample_count: u32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill: FillMode::Solid,
            cull: CullMode::None,
            depth_clip: false,
            sample_count: 1,
        }
    }
}

/// Compiled shader stage.
#[derive(Debug, Clone, Copy)]
pub struct ShaderStageDescriptor<'a> {
    /// SPIR-V words.
    pub code: &'a [u32],
    pub entry_point: &'a str,
}

/// Descriptor for creating a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDescriptor<'a> {
    pub label: &'a str,
    pub layout: BindingLayoutHandle,
    pub vertex: ShaderStageDescriptor<'a>,
    pub fragment: ShaderStageDescriptor<'a>,
    pub vertex_stride: u32,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub target_format: TextureFormat,
}
