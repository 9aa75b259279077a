//! Commands recorded by the dummy device.

use crate::backend::{
    BindingLayoutHandle, BufferHandle, BufferLayout, PipelineHandle, SamplerTableHandle,
    TextureHandle, ViewTableHandle,
};
use crate::types::{Region, ResourceState, Viewport};

/// One command appended to the dummy command list.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Transition {
        texture: TextureHandle,
        before: ResourceState,
        after: ResourceState,
    },
    SetRenderTarget(TextureHandle),
    SetViewport(Viewport),
    SetScissor(Region),
    SetPipeline {
        layout: BindingLayoutHandle,
        pipeline: PipelineHandle,
    },
    BindViews {
        root_index: u32,
        table: ViewTableHandle,
        byte_offset: u64,
    },
    BindSamplers {
        root_index: u32,
        table: SamplerTableHandle,
    },
    SetVertexBuffer {
        buffer: BufferHandle,
        size: u64,
        stride: u32,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        size: u64,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
    },
    CopyBufferToTexture {
        src: BufferHandle,
        layout: BufferLayout,
        dst: TextureHandle,
        region: Region,
    },
    CopyTextureToBuffer {
        src: TextureHandle,
        region: Region,
        dst: BufferHandle,
        layout: BufferLayout,
    },
}

impl RecordedCommand {
    /// Whether this is a transition barrier.
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Transition { .. })
    }

    /// Whether this is a draw.
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::DrawIndexed { .. })
    }
}

/// A closed command list handed to the simulated queue.
#[derive(Debug, Clone)]
pub(super) struct Submission {
    pub commands: Vec<RecordedCommand>,
    /// Raw ids of every object the GPU reads or writes while executing.
    pub references: Vec<u64>,
}

/// Work item of the simulated queue, executed in order.
#[derive(Debug, Clone)]
pub(super) enum QueuedOp {
    Execute(Submission),
    Signal { fence: u64, value: u64 },
    Present { buffer: u64 },
}

impl QueuedOp {
    pub fn references(&self, raw: u64) -> bool {
        match self {
            Self::Execute(submission) => submission.references.contains(&raw),
            Self::Signal { .. } => false,
            Self::Present { buffer } => *buffer == raw,
        }
    }
}
