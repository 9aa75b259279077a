//! Common types shared by the renderer and its backends.
//!
//! This module contains pixel regions, formats, resource states, the vertex
//! layout and blend vocabulary used throughout the graphics system.

mod blend;
mod common;
mod sampler;

pub use blend::{BlendOperation, CompositeMode};
pub use common::{
    CONSTANT_BUFFER_SIZE, INDEX_SIZE, Region, ResourceState, ShaderParameters, TextureFormat,
    Vertex, Viewport,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
