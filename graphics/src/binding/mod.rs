//! Binding table allocator.
//!
//! One GPU-visible view table is shared by every frame slot and sliced into
//! fixed-size per-draw regions. The region of draw `k` in slot `s` starts at
//!
//! ```text
//! base(s) + k * VIEWS_PER_DRAW,   base(s) = s * max_draws_per_frame * VIEWS_PER_DRAW
//! ```
//!
//! and holds one constant-buffer view followed by [`MAX_SOURCE_IMAGES`]
//! texture views:
//!
//! ```text
//! | CBV | tex0 | tex1 | tex2 | tex3 | CBV | tex0 | ...
//! ^ draw k                         ^ draw k + 1
//! ```
//!
//! The table never grows: it is GPU-visible and sized once for the process
//! lifetime, so running out of draws is a [`GraphicsError::Capacity`].

use crate::backend::{
    BindingKind, BindingLayoutDescriptor, BindingRegionLayout, BufferHandle, GpuDevice,
    SamplerTableHandle, ShaderVisibility, TextureHandle, ViewTableHandle,
};
use crate::config::FRAMES_IN_FLIGHT;
use crate::error::GraphicsError;
use crate::types::{CONSTANT_BUFFER_SIZE, SamplerDescriptor};

/// Root index of the constant-buffer region.
pub const ROOT_CONSTANTS: u32 = 0;
/// Root index of the texture region.
pub const ROOT_TEXTURES: u32 = 1;
/// Root index of the sampler region.
pub const ROOT_SAMPLER: u32 = 2;

/// Source images one draw can sample.
pub const MAX_SOURCE_IMAGES: usize = 4;

/// Views in one draw's region: the constants plus every source image.
pub const VIEWS_PER_DRAW: u32 = 1 + MAX_SOURCE_IMAGES as u32;

/// The three-region layout every pipeline is built against.
pub fn binding_layout() -> BindingLayoutDescriptor {
    BindingLayoutDescriptor {
        regions: vec![
            BindingRegionLayout {
                kind: BindingKind::ConstantBuffer,
                count: 1,
                visibility: ShaderVisibility::ALL,
            },
            BindingRegionLayout {
                kind: BindingKind::Texture,
                count: MAX_SOURCE_IMAGES as u32,
                visibility: ShaderVisibility::FRAGMENT,
            },
            BindingRegionLayout {
                kind: BindingKind::Sampler,
                count: 1,
                visibility: ShaderVisibility::FRAGMENT,
            },
        ],
    }
}

/// Views owned by one `(slot, draw_index)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingRegion {
    pub slot: usize,
    pub draw_index: u32,
    /// Index of the constant-buffer view; texture views follow it.
    pub first_view: u32,
}

impl BindingRegion {
    /// View indices covered by this region.
    pub fn views(&self) -> std::ops::Range<u32> {
        self.first_view..self.first_view + VIEWS_PER_DRAW
    }
}

/// Allocator of per-draw regions in the shared view table.
#[derive(Debug)]
pub struct BindingTable {
    views: ViewTableHandle,
    samplers: SamplerTableHandle,
    increment: u32,
    max_draws: u32,
    /// Constant buffer each region's CBV currently points at.
    constants: Vec<Option<BufferHandle>>,
}

impl BindingTable {
    /// Create the view table and the shared point/wrap sampler table.
    pub fn new(device: &mut dyn GpuDevice, max_draws_per_frame: u32) -> Result<Self, GraphicsError> {
        let regions = FRAMES_IN_FLIGHT * max_draws_per_frame as usize;
        let capacity = u32::try_from(regions * VIEWS_PER_DRAW as usize).map_err(|_| {
            GraphicsError::Capacity {
                resource: "view table",
                requested: regions * VIEWS_PER_DRAW as usize,
                limit: u32::MAX as usize,
            }
        })?;

        let views = device.create_view_table(capacity)?;
        let samplers = match device.create_sampler_table(&SamplerDescriptor::point_wrap()) {
            Ok(samplers) => samplers,
            Err(e) => {
                device.release(views.into());
                return Err(e);
            }
        };

        log::debug!(
            "Binding table: {capacity} views ({FRAMES_IN_FLIGHT} slots x {max_draws_per_frame} draws x {VIEWS_PER_DRAW})"
        );

        Ok(Self {
            views,
            samplers,
            increment: device.view_increment_size(),
            max_draws: max_draws_per_frame,
            constants: vec![None; regions],
        })
    }

    /// Total number of views in the table.
    pub fn capacity(&self) -> u32 {
        FRAMES_IN_FLIGHT as u32 * self.max_draws * VIEWS_PER_DRAW
    }

    /// Draws each frame slot may bind.
    pub fn max_draws_per_frame(&self) -> u32 {
        self.max_draws
    }

    pub fn view_table(&self) -> ViewTableHandle {
        self.views
    }

    pub fn sampler_table(&self) -> SamplerTableHandle {
        self.samplers
    }

    /// Region owned by draw `draw_index` of `slot`.
    pub fn region(&self, slot: usize, draw_index: u32) -> Result<BindingRegion, GraphicsError> {
        if draw_index >= self.max_draws {
            return Err(GraphicsError::Capacity {
                resource: "draws per frame",
                requested: draw_index as usize + 1,
                limit: self.max_draws as usize,
            });
        }
        if slot >= FRAMES_IN_FLIGHT {
            return Err(GraphicsError::state(format!("frame slot {slot} does not exist")));
        }
        let base = slot as u32 * self.max_draws * VIEWS_PER_DRAW;
        Ok(BindingRegion {
            slot,
            draw_index,
            first_view: base + draw_index * VIEWS_PER_DRAW,
        })
    }

    /// Point the constant view of `(slot, draw_index)` at `buffer`.
    ///
    /// Called when the transient pool allocates a new constant buffer, so the
    /// common case of a reused buffer needs no view write at bind time.
    pub fn register_constant_view(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: usize,
        draw_index: u32,
        buffer: BufferHandle,
    ) -> Result<(), GraphicsError> {
        let region = self.region(slot, draw_index)?;
        self.write_constant_view(device, &region, buffer)
    }

    /// Fill the region of `(slot, draw_index)` and bind it for the next draw.
    ///
    /// Writes the constant-buffer view (when it changed) and one texture view
    /// per source, then records two view-table bindings and the shared sampler
    /// binding. Unused texture views repeat the first source.
    pub fn bind_for_draw(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: usize,
        draw_index: u32,
        constant_buffer: BufferHandle,
        sources: &[TextureHandle],
    ) -> Result<BindingRegion, GraphicsError> {
        let Some(&first_source) = sources.first() else {
            return Err(GraphicsError::state("a draw needs at least one source image"));
        };
        if sources.len() > MAX_SOURCE_IMAGES {
            return Err(GraphicsError::Capacity {
                resource: "source images per draw",
                requested: sources.len(),
                limit: MAX_SOURCE_IMAGES,
            });
        }
        let region = self.region(slot, draw_index)?;

        self.write_constant_view(device, &region, constant_buffer)?;
        for i in 0..MAX_SOURCE_IMAGES {
            let texture = sources.get(i).copied().unwrap_or(first_source);
            let offset = self.byte_offset(region.first_view + 1 + i as u32);
            device.write_texture_view(self.views, offset, texture)?;
        }

        device.cmd_bind_views(
            ROOT_CONSTANTS,
            self.views,
            self.byte_offset(region.first_view),
        )?;
        device.cmd_bind_views(
            ROOT_TEXTURES,
            self.views,
            self.byte_offset(region.first_view + 1),
        )?;
        device.cmd_bind_samplers(ROOT_SAMPLER, self.samplers)?;
        Ok(region)
    }

    /// Release the view and sampler tables. The GPU must be idle.
    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        device.release(self.views.into());
        device.release(self.samplers.into());
        self.constants.clear();
    }

    fn byte_offset(&self, view: u32) -> u64 {
        view as u64 * self.increment as u64
    }

    fn write_constant_view(
        &mut self,
        device: &mut dyn GpuDevice,
        region: &BindingRegion,
        buffer: BufferHandle,
    ) -> Result<(), GraphicsError> {
        let index = region.slot * self.max_draws as usize + region.draw_index as usize;
        if self.constants[index] == Some(buffer) {
            return Ok(());
        }
        device.write_constant_view(
            self.views,
            self.byte_offset(region.first_view),
            buffer,
            CONSTANT_BUFFER_SIZE,
        )?;
        self.constants[index] = Some(buffer);
        Ok(())
    }
}
