//! Command allocators and the open command list.
//!
//! An allocator owns a command pool with one primary command buffer and the
//! descriptor pools the views bound through it are materialized from. Both
//! are reset together once the GPU has finished the allocator's work.

use ash::vk;

use crate::error::GraphicsError;

use super::conversion::vk_error;

/// Descriptor sets per pool; a new pool is added when one runs out.
const SETS_PER_POOL: u32 = 256;

/// Descriptors of each type per pool.
const DESCRIPTORS_PER_POOL: u32 = 1024;

pub struct CommandAllocator {
    pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    descriptor_pools: Vec<vk::DescriptorPool>,
    /// Index of the pool sets are allocated from.
    current_pool: usize,
}

impl CommandAllocator {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self, GraphicsError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(vk_error("create command pool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(vk_error("allocate command buffer")(e));
            }
        };

        Ok(Self {
            pool,
            command_buffer,
            descriptor_pools: Vec::new(),
            current_pool: 0,
        })
    }

    /// Reset the command buffer and every descriptor set allocated so far.
    pub fn reset(&mut self, device: &ash::Device) -> Result<(), GraphicsError> {
        unsafe { device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty()) }
            .map_err(vk_error("reset command allocator"))?;
        for pool in &self.descriptor_pools {
            unsafe { device.reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty()) }
                .map_err(vk_error("reset descriptor pool"))?;
        }
        self.current_pool = 0;
        Ok(())
    }

    /// Allocate a descriptor set valid until the next [`reset`](Self::reset).
    pub fn allocate_set(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, GraphicsError> {
        let layouts = [layout];
        loop {
            if self.current_pool == self.descriptor_pools.len() {
                self.descriptor_pools.push(create_descriptor_pool(device)?);
                log::debug!(
                    "Command allocator grew to {} descriptor pools",
                    self.descriptor_pools.len()
                );
            }
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.descriptor_pools[self.current_pool])
                .set_layouts(&layouts);
            match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
                Ok(sets) => return Ok(sets[0]),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                    self.current_pool += 1;
                }
                Err(e) => return Err(vk_error("allocate descriptor set")(e)),
            }
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for pool in self.descriptor_pools.drain(..) {
                device.destroy_descriptor_pool(pool, None);
            }
            device.destroy_command_pool(self.pool, None);
        }
    }
}

fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool, GraphicsError> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: DESCRIPTORS_PER_POOL,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: DESCRIPTORS_PER_POOL,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: DESCRIPTORS_PER_POOL,
        },
    ];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(SETS_PER_POOL)
        .pool_sizes(&pool_sizes);
    unsafe { device.create_descriptor_pool(&pool_info, None) }
        .map_err(vk_error("create descriptor pool"))
}

/// State of the command list between `reset_command_list` and `close_command_list`.
#[derive(Debug)]
pub struct OpenList {
    pub allocator: u64,
    pub command_buffer: vk::CommandBuffer,
    /// Texture id set by `cmd_set_render_target`.
    pub render_target: Option<u64>,
    /// Texture id of the active dynamic rendering scope.
    pub rendering: Option<u64>,
    /// Binding layout id of the last bound pipeline.
    pub layout: Option<u64>,
}

impl OpenList {
    pub fn new(allocator: u64, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            allocator,
            command_buffer,
            render_target: None,
            rendering: None,
            layout: None,
        }
    }

    /// Close the active rendering scope, if any.
    pub fn end_rendering(&mut self, device: &ash::Device) {
        if self.rendering.take().is_some() {
            unsafe { device.cmd_end_rendering(self.command_buffer) };
        }
    }
}
