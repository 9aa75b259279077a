//! Vulkan backend implementation using ash.
//!
//! # Mapping
//!
//! ```text
//! GpuDevice                 Vulkan
//! ─────────────────────     ─────────────────────────────────────────────
//! buffer (upload/readback)  VkBuffer in CpuToGpu / GpuToCpu memory
//! texture                   VkImage + VkImageView, layout per ResourceState
//! view table                CPU shadow array; sets materialized on bind
//! sampler table             VkSampler
//! binding layout            one VkDescriptorSetLayout per region + layout
//! command allocator         VkCommandPool + its descriptor pools
//! fence                     timeline VkSemaphore
//! render target             dynamic rendering, begun lazily on first draw
//! ```
//!
//! View tables are not GPU memory. `cmd_bind_views` copies the views it
//! addresses into a descriptor set allocated from the open allocator, so later
//! writes to the same table entries never affect recorded work.

mod allocator;
mod barriers;
mod command;
mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;
mod swapchain;
mod sync;

use std::collections::HashMap;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};

use crate::backend::{
    BindingKind, BindingLayoutDescriptor, BindingLayoutHandle, BufferDescriptor, BufferHandle,
    BufferLayout, CommandAllocatorHandle, FenceHandle, GpuDevice, PipelineDescriptor,
    PipelineHandle, ResourceHandle, SamplerTableHandle, SurfaceTarget, TextureHandle,
    ViewTableHandle,
};
use crate::config::GraphicsConfig;
use crate::error::GraphicsError;
use crate::types::{Region, ResourceState, SamplerDescriptor, TextureFormat, Viewport};

use self::command::{CommandAllocator, OpenList};
use self::conversion::{
    convert_address_mode, convert_buffer_usage, convert_filter_mode, convert_memory_location,
    convert_texture_format, vk_error,
};
use self::instance::InstanceBundle;
use self::pipeline::BindingLayout;
use self::swapchain::{SurfaceContext, VulkanSwapChain};

/// Every view is one table entry.
const VIEW_INCREMENT: u32 = 1;

/// A view written into a view table.
#[derive(Debug, Clone, Copy)]
enum ViewEntry {
    Constant { buffer: vk::Buffer, size: u64 },
    Texture { view: vk::ImageView },
}

enum VulkanObject {
    Buffer {
        buffer: vk::Buffer,
        allocation: Option<Allocation>,
        size: u64,
    },
    Texture {
        image: vk::Image,
        view: vk::ImageView,
        /// `None` for swap chain images.
        allocation: Option<Allocation>,
        width: u32,
        height: u32,
    },
    ViewTable {
        views: Vec<Option<ViewEntry>>,
    },
    SamplerTable {
        sampler: vk::Sampler,
    },
    BindingLayout(BindingLayout),
    Pipeline {
        pipeline: vk::Pipeline,
    },
    CommandAllocator(CommandAllocator),
    Fence {
        semaphore: vk::Semaphore,
    },
}

/// Native Vulkan implementation of [`GpuDevice`].
///
/// Requires Vulkan 1.3 for dynamic rendering, synchronization2 and timeline
/// semaphores. Validation layers are enabled when the configuration asks for
/// them and they are installed.
pub struct VulkanDevice {
    entry: ash::Entry,
    instance: InstanceBundle,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    /// Taken in `Drop` so it is destroyed before the device.
    allocator: Option<Allocator>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    swap_chain: Option<VulkanSwapChain>,
    swap_chain_textures: Vec<TextureHandle>,
    /// Textures whose first use must be preceded by a clear from `UNDEFINED`.
    uninitialized: Vec<(TextureHandle, ResourceState)>,
    objects: HashMap<u64, VulkanObject>,
    next_id: u64,
    open: Option<OpenList>,
    closed: Option<vk::CommandBuffer>,
    vsync: bool,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("objects", &self.objects.len())
            .field("swap_chain", &self.swap_chain.is_some())
            .field("vsync", &self.vsync)
            .finish()
    }
}

impl VulkanDevice {
    /// Create the instance, pick a GPU and create the logical device.
    pub fn new(config: &GraphicsConfig) -> Result<Self, GraphicsError> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GraphicsError::device("load Vulkan", e))?;
        let instance = instance::create_instance(&entry, config.validation)?;

        let (physical_device, queue_family) =
            match device::select_physical_device(&instance.instance) {
                Ok(selected) => selected,
                Err(e) => {
                    instance.destroy();
                    return Err(e);
                }
            };

        let device = match device::create_logical_device(
            &instance.instance,
            physical_device,
            queue_family,
        ) {
            Ok(device) => device,
            Err(e) => {
                instance.destroy();
                return Err(e);
            }
        };

        let allocator =
            match allocator::create_allocator(&instance.instance, physical_device, device.clone()) {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    instance.destroy();
                    return Err(e);
                }
            };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance.instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device);

        log::info!(
            "Vulkan device initialized (validation: {})",
            instance.debug_messenger.is_some()
        );

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            queue,
            queue_family,
            allocator: Some(allocator),
            surface_loader,
            swapchain_loader,
            swap_chain: None,
            swap_chain_textures: Vec::new(),
            uninitialized: Vec::new(),
            objects: HashMap::new(),
            next_id: 1,
            open: None,
            closed: None,
            vsync: config.vsync,
        })
    }

    fn insert(&mut self, object: VulkanObject) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    fn allocator(&mut self) -> Result<&mut Allocator, GraphicsError> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GraphicsError::device("allocate memory", "allocator was destroyed"))
    }

    fn open_list(&mut self) -> Result<&mut OpenList, GraphicsError> {
        self.open
            .as_mut()
            .ok_or_else(|| GraphicsError::device("record command", "command list is not open"))
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<vk::Buffer, GraphicsError> {
        match self.objects.get(&buffer.raw()) {
            Some(VulkanObject::Buffer { buffer, .. }) => Ok(*buffer),
            _ => Err(unknown("buffer", buffer.raw())),
        }
    }

    fn texture(
        &self,
        texture: TextureHandle,
    ) -> Result<(vk::Image, vk::ImageView, u32, u32), GraphicsError> {
        match self.objects.get(&texture.raw()) {
            Some(VulkanObject::Texture {
                image,
                view,
                width,
                height,
                ..
            }) => Ok((*image, *view, *width, *height)),
            _ => Err(unknown("texture", texture.raw())),
        }
    }

    fn binding_layout(&self, id: u64) -> Result<&BindingLayout, GraphicsError> {
        match self.objects.get(&id) {
            Some(VulkanObject::BindingLayout(layout)) => Ok(layout),
            _ => Err(unknown("binding layout", id)),
        }
    }

    fn command_allocator(
        &mut self,
        allocator: CommandAllocatorHandle,
    ) -> Result<&mut CommandAllocator, GraphicsError> {
        match self.objects.get_mut(&allocator.raw()) {
            Some(VulkanObject::CommandAllocator(allocator)) => Ok(allocator),
            _ => Err(unknown("command allocator", allocator.raw())),
        }
    }

    fn fence(&self, fence: FenceHandle) -> Result<vk::Semaphore, GraphicsError> {
        match self.objects.get(&fence.raw()) {
            Some(VulkanObject::Fence { semaphore }) => Ok(*semaphore),
            _ => Err(unknown("fence", fence.raw())),
        }
    }

    /// Close any rendering scope and return the open command buffer.
    fn outside_rendering(&mut self) -> Result<vk::CommandBuffer, GraphicsError> {
        let device = self.device.clone();
        let list = self.open_list()?;
        list.end_rendering(&device);
        Ok(list.command_buffer)
    }

    /// Clear every texture created since the last flush and move it into
    /// the state the caller tracks for it.
    fn initialize_textures(&mut self) -> Result<(), GraphicsError> {
        if self.uninitialized.is_empty() {
            return Ok(());
        }
        let cmd = self.outside_rendering()?;
        for (texture, state) in std::mem::take(&mut self.uninitialized) {
            let Ok((image, ..)) = self.texture(texture) else {
                continue;
            };
            barriers::record(
                &self.device,
                cmd,
                barriers::transition_barrier(image, state, ResourceState::CopyDest, false),
            );
            let clear = vk::ClearColorValue { float32: [0.0; 4] };
            unsafe {
                self.device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear,
                    &[barriers::COLOR_SUBRESOURCE],
                );
            }
            barriers::record(
                &self.device,
                cmd,
                barriers::transition_barrier(image, ResourceState::CopyDest, state, true),
            );
        }
        Ok(())
    }

    /// Begin dynamic rendering into the current render target if needed.
    fn ensure_rendering(&mut self) -> Result<vk::CommandBuffer, GraphicsError> {
        let list = self.open_list()?;
        let Some(target) = list.render_target else {
            return Err(GraphicsError::device("draw", "no render target is set"));
        };
        if list.rendering == Some(target) {
            return Ok(list.command_buffer);
        }

        let (_, view, width, height) = self.texture(TextureHandle::from_raw(target))?;
        let device = self.device.clone();
        let list = self.open_list()?;
        list.end_rendering(&device);

        let attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            })
            .layer_count(1)
            .color_attachments(&attachments);
        unsafe { device.cmd_begin_rendering(list.command_buffer, &rendering_info) };
        list.rendering = Some(target);
        Ok(list.command_buffer)
    }

    /// Copy views `first..first + count` of `table` into a fresh descriptor set.
    fn materialize_views(
        &mut self,
        root_index: u32,
        table: ViewTableHandle,
        byte_offset: u64,
    ) -> Result<(vk::PipelineLayout, vk::DescriptorSet), GraphicsError> {
        let list = self.open_list()?;
        let (allocator, layout_id) = (list.allocator, list.layout);
        let Some(layout_id) = layout_id else {
            return Err(GraphicsError::device("bind views", "no pipeline is bound"));
        };
        let layout = self.binding_layout(layout_id)?;
        let (Some(region), Some(&set_layout)) = (
            layout.regions.get(root_index as usize),
            layout.set_layouts.get(root_index as usize),
        ) else {
            return Err(GraphicsError::device(
                "bind views",
                format!("root index {root_index} is not in the bound layout"),
            ));
        };
        let (kind, count, pipeline_layout) = (region.kind, region.count, layout.pipeline_layout);

        let first = (byte_offset / VIEW_INCREMENT as u64) as usize;
        let entries: Vec<ViewEntry> = match self.objects.get(&table.raw()) {
            Some(VulkanObject::ViewTable { views }) => views
                .get(first..first + count as usize)
                .ok_or_else(|| {
                    GraphicsError::device(
                        "bind views",
                        format!("views {first}..{} are outside the table", first + count as usize),
                    )
                })?
                .iter()
                .map(|entry| {
                    entry.ok_or_else(|| GraphicsError::device("bind views", "view was never written"))
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(unknown("view table", table.raw())),
        };

        let device = self.device.clone();
        let set = self
            .command_allocator(CommandAllocatorHandle::from_raw(allocator))?
            .allocate_set(&device, set_layout)?;

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for entry in &entries {
            match (kind, entry) {
                (BindingKind::ConstantBuffer, ViewEntry::Constant { buffer, size }) => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: *buffer,
                        offset: 0,
                        range: *size,
                    });
                }
                (BindingKind::Texture, ViewEntry::Texture { view }) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: *view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                }
                _ => {
                    return Err(GraphicsError::device(
                        "bind views",
                        format!("view kind does not match {kind:?} region {root_index}"),
                    ));
                }
            }
        }

        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(conversion::convert_binding_kind(kind));
        let write = if kind == BindingKind::ConstantBuffer {
            write.buffer_info(&buffer_infos)
        } else {
            write.image_info(&image_infos)
        };
        unsafe { device.update_descriptor_sets(&[write], &[]) };
        Ok((pipeline_layout, set))
    }

    fn destroy_object(&mut self, object: VulkanObject) {
        let device = &self.device;
        unsafe {
            match object {
                VulkanObject::Buffer {
                    buffer, allocation, ..
                } => {
                    device.destroy_buffer(buffer, None);
                    if let (Some(allocation), Some(memory)) = (allocation, self.allocator.as_mut()) {
                        allocator::free(memory, allocation);
                    }
                }
                VulkanObject::Texture {
                    image,
                    view,
                    allocation,
                    ..
                } => {
                    // Swap chain images and views belong to the swap chain.
                    if let Some(allocation) = allocation {
                        device.destroy_image_view(view, None);
                        device.destroy_image(image, None);
                        if let Some(memory) = self.allocator.as_mut() {
                            allocator::free(memory, allocation);
                        }
                    }
                }
                VulkanObject::ViewTable { .. } => {}
                VulkanObject::SamplerTable { sampler } => device.destroy_sampler(sampler, None),
                VulkanObject::BindingLayout(mut layout) => layout.destroy(device),
                VulkanObject::Pipeline { pipeline } => device.destroy_pipeline(pipeline, None),
                VulkanObject::CommandAllocator(mut allocator) => allocator.destroy(device),
                VulkanObject::Fence { semaphore } => device.destroy_semaphore(semaphore, None),
            }
        }
    }

    fn destroy_swap_chain(&mut self) {
        for texture in std::mem::take(&mut self.swap_chain_textures) {
            self.objects.remove(&texture.raw());
        }
        self.uninitialized
            .retain(|(texture, _)| self.objects.contains_key(&texture.raw()));
        if let Some(mut swap_chain) = self.swap_chain.take() {
            swap_chain.destroy(&self.device, &self.surface_loader, &self.swapchain_loader);
        }
    }
}

fn unknown(kind: &str, raw: u64) -> GraphicsError {
    GraphicsError::device("look up handle", format!("{raw} is not a live {kind}"))
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        if !self.objects.is_empty() {
            log::warn!(
                "Vulkan device dropped with {} live objects",
                self.objects.len()
            );
        }
        self.destroy_swap_chain();
        let objects: Vec<VulkanObject> = self.objects.drain().map(|(_, object)| object).collect();
        for object in objects {
            self.destroy_object(object);
        }
        // The allocator must go before the device.
        drop(self.allocator.take());
        unsafe { self.device.destroy_device(None) };
        self.instance.destroy();
        log::info!("Vulkan device destroyed");
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "Vulkan (ash)"
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(vk_error("create buffer"))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let location = convert_memory_location(descriptor.location);
        let allocation = match self.allocator().and_then(|memory| {
            allocator::allocate(memory, descriptor.label, requirements, location, true)
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.destroy_object(VulkanObject::Buffer {
                buffer,
                allocation: Some(allocation),
                size: descriptor.size,
            });
            return Err(vk_error("bind buffer memory")(e));
        }

        let id = self.insert(VulkanObject::Buffer {
            buffer,
            allocation: Some(allocation),
            size: descriptor.size,
        });
        log::trace!("Vulkan: buffer '{}' ({} bytes)", descriptor.label, descriptor.size);
        Ok(BufferHandle::from_raw(id))
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8], GraphicsError> {
        match self.objects.get_mut(&buffer.raw()) {
            Some(VulkanObject::Buffer {
                allocation: Some(allocation),
                size,
                ..
            }) => allocation
                .mapped_slice_mut()
                .and_then(|mapped| mapped.get_mut(..*size as usize))
                .ok_or_else(|| GraphicsError::device("map buffer", "memory is not host visible")),
            _ => Err(unknown("buffer", buffer.raw())),
        }
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<(), GraphicsError> {
        // Host-visible allocations are coherent and stay persistently mapped.
        self.buffer(buffer).map(|_| ())
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        initial_state: ResourceState,
    ) -> Result<TextureHandle, GraphicsError> {
        let vk_format = convert_texture_format(format);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(vk_error("create image"))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocator().and_then(|memory| {
            allocator::allocate(
                memory,
                "texture",
                requirements,
                gpu_allocator::MemoryLocation::GpuOnly,
                false,
            )
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(vk_error("bind image memory"));
        let view = bound.and_then(|()| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(vk_format)
                .subresource_range(barriers::COLOR_SUBRESOURCE);
            unsafe { self.device.create_image_view(&view_info, None) }
                .map_err(vk_error("create image view"))
        });
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                if let Some(memory) = self.allocator.as_mut() {
                    allocator::free(memory, allocation);
                }
                return Err(e);
            }
        };

        let id = self.insert(VulkanObject::Texture {
            image,
            view,
            allocation: Some(allocation),
            width,
            height,
        });
        let texture = TextureHandle::from_raw(id);
        self.uninitialized.push((texture, initial_state));
        if self.open.is_some() {
            self.initialize_textures()?;
        }
        log::trace!("Vulkan: texture {width}x{height} {format:?}");
        Ok(texture)
    }

    // ------------------------------------------------------------------
    // Views and binding
    // ------------------------------------------------------------------

    fn create_view_table(&mut self, capacity: u32) -> Result<ViewTableHandle, GraphicsError> {
        let id = self.insert(VulkanObject::ViewTable {
            views: vec![None; capacity as usize],
        });
        Ok(ViewTableHandle::from_raw(id))
    }

    fn view_increment_size(&self) -> u32 {
        VIEW_INCREMENT
    }

    fn write_constant_view(
        &mut self,
        table: ViewTableHandle,
        byte_offset: u64,
        buffer: BufferHandle,
        size: u64,
    ) -> Result<(), GraphicsError> {
        let buffer = self.buffer(buffer)?;
        write_view(
            &mut self.objects,
            table,
            byte_offset,
            ViewEntry::Constant { buffer, size },
        )
    }

    fn write_texture_view(
        &mut self,
        table: ViewTableHandle,
        byte_offset: u64,
        texture: TextureHandle,
    ) -> Result<(), GraphicsError> {
        let (_, view, ..) = self.texture(texture)?;
        write_view(&mut self.objects, table, byte_offset, ViewEntry::Texture { view })
    }

    fn create_sampler_table(
        &mut self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerTableHandle, GraphicsError> {
        let filter = convert_filter_mode(descriptor.filter);
        let address_mode = convert_address_mode(descriptor.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(0.0);
        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(vk_error("create sampler"))?;
        let id = self.insert(VulkanObject::SamplerTable { sampler });
        Ok(SamplerTableHandle::from_raw(id))
    }

    fn create_binding_layout(
        &mut self,
        descriptor: &BindingLayoutDescriptor,
    ) -> Result<BindingLayoutHandle, GraphicsError> {
        let layout = BindingLayout::new(&self.device, descriptor)?;
        let id = self.insert(VulkanObject::BindingLayout(layout));
        Ok(BindingLayoutHandle::from_raw(id))
    }

    fn create_pipeline(
        &mut self,
        descriptor: &PipelineDescriptor<'_>,
    ) -> Result<PipelineHandle, GraphicsError> {
        let pipeline_layout = self.binding_layout(descriptor.layout.raw())?.pipeline_layout;
        let pipeline = pipeline::create_graphics_pipeline(&self.device, pipeline_layout, descriptor)?;
        let id = self.insert(VulkanObject::Pipeline { pipeline });
        log::debug!("Vulkan: pipeline '{}'", descriptor.label);
        Ok(PipelineHandle::from_raw(id))
    }

    // ------------------------------------------------------------------
    // Command recording
    // ------------------------------------------------------------------

    fn create_command_allocator(&mut self) -> Result<CommandAllocatorHandle, GraphicsError> {
        let allocator = CommandAllocator::new(&self.device, self.queue_family)?;
        let id = self.insert(VulkanObject::CommandAllocator(allocator));
        Ok(CommandAllocatorHandle::from_raw(id))
    }

    fn reset_command_allocator(
        &mut self,
        allocator: CommandAllocatorHandle,
    ) -> Result<(), GraphicsError> {
        if self.open.as_ref().is_some_and(|list| list.allocator == allocator.raw()) {
            return Err(GraphicsError::device(
                "reset command allocator",
                "allocator is recording",
            ));
        }
        let device = self.device.clone();
        self.command_allocator(allocator)?.reset(&device)
    }

    fn reset_command_list(&mut self, allocator: CommandAllocatorHandle) -> Result<(), GraphicsError> {
        if self.open.is_some() {
            return Err(GraphicsError::device(
                "reset command list",
                "command list is already open",
            ));
        }
        let command_buffer = self.command_allocator(allocator)?.command_buffer;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(vk_error("begin command buffer"))?;
        self.open = Some(OpenList::new(allocator.raw(), command_buffer));
        self.initialize_textures()
    }

    fn close_command_list(&mut self) -> Result<(), GraphicsError> {
        let Some(mut list) = self.open.take() else {
            return Err(GraphicsError::device(
                "close command list",
                "command list is not open",
            ));
        };
        list.end_rendering(&self.device);
        unsafe { self.device.end_command_buffer(list.command_buffer) }
            .map_err(vk_error("end command buffer"))?;
        self.closed = Some(list.command_buffer);
        Ok(())
    }

    fn cmd_transition(
        &mut self,
        texture: TextureHandle,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), GraphicsError> {
        let (image, ..) = self.texture(texture)?;
        let cmd = self.outside_rendering()?;
        barriers::record(
            &self.device,
            cmd,
            barriers::transition_barrier(image, before, after, true),
        );
        Ok(())
    }

    fn cmd_set_render_target(&mut self, texture: TextureHandle) -> Result<(), GraphicsError> {
        self.texture(texture)?;
        let list = self.open_list()?;
        list.render_target = Some(texture.raw());
        Ok(())
    }

    fn cmd_set_viewport(&mut self, viewport: &Viewport) -> Result<(), GraphicsError> {
        // Negative height flips Y so clip space points up as on other APIs.
        let native = vk::Viewport {
            x: viewport.x,
            y: viewport.y + viewport.height,
            width: viewport.width,
            height: -viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        let cmd = self.open_list()?.command_buffer;
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[native]) };
        Ok(())
    }

    fn cmd_set_scissor(&mut self, scissor: Region) -> Result<(), GraphicsError> {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x as i32,
                y: scissor.y as i32,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        let cmd = self.open_list()?.command_buffer;
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[rect]) };
        Ok(())
    }

    fn cmd_set_pipeline(
        &mut self,
        layout: BindingLayoutHandle,
        pipeline: PipelineHandle,
    ) -> Result<(), GraphicsError> {
        self.binding_layout(layout.raw())?;
        let pipeline = match self.objects.get(&pipeline.raw()) {
            Some(VulkanObject::Pipeline { pipeline }) => *pipeline,
            _ => return Err(unknown("pipeline", pipeline.raw())),
        };
        let list = self.open_list()?;
        list.layout = Some(layout.raw());
        let cmd = list.command_buffer;
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
        Ok(())
    }

    fn cmd_bind_views(
        &mut self,
        root_index: u32,
        table: ViewTableHandle,
        byte_offset: u64,
    ) -> Result<(), GraphicsError> {
        let (pipeline_layout, set) = self.materialize_views(root_index, table, byte_offset)?;
        let cmd = self.open_list()?.command_buffer;
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                root_index,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    fn cmd_bind_samplers(
        &mut self,
        root_index: u32,
        table: SamplerTableHandle,
    ) -> Result<(), GraphicsError> {
        let sampler = match self.objects.get(&table.raw()) {
            Some(VulkanObject::SamplerTable { sampler }) => *sampler,
            _ => return Err(unknown("sampler table", table.raw())),
        };
        let list = self.open_list()?;
        let (allocator, layout_id, cmd) = (list.allocator, list.layout, list.command_buffer);
        let Some(layout_id) = layout_id else {
            return Err(GraphicsError::device("bind samplers", "no pipeline is bound"));
        };
        let layout = self.binding_layout(layout_id)?;
        let pipeline_layout = layout.pipeline_layout;
        let Some(&set_layout) = layout.set_layouts.get(root_index as usize) else {
            return Err(GraphicsError::device(
                "bind samplers",
                format!("root index {root_index} is not in the bound layout"),
            ));
        };

        let device = self.device.clone();
        let set = self
            .command_allocator(CommandAllocatorHandle::from_raw(allocator))?
            .allocate_set(&device, set_layout)?;
        let image_infos = [vk::DescriptorImageInfo {
            sampler,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&image_infos);
        unsafe {
            device.update_descriptor_sets(&[write], &[]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                root_index,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    fn cmd_set_vertex_buffer(
        &mut self,
        buffer: BufferHandle,
        _size: u64,
        _stride: u32,
    ) -> Result<(), GraphicsError> {
        // The stride is part of the pipeline's vertex input state.
        let buffer = self.buffer(buffer)?;
        let cmd = self.open_list()?.command_buffer;
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) };
        Ok(())
    }

    fn cmd_set_index_buffer(&mut self, buffer: BufferHandle, _size: u64) -> Result<(), GraphicsError> {
        let buffer = self.buffer(buffer)?;
        let cmd = self.open_list()?.command_buffer;
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT16)
        };
        Ok(())
    }

    fn cmd_draw_indexed(&mut self, index_count: u32, first_index: u32) -> Result<(), GraphicsError> {
        let cmd = self.ensure_rendering()?;
        unsafe {
            self.device
                .cmd_draw_indexed(cmd, index_count, 1, first_index, 0, 0)
        };
        Ok(())
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        src: BufferHandle,
        layout: BufferLayout,
        dst: TextureHandle,
        region: Region,
    ) -> Result<(), GraphicsError> {
        let buffer = self.buffer(src)?;
        let (image, ..) = self.texture(dst)?;
        let cmd = self.outside_rendering()?;
        let copy = buffer_image_copy(layout, region);
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
        Ok(())
    }

    fn cmd_copy_texture_to_buffer(
        &mut self,
        src: TextureHandle,
        region: Region,
        dst: BufferHandle,
        layout: BufferLayout,
    ) -> Result<(), GraphicsError> {
        let (image, ..) = self.texture(src)?;
        let buffer = self.buffer(dst)?;
        let cmd = self.outside_rendering()?;
        let copy = buffer_image_copy(layout, region);
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                &[copy],
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queue and synchronization
    // ------------------------------------------------------------------

    fn execute_command_list(&mut self) -> Result<(), GraphicsError> {
        let Some(command_buffer) = self.closed.take() else {
            return Err(GraphicsError::device(
                "execute command list",
                "no closed command list",
            ));
        };
        let command_buffer_infos =
            [vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer)];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&command_buffer_infos);
        unsafe {
            self.device
                .queue_submit2(self.queue, &[submit], vk::Fence::null())
        }
        .map_err(vk_error("submit command list"))
    }

    fn create_fence(&mut self, initial_value: u64) -> Result<FenceHandle, GraphicsError> {
        let semaphore = sync::create_timeline_semaphore(&self.device, initial_value)?;
        let id = self.insert(VulkanObject::Fence { semaphore });
        Ok(FenceHandle::from_raw(id))
    }

    fn signal_fence(&mut self, fence: FenceHandle, value: u64) -> Result<(), GraphicsError> {
        let semaphore = self.fence(fence)?;
        sync::signal(&self.device, self.queue, semaphore, value)
    }

    fn fence_completed_value(&self, fence: FenceHandle) -> Result<u64, GraphicsError> {
        sync::completed_value(&self.device, self.fence(fence)?)
    }

    fn wait_fence(
        &mut self,
        fence: FenceHandle,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError> {
        sync::wait(&self.device, self.fence(fence)?, value, timeout)
    }

    // ------------------------------------------------------------------
    // Swap chain
    // ------------------------------------------------------------------

    fn create_swap_chain(
        &mut self,
        target: &SurfaceTarget,
        width: u32,
        height: u32,
        buffer_count: u32,
    ) -> Result<(), GraphicsError> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("wait for device idle"))?;
        self.destroy_swap_chain();

        let context = SurfaceContext {
            entry: &self.entry,
            instance: &self.instance.instance,
            device: &self.device,
            physical_device: self.physical_device,
            queue_family: self.queue_family,
            surface_loader: &self.surface_loader,
            swapchain_loader: &self.swapchain_loader,
        };
        let swap_chain =
            VulkanSwapChain::new(&context, target, width, height, buffer_count, self.vsync)?;

        let extent = swap_chain.extent;
        let buffers: Vec<(vk::Image, vk::ImageView)> = swap_chain
            .images
            .iter()
            .copied()
            .zip(swap_chain.image_views.iter().copied())
            .collect();
        for (image, view) in buffers {
            let id = self.insert(VulkanObject::Texture {
                image,
                view,
                allocation: None,
                width: extent.width,
                height: extent.height,
            });
            let texture = TextureHandle::from_raw(id);
            self.swap_chain_textures.push(texture);
            self.uninitialized.push((texture, ResourceState::Present));
        }
        self.swap_chain = Some(swap_chain);
        Ok(())
    }

    fn swap_chain_format(&self) -> TextureFormat {
        self.swap_chain
            .as_ref()
            .map(|swap_chain| swap_chain.format)
            .unwrap_or(TextureFormat::Bgra8Unorm)
    }

    fn swap_chain_buffer_count(&self) -> usize {
        self.swap_chain_textures.len()
    }

    fn swap_chain_buffer(&self, index: usize) -> Result<TextureHandle, GraphicsError> {
        self.swap_chain_textures.get(index).copied().ok_or_else(|| {
            GraphicsError::device("swap chain buffer", format!("no back buffer {index}"))
        })
    }

    fn current_back_buffer_index(&mut self) -> Result<usize, GraphicsError> {
        let Some(swap_chain) = self.swap_chain.as_mut() else {
            return Err(GraphicsError::device("acquire back buffer", "no swap chain"));
        };
        let index = swap_chain.acquire(&self.device, &self.swapchain_loader)?;
        Ok(index as usize)
    }

    fn present(&mut self, vsync: bool) -> Result<(), GraphicsError> {
        if vsync != self.vsync {
            log::info!("Present mode changes with the next swap chain (vsync: {vsync})");
            self.vsync = vsync;
        }
        let Some(swap_chain) = self.swap_chain.as_mut() else {
            return Err(GraphicsError::device("present", "no swap chain"));
        };
        swap_chain.present(&self.device, &self.swapchain_loader, self.queue)
    }

    // ------------------------------------------------------------------
    // Lifetime
    // ------------------------------------------------------------------

    fn release(&mut self, resource: ResourceHandle) {
        if let ResourceHandle::Texture(texture) = resource {
            if self.swap_chain_textures.contains(&texture) {
                log::warn!("Swap chain textures are owned by the swap chain");
                return;
            }
            self.uninitialized.retain(|(pending, _)| *pending != texture);
        }
        match self.objects.remove(&resource.raw()) {
            Some(object) => self.destroy_object(object),
            None => log::warn!("Vulkan: release of unknown object {resource:?}"),
        }
    }
}

fn write_view(
    objects: &mut HashMap<u64, VulkanObject>,
    table: ViewTableHandle,
    byte_offset: u64,
    entry: ViewEntry,
) -> Result<(), GraphicsError> {
    let index = (byte_offset / VIEW_INCREMENT as u64) as usize;
    match objects.get_mut(&table.raw()) {
        Some(VulkanObject::ViewTable { views }) => match views.get_mut(index) {
            Some(slot) => {
                *slot = Some(entry);
                Ok(())
            }
            None => Err(GraphicsError::device(
                "write view",
                format!("view {index} is outside the table"),
            )),
        },
        _ => Err(unknown("view table", table.raw())),
    }
}

fn buffer_image_copy(layout: BufferLayout, region: Region) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(layout.offset)
        // In texels; every format is four bytes per pixel.
        .buffer_row_length(layout.row_pitch / TextureFormat::Rgba8Unorm.bytes_per_pixel())
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D {
            x: region.x as i32,
            y: region.y as i32,
            z: 0,
        })
        .image_extent(vk::Extent3D {
            width: region.width,
            height: region.height,
            depth: 1,
        })
}

static_assertions::assert_impl_all!(VulkanDevice: Send);
