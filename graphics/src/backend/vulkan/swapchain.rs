//! Vulkan surface and swapchain.
//!
//! Back buffers are acquired with a CPU fence: `current_back_buffer_index`
//! blocks until the presentation engine hands the image over, so submissions
//! never wait on an acquire semaphore. Presenting waits on a per-image
//! semaphore signaled behind all prior work.

use ash::vk;

use crate::backend::SurfaceTarget;
use crate::error::GraphicsError;
use crate::types::TextureFormat;

use super::conversion::{convert_texture_format, texture_format_from_vk, vk_error};
use super::sync;

/// Surface formats in order of preference.
const PREFERRED_FORMATS: [TextureFormat; 2] = [TextureFormat::Bgra8Unorm, TextureFormat::Rgba8Unorm];

/// Everything needed to create surfaces and swapchains.
pub struct SurfaceContext<'a> {
    pub entry: &'a ash::Entry,
    pub instance: &'a ash::Instance,
    pub device: &'a ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub surface_loader: &'a ash::khr::surface::Instance,
    pub swapchain_loader: &'a ash::khr::swapchain::Device,
}

pub struct VulkanSwapChain {
    surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: TextureFormat,
    pub extent: vk::Extent2D,
    acquire_fence: vk::Fence,
    /// Signaled behind the frame's work, waited on by present. One per image.
    render_finished: Vec<vk::Semaphore>,
    /// Image acquired for the frame being recorded.
    pub acquired: Option<u32>,
}

impl VulkanSwapChain {
    /// Create a surface for `target` and a swapchain of at least `buffer_count` images.
    pub fn new(
        context: &SurfaceContext<'_>,
        target: &SurfaceTarget,
        width: u32,
        height: u32,
        buffer_count: u32,
        vsync: bool,
    ) -> Result<Self, GraphicsError> {
        let surface = unsafe {
            ash_window::create_surface(
                context.entry,
                context.instance,
                target.display,
                target.window,
                None,
            )
        }
        .map_err(vk_error("create surface"))?;

        let mut swap_chain = Self {
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: TextureFormat::Bgra8Unorm,
            extent: vk::Extent2D { width, height },
            acquire_fence: vk::Fence::null(),
            render_finished: Vec::new(),
            acquired: None,
        };
        if let Err(e) = swap_chain.build(context, width, height, buffer_count, vsync) {
            swap_chain.destroy(context.device, context.surface_loader, context.swapchain_loader);
            return Err(e);
        }

        log::info!(
            "Created Vulkan swapchain: {}x{} with {} images ({:?}, vsync: {vsync})",
            swap_chain.extent.width,
            swap_chain.extent.height,
            swap_chain.images.len(),
            swap_chain.format
        );
        Ok(swap_chain)
    }

    fn build(
        &mut self,
        context: &SurfaceContext<'_>,
        width: u32,
        height: u32,
        buffer_count: u32,
        vsync: bool,
    ) -> Result<(), GraphicsError> {
        let loader = context.surface_loader;
        let pd = context.physical_device;

        let supported = unsafe {
            loader.get_physical_device_surface_support(pd, context.queue_family, self.surface)
        }
        .map_err(vk_error("query surface support"))?;
        if !supported {
            return Err(GraphicsError::device(
                "create swap chain",
                "graphics queue cannot present to this surface",
            ));
        }

        let capabilities = unsafe { loader.get_physical_device_surface_capabilities(pd, self.surface) }
            .map_err(vk_error("query surface capabilities"))?;
        let formats = unsafe { loader.get_physical_device_surface_formats(pd, self.surface) }
            .map_err(vk_error("query surface formats"))?;
        let present_modes = unsafe { loader.get_physical_device_surface_present_modes(pd, self.surface) }
            .map_err(vk_error("query present modes"))?;

        let surface_format = PREFERRED_FORMATS
            .iter()
            .find_map(|wanted| {
                let format = convert_texture_format(*wanted);
                formats.iter().find(|f| f.format == format).copied()
            })
            .ok_or_else(|| {
                GraphicsError::device("create swap chain", "no 8-bit RGBA surface format")
            })?;
        self.format = texture_format_from_vk(surface_format.format).unwrap_or_default();

        // FIFO is always available.
        let present_mode = if !vsync && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else if !vsync && present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            vk::PresentModeKHR::IMMEDIATE
        } else {
            vk::PresentModeKHR::FIFO
        };

        self.extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = buffer_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        self.swapchain = unsafe { context.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(vk_error("create swap chain"))?;
        self.images = unsafe { context.swapchain_loader.get_swapchain_images(self.swapchain) }
            .map_err(vk_error("get swap chain images"))?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(super::barriers::COLOR_SUBRESOURCE);
            let view = unsafe { context.device.create_image_view(&view_info, None) }
                .map_err(vk_error("create swap chain image view"))?;
            self.image_views.push(view);
            self.render_finished
                .push(sync::create_binary_semaphore(context.device)?);
        }

        self.acquire_fence = unsafe {
            context
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }
        .map_err(vk_error("create acquire fence"))?;
        Ok(())
    }

    /// Acquire the next back buffer unless one is already held.
    pub fn acquire(
        &mut self,
        device: &ash::Device,
        loader: &ash::khr::swapchain::Device,
    ) -> Result<u32, GraphicsError> {
        if let Some(index) = self.acquired {
            return Ok(index);
        }
        let (index, suboptimal) = unsafe {
            loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence,
            )
        }
        .map_err(vk_error("acquire back buffer"))?;
        if suboptimal {
            log::debug!("Swap chain is suboptimal for the surface");
        }
        unsafe {
            device
                .wait_for_fences(&[self.acquire_fence], true, u64::MAX)
                .map_err(vk_error("wait for back buffer"))?;
            device
                .reset_fences(&[self.acquire_fence])
                .map_err(vk_error("reset acquire fence"))?;
        }
        self.acquired = Some(index);
        Ok(index)
    }

    /// Present the acquired back buffer after all work queued so far.
    pub fn present(
        &mut self,
        device: &ash::Device,
        loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
    ) -> Result<(), GraphicsError> {
        let Some(index) = self.acquired.take() else {
            return Err(GraphicsError::device("present", "no back buffer was acquired"));
        };
        let render_finished = self.render_finished[index as usize];

        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);
        unsafe { device.queue_submit2(queue, &[submit], vk::Fence::null()) }
            .map_err(vk_error("signal present semaphore"))?;

        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => {
                log::debug!("Presented to a suboptimal swap chain");
                Ok(())
            }
            // The window changed size; the next set_window recreates the chain.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swap chain is out of date, frame dropped");
                Ok(())
            }
            Err(e) => Err(vk_error("present")(e)),
        }
    }

    /// Destroy the swapchain and its surface. The device must be idle.
    pub fn destroy(
        &mut self,
        device: &ash::Device,
        surface_loader: &ash::khr::surface::Instance,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
            if self.acquire_fence != vk::Fence::null() {
                device.destroy_fence(self.acquire_fence, None);
                self.acquire_fence = vk::Fence::null();
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            if self.surface != vk::SurfaceKHR::null() {
                surface_loader.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }
        }
        self.images.clear();
        self.acquired = None;
    }
}
