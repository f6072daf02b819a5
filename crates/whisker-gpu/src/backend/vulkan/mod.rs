//! The real driver, on top of `ash`.

mod capabilities;
mod descriptors;
pub(crate) mod instance;
mod memory;
mod pipeline;
mod record;

use super::convert;
use super::swapchain::{calculate_extent, image_count, select_surface_format};
use super::{
    Acquire, Command, Driver, GpuBuffer, GpuImage, PipelineDesc, PresentOutcome, PresentTarget,
    Submission, SwapchainParts,
};
use crate::access::color_subresource_range;
use crate::error::{GpuError, Result};
use crate::window::NativeWindow;
use ash::vk;
use capabilities::DeviceInfo;
use descriptors::Descriptors;
use gpu_allocator::MemoryLocation;
use instance::{create_debug_messenger, create_device, create_instance, select_physical_device};
use memory::GpuAllocator;
use parking_lot::Mutex;
use std::sync::Arc;
use whisker_core::{Backend, BindingKind, Extent2D, ImageDesc, SamplerDesc};

pub(crate) use instance::InstanceConfig;

type DebugMessenger = (ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT);

/// Instance, device, single graphics queue and the device-wide pools.
pub(crate) struct VulkanDriver {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    device: ash::Device,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    descriptors: Descriptors,
    allocator: Mutex<GpuAllocator>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    info: DeviceInfo,
}

impl VulkanDriver {
    pub fn new(config: &InstanceConfig<'_>) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loader(e.to_string()))?;
        let (instance, debug_utils) = unsafe { create_instance(&entry, config) }?;

        let debug = if debug_utils {
            match unsafe { create_debug_messenger(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Validation messages will not be logged: {}", e);
                    None
                }
            }
        } else {
            None
        };

        match unsafe { Self::with_instance(entry, instance, debug) } {
            Ok(driver) => Ok(driver),
            Err((instance, debug, e)) => {
                unsafe {
                    if let Some((loader, messenger)) = debug {
                        loader.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    /// Everything after the instance. On failure the instance is handed back
    /// for destruction.
    #[allow(clippy::type_complexity)]
    unsafe fn with_instance(
        entry: ash::Entry,
        instance: ash::Instance,
        debug: Option<DebugMessenger>,
    ) -> std::result::Result<Self, (ash::Instance, Option<DebugMessenger>, GpuError)> {
        let selected = match select_physical_device(&instance) {
            Ok(selected) => selected,
            Err(e) => return Err((instance, debug, e)),
        };
        let info = DeviceInfo::query(&instance, selected.physical_device);
        tracing::info!("Selected GPU: {}", info.summary());

        let (device, queue) = match create_device(&instance, &selected) {
            Ok(pair) => pair,
            Err(e) => return Err((instance, debug, e)),
        };

        let pools = (|| -> Result<(vk::CommandPool, Descriptors, GpuAllocator)> {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(selected.queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = device.create_command_pool(&pool_info, None)?;
            let descriptors = match Descriptors::new(&device) {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    device.destroy_command_pool(command_pool, None);
                    return Err(e);
                }
            };
            match GpuAllocator::new(&instance, &device, selected.physical_device) {
                Ok(allocator) => Ok((command_pool, descriptors, allocator)),
                Err(e) => {
                    descriptors.destroy(&device);
                    device.destroy_command_pool(command_pool, None);
                    Err(e)
                }
            }
        })();
        let (command_pool, descriptors, allocator) = match pools {
            Ok(pools) => pools,
            Err(e) => {
                device.destroy_device(None);
                return Err((instance, debug, e));
            }
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        Ok(Self {
            entry,
            instance,
            debug,
            physical_device: selected.physical_device,
            queue_family: selected.queue_family,
            device,
            queue,
            command_pool,
            descriptors,
            allocator: Mutex::new(allocator),
            surface_loader,
            swapchain_loader,
            info,
        })
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.descriptors.destroy(&self.device);
            self.device.destroy_command_pool(self.command_pool, None);

            // Frees every VkDeviceMemory; must precede device destruction.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl Driver for VulkanDriver {
    fn backend(&self) -> Backend {
        Backend::Vulkan
    }

    fn description(&self) -> String {
        self.info.summary()
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        unsafe { self.device.queue_wait_idle(self.queue)? };
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&info, None)? })
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX)? };
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        buffers
            .into_iter()
            .next()
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time: bool) -> Result<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(cmd, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, command: &Command) {
        unsafe { record::record(&self.device, cmd, command) };
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn submit(&self, submission: &Submission<'_>) -> Result<()> {
        let command_buffers = [submission.command_buffer];
        let info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(submission.wait_stages)
            .signal_semaphores(submission.signal_semaphores);
        unsafe {
            self.device
                .queue_submit(self.queue, &[info], submission.fence)?
        };
        Ok(())
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.allocator
            .lock()
            .create_buffer(size, usage, location, name)
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) -> Result<()> {
        self.allocator.lock().free_buffer(buffer)
    }

    fn write_mapped(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        memory::write_mapped(buffer, offset, data)
    }

    fn read_mapped(&self, buffer: &GpuBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        memory::read_mapped(buffer, offset, out)
    }

    fn create_image(&self, desc: &ImageDesc, name: &str) -> Result<GpuImage> {
        let format = convert::format(desc.format);
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(convert::tiling(desc.tiling))
            .usage(convert::image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) = self.allocator.lock().create_image(&info, name)?;
        match self.create_image_view(image, format) {
            Ok(view) => Ok(GpuImage {
                image,
                view,
                allocation: Some(allocation),
            }),
            Err(e) => {
                self.allocator.lock().free_image(image, Some(allocation))?;
                Err(e)
            }
        }
    }

    fn destroy_image(&self, image: GpuImage) -> Result<()> {
        unsafe { self.device.destroy_image_view(image.view, None) };
        self.allocator
            .lock()
            .free_image(image.image, image.allocation)
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(color_subresource_range());
        Ok(unsafe { self.device.create_image_view(&info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(convert::filter(desc.mag_filter))
            .min_filter(convert::filter(desc.min_filter))
            .mipmap_mode(convert::mipmap_mode(desc.mip_filter))
            .address_mode_u(convert::address_mode(desc.address_u))
            .address_mode_v(convert::address_mode(desc.address_v))
            .address_mode_w(convert::address_mode(desc.address_w))
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(1.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);
        Ok(unsafe { self.device.create_sampler(&info, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn allocate_descriptor_set(&self, kind: BindingKind) -> Result<vk::DescriptorSet> {
        unsafe { self.descriptors.allocate(&self.device, kind) }
    }

    fn free_descriptor_set(&self, set: vk::DescriptorSet) -> Result<()> {
        unsafe { self.descriptors.free(&self.device, set) }
    }

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        kind: BindingKind,
        buffer: vk::Buffer,
        range: u64,
    ) {
        unsafe { Descriptors::write_buffer(&self.device, set, kind, buffer, range) };
    }

    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        unsafe { Descriptors::write_image(&self.device, set, view, sampler) };
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&info, None) }
            .map_err(|e| GpuError::ShaderCompilation(e.to_string()))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(&self, slots: &[BindingKind]) -> Result<vk::PipelineLayout> {
        let set_layouts: Vec<vk::DescriptorSetLayout> = slots
            .iter()
            .map(|&kind| self.descriptors.layout(kind))
            .collect();
        unsafe { pipeline::create_pipeline_layout(&self.device, &set_layouts) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline> {
        unsafe { pipeline::create_graphics_pipeline(&self.device, desc) }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_render_pass(
        &self,
        formats: &[vk::Format],
        final_layout: vk::ImageLayout,
    ) -> Result<vk::RenderPass> {
        unsafe { pipeline::create_render_pass(&self.device, formats, final_layout) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: Extent2D,
    ) -> Result<vk::Framebuffer> {
        unsafe { pipeline::create_framebuffer(&self.device, render_pass, attachments, extent) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_surface(&self, window: &Arc<dyn NativeWindow>) -> Result<vk::SurfaceKHR> {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) };
    }

    fn surface_format(&self, surface: vk::SurfaceKHR) -> Result<vk::SurfaceFormatKHR> {
        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical_device,
                self.queue_family,
                surface,
            )?
        };
        if !supported {
            return Err(GpuError::SurfaceCreation(
                "Graphics queue cannot present to this surface".to_string(),
            ));
        }

        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, surface)?
        };
        select_surface_format(&formats).ok_or(GpuError::UnsupportedSurfaceFormat)
    }

    fn create_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        format: vk::SurfaceFormatKHR,
        desired: Extent2D,
    ) -> Result<Option<SwapchainParts>> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, surface)?
        };
        let extent = calculate_extent(&capabilities, desired);
        if extent.is_empty() {
            return Ok(None);
        }

        let composite_alpha = [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::INHERIT,
        ]
        .into_iter()
        .find(|mode| capabilities.supported_composite_alpha.contains(*mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count(&capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(vk::Extent2D {
                width: extent.width,
                height: extent.height,
            })
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        let images = match unsafe { self.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        Ok(Some(SwapchainParts {
            swapchain,
            images,
            extent,
        }))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<Acquire> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            // No image was acquired and the semaphore stays unsignaled.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn present(
        &self,
        targets: &[PresentTarget],
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<Vec<PresentOutcome>> {
        let swapchains: Vec<vk::SwapchainKHR> = targets.iter().map(|t| t.swapchain).collect();
        let indices: Vec<u32> = targets.iter().map(|t| t.image_index).collect();
        let mut results = vec![vk::Result::SUCCESS; targets.len()];

        let overall = {
            let info = vk::PresentInfoKHR::default()
                .wait_semaphores(wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&indices)
                .results(&mut results);
            unsafe { self.swapchain_loader.queue_present(self.queue, &info) }
        };
        match overall {
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {}
            Err(e) => return Err(e.into()),
        }

        results
            .into_iter()
            .map(|result| match result {
                vk::Result::SUCCESS => Ok(PresentOutcome::Presented),
                vk::Result::SUBOPTIMAL_KHR | vk::Result::ERROR_OUT_OF_DATE_KHR => {
                    Ok(PresentOutcome::Stale)
                }
                e => Err(e.into()),
            })
            .collect()
    }
}
