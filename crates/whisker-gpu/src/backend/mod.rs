//! Driver seam.
//!
//! Everything above this module talks to the GPU through [`Driver`], in terms
//! of raw Vulkan handles. [`vulkan::VulkanDriver`] forwards to the real API;
//! [`headless::HeadlessDriver`] simulates it in process so frame orchestration
//! and resource bookkeeping run without a GPU.

pub(crate) mod convert;
pub mod headless;
pub(crate) mod swapchain;
pub(crate) mod vulkan;

use crate::access::AccessState;
use crate::error::Result;
use crate::program::VertexLayout;
use crate::window::NativeWindow;
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use whisker_core::{
    Backend, BindingKind, ClearColor, CullMode, Extent2D, FrontFace, ImageDesc, IndexType,
    SamplerDesc, ShaderStage, Topology,
};

/// A command recorded into a command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: Extent2D,
        clear_colors: Vec<ClearColor>,
    },
    EndRenderPass,
    /// Viewport (depth 0..1) and scissor covering `extent`.
    SetViewportScissor { extent: Extent2D },
    BindPipeline { pipeline: vk::Pipeline },
    BindVertexBuffer { binding: u32, buffer: vk::Buffer },
    BindIndexBuffer {
        buffer: vk::Buffer,
        index_type: IndexType,
    },
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    /// Tightly packed `extent` region at the image origin.
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        extent: Extent2D,
    },
    CopyImageToBuffer {
        src: vk::Image,
        dst: vk::Buffer,
        extent: Extent2D,
    },
    ImageBarrier {
        image: vk::Image,
        from: AccessState,
        to: AccessState,
    },
}

/// A buffer with its allocation.
pub(crate) struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

/// An image with its allocation and default view.
pub(crate) struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
}

/// One queue submission.
pub(crate) struct Submission<'a> {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

impl<'a> Submission<'a> {
    /// Submission with no semaphores and no fence.
    pub fn bare(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait_semaphores: &[],
            wait_stages: &[],
            signal_semaphores: &[],
            fence: vk::Fence::null(),
        }
    }
}

/// Result of acquiring a presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Acquire {
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches its surface; nothing was acquired.
    Stale,
}

/// Per-swapchain result of a batched present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; the swapchain should be rebuilt.
    Stale,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PresentTarget {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
}

/// A freshly created swapchain.
pub(crate) struct SwapchainParts {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub extent: Extent2D,
}

/// Everything needed to build a graphics pipeline.
pub(crate) struct PipelineDesc<'a> {
    pub stages: &'a [(ShaderStage, vk::ShaderModule)],
    pub vertex_layouts: &'a [VertexLayout],
    pub topology: Topology,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub color_attachment_count: u32,
}

/// Native calls the rendering layer is built on.
///
/// Object creation returns raw handles; the caller owns them and hands each
/// back to the matching `destroy_*` exactly once.
pub(crate) trait Driver {
    fn backend(&self) -> Backend;

    /// Human-readable description of the selected device.
    fn description(&self) -> String;

    fn wait_idle(&self) -> Result<()>;
    fn queue_wait_idle(&self) -> Result<()>;

    // Synchronization
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Commands
    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer>;
    fn free_command_buffer(&self, cmd: vk::CommandBuffer);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time: bool) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn record(&self, cmd: vk::CommandBuffer, command: &Command);
    fn submit(&self, submission: &Submission<'_>) -> Result<()>;

    // Memory
    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer>;
    fn destroy_buffer(&self, buffer: GpuBuffer) -> Result<()>;
    /// Write into host-visible memory.
    fn write_mapped(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()>;
    /// Read from host-visible memory.
    fn read_mapped(&self, buffer: &GpuBuffer, offset: u64, out: &mut [u8]) -> Result<()>;
    fn create_image(&self, desc: &ImageDesc, name: &str) -> Result<GpuImage>;
    fn destroy_image(&self, image: GpuImage) -> Result<()>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Descriptors
    fn allocate_descriptor_set(&self, kind: BindingKind) -> Result<vk::DescriptorSet>;
    fn free_descriptor_set(&self, set: vk::DescriptorSet) -> Result<()>;
    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        kind: BindingKind,
        buffer: vk::Buffer,
        range: u64,
    );
    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        view: vk::ImageView,
        sampler: vk::Sampler,
    );

    // Pipelines
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(&self, slots: &[BindingKind]) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn create_render_pass(
        &self,
        formats: &[vk::Format],
        final_layout: vk::ImageLayout,
    ) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Presentation
    fn create_surface(&self, window: &Arc<dyn NativeWindow>) -> Result<vk::SurfaceKHR>;
    fn destroy_surface(&self, surface: vk::SurfaceKHR);
    fn surface_format(&self, surface: vk::SurfaceKHR) -> Result<vk::SurfaceFormatKHR>;
    /// `None` while the surface has a zero extent (minimized window).
    fn create_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        format: vk::SurfaceFormatKHR,
        desired: Extent2D,
    ) -> Result<Option<SwapchainParts>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<Acquire>;
    /// One present call for every target, all waiting on `wait_semaphores`.
    fn present(
        &self,
        targets: &[PresentTarget],
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<Vec<PresentOutcome>>;
}
