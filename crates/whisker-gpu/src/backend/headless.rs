//! In-process driver with simulated memory and presentation.
//!
//! Work executes synchronously at submit time: copies move bytes, render
//! passes fill their attachments with the clear color and barriers are
//! counted. Draws are recorded but not rasterized. Swapchains report stale
//! whenever their window's client size no longer matches the ring extent.

use super::convert::format_from_vk;
use super::swapchain::{calculate_extent, image_count, select_surface_format};
use super::{
    Acquire, Command, Driver, GpuBuffer, GpuImage, PipelineDesc, PresentOutcome, PresentTarget,
    Submission, SwapchainParts,
};
use crate::error::{GpuError, Result};
use crate::window::NativeWindow;
use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use whisker_core::{
    Backend, BindingKind, ClearColor, Extent2D, Format, ImageDesc, SamplerDesc,
};

const MIN_SWAPCHAIN_IMAGES: u32 = 2;
const MAX_SWAPCHAIN_IMAGES: u32 = 3;
const MAX_SURFACE_EXTENT: u32 = 16384;

/// One executed queue submission.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionRecord {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub commands: Vec<Command>,
}

/// One image handed to a (simulated) presentation engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    pub surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub image: vk::Image,
    pub wait_semaphores: Vec<vk::Semaphore>,
}

struct SimImage {
    extent: Extent2D,
    format: Format,
    texels: Vec<u8>,
}

impl SimImage {
    fn new(extent: Extent2D, format: Format) -> Self {
        let len = usize::try_from(format.region_size(extent)).unwrap_or(0);
        Self {
            extent,
            format,
            texels: vec![0; len],
        }
    }

    fn row_pitch(&self) -> usize {
        self.extent.width as usize * self.format.bytes_per_pixel() as usize
    }
}

struct SimSwapchain {
    surface: vk::SurfaceKHR,
    extent: Extent2D,
    images: Vec<vk::Image>,
    next: u32,
}

#[derive(Default)]
struct CommandBufferState {
    recording: bool,
    commands: Vec<Command>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    fences: HashMap<vk::Fence, bool>,
    semaphores: HashSet<vk::Semaphore>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferState>,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    images: HashMap<vk::Image, SimImage>,
    views: HashMap<vk::ImageView, vk::Image>,
    samplers: HashSet<vk::Sampler>,
    descriptor_sets: HashSet<vk::DescriptorSet>,
    shader_modules: HashSet<vk::ShaderModule>,
    pipeline_layouts: HashSet<vk::PipelineLayout>,
    pipelines: HashSet<vk::Pipeline>,
    render_passes: HashSet<vk::RenderPass>,
    framebuffers: HashMap<vk::Framebuffer, Vec<vk::ImageView>>,
    surfaces: HashMap<vk::SurfaceKHR, Arc<dyn NativeWindow>>,
    pinned_extents: HashMap<vk::SurfaceKHR, Extent2D>,
    swapchains: HashMap<vk::SwapchainKHR, SimSwapchain>,
    submissions: Vec<SubmissionRecord>,
    presents: Vec<PresentRecord>,
    barrier_count: usize,
}

impl State {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn live_objects(&self) -> usize {
        self.fences.len()
            + self.semaphores.len()
            + self.command_buffers.len()
            + self.buffers.len()
            + self.images.len()
            + self.views.len()
            + self.samplers.len()
            + self.descriptor_sets.len()
            + self.shader_modules.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.render_passes.len()
            + self.framebuffers.len()
            + self.surfaces.len()
            + self.swapchains.len()
    }

    fn surface_size(&self, surface: vk::SurfaceKHR) -> Result<Extent2D> {
        if let Some(&extent) = self.pinned_extents.get(&surface) {
            return Ok(extent);
        }
        self.surfaces
            .get(&surface)
            .map(|window| window.client_size())
            .ok_or_else(|| GpuError::InvalidState("unknown surface".to_string()))
    }

    fn swapchain_is_current(&self, swapchain: vk::SwapchainKHR) -> Result<bool> {
        let sc = self
            .swapchains
            .get(&swapchain)
            .ok_or_else(|| GpuError::InvalidState("unknown swapchain".to_string()))?;
        Ok(self.surface_size(sc.surface)? == sc.extent)
    }

    fn buffer(&self, buffer: vk::Buffer) -> Result<&Vec<u8>> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| GpuError::InvalidState("unknown buffer".to_string()))
    }

    fn buffer_mut(&mut self, buffer: vk::Buffer) -> Result<&mut Vec<u8>> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| GpuError::InvalidState("unknown buffer".to_string()))
    }

    fn image_mut(&mut self, image: vk::Image) -> Result<&mut SimImage> {
        self.images
            .get_mut(&image)
            .ok_or_else(|| GpuError::InvalidState("unknown image".to_string()))
    }

    fn execute(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            match command {
                Command::CopyBuffer {
                    src,
                    dst,
                    src_offset,
                    dst_offset,
                    size,
                } => {
                    let bytes = slice(self.buffer(*src)?, *src_offset, *size)?.to_vec();
                    slice_mut(self.buffer_mut(*dst)?, *dst_offset, *size)?
                        .copy_from_slice(&bytes);
                }
                Command::CopyBufferToImage { src, dst, extent } => {
                    let bytes = self.buffer(*src)?.clone();
                    let image = self.image_mut(*dst)?;
                    let (row, pitch) = region_rows(image, *extent)?;
                    for y in 0..extent.height as usize {
                        let from = bytes.get(y * row..(y + 1) * row).ok_or_else(|| {
                            GpuError::InvalidState("staging buffer too small".to_string())
                        })?;
                        image.texels[y * pitch..y * pitch + row].copy_from_slice(from);
                    }
                }
                Command::CopyImageToBuffer { src, dst, extent } => {
                    let image = self
                        .images
                        .get(src)
                        .ok_or_else(|| GpuError::InvalidState("unknown image".to_string()))?;
                    let (row, pitch) = region_rows(image, *extent)?;
                    let mut bytes = Vec::with_capacity(row * extent.height as usize);
                    for y in 0..extent.height as usize {
                        bytes.extend_from_slice(&image.texels[y * pitch..y * pitch + row]);
                    }
                    slice_mut(self.buffer_mut(*dst)?, 0, bytes.len() as u64)?
                        .copy_from_slice(&bytes);
                }
                Command::BeginRenderPass {
                    framebuffer,
                    clear_colors,
                    ..
                } => {
                    let views = self.framebuffers.get(framebuffer).cloned().ok_or_else(|| {
                        GpuError::InvalidState("unknown framebuffer".to_string())
                    })?;
                    for (i, view) in views.iter().enumerate() {
                        let color = clear_colors
                            .get(i)
                            .or_else(|| clear_colors.last())
                            .copied()
                            .unwrap_or(ClearColor::BLACK);
                        let image = *self.views.get(view).ok_or_else(|| {
                            GpuError::InvalidState("unknown image view".to_string())
                        })?;
                        let image = self.image_mut(image)?;
                        let texel = encode_clear(color, image.format);
                        image.texels = texel.repeat(image.extent.area() as usize);
                    }
                }
                Command::ImageBarrier { .. } => self.barrier_count += 1,
                _ => {}
            }
        }
        Ok(())
    }
}

fn slice(bytes: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    let end = start.saturating_add(usize::try_from(len).unwrap_or(usize::MAX));
    bytes
        .get(start..end)
        .ok_or_else(|| GpuError::InvalidState("access outside buffer".to_string()))
}

fn slice_mut(bytes: &mut [u8], offset: u64, len: u64) -> Result<&mut [u8]> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    let end = start.saturating_add(usize::try_from(len).unwrap_or(usize::MAX));
    bytes
        .get_mut(start..end)
        .ok_or_else(|| GpuError::InvalidState("access outside buffer".to_string()))
}

/// Packed row size of `extent` and the image's row pitch.
fn region_rows(image: &SimImage, extent: Extent2D) -> Result<(usize, usize)> {
    if extent.width > image.extent.width || extent.height > image.extent.height {
        return Err(GpuError::InvalidState(
            "copy region exceeds image extent".to_string(),
        ));
    }
    let row = extent.width as usize * image.format.bytes_per_pixel() as usize;
    Ok((row, image.row_pitch()))
}

fn unorm8(v: f32) -> u8 {
    // Clamped to [0, 255] before the cast.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let byte = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    byte
}

fn srgb8(v: f32) -> u8 {
    let v = v.clamp(0.0, 1.0);
    let encoded = if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    };
    unorm8(encoded)
}

/// One texel of `format` holding `color`.
fn encode_clear(color: ClearColor, format: Format) -> Vec<u8> {
    let ClearColor { r, g, b, a } = color;
    match format {
        Format::R8Unorm => vec![unorm8(r)],
        Format::Rg8Unorm => vec![unorm8(r), unorm8(g)],
        Format::Rgba8Unorm => vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)],
        Format::Rgba8Srgb => vec![srgb8(r), srgb8(g), srgb8(b), unorm8(a)],
        Format::Bgra8Unorm => vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)],
        Format::Bgra8Srgb => vec![srgb8(b), srgb8(g), srgb8(r), unorm8(a)],
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Format::R32Uint => (r.max(0.0) as u32).to_le_bytes().to_vec(),
        Format::R32Sfloat | Format::Rg32Sfloat | Format::Rgb32Sfloat | Format::Rgba32Sfloat => {
            color.to_array()[..format.channels() as usize]
                .iter()
                .flat_map(|c| c.to_le_bytes())
                .collect()
        }
    }
}

/// Simulated device.
pub struct HeadlessDriver {
    state: Mutex<State>,
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Number of image barriers executed so far.
    pub fn barrier_count(&self) -> usize {
        self.state.lock().barrier_count
    }

    /// Make `surface` report `extent` as its current extent whatever its
    /// window says, like window systems that keep the last size while a
    /// window is minimized. `None` follows the window again.
    pub fn pin_surface_extent(&self, surface: vk::SurfaceKHR, extent: Option<Extent2D>) {
        let mut state = self.state.lock();
        match extent {
            Some(extent) => state.pinned_extents.insert(surface, extent),
            None => state.pinned_extents.remove(&surface),
        };
    }

    /// Every queue submission executed so far, oldest first.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    /// Every accepted present, oldest first.
    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.lock().presents.clone()
    }

    /// Accepted presents for one surface.
    pub fn present_count(&self, surface: vk::SurfaceKHR) -> usize {
        self.state
            .lock()
            .presents
            .iter()
            .filter(|p| p.surface == surface)
            .count()
    }

    /// Current texels of an image, tightly packed.
    pub fn image_contents(&self, image: vk::Image) -> Option<Vec<u8>> {
        self.state
            .lock()
            .images
            .get(&image)
            .map(|i| i.texels.clone())
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).cloned()
    }

    /// Number of driver objects not yet destroyed.
    pub fn live_objects(&self) -> usize {
        self.state.lock().live_objects()
    }
}

fn release<T: Eq + std::hash::Hash + std::fmt::Debug>(set: &mut HashSet<T>, handle: T, what: &str) {
    if !set.remove(&handle) {
        tracing::error!("Destroyed unknown {} {:?}", what, handle);
    }
}

impl Driver for HeadlessDriver {
    fn backend(&self) -> Backend {
        Backend::Headless
    }

    fn description(&self) -> String {
        "Headless simulated device".to_string()
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<()> {
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let fence = state.handle();
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        match self.state.lock().fences.get(&fence) {
            Some(true) => Ok(()),
            // Nothing pending could ever signal it.
            Some(false) => Err(GpuError::Vulkan(vk::Result::TIMEOUT)),
            None => Err(GpuError::InvalidState("unknown fence".to_string())),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        let signaled = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| GpuError::InvalidState("unknown fence".to_string()))?;
        *signaled = false;
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        if self.state.lock().fences.remove(&fence).is_none() {
            tracing::error!("Destroyed unknown fence {:?}", fence);
        }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = state.handle();
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        release(&mut self.state.lock().semaphores, semaphore, "semaphore");
    }

    fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let mut state = self.state.lock();
        let cmd = state.handle();
        state
            .command_buffers
            .insert(cmd, CommandBufferState::default());
        Ok(cmd)
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        if self.state.lock().command_buffers.remove(&cmd).is_none() {
            tracing::error!("Freed unknown command buffer {:?}", cmd);
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| GpuError::InvalidState("unknown command buffer".to_string()))?;
        buffer.recording = false;
        buffer.commands.clear();
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _one_time: bool) -> Result<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| GpuError::InvalidState("unknown command buffer".to_string()))?;
        if buffer.recording {
            return Err(GpuError::InvalidState(
                "command buffer is already recording".to_string(),
            ));
        }
        buffer.recording = true;
        buffer.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let buffer = state
            .command_buffers
            .get_mut(&cmd)
            .ok_or_else(|| GpuError::InvalidState("unknown command buffer".to_string()))?;
        if !buffer.recording {
            return Err(GpuError::InvalidState(
                "command buffer is not recording".to_string(),
            ));
        }
        buffer.recording = false;
        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, command: &Command) {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&cmd) {
            Some(buffer) if buffer.recording => buffer.commands.push(command.clone()),
            _ => tracing::error!("{:?} recorded outside of a recording command buffer", command),
        }
    }

    fn submit(&self, submission: &Submission<'_>) -> Result<()> {
        let mut state = self.state.lock();
        let commands = match state.command_buffers.get(&submission.command_buffer) {
            Some(buffer) if !buffer.recording => buffer.commands.clone(),
            Some(_) => {
                return Err(GpuError::InvalidState(
                    "submitted a command buffer that is still recording".to_string(),
                ))
            }
            None => {
                return Err(GpuError::InvalidState(
                    "unknown command buffer".to_string(),
                ))
            }
        };

        if submission.fence != vk::Fence::null() {
            match state.fences.get(&submission.fence) {
                Some(false) => {}
                Some(true) => {
                    return Err(GpuError::InvalidState(
                        "submitted with a signaled fence".to_string(),
                    ))
                }
                None => return Err(GpuError::InvalidState("unknown fence".to_string())),
            }
        }

        state.execute(&commands)?;
        state.submissions.push(SubmissionRecord {
            wait_semaphores: submission.wait_semaphores.to_vec(),
            signal_semaphores: submission.signal_semaphores.to_vec(),
            commands,
        });
        if submission.fence != vk::Fence::null() {
            state.fences.insert(submission.fence, true);
        }
        Ok(())
    }

    fn create_buffer(
        &self,
        size: u64,
        _usage: vk::BufferUsageFlags,
        _location: MemoryLocation,
        _name: &str,
    ) -> Result<GpuBuffer> {
        let len = usize::try_from(size)
            .map_err(|_| GpuError::AllocationFailed(format!("{size} bytes")))?;
        let mut state = self.state.lock();
        let buffer = state.handle();
        state.buffers.insert(buffer, vec![0; len]);
        Ok(GpuBuffer {
            buffer,
            allocation: None,
            size,
        })
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) -> Result<()> {
        self.state
            .lock()
            .buffers
            .remove(&buffer.buffer)
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidState("buffer destroyed twice".to_string()))
    }

    fn write_mapped(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        slice_mut(state.buffer_mut(buffer.buffer)?, offset, data.len() as u64)?
            .copy_from_slice(data);
        Ok(())
    }

    fn read_mapped(&self, buffer: &GpuBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        out.copy_from_slice(slice(state.buffer(buffer.buffer)?, offset, out.len() as u64)?);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc, _name: &str) -> Result<GpuImage> {
        let mut state = self.state.lock();
        let image = state.handle();
        let view = state.handle();
        state.images.insert(image, SimImage::new(desc.extent, desc.format));
        state.views.insert(view, image);
        Ok(GpuImage {
            image,
            view,
            allocation: None,
        })
    }

    fn destroy_image(&self, image: GpuImage) -> Result<()> {
        let mut state = self.state.lock();
        state.views.remove(&image.view);
        state
            .images
            .remove(&image.image)
            .map(|_| ())
            .ok_or_else(|| GpuError::InvalidState("image destroyed twice".to_string()))
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&image) {
            return Err(GpuError::InvalidState("unknown image".to_string()));
        }
        let view = state.handle();
        state.views.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        if self.state.lock().views.remove(&view).is_none() {
            tracing::error!("Destroyed unknown image view {:?}", view);
        }
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<vk::Sampler> {
        let mut state = self.state.lock();
        let sampler = state.handle();
        state.samplers.insert(sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        release(&mut self.state.lock().samplers, sampler, "sampler");
    }

    fn allocate_descriptor_set(&self, _kind: BindingKind) -> Result<vk::DescriptorSet> {
        let mut state = self.state.lock();
        let set = state.handle();
        state.descriptor_sets.insert(set);
        Ok(set)
    }

    fn free_descriptor_set(&self, set: vk::DescriptorSet) -> Result<()> {
        if self.state.lock().descriptor_sets.remove(&set) {
            Ok(())
        } else {
            Err(GpuError::InvalidState(
                "descriptor set freed twice".to_string(),
            ))
        }
    }

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        _kind: BindingKind,
        _buffer: vk::Buffer,
        _range: u64,
    ) {
        debug_assert!(self.state.lock().descriptor_sets.contains(&set));
    }

    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        _view: vk::ImageView,
        _sampler: vk::Sampler,
    ) {
        debug_assert!(self.state.lock().descriptor_sets.contains(&set));
    }

    fn create_shader_module(&self, _code: &[u32]) -> Result<vk::ShaderModule> {
        let mut state = self.state.lock();
        let module = state.handle();
        state.shader_modules.insert(module);
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        release(&mut self.state.lock().shader_modules, module, "shader module");
    }

    fn create_pipeline_layout(&self, _slots: &[BindingKind]) -> Result<vk::PipelineLayout> {
        let mut state = self.state.lock();
        let layout = state.handle();
        state.pipeline_layouts.insert(layout);
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        release(&mut self.state.lock().pipeline_layouts, layout, "pipeline layout");
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline> {
        let mut state = self.state.lock();
        if !state.render_passes.contains(&desc.render_pass) {
            return Err(GpuError::PipelineCreation(
                "unknown render pass".to_string(),
            ));
        }
        let pipeline = state.handle();
        state.pipelines.insert(pipeline);
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        release(&mut self.state.lock().pipelines, pipeline, "pipeline");
    }

    fn create_render_pass(
        &self,
        _formats: &[vk::Format],
        _final_layout: vk::ImageLayout,
    ) -> Result<vk::RenderPass> {
        let mut state = self.state.lock();
        let render_pass = state.handle();
        state.render_passes.insert(render_pass);
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        release(&mut self.state.lock().render_passes, render_pass, "render pass");
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut state = self.state.lock();
        let framebuffer = state.handle();
        state.framebuffers.insert(framebuffer, attachments.to_vec());
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        if self.state.lock().framebuffers.remove(&framebuffer).is_none() {
            tracing::error!("Destroyed unknown framebuffer {:?}", framebuffer);
        }
    }

    fn create_surface(&self, window: &Arc<dyn NativeWindow>) -> Result<vk::SurfaceKHR> {
        let mut state = self.state.lock();
        let surface = state.handle();
        state.surfaces.insert(surface, Arc::clone(window));
        Ok(surface)
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        let mut state = self.state.lock();
        state.pinned_extents.remove(&surface);
        if state.surfaces.remove(&surface).is_none() {
            tracing::error!("Destroyed unknown surface {:?}", surface);
        }
    }

    fn surface_format(&self, _surface: vk::SurfaceKHR) -> Result<vk::SurfaceFormatKHR> {
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        select_surface_format(&available).ok_or(GpuError::UnsupportedSurfaceFormat)
    }

    fn create_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        format: vk::SurfaceFormatKHR,
        desired: Extent2D,
    ) -> Result<Option<SwapchainParts>> {
        let mut state = self.state.lock();
        let client = state.surface_size(surface)?;
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: MIN_SWAPCHAIN_IMAGES,
            max_image_count: MAX_SWAPCHAIN_IMAGES,
            current_extent: vk::Extent2D {
                width: client.width,
                height: client.height,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: MAX_SURFACE_EXTENT,
                height: MAX_SURFACE_EXTENT,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&capabilities, desired);
        if extent.is_empty() {
            return Ok(None);
        }
        let texel_format = format_from_vk(format.format)
            .ok_or_else(|| GpuError::SwapchainCreation(format!("{:?}", format.format)))?;

        let images: Vec<vk::Image> = (0..image_count(&capabilities))
            .map(|_| {
                let image = state.handle();
                state.images.insert(image, SimImage::new(extent, texel_format));
                image
            })
            .collect();
        let swapchain = state.handle();
        state.swapchains.insert(
            swapchain,
            SimSwapchain {
                surface,
                extent,
                images: images.clone(),
                next: 0,
            },
        );

        Ok(Some(SwapchainParts {
            swapchain,
            images,
            extent,
        }))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        match state.swapchains.remove(&swapchain) {
            Some(sc) => {
                for image in sc.images {
                    state.images.remove(&image);
                }
            }
            None => tracing::error!("Destroyed unknown swapchain {:?}", swapchain),
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _semaphore: vk::Semaphore,
    ) -> Result<Acquire> {
        let mut state = self.state.lock();
        if !state.swapchain_is_current(swapchain)? {
            return Ok(Acquire::Stale);
        }
        let sc = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| GpuError::InvalidState("unknown swapchain".to_string()))?;
        let index = sc.next;
        sc.next = (sc.next + 1) % sc.images.len() as u32;
        Ok(Acquire::Image {
            index,
            suboptimal: false,
        })
    }

    fn present(
        &self,
        targets: &[PresentTarget],
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<Vec<PresentOutcome>> {
        let mut state = self.state.lock();
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            if !state.swapchain_is_current(target.swapchain)? {
                outcomes.push(PresentOutcome::Stale);
                continue;
            }
            let sc = &state.swapchains[&target.swapchain];
            let image = *sc
                .images
                .get(target.image_index as usize)
                .ok_or_else(|| GpuError::InvalidState("image index out of range".to_string()))?;
            let record = PresentRecord {
                surface: sc.surface,
                swapchain: target.swapchain,
                image_index: target.image_index,
                image,
                wait_semaphores: wait_semaphores.to_vec(),
            };
            state.presents.push(record);
            outcomes.push(PresentOutcome::Presented);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::HeadlessWindow;

    #[test]
    fn clear_colors_encode_per_format() {
        let color = ClearColor::rgba(1.0, 0.0, 0.5, 1.0);
        assert_eq!(encode_clear(color, Format::Rgba8Unorm), vec![255, 0, 128, 255]);
        assert_eq!(encode_clear(color, Format::Bgra8Unorm), vec![128, 0, 255, 255]);
        assert_eq!(encode_clear(color, Format::R8Unorm), vec![255]);
        assert_eq!(
            encode_clear(color, Format::Rg32Sfloat),
            [1.0f32.to_le_bytes(), 0.0f32.to_le_bytes()].concat()
        );
        // Midpoint grey is brighter once sRGB encoded.
        assert!(encode_clear(ClearColor::rgba(0.5, 0.5, 0.5, 1.0), Format::Rgba8Srgb)[0] > 128);
    }

    #[test]
    fn fence_wait_fails_when_nothing_can_signal_it() {
        let driver = HeadlessDriver::new();
        let fence = driver.create_fence(true).unwrap();
        driver.wait_for_fence(fence).unwrap();
        driver.reset_fence(fence).unwrap();
        assert!(matches!(
            driver.wait_for_fence(fence),
            Err(GpuError::Vulkan(vk::Result::TIMEOUT))
        ));
    }

    #[test]
    fn submit_executes_buffer_copies() {
        let driver = HeadlessDriver::new();
        let src = driver
            .create_buffer(8, vk::BufferUsageFlags::empty(), MemoryLocation::CpuToGpu, "src")
            .unwrap();
        let dst = driver
            .create_buffer(8, vk::BufferUsageFlags::empty(), MemoryLocation::GpuOnly, "dst")
            .unwrap();
        driver.write_mapped(&src, 0, &[1, 2, 3, 4]).unwrap();

        let cmd = driver.allocate_command_buffer().unwrap();
        driver.begin_command_buffer(cmd, true).unwrap();
        driver.record(
            cmd,
            &Command::CopyBuffer {
                src: src.buffer,
                dst: dst.buffer,
                src_offset: 0,
                dst_offset: 4,
                size: 4,
            },
        );
        driver.end_command_buffer(cmd).unwrap();
        driver.submit(&Submission::bare(cmd)).unwrap();

        assert_eq!(
            driver.buffer_contents(dst.buffer).unwrap(),
            vec![0, 0, 0, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn swapchain_goes_stale_when_window_resizes() {
        let driver = HeadlessDriver::new();
        let window = Arc::new(HeadlessWindow::new(320, 240));
        let native: Arc<dyn NativeWindow> = window.clone();
        let surface = driver.create_surface(&native).unwrap();
        let format = driver.surface_format(surface).unwrap();
        assert_eq!(format.format, vk::Format::B8G8R8A8_UNORM);

        let parts = driver
            .create_swapchain(surface, format, Extent2D::new(320, 240))
            .unwrap()
            .unwrap();
        assert_eq!(parts.images.len(), 3);
        assert_eq!(parts.extent, Extent2D::new(320, 240));

        let semaphore = driver.create_semaphore().unwrap();
        assert_eq!(
            driver.acquire_next_image(parts.swapchain, semaphore).unwrap(),
            Acquire::Image {
                index: 0,
                suboptimal: false
            }
        );

        window.resize(640, 480);
        assert_eq!(
            driver.acquire_next_image(parts.swapchain, semaphore).unwrap(),
            Acquire::Stale
        );
        let outcome = driver
            .present(
                &[PresentTarget {
                    swapchain: parts.swapchain,
                    image_index: 0,
                }],
                &[],
            )
            .unwrap();
        assert_eq!(outcome, vec![PresentOutcome::Stale]);
        assert_eq!(driver.present_count(surface), 0);
    }
}
