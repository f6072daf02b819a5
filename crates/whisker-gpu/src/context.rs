//! The context: device owner, resource factory and frame orchestrator.

use crate::access::AccessState;
use crate::backend::headless::HeadlessDriver;
use crate::backend::vulkan::InstanceConfig;
use crate::backend::{Command, PresentOutcome, PresentTarget, Submission};
use crate::buffer::Buffer;
use crate::device::{Device, ObjectTag};
use crate::error::{GpuError, Result, UsageError};
use crate::frame::{BoundProgram, Frame, FramePhase, PassInfo, RecordedSurface};
use crate::image::Image;
use crate::program::{Program, ProgramDesc};
use crate::render_target::{RenderTarget, RenderTargetKey};
use crate::sampler::Sampler;
use crate::shader::Shader;
use crate::surface::{Surface, SurfaceKey, SurfaceState};
use crate::window::{EventPump, NativeWindow};
use ash::vk;
use slotmap::SlotMap;
use std::rc::Rc;
use std::sync::Arc;
use whisker_core::{
    Backend, BindingKind, BufferKind, ClearColor, Extent2D, ImageDesc, IndexType, SamplerDesc,
    ShaderStage, Version,
};

/// Handle to a window surface owned by a [`Context`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId {
    key: SurfaceKey,
    tag: ObjectTag,
}

/// Handle to an offscreen render target owned by a [`Context`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTargetId {
    key: RenderTargetKey,
    tag: ObjectTag,
}

/// What a program renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassTarget {
    Surface(SurfaceId),
    RenderTarget(RenderTargetId),
}

impl From<SurfaceId> for PassTarget {
    fn from(id: SurfaceId) -> Self {
        Self::Surface(id)
    }
}

impl From<RenderTargetId> for PassTarget {
    fn from(id: RenderTargetId) -> Self {
        Self::RenderTarget(id)
    }
}

/// Builder for creating a [`Context`].
pub struct ContextBuilder {
    app_name: String,
    app_version: Version,
    engine_name: String,
    engine_version: Version,
    api_version: Version,
    validation: bool,
    backend: Backend,
    event_pump: Option<Rc<dyn EventPump>>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Whisker Application".to_string(),
            app_version: Version::new(1, 0, 0),
            engine_name: "Whisker".to_string(),
            engine_version: Version::new(0, 1, 0),
            api_version: Version::new(1, 2, 0),
            validation: cfg!(debug_assertions),
            backend: Backend::Vulkan,
            event_pump: None,
        }
    }
}

impl ContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    #[must_use]
    pub fn app_version(mut self, version: Version) -> Self {
        self.app_version = version;
        self
    }

    #[must_use]
    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = name.into();
        self
    }

    #[must_use]
    pub fn engine_version(mut self, version: Version) -> Self {
        self.engine_version = version;
        self
    }

    /// Vulkan API version requested from the instance.
    #[must_use]
    pub fn api_version(mut self, version: Version) -> Self {
        self.api_version = version;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Event source `present` blocks on while every pending surface is
    /// minimized.
    #[must_use]
    pub fn event_pump(mut self, pump: Rc<dyn EventPump>) -> Self {
        self.event_pump = Some(pump);
        self
    }

    /// Build the context.
    /// Windows on a real backend can be minimized; without a pump,
    /// `present(true)` has nothing to block on.
    fn spins_while_minimized(&self) -> bool {
        matches!(self.backend, Backend::Vulkan) && self.event_pump.is_none()
    }

    pub fn build(self) -> Result<Context> {
        if self.spins_while_minimized() {
            tracing::warn!(
                "No event pump supplied; present() will not wait while windows are minimized"
            );
        }
        let device = match self.backend {
            Backend::Vulkan => Device::vulkan(&InstanceConfig {
                app_name: &self.app_name,
                app_version: self.app_version,
                engine_name: &self.engine_name,
                engine_version: self.engine_version,
                api_version: self.api_version,
                validation: self.validation,
            })?,
            Backend::Headless => Device::headless(),
        };

        let (command_buffer, in_flight) = {
            let driver = device.driver();
            let command_buffer = driver.allocate_command_buffer()?;
            // Signaled so the first begin() does not block.
            match driver.create_fence(true) {
                Ok(fence) => (command_buffer, fence),
                Err(e) => {
                    driver.free_command_buffer(command_buffer);
                    return Err(e);
                }
            }
        };

        tracing::info!(
            "Created {} context for {}: {}",
            self.backend.name(),
            self.app_name,
            device.driver().description()
        );

        Ok(Context {
            device,
            surfaces: SlotMap::with_key(),
            targets: SlotMap::with_key(),
            command_buffer,
            in_flight,
            frame: Frame::new(),
            event_pump: self.event_pump,
        })
    }
}

/// Owns the device and every surface and render target, creates resources,
/// and drives the per-frame protocol:
///
/// `begin` → (`record` | `record_target`) → `use_*`/`draw*` → `end` → ... →
/// `submit` → `present`.
///
/// One command buffer and one fence are shared by all frames, so at most one
/// frame is in flight.
pub struct Context {
    device: Device,
    surfaces: SlotMap<SurfaceKey, Surface>,
    targets: SlotMap<RenderTargetKey, RenderTarget>,
    command_buffer: vk::CommandBuffer,
    in_flight: vk::Fence,
    frame: Frame,
    event_pump: Option<Rc<dyn EventPump>>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// A context on the in-process headless backend.
    pub fn headless() -> Result<Self> {
        ContextBuilder::new().backend(Backend::Headless).build()
    }

    pub fn backend(&self) -> Backend {
        self.device.driver().backend()
    }

    /// Selected device, as reported by the driver.
    pub fn description(&self) -> String {
        self.device.driver().description()
    }

    pub fn phase(&self) -> FramePhase {
        self.frame.phase
    }

    /// Inspection handle of the headless backend.
    pub fn headless_driver(&self) -> Option<&HeadlessDriver> {
        self.device.headless_driver()
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        self.device.driver().wait_idle()
    }

    // ---------------------------------------------------------------------
    // Surfaces and render targets
    // ---------------------------------------------------------------------

    /// Create a presentation surface for `window`.
    ///
    /// A window that is minimized right now gets a surface that is queued
    /// for recreation and skipped by `record` until it has an area.
    pub fn create_surface(&mut self, window: Arc<dyn NativeWindow>) -> Result<SurfaceId> {
        let surface = Surface::new(&self.device, window)?;
        let stale = surface.state() == SurfaceState::Stale;
        let key = self.surfaces.insert(surface);
        if stale {
            self.frame.retry.push(key);
        }
        Ok(SurfaceId {
            key,
            tag: self.device.tag(),
        })
    }

    /// Destroy a surface. Waits for the device to idle first.
    pub fn destroy_surface(&mut self, id: SurfaceId) -> Result<()> {
        self.device.check(id.tag, "destroy_surface", "surface")?;
        self.require_idle("destroy_surface")?;
        if !self.surfaces.contains_key(id.key) {
            return Err(UsageError::UnknownSurface.into());
        }
        self.device.driver().wait_idle()?;
        if self.frame.retry.remove(id.key) {
            tracing::warn!("Surface destroyed while waiting for recreation");
        }
        if let Some(surface) = self.surfaces.remove(id.key) {
            surface.destroy(&self.device);
        }
        Ok(())
    }

    fn surface(&self, id: SurfaceId, call: &'static str) -> Result<&Surface> {
        self.device.check(id.tag, call, "surface")?;
        self.surfaces
            .get(id.key)
            .ok_or(GpuError::InvalidUse(UsageError::UnknownSurface))
    }

    /// Extent of the surface's current ring; zero while it has none.
    pub fn surface_extent(&self, id: SurfaceId) -> Result<Extent2D> {
        Ok(self.surface(id, "surface_extent")?.extent())
    }

    pub fn surface_state(&self, id: SurfaceId) -> Result<SurfaceState> {
        Ok(self.surface(id, "surface_state")?.state())
    }

    /// Native surface handle.
    pub fn surface_handle(&self, id: SurfaceId) -> Result<vk::SurfaceKHR> {
        Ok(self.surface(id, "surface_handle")?.raw())
    }

    /// Number of surfaces waiting for their swapchain to be rebuilt.
    pub fn pending_recreation(&self) -> usize {
        self.frame.retry.len()
    }

    /// Create an offscreen render target drawing into `images`.
    ///
    /// The images are owned by the target from here on; on failure they are
    /// destroyed along with the error.
    pub fn create_render_target(&mut self, images: Vec<Image>) -> Result<RenderTargetId> {
        let target = RenderTarget::new(&self.device, images)?;
        Ok(RenderTargetId {
            key: self.targets.insert(target),
            tag: self.device.tag(),
        })
    }

    /// Destroy a render target and its images. Waits for the device to idle.
    pub fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<()> {
        self.device
            .check(id.tag, "destroy_render_target", "render target")?;
        self.require_idle("destroy_render_target")?;
        if !self.targets.contains_key(id.key) {
            return Err(UsageError::UnknownRenderTarget.into());
        }
        self.device.driver().wait_idle()?;
        match self.targets.remove(id.key) {
            Some(target) => target.destroy(&self.device),
            None => Ok(()),
        }
    }

    fn target(&self, id: RenderTargetId, call: &'static str) -> Result<&RenderTarget> {
        self.device.check(id.tag, call, "render target")?;
        self.targets
            .get(id.key)
            .ok_or(GpuError::InvalidUse(UsageError::UnknownRenderTarget))
    }

    pub fn render_target_extent(&self, id: RenderTargetId) -> Result<Extent2D> {
        Ok(self.target(id, "render_target_extent")?.extent())
    }

    /// Attachment `index` of a render target, e.g. to sample it as a texture.
    pub fn render_target_attachment(&self, id: RenderTargetId, index: usize) -> Result<&Image> {
        self.target(id, "render_target_attachment")?
            .attachment(index)
    }

    /// Read back attachment `index` of a render target.
    pub fn read_render_target(&self, id: RenderTargetId, index: usize) -> Result<Vec<u8>> {
        self.require_no_open_frame("read_render_target")?;
        self.target(id, "read_render_target")?
            .attachment(index)?
            .read(&self.device)
    }

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    pub fn create_buffer(&self, kind: BufferKind, size: u64) -> Result<Buffer> {
        Buffer::new(&self.device, kind, size)
    }

    pub fn destroy_buffer(&self, buffer: Buffer) -> Result<()> {
        self.device.check(buffer.tag, "destroy_buffer", "buffer")?;
        buffer.destroy(&self.device)
    }

    /// Copy `data` into `buffer` at `offset` through a staging buffer.
    /// Blocks until the copy has completed.
    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        self.device.check(buffer.tag, "write_buffer", "buffer")?;
        buffer.write(&self.device, offset, data)
    }

    /// Typed variant of [`Context::write_buffer`].
    pub fn write_buffer_pod<T: bytemuck::Pod>(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[T],
    ) -> Result<()> {
        self.write_buffer(buffer, offset, bytemuck::cast_slice(data))
    }

    pub fn read_buffer(&self, buffer: &Buffer, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.device.check(buffer.tag, "read_buffer", "buffer")?;
        buffer.read(&self.device, offset, len)
    }

    /// Create an image. With texture usage and a sampler it also gets a
    /// descriptor set and is moved to the shader-read state.
    pub fn create_image(&self, desc: ImageDesc, sampler: Option<&Sampler>) -> Result<Image> {
        Image::new(&self.device, desc, sampler)
    }

    pub fn destroy_image(&self, image: Image) -> Result<()> {
        self.device.check(image.tag, "destroy_image", "image")?;
        image.destroy(&self.device)
    }

    /// Upload a tightly packed `width` x `height` region at the image origin.
    /// The image returns to its prior access state afterwards.
    ///
    /// Not allowed while a frame is open: the upload runs before the frame's
    /// recorded barriers, which would then start from a stale layout.
    pub fn write_image(&self, image: &Image, width: u32, height: u32, data: &[u8]) -> Result<()> {
        self.require_no_open_frame("write_image")?;
        self.device.check(image.tag, "write_image", "image")?;
        image.write(&self.device, width, height, data)
    }

    pub fn read_image(&self, image: &Image) -> Result<Vec<u8>> {
        self.require_no_open_frame("read_image")?;
        self.device.check(image.tag, "read_image", "image")?;
        image.read(&self.device)
    }

    /// Move an image to `state`. Inside an open frame the barrier goes into
    /// the frame's command buffer; otherwise it is submitted on its own.
    pub fn transition_image(&self, image: &Image, state: AccessState) -> Result<()> {
        self.device.check(image.tag, "transition_image", "image")?;
        match self.frame.phase {
            FramePhase::Open => {
                for command in image.transition_commands(state)? {
                    self.device.driver().record(self.command_buffer, &command);
                }
                Ok(())
            }
            FramePhase::InPass => Err(UsageError::RenderPassOpen {
                call: "transition_image",
            }
            .into()),
            FramePhase::Idle | FramePhase::Submitted => image.transition(&self.device, state),
        }
    }

    pub fn create_sampler(&self, desc: SamplerDesc) -> Result<Sampler> {
        Sampler::new(&self.device, desc)
    }

    pub fn destroy_sampler(&self, sampler: Sampler) -> Result<()> {
        self.device.check(sampler.tag, "destroy_sampler", "sampler")?;
        sampler.destroy(&self.device);
        Ok(())
    }

    /// Create a shader from SPIR-V bytes.
    pub fn create_shader(&self, stage: ShaderStage, code: &[u8]) -> Result<Shader> {
        Shader::new(&self.device, stage, code)
    }

    pub fn destroy_shader(&self, shader: Shader) -> Result<()> {
        self.device.check(shader.tag, "destroy_shader", "shader")?;
        shader.destroy(&self.device);
        Ok(())
    }

    /// Build a program for the render pass of `target`.
    pub fn create_program(
        &self,
        target: impl Into<PassTarget>,
        desc: &ProgramDesc<'_>,
    ) -> Result<Program> {
        let (render_pass, attachments) = match target.into() {
            PassTarget::Surface(id) => (self.surface(id, "create_program")?.render_pass, 1),
            PassTarget::RenderTarget(id) => {
                let target = self.target(id, "create_program")?;
                (target.render_pass, target.attachment_count() as u32)
            }
        };
        Program::new(&self.device, desc, render_pass, attachments)
    }

    pub fn destroy_program(&self, program: Program) -> Result<()> {
        self.device.check(program.tag, "destroy_program", "program")?;
        program.destroy(&self.device);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Frame protocol
    // ---------------------------------------------------------------------

    fn require_idle(&self, call: &'static str) -> std::result::Result<(), UsageError> {
        match self.frame.phase {
            FramePhase::Idle => Ok(()),
            _ => Err(UsageError::FrameInProgress { call }),
        }
    }

    /// One-shot image copies run ahead of the frame command buffer, so they
    /// must not interleave with barriers recorded into it.
    fn require_no_open_frame(&self, call: &'static str) -> std::result::Result<(), UsageError> {
        match self.frame.phase {
            FramePhase::Open | FramePhase::InPass => Err(UsageError::FrameInProgress { call }),
            FramePhase::Idle | FramePhase::Submitted => Ok(()),
        }
    }

    /// Command buffer open, no pass: what `record*` and `submit` need.
    fn require_open(&self, call: &'static str) -> std::result::Result<(), UsageError> {
        match self.frame.phase {
            FramePhase::Open => Ok(()),
            FramePhase::InPass => Err(UsageError::RenderPassOpen { call }),
            FramePhase::Idle | FramePhase::Submitted => Err(UsageError::FrameNotBegun { call }),
        }
    }

    fn require_pass(&self, call: &'static str) -> std::result::Result<(), UsageError> {
        match self.frame.phase {
            FramePhase::InPass => Ok(()),
            FramePhase::Open => Err(UsageError::NotRecording { call }),
            FramePhase::Idle | FramePhase::Submitted => Err(UsageError::FrameNotBegun { call }),
        }
    }

    fn bound_program(&self, call: &'static str) -> std::result::Result<&BoundProgram, UsageError> {
        self.frame
            .program
            .as_ref()
            .ok_or(UsageError::NoProgramBound { call })
    }

    fn push(&self, command: &Command) {
        self.device.driver().record(self.command_buffer, command);
    }

    /// Open a frame. Blocks until the previous frame's work has completed.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin(&mut self) -> Result<()> {
        match self.frame.phase {
            FramePhase::Idle => {}
            // Nothing was acquired, so nothing is left to present.
            FramePhase::Submitted if self.frame.recorded.is_empty() => {}
            _ => return Err(UsageError::FrameInProgress { call: "begin" }.into()),
        }

        let driver = self.device.driver();
        driver.wait_for_fence(self.in_flight)?;
        driver.reset_fence(self.in_flight)?;
        driver.reset_command_buffer(self.command_buffer)?;
        driver.begin_command_buffer(self.command_buffer, true)?;

        self.frame.clear();
        self.frame.phase = FramePhase::Open;
        tracing::trace!("begin");
        Ok(())
    }

    /// Start drawing to a surface, cleared to `clear`.
    ///
    /// Returns `false` when the surface is stale (resized or minimized); it
    /// is then queued for recreation and must not be drawn to this frame.
    pub fn record(&mut self, id: SurfaceId, clear: ClearColor) -> Result<bool> {
        self.require_open("record")?;
        self.device.check(id.tag, "record", "surface")?;
        if self.frame.was_recorded(id.key) {
            return Err(UsageError::SurfaceAlreadyRecorded.into());
        }
        let surface = self
            .surfaces
            .get_mut(id.key)
            .ok_or(GpuError::InvalidUse(UsageError::UnknownSurface))?;

        if self.frame.retry.contains(id.key) {
            tracing::trace!("record: surface awaiting recreation, skipped");
            return Ok(false);
        }
        let Some(acquired) = surface.acquire(&self.device)? else {
            tracing::warn!("Surface {:?} is stale, skipping it this frame", surface.raw());
            self.frame.retry.push(id.key);
            return Ok(false);
        };
        let render_pass = surface.render_pass;

        self.frame.recorded.push(RecordedSurface {
            key: id.key,
            swapchain: acquired.swapchain,
            image_index: acquired.image_index,
            acquire_semaphore: acquired.acquire_semaphore,
            submit_semaphore: acquired.submit_semaphore,
        });
        self.push(&Command::BeginRenderPass {
            render_pass,
            framebuffer: acquired.framebuffer,
            extent: acquired.extent,
            clear_colors: vec![clear],
        });
        self.push(&Command::SetViewportScissor {
            extent: acquired.extent,
        });
        self.frame.pass = Some(PassInfo {
            render_pass,
            target: None,
        });
        self.frame.program = None;
        self.frame.phase = FramePhase::InPass;
        tracing::trace!("record: image {}", acquired.image_index);
        Ok(true)
    }

    /// Start drawing to an offscreen target. `clears` gives one color per
    /// attachment; missing entries repeat the last one.
    pub fn record_target(&mut self, id: RenderTargetId, clears: &[ClearColor]) -> Result<()> {
        self.require_open("record_target")?;
        let target = self.target(id, "record_target")?;
        let render_pass = target.render_pass;
        for command in &target.begin_commands(clears) {
            self.push(command);
        }
        self.frame.pass = Some(PassInfo {
            render_pass,
            target: Some(id.key),
        });
        self.frame.program = None;
        self.frame.phase = FramePhase::InPass;
        tracing::trace!("record_target");
        Ok(())
    }

    /// Bind a program built for the render pass that is open.
    pub fn use_program(&mut self, program: &Program) -> Result<()> {
        self.require_pass("use_program")?;
        self.device.check(program.tag, "use_program", "program")?;
        let compatible = self
            .frame
            .pass
            .is_some_and(|pass| pass.render_pass == program.render_pass);
        if !compatible {
            return Err(UsageError::IncompatibleProgram.into());
        }

        self.push(&Command::BindPipeline {
            pipeline: program.pipeline,
        });
        self.frame.program = Some(BoundProgram {
            layout: program.layout,
            slots: program.slots().to_vec(),
        });
        Ok(())
    }

    fn check_buffer(
        &self,
        buffer: &Buffer,
        call: &'static str,
        expected: BufferKind,
    ) -> std::result::Result<(), UsageError> {
        self.require_pass(call)?;
        self.device.check(buffer.tag, call, "buffer")?;
        if buffer.kind() == expected {
            Ok(())
        } else {
            Err(UsageError::WrongBufferKind {
                call,
                expected,
                actual: buffer.kind(),
            })
        }
    }

    /// Bind a vertex buffer at `binding` (the vertex layout index).
    pub fn use_vertex_buffer(&mut self, buffer: &Buffer, binding: u32) -> Result<()> {
        self.check_buffer(buffer, "use_vertex_buffer", BufferKind::Vertex)?;
        self.push(&Command::BindVertexBuffer {
            binding,
            buffer: buffer.handle(),
        });
        Ok(())
    }

    pub fn use_index_buffer(&mut self, buffer: &Buffer, index_type: IndexType) -> Result<()> {
        self.check_buffer(buffer, "use_index_buffer", BufferKind::Index)?;
        self.push(&Command::BindIndexBuffer {
            buffer: buffer.handle(),
            index_type,
        });
        Ok(())
    }

    /// Bind `set` at program slot `index`, which must hold `kind`.
    fn bind_slot(
        &self,
        call: &'static str,
        index: u32,
        kind: BindingKind,
        set: vk::DescriptorSet,
    ) -> Result<()> {
        let program = self.bound_program(call)?;
        let expected = program.slots.get(index as usize).copied();
        if expected != Some(kind) {
            return Err(UsageError::SlotMismatch {
                call,
                index,
                expected,
                actual: kind,
            }
            .into());
        }
        self.push(&Command::BindDescriptorSet {
            layout: program.layout,
            set_index: index,
            set,
        });
        Ok(())
    }

    /// Bind a uniform buffer at program slot `index`.
    pub fn use_uniform_buffer(&mut self, buffer: &Buffer, index: u32) -> Result<()> {
        const CALL: &str = "use_uniform_buffer";
        self.check_buffer(buffer, CALL, BufferKind::Uniform)?;
        let set = buffer.descriptor.ok_or_else(|| {
            GpuError::InvalidState("uniform buffer without descriptor set".to_string())
        })?;
        self.bind_slot(CALL, index, BindingKind::UniformBuffer, set)
    }

    /// Bind a storage buffer at program slot `index`.
    pub fn use_storage_buffer(&mut self, buffer: &Buffer, index: u32) -> Result<()> {
        const CALL: &str = "use_storage_buffer";
        self.check_buffer(buffer, CALL, BufferKind::Storage)?;
        let set = buffer.descriptor.ok_or_else(|| {
            GpuError::InvalidState("storage buffer without descriptor set".to_string())
        })?;
        self.bind_slot(CALL, index, BindingKind::StorageBuffer, set)
    }

    /// Bind a texture at program slot `index`.
    pub fn use_texture_image(&mut self, image: &Image, index: u32) -> Result<()> {
        const CALL: &str = "use_texture_image";
        self.require_pass(CALL)?;
        self.device.check(image.tag, CALL, "image")?;
        let set = image.descriptor.ok_or(UsageError::NotATexture)?;
        if image.access_state() != AccessState::SHADER_READ {
            tracing::warn!(
                "{}: image is in {:?}, not ready for sampling",
                CALL,
                image.access_state().layout
            );
        }
        self.bind_slot(CALL, index, BindingKind::Texture, set)
    }

    pub fn draw(&mut self, vertex_count: u32) -> Result<()> {
        self.draw_instanced(vertex_count, 1)
    }

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) -> Result<()> {
        self.require_pass("draw")?;
        self.bound_program("draw")?;
        self.push(&Command::Draw {
            vertex_count,
            instance_count,
        });
        Ok(())
    }

    pub fn draw_indexed(&mut self, index_count: u32) -> Result<()> {
        self.draw_indexed_instanced(index_count, 1)
    }

    pub fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32) -> Result<()> {
        self.require_pass("draw_indexed")?;
        self.bound_program("draw_indexed")?;
        self.push(&Command::DrawIndexed {
            index_count,
            instance_count,
        });
        Ok(())
    }

    /// Close the open render pass.
    pub fn end(&mut self) -> Result<()> {
        self.require_pass("end")?;
        self.push(&Command::EndRenderPass);
        if let Some(key) = self.frame.pass.and_then(|pass| pass.target) {
            if let Some(target) = self.targets.get(key) {
                target.finish_pass();
            }
        }
        self.frame.pass = None;
        self.frame.program = None;
        self.frame.phase = FramePhase::Open;
        tracing::trace!("end");
        Ok(())
    }

    /// Close the command buffer and submit it: wait on every acquired image,
    /// signal every recorded surface's submit semaphore and the fence.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit(&mut self) -> Result<()> {
        self.require_open("submit")?;
        let driver = self.device.driver();
        driver.end_command_buffer(self.command_buffer)?;

        let recorded = &self.frame.recorded;
        let waits: Vec<vk::Semaphore> = recorded.iter().map(|r| r.acquire_semaphore).collect();
        let stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; waits.len()];
        let signals: Vec<vk::Semaphore> = recorded.iter().map(|r| r.submit_semaphore).collect();
        driver.submit(&Submission {
            command_buffer: self.command_buffer,
            wait_semaphores: &waits,
            wait_stages: &stages,
            signal_semaphores: &signals,
            fence: self.in_flight,
        })?;

        self.frame.phase = FramePhase::Submitted;
        tracing::trace!("submit: {} surfaces", recorded.len());
        Ok(())
    }

    /// Present every surface recorded this frame, then rebuild stale ones.
    ///
    /// With `prevent_spinning`, a frame that drew nothing while surfaces are
    /// still waiting (typically minimized windows) blocks on the event pump
    /// instead of returning immediately.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(&mut self, prevent_spinning: bool) -> Result<()> {
        match self.frame.phase {
            FramePhase::Open | FramePhase::InPass => {
                return Err(UsageError::FrameInProgress { call: "present" }.into())
            }
            FramePhase::Idle | FramePhase::Submitted => {}
        }

        let result = self.present_recorded().and_then(|()| self.recreate_stale());

        if !self.frame.retry.is_empty() && self.frame.recorded.is_empty() && prevent_spinning {
            if let Some(pump) = &self.event_pump {
                tracing::trace!("present: waiting for window events");
                pump.wait_for_events();
            }
        }
        self.frame.clear();
        result
    }

    fn present_recorded(&mut self) -> Result<()> {
        if self.frame.phase != FramePhase::Submitted || self.frame.recorded.is_empty() {
            return Ok(());
        }
        let targets: Vec<PresentTarget> = self
            .frame
            .recorded
            .iter()
            .map(|r| PresentTarget {
                swapchain: r.swapchain,
                image_index: r.image_index,
            })
            .collect();
        let waits: Vec<vk::Semaphore> = self
            .frame
            .recorded
            .iter()
            .map(|r| r.submit_semaphore)
            .collect();

        let outcomes = self.device.driver().present(&targets, &waits)?;
        for (recorded, outcome) in self.frame.recorded.iter().zip(outcomes) {
            if outcome == PresentOutcome::Stale {
                if let Some(surface) = self.surfaces.get_mut(recorded.key) {
                    surface.mark_stale();
                }
                if self.frame.retry.push(recorded.key) {
                    tracing::debug!("Present reported a stale surface");
                }
            }
        }
        Ok(())
    }

    /// Rebuild every queued surface; minimized ones stay queued.
    fn recreate_stale(&mut self) -> Result<()> {
        if self.frame.retry.is_empty() {
            return Ok(());
        }
        self.device.driver().wait_idle()?;

        let mut failure = None;
        for key in self.frame.retry.drain() {
            let Some(surface) = self.surfaces.get_mut(key) else {
                continue;
            };
            match surface.recreate(&self.device) {
                Ok(true) => {}
                Ok(false) => {
                    self.frame.retry.push(key);
                }
                Err(e) => {
                    tracing::error!("Swapchain recreation failed: {}", e);
                    self.frame.retry.push(key);
                    failure.get_or_insert(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let driver = self.device.driver();
        if let Err(e) = driver.wait_idle() {
            tracing::error!("wait_idle failed during shutdown: {}", e);
        }
        for (_, surface) in self.surfaces.drain() {
            surface.destroy(&self.device);
        }
        for (_, target) in self.targets.drain() {
            if let Err(e) = target.destroy(&self.device) {
                tracing::error!("Failed to release render target: {}", e);
            }
        }
        driver.free_command_buffer(self.command_buffer);
        driver.destroy_fence(self.in_flight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::tests::spirv_header;
    use crate::window::HeadlessWindow;
    use crate::VertexLayout;
    use std::cell::Cell;
    use whisker_core::{Format, VertexInputRate};

    fn usage_error(result: Result<impl std::fmt::Debug>) -> UsageError {
        match result {
            Err(GpuError::InvalidUse(e)) => e,
            other => panic!("expected a usage error, got {other:?}"),
        }
    }

    fn window(ctx: &mut Context, width: u32, height: u32) -> (Arc<HeadlessWindow>, SurfaceId) {
        let window = Arc::new(HeadlessWindow::new(width, height));
        let id = ctx.create_surface(window.clone()).unwrap();
        (window, id)
    }

    fn program(ctx: &Context, target: impl Into<PassTarget>) -> Program {
        let vertex = ctx
            .create_shader(ShaderStage::Vertex, &spirv_header())
            .unwrap();
        let fragment = ctx
            .create_shader(ShaderStage::Fragment, &spirv_header())
            .unwrap();
        let desc = ProgramDesc::new()
            .shader(&vertex)
            .shader(&fragment)
            .vertex_layout(
                VertexLayout::new(8, VertexInputRate::Vertex).attribute(Format::Rg32Sfloat, 0),
            )
            .slot(BindingKind::UniformBuffer)
            .slot(BindingKind::Texture);
        let program = ctx.create_program(target, &desc).unwrap();
        ctx.destroy_shader(vertex).unwrap();
        ctx.destroy_shader(fragment).unwrap();
        program
    }

    #[derive(Default)]
    struct CountingPump {
        waits: Cell<usize>,
    }

    impl EventPump for CountingPump {
        fn wait_for_events(&self) {
            self.waits.set(self.waits.get() + 1);
        }
    }

    #[test]
    fn triangle_frame_clears_and_returns_to_idle() {
        let mut ctx = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 800, 600);
        let program = program(&ctx, w);
        let vertices = ctx.create_buffer(BufferKind::Vertex, 24).unwrap();
        ctx.write_buffer_pod(&vertices, 0, &[0.0f32, -0.5, 0.5, 0.5, -0.5, 0.5])
            .unwrap();

        ctx.begin().unwrap();
        assert!(ctx.record(w, ClearColor::BLACK).unwrap());
        ctx.use_program(&program).unwrap();
        ctx.use_vertex_buffer(&vertices, 0).unwrap();
        ctx.draw(3).unwrap();
        ctx.end().unwrap();
        ctx.submit().unwrap();
        ctx.present(true).unwrap();
        assert_eq!(ctx.phase(), FramePhase::Idle);

        let headless = ctx.headless_driver().unwrap();
        let presents = headless.presents();
        assert_eq!(presents.len(), 1);
        let pixels = headless.image_contents(presents[0].image).unwrap();
        assert_eq!(pixels.len(), 800 * 600 * 4);
        assert!(pixels.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));

        let frame = headless.submissions().pop().unwrap();
        assert!(frame.commands.contains(&Command::Draw {
            vertex_count: 3,
            instance_count: 1
        }));
    }

    #[test]
    fn recording_a_surface_twice_is_rejected() {
        let mut ctx = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 64, 64);
        ctx.begin().unwrap();
        assert!(ctx.record(w, ClearColor::BLACK).unwrap());
        ctx.end().unwrap();
        assert_eq!(
            usage_error(ctx.record(w, ClearColor::BLACK)),
            UsageError::SurfaceAlreadyRecorded
        );
    }

    #[test]
    fn draw_requires_a_recorded_surface() {
        let mut ctx = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 64, 64);
        assert_eq!(
            usage_error(ctx.draw(3)),
            UsageError::FrameNotBegun { call: "draw" }
        );
        ctx.begin().unwrap();
        assert_eq!(
            usage_error(ctx.draw(3)),
            UsageError::NotRecording { call: "draw" }
        );
        assert!(ctx.record(w, ClearColor::BLACK).unwrap());
        assert_eq!(
            usage_error(ctx.draw(3)),
            UsageError::NoProgramBound { call: "draw" }
        );
    }

    #[test]
    fn submit_with_open_render_pass_is_rejected() {
        let mut ctx = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 64, 64);
        ctx.begin().unwrap();
        assert!(ctx.record(w, ClearColor::BLACK).unwrap());
        assert_eq!(
            usage_error(ctx.submit()),
            UsageError::RenderPassOpen { call: "submit" }
        );
        assert_eq!(
            usage_error(ctx.present(true)),
            UsageError::FrameInProgress { call: "present" }
        );
        ctx.end().unwrap();
        ctx.submit().unwrap();
        ctx.present(true).unwrap();
    }

    #[test]
    fn buffer_kinds_must_match_the_call() {
        let mut ctx = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 64, 64);
        let index = ctx.create_buffer(BufferKind::Index, 12).unwrap();
        let vertex = ctx.create_buffer(BufferKind::Vertex, 12).unwrap();

        ctx.begin().unwrap();
        assert!(ctx.record(w, ClearColor::BLACK).unwrap());
        assert_eq!(
            usage_error(ctx.use_vertex_buffer(&index, 0)),
            UsageError::WrongBufferKind {
                call: "use_vertex_buffer",
                expected: BufferKind::Vertex,
                actual: BufferKind::Index
            }
        );
        assert_eq!(
            usage_error(ctx.use_index_buffer(&vertex, IndexType::U16)),
            UsageError::WrongBufferKind {
                call: "use_index_buffer",
                expected: BufferKind::Index,
                actual: BufferKind::Vertex
            }
        );
        ctx.use_vertex_buffer(&vertex, 0).unwrap();
        ctx.use_index_buffer(&index, IndexType::U16).unwrap();
    }

    #[test]
    fn descriptor_bindings_follow_program_slots() {
        let mut ctx = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 64, 64);
        let program = program(&ctx, w);
        let uniform = ctx.create_buffer(BufferKind::Uniform, 64).unwrap();
        let sampler = ctx.create_sampler(SamplerDesc::default()).unwrap();
        let texture = ctx
            .create_image(ImageDesc::texture(2, 2, Format::Rgba8Unorm), Some(&sampler))
            .unwrap();
        let plain = ctx
            .create_image(ImageDesc::texture(2, 2, Format::Rgba8Unorm), None)
            .unwrap();

        ctx.begin().unwrap();
        assert!(ctx.record(w, ClearColor::BLACK).unwrap());
        assert_eq!(
            usage_error(ctx.use_uniform_buffer(&uniform, 0)),
            UsageError::NoProgramBound {
                call: "use_uniform_buffer"
            }
        );
        ctx.use_program(&program).unwrap();
        ctx.use_uniform_buffer(&uniform, 0).unwrap();
        ctx.use_texture_image(&texture, 1).unwrap();
        assert_eq!(
            usage_error(ctx.use_texture_image(&texture, 0)),
            UsageError::SlotMismatch {
                call: "use_texture_image",
                index: 0,
                expected: Some(BindingKind::UniformBuffer),
                actual: BindingKind::Texture
            }
        );
        assert_eq!(
            usage_error(ctx.use_texture_image(&plain, 1)),
            UsageError::NotATexture
        );
    }

    #[test]
    fn programs_are_tied_to_their_render_pass() {
        let mut ctx = Context::headless().unwrap();
        let (_a, a) = window(&mut ctx, 64, 64);
        let (_b, b) = window(&mut ctx, 64, 64);
        let for_a = program(&ctx, a);

        ctx.begin().unwrap();
        assert!(ctx.record(b, ClearColor::BLACK).unwrap());
        assert_eq!(
            usage_error(ctx.use_program(&for_a)),
            UsageError::IncompatibleProgram
        );
    }

    #[test]
    fn transition_is_idempotent() {
        let ctx = Context::headless().unwrap();
        let image = ctx
            .create_image(ImageDesc::texture(4, 4, Format::Rgba8Unorm), None)
            .unwrap();
        let before = ctx.headless_driver().unwrap().barrier_count();

        ctx.transition_image(&image, AccessState::SHADER_READ).unwrap();
        ctx.transition_image(&image, AccessState::SHADER_READ).unwrap();
        assert_eq!(ctx.headless_driver().unwrap().barrier_count() - before, 1);
    }

    #[test]
    fn transition_inside_a_frame_uses_the_frame_command_buffer() {
        let mut ctx = Context::headless().unwrap();
        let image = ctx
            .create_image(ImageDesc::texture(4, 4, Format::Rgba8Unorm), None)
            .unwrap();
        let submissions = ctx.headless_driver().unwrap().submissions().len();

        ctx.begin().unwrap();
        ctx.transition_image(&image, AccessState::SHADER_READ).unwrap();
        assert_eq!(
            ctx.headless_driver().unwrap().submissions().len(),
            submissions
        );
        ctx.submit().unwrap();
        let frame = ctx.headless_driver().unwrap().submissions().pop().unwrap();
        assert_eq!(
            frame.commands,
            vec![Command::ImageBarrier {
                image: image.handle(),
                from: AccessState::UNDEFINED,
                to: AccessState::SHADER_READ
            }]
        );
        ctx.present(true).unwrap();
    }

    #[test]
    fn image_copies_wait_for_the_open_frame() {
        let mut ctx = Context::headless().unwrap();
        let image = ctx
            .create_image(ImageDesc::texture(2, 2, Format::Rgba8Unorm), None)
            .unwrap();
        let texels = [7u8; 16];
        let submissions = ctx.headless_driver().unwrap().submissions().len();

        ctx.begin().unwrap();
        ctx.transition_image(&image, AccessState::SHADER_READ).unwrap();
        assert_eq!(
            usage_error(ctx.write_image(&image, 2, 2, &texels)),
            UsageError::FrameInProgress {
                call: "write_image"
            }
        );
        assert_eq!(
            usage_error(ctx.read_image(&image)),
            UsageError::FrameInProgress { call: "read_image" }
        );
        assert_eq!(
            ctx.headless_driver().unwrap().submissions().len(),
            submissions
        );
        ctx.submit().unwrap();

        // Once submitted, uploads queue behind the frame's barrier.
        ctx.write_image(&image, 2, 2, &texels).unwrap();
        let submitted = ctx.headless_driver().unwrap().submissions();
        let barriers: Vec<(AccessState, AccessState)> = submitted[submissions..]
            .iter()
            .flat_map(|s| s.commands.iter())
            .filter_map(|c| match c {
                Command::ImageBarrier { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            barriers,
            vec![
                (AccessState::UNDEFINED, AccessState::SHADER_READ),
                (AccessState::SHADER_READ, AccessState::TRANSFER_DST),
                (AccessState::TRANSFER_DST, AccessState::SHADER_READ),
            ]
        );
        ctx.present(true).unwrap();
        assert_eq!(ctx.read_image(&image).unwrap(), texels);
    }

    #[test]
    fn staged_copies_round_trip() {
        let ctx = Context::headless().unwrap();
        let sampler = ctx.create_sampler(SamplerDesc::default()).unwrap();
        let image = ctx
            .create_image(ImageDesc::texture(3, 2, Format::Rgba8Unorm), Some(&sampler))
            .unwrap();
        let texels: Vec<u8> = (0..24).collect();
        ctx.write_image(&image, 3, 2, &texels).unwrap();
        assert_eq!(ctx.read_image(&image).unwrap(), texels);
        assert_eq!(image.access_state(), AccessState::SHADER_READ);

        let storage = ctx.create_buffer(BufferKind::Storage, 32).unwrap();
        let words = [1u32, 2, 3, 0xdead_beef];
        ctx.write_buffer_pod(&storage, 16, &words).unwrap();
        assert_eq!(
            ctx.read_buffer(&storage, 16, 16).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&words)
        );
    }

    #[test]
    fn real_backends_without_a_pump_are_flagged() {
        assert!(ContextBuilder::new().backend(Backend::Vulkan).spins_while_minimized());
        assert!(!ContextBuilder::new()
            .backend(Backend::Vulkan)
            .event_pump(Rc::new(CountingPump::default()))
            .spins_while_minimized());
        assert!(!ContextBuilder::new()
            .backend(Backend::Headless)
            .spins_while_minimized());
    }

    #[test]
    fn minimized_window_is_recreated_at_its_new_size() {
        let pump = Rc::new(CountingPump::default());
        let mut ctx = ContextBuilder::new()
            .backend(Backend::Headless)
            .event_pump(pump.clone())
            .build()
            .unwrap();
        let (window, w) = window(&mut ctx, 800, 600);
        let surface = ctx.surface_handle(w).unwrap();
        let frame = |ctx: &mut Context| -> bool {
            ctx.begin().unwrap();
            let recorded = ctx.record(w, ClearColor::BLACK).unwrap();
            if recorded {
                ctx.end().unwrap();
            }
            ctx.submit().unwrap();
            ctx.present(true).unwrap();
            recorded
        };

        assert!(frame(&mut ctx));
        assert_eq!(ctx.headless_driver().unwrap().present_count(surface), 1);

        window.resize(0, 0);
        for _ in 0..3 {
            assert!(!frame(&mut ctx));
        }
        assert_eq!(ctx.headless_driver().unwrap().present_count(surface), 1);
        assert_eq!(ctx.surface_state(w).unwrap(), SurfaceState::Stale);
        assert_eq!(ctx.pending_recreation(), 1);
        assert_eq!(pump.waits.get(), 3);

        window.resize(400, 300);
        // Still queued when this frame records; recreated when it presents.
        assert!(!frame(&mut ctx));
        assert_eq!(ctx.surface_state(w).unwrap(), SurfaceState::Live);
        assert_eq!(ctx.surface_extent(w).unwrap(), Extent2D::new(400, 300));
        assert_eq!(ctx.pending_recreation(), 0);

        assert!(frame(&mut ctx));
        assert_eq!(ctx.headless_driver().unwrap().present_count(surface), 2);
        assert_eq!(pump.waits.get(), 3);
    }

    #[test]
    fn minimized_window_stays_queued_while_the_driver_reports_an_extent() {
        let pump = Rc::new(CountingPump::default());
        let mut ctx = ContextBuilder::new()
            .backend(Backend::Headless)
            .event_pump(pump.clone())
            .build()
            .unwrap();
        let (window, w) = window(&mut ctx, 800, 600);
        let surface = ctx.surface_handle(w).unwrap();

        window.resize(0, 0);
        ctx.headless_driver()
            .unwrap()
            .pin_surface_extent(surface, Some(Extent2D::new(640, 480)));
        for _ in 0..2 {
            ctx.begin().unwrap();
            assert!(!ctx.record(w, ClearColor::BLACK).unwrap());
            ctx.submit().unwrap();
            ctx.present(true).unwrap();
        }
        assert_eq!(ctx.surface_state(w).unwrap(), SurfaceState::Stale);
        assert!(ctx.surface_extent(w).unwrap().is_empty());
        assert_eq!(ctx.pending_recreation(), 1);
        assert_eq!(pump.waits.get(), 2);
        assert_eq!(ctx.headless_driver().unwrap().present_count(surface), 0);
    }

    #[test]
    fn one_stale_surface_does_not_hold_back_the_other() {
        let mut ctx = Context::headless().unwrap();
        let (_wa, a) = window(&mut ctx, 64, 64);
        let (wb, b) = window(&mut ctx, 64, 64);
        wb.resize(100, 80);

        ctx.begin().unwrap();
        assert!(ctx.record(a, ClearColor::WHITE).unwrap());
        ctx.end().unwrap();
        assert!(!ctx.record(b, ClearColor::WHITE).unwrap());
        assert_eq!(ctx.pending_recreation(), 1);
        assert_eq!(ctx.surface_state(a).unwrap(), SurfaceState::Live);
        assert_eq!(ctx.surface_state(b).unwrap(), SurfaceState::Stale);
        ctx.submit().unwrap();
        ctx.present(true).unwrap();

        let headless = ctx.headless_driver().unwrap();
        assert_eq!(headless.present_count(ctx.surface_handle(a).unwrap()), 1);
        assert_eq!(headless.present_count(ctx.surface_handle(b).unwrap()), 0);
        assert_eq!(ctx.surface_extent(b).unwrap(), Extent2D::new(100, 80));
        assert_eq!(ctx.pending_recreation(), 0);
    }

    #[test]
    fn presents_wait_on_what_the_submission_signaled() {
        let mut ctx = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 32, 32);
        for _ in 0..4 {
            ctx.begin().unwrap();
            assert!(ctx.record(w, ClearColor::BLACK).unwrap());
            ctx.end().unwrap();
            ctx.submit().unwrap();
            ctx.present(true).unwrap();
        }

        let headless = ctx.headless_driver().unwrap();
        let submissions = headless.submissions();
        let presents = headless.presents();
        assert_eq!(submissions.len(), 4);
        for (submission, present) in submissions.iter().zip(&presents) {
            assert_eq!(submission.signal_semaphores, present.wait_semaphores);
            assert_eq!(submission.wait_semaphores.len(), 1);
        }
        // The ring has three images: the fourth frame reuses the first slot
        // and its semaphore.
        assert_eq!(presents[3].image_index, presents[0].image_index);
        assert_eq!(presents[3].wait_semaphores, presents[0].wait_semaphores);
        assert_ne!(presents[1].wait_semaphores, presents[0].wait_semaphores);
    }

    #[test]
    fn offscreen_targets_clear_their_attachments() {
        let mut ctx = Context::headless().unwrap();
        let image = ctx
            .create_image(ImageDesc::render_target(4, 2, Format::Rgba8Unorm), None)
            .unwrap();
        let target = ctx.create_render_target(vec![image]).unwrap();
        let program = program(&ctx, target);

        ctx.begin().unwrap();
        ctx.record_target(target, &[ClearColor::rgba(1.0, 0.0, 0.0, 1.0)])
            .unwrap();
        ctx.use_program(&program).unwrap();
        ctx.draw(3).unwrap();
        ctx.end().unwrap();
        ctx.submit().unwrap();
        ctx.present(true).unwrap();

        let attachment = ctx.render_target_attachment(target, 0).unwrap();
        assert_eq!(attachment.access_state(), AccessState::COLOR_ATTACHMENT);
        let pixels = ctx.read_render_target(target, 0).unwrap();
        assert!(pixels.chunks_exact(4).all(|px| px == [255, 0, 0, 255]));
        assert_eq!(
            ctx.render_target_extent(target).unwrap(),
            Extent2D::new(4, 2)
        );
    }

    #[test]
    fn objects_from_another_context_are_rejected() {
        let mut ctx = Context::headless().unwrap();
        let other = Context::headless().unwrap();
        let (_window, w) = window(&mut ctx, 16, 16);
        let foreign = other.create_buffer(BufferKind::Vertex, 16).unwrap();

        ctx.begin().unwrap();
        assert!(ctx.record(w, ClearColor::BLACK).unwrap());
        assert_eq!(
            usage_error(ctx.use_vertex_buffer(&foreign, 0)),
            UsageError::ForeignObject {
                call: "use_vertex_buffer",
                object: "buffer"
            }
        );
        assert!(ctx.destroy_buffer(foreign).is_err());
    }

    #[test]
    fn destroying_a_queued_surface_purges_it() {
        let mut ctx = Context::headless().unwrap();
        let (window, w) = window(&mut ctx, 16, 16);
        window.resize(0, 0);

        ctx.begin().unwrap();
        assert!(!ctx.record(w, ClearColor::BLACK).unwrap());
        assert_eq!(
            usage_error(ctx.destroy_surface(w)),
            UsageError::FrameInProgress {
                call: "destroy_surface"
            }
        );
        ctx.submit().unwrap();
        ctx.present(false).unwrap();
        assert_eq!(ctx.pending_recreation(), 1);

        ctx.destroy_surface(w).unwrap();
        assert_eq!(ctx.pending_recreation(), 0);
        assert_eq!(
            usage_error(ctx.surface_state(w)),
            UsageError::UnknownSurface
        );
    }

    #[test]
    fn begin_after_an_empty_submit_is_allowed() {
        let mut ctx = Context::headless().unwrap();
        ctx.begin().unwrap();
        assert_eq!(
            usage_error(ctx.begin()),
            UsageError::FrameInProgress { call: "begin" }
        );
        ctx.submit().unwrap();
        ctx.begin().unwrap();
        assert_eq!(ctx.phase(), FramePhase::Open);
    }
}
