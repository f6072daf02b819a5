//! Graphics programs: shaders, vertex input and binding slots baked into a
//! pipeline for one render pass.

use crate::backend::PipelineDesc;
use crate::device::{Device, ObjectTag};
use crate::error::{Result, UsageError};
use crate::shader::Shader;
use ash::vk;
use whisker_core::{BindingKind, CullMode, Format, FrontFace, ShaderStage, Topology, VertexInputRate};

/// One attribute inside a vertex layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub format: Format,
    pub offset: u32,
}

/// One vertex buffer binding.
///
/// Attribute locations are numbered consecutively across every layout of a
/// program, in the order the layouts were added.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub(crate) stride: u32,
    pub(crate) rate: VertexInputRate,
    pub(crate) attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn new(stride: u32, rate: VertexInputRate) -> Self {
        Self {
            stride,
            rate,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, format: Format, offset: u32) -> Self {
        self.attributes.push(VertexAttribute { format, offset });
        self
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn rate(&self) -> VertexInputRate {
        self.rate
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }
}

/// Builder describing a program.
///
/// Slot `i` is descriptor set `i` of the pipeline layout.
#[derive(Clone, Default)]
pub struct ProgramDesc<'a> {
    shaders: Vec<&'a Shader>,
    vertex_layouts: Vec<VertexLayout>,
    slots: Vec<BindingKind>,
    topology: Topology,
    cull_mode: CullMode,
    front_face: FrontFace,
}

impl<'a> ProgramDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shaders.push(shader);
        self
    }

    #[must_use]
    pub fn vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layouts.push(layout);
        self
    }

    #[must_use]
    pub fn slot(mut self, kind: BindingKind) -> Self {
        self.slots.push(kind);
        self
    }

    #[must_use]
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub fn cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    #[must_use]
    pub fn front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }
}

/// A graphics pipeline and its layout, usable only inside the render pass it
/// was built for.
pub struct Program {
    pub(crate) tag: ObjectTag,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) render_pass: vk::RenderPass,
    slots: Vec<BindingKind>,
}

impl Program {
    pub(crate) fn new(
        device: &Device,
        desc: &ProgramDesc<'_>,
        render_pass: vk::RenderPass,
        color_attachment_count: u32,
    ) -> Result<Self> {
        for shader in &desc.shaders {
            device.check(shader.tag, "create_program", "shader")?;
        }
        if !desc
            .shaders
            .iter()
            .any(|s| s.stage() == ShaderStage::Vertex)
        {
            return Err(UsageError::NoVertexShader.into());
        }

        let driver = device.driver();
        let layout = driver.create_pipeline_layout(&desc.slots)?;
        let stages: Vec<(ShaderStage, vk::ShaderModule)> = desc
            .shaders
            .iter()
            .map(|s| (s.stage(), s.module))
            .collect();

        let pipeline = driver.create_graphics_pipeline(&PipelineDesc {
            stages: &stages,
            vertex_layouts: &desc.vertex_layouts,
            topology: desc.topology,
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            layout,
            render_pass,
            color_attachment_count,
        });
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                driver.destroy_pipeline_layout(layout);
                return Err(e);
            }
        };

        tracing::debug!(
            "Created program: {} shaders, {} vertex layouts, {} slots",
            stages.len(),
            desc.vertex_layouts.len(),
            desc.slots.len()
        );
        Ok(Self {
            tag: device.tag(),
            layout,
            pipeline,
            render_pass,
            slots: desc.slots.clone(),
        })
    }

    /// Binding kinds in slot order.
    pub fn slots(&self) -> &[BindingKind] {
        &self.slots
    }

    /// Kind bound at `index`, or `None` past the last slot.
    pub fn slot(&self, index: u32) -> Option<BindingKind> {
        self.slots.get(index as usize).copied()
    }

    pub(crate) fn destroy(self, device: &Device) {
        let driver = device.driver();
        driver.destroy_pipeline(self.pipeline);
        driver.destroy_pipeline_layout(self.layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::tests::spirv_header;

    fn render_pass(device: &Device) -> vk::RenderPass {
        device
            .driver()
            .create_render_pass(&[vk::Format::B8G8R8A8_UNORM], vk::ImageLayout::PRESENT_SRC_KHR)
            .unwrap()
    }

    #[test]
    fn vertex_layout_collects_attributes_in_order() {
        let layout = VertexLayout::new(20, VertexInputRate::Vertex)
            .attribute(Format::Rg32Sfloat, 0)
            .attribute(Format::Rgb32Sfloat, 8);
        assert_eq!(layout.stride(), 20);
        assert_eq!(
            layout.attributes(),
            &[
                VertexAttribute {
                    format: Format::Rg32Sfloat,
                    offset: 0
                },
                VertexAttribute {
                    format: Format::Rgb32Sfloat,
                    offset: 8
                },
            ]
        );
    }

    #[test]
    fn program_needs_a_vertex_shader() {
        let device = Device::headless();
        let pass = render_pass(&device);
        let fragment = Shader::new(&device, ShaderStage::Fragment, &spirv_header()).unwrap();

        let desc = ProgramDesc::new().shader(&fragment);
        assert!(matches!(
            Program::new(&device, &desc, pass, 1),
            Err(crate::GpuError::InvalidUse(UsageError::NoVertexShader))
        ));
    }

    #[test]
    fn program_records_slots_and_cleans_up() {
        let device = Device::headless();
        let pass = render_pass(&device);
        let vertex = Shader::new(&device, ShaderStage::Vertex, &spirv_header()).unwrap();
        let live = device.headless_driver().unwrap().live_objects();

        let desc = ProgramDesc::new()
            .shader(&vertex)
            .vertex_layout(VertexLayout::new(8, VertexInputRate::Vertex).attribute(Format::Rg32Sfloat, 0))
            .slot(BindingKind::UniformBuffer)
            .slot(BindingKind::Texture)
            .topology(Topology::TriangleStrip);
        let program = Program::new(&device, &desc, pass, 1).unwrap();
        assert_eq!(program.slot(1), Some(BindingKind::Texture));
        assert_eq!(program.slot(2), None);

        program.destroy(&device);
        assert_eq!(device.headless_driver().unwrap().live_objects(), live);
    }

    #[test]
    fn shaders_from_another_device_are_rejected() {
        let device = Device::headless();
        let other = Device::headless();
        let pass = render_pass(&device);
        let vertex = Shader::new(&other, ShaderStage::Vertex, &spirv_header()).unwrap();

        let desc = ProgramDesc::new().shader(&vertex);
        assert!(matches!(
            Program::new(&device, &desc, pass, 1),
            Err(crate::GpuError::InvalidUse(UsageError::ForeignObject { .. }))
        ));
    }
}
