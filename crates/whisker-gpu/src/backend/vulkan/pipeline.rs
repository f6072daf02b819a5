//! Render passes, framebuffers and graphics pipelines.

use crate::backend::{convert, PipelineDesc};
use crate::error::{GpuError, Result};
use ash::vk;
use whisker_core::Extent2D;

/// One subpass clearing and storing every color attachment, which start
/// `UNDEFINED` and end in `final_layout`.
///
/// # Safety
/// The device must be valid.
pub(crate) unsafe fn create_render_pass(
    device: &ash::Device,
    formats: &[vk::Format],
    final_layout: vk::ImageLayout,
) -> Result<vk::RenderPass> {
    let attachments: Vec<vk::AttachmentDescription> = formats
        .iter()
        .map(|&format| {
            vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(final_layout)
        })
        .collect();

    let references: Vec<vk::AttachmentReference> = (0..formats.len() as u32)
        .map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .collect();

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&references);

    // Wait for the acquire semaphore's stage before the attachment write.
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    Ok(device.create_render_pass(&info, None)?)
}

/// # Safety
/// The device, render pass and views must be valid.
pub(crate) unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: Extent2D,
) -> Result<vk::Framebuffer> {
    let info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    Ok(device.create_framebuffer(&info, None)?)
}

/// Pipeline layout with one descriptor set per slot, in slot order.
///
/// # Safety
/// The device and set layouts must be valid.
pub(crate) unsafe fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<vk::PipelineLayout> {
    let info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
    device
        .create_pipeline_layout(&info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))
}

/// Filled triangles, no depth, blending off, dynamic viewport and scissor.
///
/// # Safety
/// The device and every handle in `desc` must be valid.
pub(crate) unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
) -> Result<vk::Pipeline> {
    let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
        .stages
        .iter()
        .map(|&(stage, module)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(convert::shader_stage(stage))
                .module(module)
                .name(c"main")
        })
        .collect();

    let mut bindings = Vec::with_capacity(desc.vertex_layouts.len());
    let mut attributes = Vec::new();
    for (binding, layout) in desc.vertex_layouts.iter().enumerate() {
        bindings.push(
            vk::VertexInputBindingDescription::default()
                .binding(binding as u32)
                .stride(layout.stride)
                .input_rate(convert::input_rate(layout.rate)),
        );
        for attribute in &layout.attributes {
            attributes.push(
                vk::VertexInputAttributeDescription::default()
                    .location(attributes.len() as u32)
                    .binding(binding as u32)
                    .format(convert::format(attribute.format))
                    .offset(attribute.offset),
            );
        }
    }

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert::topology(desc.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(convert::cull_mode(desc.cull_mode))
        .front_face(convert::front_face(desc.front_face))
        .depth_bias_enable(false)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false);

    let blend_attachments: Vec<_> = (0..desc.color_attachment_count)
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        })
        .collect();
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(0);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::PipelineCreation("driver returned no pipeline".to_string()))
}
