//! Translation of recorded commands into `vkCmd*` calls.

use crate::access::image_barrier;
use crate::backend::convert;
use crate::backend::Command;
use ash::vk;

fn image_copy_region(extent: whisker_core::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_offset(vk::Offset3D::default())
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

/// Record one command.
///
/// # Safety
/// `cmd` must be in the recording state and every handle in `command` valid.
pub(crate) unsafe fn record(device: &ash::Device, cmd: vk::CommandBuffer, command: &Command) {
    match command {
        Command::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_colors,
        } => {
            let clear_values: Vec<vk::ClearValue> = clear_colors
                .iter()
                .map(|c| vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: c.to_array(),
                    },
                })
                .collect();
            let info = vk::RenderPassBeginInfo::default()
                .render_pass(*render_pass)
                .framebuffer(*framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: vk::Extent2D {
                        width: extent.width,
                        height: extent.height,
                    },
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE);
        }
        Command::EndRenderPass => device.cmd_end_render_pass(cmd),
        Command::SetViewportScissor { extent } => {
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: extent.width,
                    height: extent.height,
                },
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
        Command::BindPipeline { pipeline } => {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, *pipeline);
        }
        Command::BindVertexBuffer { binding, buffer } => {
            device.cmd_bind_vertex_buffers(cmd, *binding, &[*buffer], &[0]);
        }
        Command::BindIndexBuffer { buffer, index_type } => {
            device.cmd_bind_index_buffer(cmd, *buffer, 0, convert::index_type(*index_type));
        }
        Command::BindDescriptorSet {
            layout,
            set_index,
            set,
        } => {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                *layout,
                *set_index,
                &[*set],
                &[],
            );
        }
        Command::Draw {
            vertex_count,
            instance_count,
        } => device.cmd_draw(cmd, *vertex_count, *instance_count, 0, 0),
        Command::DrawIndexed {
            index_count,
            instance_count,
        } => device.cmd_draw_indexed(cmd, *index_count, *instance_count, 0, 0, 0),
        Command::CopyBuffer {
            src,
            dst,
            src_offset,
            dst_offset,
            size,
        } => {
            let region = vk::BufferCopy {
                src_offset: *src_offset,
                dst_offset: *dst_offset,
                size: *size,
            };
            device.cmd_copy_buffer(cmd, *src, *dst, &[region]);
        }
        Command::CopyBufferToImage { src, dst, extent } => {
            device.cmd_copy_buffer_to_image(
                cmd,
                *src,
                *dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[image_copy_region(*extent)],
            );
        }
        Command::CopyImageToBuffer { src, dst, extent } => {
            device.cmd_copy_image_to_buffer(
                cmd,
                *src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                *dst,
                &[image_copy_region(*extent)],
            );
        }
        Command::ImageBarrier { image, from, to } => {
            let barrier = image_barrier(*image, *from, *to);
            device.cmd_pipeline_barrier(
                cmd,
                from.stage,
                to.stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}
