// G-buffer pass
//
// Writes octahedral-encoded view-space normals, albedo and depth at full
// resolution. Both demos share this pass; they differ only in which pipeline
// stage consumes the attachments afterwards, so the trailing subpass
// dependency takes the consumer stage as a parameter.

use crate::backend::{descriptor, pipeline, shader, Attachment, VulkanDevice};
use crate::scene::{Scene, Vertex};
use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

/// Two octahedral components, enough precision for reconstructed normals
pub const NORMAL_FORMAT: vk::Format = vk::Format::R16G16_UNORM;
pub const ALBEDO_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub struct GBuffer {
    pub normal: Attachment,
    pub albedo: Attachment,
    pub depth: Attachment,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

impl GBuffer {
    pub fn new(
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let normal = Attachment::new(
            device,
            NORMAL_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            extent,
        )?;
        let albedo = Attachment::new(
            device,
            ALBEDO_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            extent,
        )?;
        let depth = Attachment::new(
            device,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            extent,
        )?;

        let framebuffer = pipeline::create_framebuffer(
            device,
            render_pass,
            &[normal.view, albedo.view, depth.view],
            extent,
        )?;

        Ok(Self {
            normal,
            albedo,
            depth,
            framebuffer,
            extent,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_framebuffer(self.framebuffer, None);
        }
        self.normal.destroy(device);
        self.albedo.destroy(device);
        self.depth.destroy(device);
    }
}

/// The pass leaves every attachment readable: colors in SHADER_READ_ONLY,
/// depth in DEPTH_STENCIL_READ_ONLY. `consumer_stage` is where the next
/// user of the attachments runs (compute or fragment shading).
pub fn create_render_pass(
    device: &VulkanDevice,
    depth_format: vk::Format,
    consumer_stage: vk::PipelineStageFlags,
) -> Result<vk::RenderPass> {
    let color_description = |format: vk::Format| {
        vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build()
    };

    let attachments = [
        color_description(NORMAL_FORMAT),
        color_description(ALBEDO_FORMAT),
        vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
            .build(),
    ];

    let color_refs = [
        vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
    ];
    let depth_ref = vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)
        .build();

    // The previous frame's consumer must finish reading before this frame
    // overwrites the attachments, and the write must land before the next
    // consumer reads.
    let dependencies = [
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(consumer_stage)
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dependency_flags(vk::DependencyFlags::BY_REGION)
            .build(),
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(consumer_stage)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .dependency_flags(vk::DependencyFlags::BY_REGION)
            .build(),
    ];

    let subpasses = [subpass];
    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe {
        device
            .device
            .create_render_pass(&render_pass_info, None)
            .context("Failed to create G-buffer render pass")
    }
}

/// G-buffer pipeline plus the descriptor set layouts it binds:
/// set 0 the scene uniforms, set 1 the material base color texture.
pub struct GBufferPipeline {
    pub scene_layout: vk::DescriptorSetLayout,
    pub material_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl GBufferPipeline {
    pub fn new(
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
        shader_dir: &Path,
    ) -> Result<Self> {
        let scene_layout = descriptor::create_set_layout(
            device,
            &[descriptor::Binding::new(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let material_layout = descriptor::create_set_layout(
            device,
            &[descriptor::Binding::new(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;

        let layout = pipeline::create_pipeline_layout(device, &[scene_layout, material_layout])?;

        let vert = shader::load_shader_module(device, shader_dir, "gbuffer.vert")?;
        let frag = shader::load_shader_module(device, shader_dir, "gbuffer.frag")?;

        let bindings = Vertex::binding_descriptions();
        let attributes = Vertex::attribute_descriptions();

        let pipeline = pipeline::create_graphics_pipeline(
            device,
            &pipeline::GraphicsPipelineDesc {
                vert,
                frag,
                layout,
                render_pass,
                vertex_bindings: &bindings,
                vertex_attributes: &attributes,
                color_attachment_count: 2,
                depth_test: true,
                depth_write: true,
                cull_mode: vk::CullModeFlags::BACK,
                // Y flip in the projection reverses the winding of CCW models
                front_face: vk::FrontFace::CLOCKWISE,
                frag_specialization: None,
            },
        )?;

        unsafe {
            device.device.destroy_shader_module(vert, None);
            device.device.destroy_shader_module(frag, None);
        }

        Ok(Self {
            scene_layout,
            material_layout,
            layout,
            pipeline,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.scene_layout, None);
            device.destroy_descriptor_set_layout(self.material_layout, None);
        }
    }
}

/// Record the full G-buffer pass into `cmd`
pub fn record(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    gbuffer: &GBuffer,
    pipeline: &GBufferPipeline,
    scene_set: vk::DescriptorSet,
    scene: &Scene,
) {
    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        },
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    let begin_info = vk::RenderPassBeginInfo::builder()
        .render_pass(render_pass)
        .framebuffer(gbuffer.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: gbuffer.extent,
        })
        .clear_values(&clear_values);

    unsafe {
        device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: gbuffer.extent.width as f32,
            height: gbuffer.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(
            cmd,
            0,
            &[vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: gbuffer.extent,
            }],
        );

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout,
            0,
            &[scene_set],
            &[],
        );

        scene.draw(device, cmd, pipeline.layout);

        device.cmd_end_render_pass(cmd);
    }
}
