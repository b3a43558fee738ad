// SSAO entirely on the graphics queue
//
// Five render passes per frame, ordered by subpass dependencies alone:
// G-buffer, SSAO generation, horizontal blur, vertical blur, composition.
// The AO passes render a fullscreen triangle into half-resolution R8
// targets; the blur is a depth-aware separable Gaussian.

use crate::app::{Base, Demo, Toggles};
use crate::backend::{descriptor, pipeline, shader, Attachment, FrameSync, UniformBuffer, VulkanDevice};
use crate::camera::Camera;
use crate::config::Config;
use crate::gbuffer::{self, GBuffer, GBufferPipeline};
use crate::scene::Scene;
use crate::ubo::{BlurParams, SceneParams, SsaoParams};
use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;

const AO_FORMAT: vk::Format = vk::Format::R8_UNORM;
const SSAO_RADIUS: f32 = 0.3;

/// AO passes in recording order
#[derive(Copy, Clone, PartialEq, Eq)]
enum Pass {
    Ssao,
    BlurHorizontal,
    BlurVertical,
}

impl Pass {
    const ALL: [Pass; 3] = [Pass::Ssao, Pass::BlurHorizontal, Pass::BlurVertical];

    fn shader(self) -> &'static str {
        match self {
            Pass::Ssao => "ssao.frag",
            Pass::BlurHorizontal => "blur_horizontal.frag",
            Pass::BlurVertical => "blur_vertical.frag",
        }
    }
}

/// One half-resolution fullscreen pass: its target, framebuffer and pipeline
struct AoPass {
    target: Attachment,
    framebuffer: vk::Framebuffer,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    set: vk::DescriptorSet,
}

impl AoPass {
    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_framebuffer(self.framebuffer, None);
        }
        self.target.destroy(device);
    }
}

pub struct AoGaussianBlurDemo {
    scene: Scene,
    nearest_sampler: vk::Sampler,
    linear_sampler: vk::Sampler,

    scene_ubo: UniformBuffer<SceneParams>,
    ssao_ubo: UniformBuffer<SsaoParams>,
    blur_ubo: UniformBuffer<BlurParams>,
    scene_params: SceneParams,
    ssao_params: SsaoParams,
    blur_params: BlurParams,

    gbuffer_render_pass: vk::RenderPass,
    gbuffer: GBuffer,
    gbuffer_pipeline: GBufferPipeline,
    scene_set: vk::DescriptorSet,

    /// All three AO passes share one render pass object; they render to
    /// distinct but identically described targets.
    ao_render_pass: vk::RenderPass,
    ao_extent: vk::Extent2D,
    passes: [AoPass; 3],

    composition_set_layout: vk::DescriptorSetLayout,
    composition_layout: vk::PipelineLayout,
    composition_pipeline: vk::Pipeline,
    composition_set: vk::DescriptorSet,

    descriptor_pool: vk::DescriptorPool,
}

impl Demo for AoGaussianBlurDemo {
    const NAME: &'static str = "ao_gaussian_blur";

    fn new(base: &Base, config: &Config) -> Result<Self> {
        let device = &base.device;
        let extent = base.extent();
        let ao_extent = half_extent(extent);

        let model = config.selected_model()?;
        let scene = Scene::load(device, base.command_pool, &model.path)?;

        let nearest_sampler = descriptor::create_sampler(device, vk::Filter::NEAREST)?;
        let linear_sampler = descriptor::create_sampler(device, vk::Filter::LINEAR)?;

        let scene_ubo = UniformBuffer::new(device)?;
        let ssao_ubo = UniformBuffer::new(device)?;
        let blur_ubo = UniformBuffer::new(device)?;

        // G-buffer, consumed by later fragment shaders
        let gbuffer_render_pass = gbuffer::create_render_pass(
            device,
            base.depth_format,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )?;
        let gbuffer = GBuffer::new(device, gbuffer_render_pass, base.depth_format, extent)?;
        let gbuffer_pipeline =
            GBufferPipeline::new(device, gbuffer_render_pass, &base.shader_dir)?;

        let ao_render_pass = create_ao_render_pass(device)?;

        let descriptor_pool = descriptor::create_pool(
            device,
            &[
                (vk::DescriptorType::UNIFORM_BUFFER, 5),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 11),
            ],
            5,
        )?;

        let scene_set =
            descriptor::allocate_set(device, descriptor_pool, gbuffer_pipeline.scene_layout)?;
        descriptor::update_set(
            device,
            scene_set,
            &[descriptor::Write::Buffer(0, scene_ubo.descriptor())],
        );

        let passes = Self::create_passes(
            device,
            base,
            ao_render_pass,
            ao_extent,
            descriptor_pool,
        )?;

        let composition_set_layout = descriptor::create_set_layout(
            device,
            &[
                cis_binding(0),
                cis_binding(1),
                cis_binding(2),
                cis_binding(3),
                cis_binding(4),
                descriptor::Binding::new(
                    5,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        )?;
        let composition_layout =
            pipeline::create_pipeline_layout(device, &[composition_set_layout])?;

        let vert = shader::load_shader_module(device, &base.shader_dir, "fullscreen.vert")?;
        let frag = shader::load_shader_module(device, &base.shader_dir, "composition.frag")?;
        let composition_pipeline = pipeline::create_graphics_pipeline(
            device,
            &pipeline::GraphicsPipelineDesc {
                vert,
                frag,
                layout: composition_layout,
                render_pass: base.render_pass,
                depth_test: true,
                depth_write: true,
                ..Default::default()
            },
        )?;
        unsafe {
            device.device.destroy_shader_module(vert, None);
            device.device.destroy_shader_module(frag, None);
        }

        let composition_set =
            descriptor::allocate_set(device, descriptor_pool, composition_set_layout)?;

        let mut demo = Self {
            scene,
            nearest_sampler,
            linear_sampler,
            scene_ubo,
            ssao_ubo,
            blur_ubo,
            scene_params: SceneParams::default(),
            ssao_params: SsaoParams::default(),
            blur_params: BlurParams::default(),
            gbuffer_render_pass,
            gbuffer,
            gbuffer_pipeline,
            scene_set,
            ao_render_pass,
            ao_extent,
            passes,
            composition_set_layout,
            composition_layout,
            composition_pipeline,
            composition_set,
            descriptor_pool,
        };

        demo.scene
            .create_descriptor_sets(device, demo.gbuffer_pipeline.material_layout)?;
        demo.write_image_descriptors(device);

        Ok(demo)
    }

    fn update_uniforms(&mut self, camera: &Camera, toggles: &Toggles) {
        self.scene_params.projection = camera.perspective;
        self.scene_params.view = camera.view;
        self.scene_params.model = Mat4::IDENTITY;
        self.scene_ubo.update(&self.scene_params);

        self.ssao_params.inv_projection = camera.perspective.inverse();
        self.ssao_params.ssao = toggles.ssao as i32;
        self.ssao_params.ssao_only = toggles.ssao_only as i32;
        self.ssao_params.ssao_blur = toggles.ssao_blur as i32;
        self.ssao_ubo.update(&self.ssao_params);

        self.blur_params.depth_check = toggles.depth_check as i32;
        self.blur_params.use_lerp_trick = toggles.use_lerp_trick as i32;
        self.blur_ubo.update(&self.blur_params);
    }

    fn record_commands(&self, base: &Base) -> Result<()> {
        let device = &base.device.device;
        let extent = base.extent();

        for (i, &cmd) in base.draw_commands.iter().enumerate() {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device.begin_command_buffer(cmd, &begin_info)?;
            }

            gbuffer::record(
                device,
                cmd,
                self.gbuffer_render_pass,
                &self.gbuffer,
                &self.gbuffer_pipeline,
                self.scene_set,
                &self.scene,
            );

            // Ordering between these passes comes from the subpass
            // dependency pairs on the shared AO render pass
            for pass in Pass::ALL {
                self.record_ao_pass(device, cmd, &self.passes[pass as usize]);
            }

            self.record_composition(base, device, cmd, i, extent)?;

            unsafe {
                device.end_command_buffer(cmd)?;
            }
        }

        Ok(())
    }

    fn submit(&self, base: &Base, sync: &FrameSync, image_index: u32) -> Result<()> {
        let device = &base.device;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let commands = [base.draw_commands[image_index as usize]];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&commands)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            device.device.queue_submit(
                device.graphics_queue,
                &[submit_info],
                sync.in_flight_fence,
            )?;
        }

        Ok(())
    }

    fn resized(&mut self, base: &Base) -> Result<()> {
        let device = &base.device;
        let extent = base.extent();
        self.ao_extent = half_extent(extent);

        self.gbuffer.destroy(&device.device);
        self.gbuffer = GBuffer::new(device, self.gbuffer_render_pass, base.depth_format, extent)?;

        for pass in &mut self.passes {
            unsafe {
                device.device.destroy_framebuffer(pass.framebuffer, None);
            }
            pass.target.destroy(&device.device);
            pass.target = Attachment::new(
                device,
                AO_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                self.ao_extent,
            )?;
            pass.framebuffer = pipeline::create_framebuffer(
                device,
                self.ao_render_pass,
                &[pass.target.view],
                self.ao_extent,
            )?;
        }

        self.write_image_descriptors(device);
        Ok(())
    }

    fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.composition_pipeline, None);
            device.destroy_pipeline_layout(self.composition_layout, None);
            device.destroy_descriptor_set_layout(self.composition_set_layout, None);
        }

        for pass in &self.passes {
            pass.destroy(device);
        }

        self.gbuffer_pipeline.destroy(device);
        self.gbuffer.destroy(device);
        unsafe {
            device.destroy_render_pass(self.ao_render_pass, None);
            device.destroy_render_pass(self.gbuffer_render_pass, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_sampler(self.nearest_sampler, None);
            device.destroy_sampler(self.linear_sampler, None);
        }

        self.scene_ubo.destroy(device);
        self.ssao_ubo.destroy(device);
        self.blur_ubo.destroy(device);
        self.scene.destroy(device);
    }
}

impl AoGaussianBlurDemo {
    fn create_passes(
        device: &VulkanDevice,
        base: &Base,
        ao_render_pass: vk::RenderPass,
        ao_extent: vk::Extent2D,
        pool: vk::DescriptorPool,
    ) -> Result<[AoPass; 3]> {
        let vert = shader::load_shader_module(device, &base.shader_dir, "fullscreen.vert")?;

        // Radius is baked into the SSAO pipeline as a specialization constant
        let radius = SSAO_RADIUS.to_ne_bytes();
        let map_entries = [vk::SpecializationMapEntry {
            constant_id: 0,
            offset: 0,
            size: 4,
        }];
        let spec_info = vk::SpecializationInfo::builder()
            .map_entries(&map_entries)
            .data(&radius)
            .build();

        // Every pass samples two images and reads one parameter block: the
        // SSAO pass takes depth + normals, the blurs take the previous AO
        // result + depth for the range check.
        let bindings = [
            cis_binding(0),
            cis_binding(1),
            descriptor::Binding::new(
                2,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::FRAGMENT,
            ),
        ];

        let mut passes = Vec::with_capacity(Pass::ALL.len());
        for pass in Pass::ALL {
            let set_layout = descriptor::create_set_layout(device, &bindings)?;
            let layout = pipeline::create_pipeline_layout(device, &[set_layout])?;

            let frag = shader::load_shader_module(device, &base.shader_dir, pass.shader())?;
            let graphics_pipeline = pipeline::create_graphics_pipeline(
                device,
                &pipeline::GraphicsPipelineDesc {
                    vert,
                    frag,
                    layout,
                    render_pass: ao_render_pass,
                    frag_specialization: (pass == Pass::Ssao).then_some(&spec_info),
                    ..Default::default()
                },
            )?;
            unsafe {
                device.device.destroy_shader_module(frag, None);
            }

            let target = Attachment::new(
                device,
                AO_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                ao_extent,
            )?;
            let framebuffer = pipeline::create_framebuffer(
                device,
                ao_render_pass,
                &[target.view],
                ao_extent,
            )?;
            let set = descriptor::allocate_set(device, pool, set_layout)?;

            passes.push(AoPass {
                target,
                framebuffer,
                set_layout,
                layout,
                pipeline: graphics_pipeline,
                set,
            });
        }

        unsafe {
            device.device.destroy_shader_module(vert, None);
        }

        passes
            .try_into()
            .map_err(|_| anyhow::anyhow!("AO pass table size mismatch"))
    }

    fn write_image_descriptors(&self, device: &VulkanDevice) {
        use descriptor::Write;

        descriptor::update_set(
            device,
            self.passes[Pass::Ssao as usize].set,
            &[
                Write::Sampled(
                    0,
                    self.gbuffer.depth.sample_view,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    self.nearest_sampler,
                ),
                Write::Sampled(
                    1,
                    self.gbuffer.normal.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.nearest_sampler,
                ),
                Write::Buffer(2, self.ssao_ubo.descriptor()),
            ],
        );

        // Each blur reads the previous pass's output
        descriptor::update_set(
            device,
            self.passes[Pass::BlurHorizontal as usize].set,
            &[
                Write::Sampled(
                    0,
                    self.passes[Pass::Ssao as usize].target.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.linear_sampler,
                ),
                Write::Sampled(
                    1,
                    self.gbuffer.depth.sample_view,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    self.nearest_sampler,
                ),
                Write::Buffer(2, self.blur_ubo.descriptor()),
            ],
        );

        descriptor::update_set(
            device,
            self.passes[Pass::BlurVertical as usize].set,
            &[
                Write::Sampled(
                    0,
                    self.passes[Pass::BlurHorizontal as usize].target.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.linear_sampler,
                ),
                Write::Sampled(
                    1,
                    self.gbuffer.depth.sample_view,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    self.nearest_sampler,
                ),
                Write::Buffer(2, self.blur_ubo.descriptor()),
            ],
        );

        descriptor::update_set(
            device,
            self.composition_set,
            &[
                Write::Sampled(
                    0,
                    self.gbuffer.depth.sample_view,
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    self.nearest_sampler,
                ),
                Write::Sampled(
                    1,
                    self.gbuffer.normal.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.nearest_sampler,
                ),
                Write::Sampled(
                    2,
                    self.gbuffer.albedo.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.nearest_sampler,
                ),
                Write::Sampled(
                    3,
                    self.passes[Pass::Ssao as usize].target.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.linear_sampler,
                ),
                Write::Sampled(
                    4,
                    self.passes[Pass::BlurVertical as usize].target.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.linear_sampler,
                ),
                Write::Buffer(5, self.ssao_ubo.descriptor()),
            ],
        );
    }

    fn record_ao_pass(&self, device: &ash::Device, cmd: vk::CommandBuffer, pass: &AoPass) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        }];

        let begin = vk::RenderPassBeginInfo::builder()
            .render_pass(self.ao_render_pass)
            .framebuffer(pass.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.ao_extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);

            device.cmd_set_viewport(
                cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: self.ao_extent.width as f32,
                    height: self.ao_extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.ao_extent,
                }],
            );

            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pass.layout,
                0,
                &[pass.set],
                &[],
            );
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pass.pipeline);
            device.cmd_draw(cmd, 3, 1, 0, 0);

            device.cmd_end_render_pass(cmd);
        }
    }

    fn record_composition(
        &self,
        base: &Base,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image_index: usize,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: base.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let begin = vk::RenderPassBeginInfo::builder()
            .render_pass(base.render_pass)
            .framebuffer(base.framebuffers[image_index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);

            device.cmd_set_viewport(
                cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );

            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.composition_layout,
                0,
                &[self.composition_set],
                &[],
            );
            device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.composition_pipeline,
            );
            device.cmd_draw(cmd, 3, 1, 0, 0);

            device.cmd_end_render_pass(cmd);
        }

        Ok(())
    }
}

/// Single R8 color attachment pass ending in SHADER_READ_ONLY. The external
/// dependencies order back-to-back passes over the same half-resolution
/// targets without explicit barriers.
fn create_ao_render_pass(device: &VulkanDevice) -> Result<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::builder()
        .format(AO_FORMAT)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .build()];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .build();

    let dependencies = [
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .src_access_mask(vk::AccessFlags::MEMORY_READ)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .dependency_flags(vk::DependencyFlags::BY_REGION)
            .build(),
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
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
            .context("Failed to create AO render pass")
    }
}

fn cis_binding(binding: u32) -> descriptor::Binding {
    descriptor::Binding::new(
        binding,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::ShaderStageFlags::FRAGMENT,
    )
}

fn half_extent(extent: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width / 2,
        height: extent.height / 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_table_order_matches_enum() {
        assert_eq!(Pass::Ssao as usize, 0);
        assert_eq!(Pass::BlurHorizontal as usize, 1);
        assert_eq!(Pass::BlurVertical as usize, 2);
    }

    #[test]
    fn half_extent_floors() {
        let half = half_extent(vk::Extent2D {
            width: 1921,
            height: 1081,
        });
        assert_eq!((half.width, half.height), (960, 540));
    }

    #[test]
    fn radius_bytes_round_trip() {
        let bytes = SSAO_RADIUS.to_ne_bytes();
        assert_eq!(f32::from_ne_bytes(bytes), 0.3);
    }
}
