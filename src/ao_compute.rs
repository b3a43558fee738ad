// SSAO on the compute queue
//
// Frame layout:
//   graphics: G-buffer pass               -> signals gbuffer_done
//   compute:  ssao, blur x2 (half res)    -> waits gbuffer_done, signals ao_done
//   graphics: fullscreen composition      -> waits ao_done, presents
//
// The compute command buffer is recorded once and resubmitted every frame;
// all per-frame variation flows through the uniform buffers.

use crate::app::{Base, Demo, Toggles};
use crate::backend::{
    attachment::COLOR_RANGE, descriptor, pipeline, shader, sync, Attachment, FrameSync,
    UniformBuffer, VulkanDevice,
};
use crate::camera::Camera;
use crate::config::Config;
use crate::gbuffer::{self, GBuffer, GBufferPipeline};
use crate::scene::Scene;
use crate::ubo::{SceneParams, SsaoParams};
use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;

const AO_FORMAT: vk::Format = vk::Format::R8_UNORM;

/// Compute stages in submission order. Each indexes into the stage table.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Stage {
    Ssao,
    BlurHorizontal,
    BlurVertical,
}

impl Stage {
    const ALL: [Stage; 3] = [Stage::Ssao, Stage::BlurHorizontal, Stage::BlurVertical];

    fn shader(self) -> &'static str {
        match self {
            Stage::Ssao => "ssao_test.comp",
            Stage::BlurHorizontal => "blur_horizontal.comp",
            Stage::BlurVertical => "blur_vertical.comp",
        }
    }
}

/// Per-stage pipeline objects, torn down together
struct StageResources {
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    set: vk::DescriptorSet,
}

impl StageResources {
    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

pub struct AoComputeDemo {
    scene: Scene,
    nearest_sampler: vk::Sampler,
    linear_sampler: vk::Sampler,

    scene_ubo: UniformBuffer<SceneParams>,
    ssao_ubo: UniformBuffer<SsaoParams>,
    scene_params: SceneParams,
    ssao_params: SsaoParams,

    gbuffer_render_pass: vk::RenderPass,
    gbuffer: GBuffer,
    gbuffer_pipeline: GBufferPipeline,
    scene_set: vk::DescriptorSet,
    offscreen_cmd: vk::CommandBuffer,

    // Half-resolution AO targets, written by compute
    ssao_target: Attachment,
    blur_horizontal: Attachment,
    blur_vertical: Attachment,

    stages: [StageResources; 3],
    compute_pool: vk::CommandPool,
    compute_cmd: vk::CommandBuffer,

    // Cross-queue relay: G-buffer ready, then AO ready
    gbuffer_done: vk::Semaphore,
    ao_done: vk::Semaphore,

    composition_set_layout: vk::DescriptorSetLayout,
    composition_layout: vk::PipelineLayout,
    composition_pipeline: vk::Pipeline,
    composition_set: vk::DescriptorSet,

    descriptor_pool: vk::DescriptorPool,
}

impl Demo for AoComputeDemo {
    const NAME: &'static str = "ao_compute";

    fn new(base: &Base, config: &Config) -> Result<Self> {
        let device = &base.device;
        let extent = base.extent();
        let ao_extent = half_extent(extent);

        if device.has_dedicated_compute() {
            log::info!(
                "Using dedicated compute queue family {}",
                device.compute_queue_family
            );
        } else {
            log::info!("No dedicated compute family; compute shares the graphics queue");
        }

        let model = config.selected_model()?;
        let scene = Scene::load(device, base.command_pool, &model.path)?;

        let nearest_sampler = descriptor::create_sampler(device, vk::Filter::NEAREST)?;
        let linear_sampler = descriptor::create_sampler(device, vk::Filter::LINEAR)?;

        let scene_ubo = UniformBuffer::new(device)?;
        let ssao_ubo = UniformBuffer::new(device)?;

        // G-buffer, consumed by compute
        let gbuffer_render_pass = gbuffer::create_render_pass(
            device,
            base.depth_format,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        )?;
        let gbuffer = GBuffer::new(device, gbuffer_render_pass, base.depth_format, extent)?;
        let gbuffer_pipeline =
            GBufferPipeline::new(device, gbuffer_render_pass, &base.shader_dir)?;

        // AO targets; the intermediate horizontal target never leaves compute
        let ssao_target =
            Attachment::new_storage(device, base.command_pool, AO_FORMAT, ao_extent, false)?;
        let blur_horizontal =
            Attachment::new_storage(device, base.command_pool, AO_FORMAT, ao_extent, true)?;
        let blur_vertical =
            Attachment::new_storage(device, base.command_pool, AO_FORMAT, ao_extent, false)?;

        let descriptor_pool = descriptor::create_pool(
            device,
            &[
                (vk::DescriptorType::UNIFORM_BUFFER, 3),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 7),
                (vk::DescriptorType::STORAGE_IMAGE, 5),
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

        // Stage table: one set layout, pipeline and set per compute stage
        let stages = Self::create_stages(device, &base.shader_dir, descriptor_pool)?;

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

        // Compute command pool on the compute family; the buffer is
        // re-recorded only on resize
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.compute_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let compute_pool = unsafe { device.device.create_command_pool(&pool_info, None)? };
        let compute_cmd = allocate_command(device, compute_pool)?;
        let offscreen_cmd = allocate_command(device, base.command_pool)?;

        let gbuffer_done = sync::create_semaphore(device)?;
        let ao_done = sync::create_semaphore(device)?;

        let mut demo = Self {
            scene,
            nearest_sampler,
            linear_sampler,
            scene_ubo,
            ssao_ubo,
            scene_params: SceneParams::default(),
            ssao_params: SsaoParams::default(),
            gbuffer_render_pass,
            gbuffer,
            gbuffer_pipeline,
            scene_set,
            offscreen_cmd,
            ssao_target,
            blur_horizontal,
            blur_vertical,
            stages,
            compute_pool,
            compute_cmd,
            gbuffer_done,
            ao_done,
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
    }

    fn record_commands(&self, base: &Base) -> Result<()> {
        self.record_offscreen(base)?;
        self.record_compute(base)?;
        self.record_composition(base)
    }

    fn submit(&self, base: &Base, sync: &FrameSync, image_index: u32) -> Result<()> {
        let device = &base.device;

        // G-buffer: starts as soon as the image is acquired
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::VERTEX_INPUT];
        let commands = [self.offscreen_cmd];
        let signal_semaphores = [self.gbuffer_done];
        let gbuffer_submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&commands)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[gbuffer_submit], vk::Fence::null())?;
        }

        // AO generation on the compute queue
        let wait_semaphores = [self.gbuffer_done];
        let wait_stages = [vk::PipelineStageFlags::COMPUTE_SHADER];
        let commands = [self.compute_cmd];
        let signal_semaphores = [self.ao_done];
        let compute_submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&commands)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe {
            device
                .device
                .queue_submit(device.compute_queue, &[compute_submit], vk::Fence::null())?;
        }

        // Composition: samples the AO results from the fragment shader
        let wait_semaphores = [self.ao_done];
        let wait_stages = [vk::PipelineStageFlags::FRAGMENT_SHADER];
        let commands = [base.draw_commands[image_index as usize]];
        let signal_semaphores = [sync.render_finished];
        let draw_submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&commands)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe {
            device.device.queue_submit(
                device.graphics_queue,
                &[draw_submit],
                sync.in_flight_fence,
            )?;
        }

        Ok(())
    }

    fn resized(&mut self, base: &Base) -> Result<()> {
        let device = &base.device;
        let extent = base.extent();
        let ao_extent = half_extent(extent);

        self.gbuffer.destroy(&device.device);
        self.gbuffer = GBuffer::new(device, self.gbuffer_render_pass, base.depth_format, extent)?;

        self.ssao_target.destroy(&device.device);
        self.blur_horizontal.destroy(&device.device);
        self.blur_vertical.destroy(&device.device);
        self.ssao_target =
            Attachment::new_storage(device, base.command_pool, AO_FORMAT, ao_extent, false)?;
        self.blur_horizontal =
            Attachment::new_storage(device, base.command_pool, AO_FORMAT, ao_extent, true)?;
        self.blur_vertical =
            Attachment::new_storage(device, base.command_pool, AO_FORMAT, ao_extent, false)?;

        self.write_image_descriptors(device);
        Ok(())
    }

    fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.gbuffer_done, None);
            device.destroy_semaphore(self.ao_done, None);
            device.destroy_command_pool(self.compute_pool, None);

            device.destroy_pipeline(self.composition_pipeline, None);
            device.destroy_pipeline_layout(self.composition_layout, None);
            device.destroy_descriptor_set_layout(self.composition_set_layout, None);
        }

        for stage in &self.stages {
            stage.destroy(device);
        }

        self.ssao_target.destroy(device);
        self.blur_horizontal.destroy(device);
        self.blur_vertical.destroy(device);

        self.gbuffer_pipeline.destroy(device);
        self.gbuffer.destroy(device);
        unsafe {
            device.destroy_render_pass(self.gbuffer_render_pass, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_sampler(self.nearest_sampler, None);
            device.destroy_sampler(self.linear_sampler, None);
        }

        self.scene_ubo.destroy(device);
        self.ssao_ubo.destroy(device);
        self.scene.destroy(device);
    }
}

impl AoComputeDemo {
    fn create_stages(
        device: &VulkanDevice,
        shader_dir: &std::path::Path,
        pool: vk::DescriptorPool,
    ) -> Result<[StageResources; 3]> {
        let compute = vk::ShaderStageFlags::COMPUTE;
        let mut resources = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            let bindings = match stage {
                // depth + normals in, AO out, parameters
                Stage::Ssao => vec![
                    descriptor::Binding::new(
                        0,
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        compute,
                    ),
                    descriptor::Binding::new(
                        1,
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        compute,
                    ),
                    descriptor::Binding::new(2, vk::DescriptorType::STORAGE_IMAGE, compute),
                    descriptor::Binding::new(3, vk::DescriptorType::UNIFORM_BUFFER, compute),
                ],
                // source and destination storage images
                Stage::BlurHorizontal | Stage::BlurVertical => vec![
                    descriptor::Binding::new(0, vk::DescriptorType::STORAGE_IMAGE, compute),
                    descriptor::Binding::new(1, vk::DescriptorType::STORAGE_IMAGE, compute),
                ],
            };

            let set_layout = descriptor::create_set_layout(device, &bindings)?;
            let layout = pipeline::create_pipeline_layout(device, &[set_layout])?;
            let module = shader::load_shader_module(device, shader_dir, stage.shader())?;
            let compute_pipeline = pipeline::create_compute_pipeline(device, module, layout)?;
            unsafe {
                device.device.destroy_shader_module(module, None);
            }
            let set = descriptor::allocate_set(device, pool, set_layout)?;

            resources.push(StageResources {
                set_layout,
                layout,
                pipeline: compute_pipeline,
                set,
            });
        }

        resources
            .try_into()
            .map_err(|_| anyhow::anyhow!("Compute stage table size mismatch"))
    }

    /// Point every image descriptor at the current attachments. Buffers are
    /// written once at startup; this runs again whenever targets recreate.
    fn write_image_descriptors(&self, device: &VulkanDevice) {
        use descriptor::Write;

        descriptor::update_set(
            device,
            self.stages[Stage::Ssao as usize].set,
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
                Write::Storage(2, self.ssao_target.view),
                Write::Buffer(3, self.ssao_ubo.descriptor()),
            ],
        );

        descriptor::update_set(
            device,
            self.stages[Stage::BlurHorizontal as usize].set,
            &[
                Write::Storage(0, self.ssao_target.view),
                Write::Storage(1, self.blur_horizontal.view),
            ],
        );

        descriptor::update_set(
            device,
            self.stages[Stage::BlurVertical as usize].set,
            &[
                Write::Storage(0, self.blur_horizontal.view),
                Write::Storage(1, self.blur_vertical.view),
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
                    self.ssao_target.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.linear_sampler,
                ),
                Write::Sampled(
                    4,
                    self.blur_vertical.view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    self.linear_sampler,
                ),
                Write::Buffer(5, self.ssao_ubo.descriptor()),
            ],
        );
    }

    fn record_offscreen(&self, base: &Base) -> Result<()> {
        let device = &base.device.device;
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            device.begin_command_buffer(self.offscreen_cmd, &begin_info)?;
        }
        gbuffer::record(
            device,
            self.offscreen_cmd,
            self.gbuffer_render_pass,
            &self.gbuffer,
            &self.gbuffer_pipeline,
            self.scene_set,
            &self.scene,
        );
        unsafe {
            device.end_command_buffer(self.offscreen_cmd)?;
        }
        Ok(())
    }

    /// Record the full AO chain. Every barrier stays within the compute
    /// stage; the cross-queue ordering is handled by the semaphore relay at
    /// submit time.
    fn record_compute(&self, base: &Base) -> Result<()> {
        let device = &base.device.device;
        let ao_extent = half_extent(base.extent());
        let cmd = self.compute_cmd;

        let barrier = |image: vk::Image,
                       old_layout: vk::ImageLayout,
                       new_layout: vk::ImageLayout,
                       src_access: vk::AccessFlags,
                       dst_access: vk::AccessFlags| {
            vk::ImageMemoryBarrier::builder()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE)
                .build()
        };
        let compute_barrier = |cmd: vk::CommandBuffer, barriers: &[vk::ImageMemoryBarrier]| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
        };
        let bind = |cmd: vk::CommandBuffer, stage: Stage| unsafe {
            let resources = &self.stages[stage as usize];
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, resources.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                resources.layout,
                0,
                &[resources.set],
                &[],
            );
        };

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            device.begin_command_buffer(cmd, &begin_info)?;

            bind(cmd, Stage::Ssao);

            // AO targets become compute-writable; previous frame's readers
            // are already done thanks to the semaphore relay
            compute_barrier(
                cmd,
                &[
                    barrier(
                        self.ssao_target.image,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::GENERAL,
                        vk::AccessFlags::MEMORY_READ,
                        vk::AccessFlags::SHADER_WRITE,
                    ),
                    barrier(
                        self.blur_vertical.image,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::GENERAL,
                        vk::AccessFlags::MEMORY_READ,
                        vk::AccessFlags::SHADER_WRITE,
                    ),
                ],
            );

            let (x, y) = ssao_groups(ao_extent);
            device.cmd_dispatch(cmd, x, y, 1);

            compute_barrier(
                cmd,
                &[
                    barrier(
                        self.blur_horizontal.image,
                        vk::ImageLayout::GENERAL,
                        vk::ImageLayout::GENERAL,
                        vk::AccessFlags::MEMORY_READ,
                        vk::AccessFlags::SHADER_WRITE,
                    ),
                    barrier(
                        self.ssao_target.image,
                        vk::ImageLayout::GENERAL,
                        vk::ImageLayout::GENERAL,
                        vk::AccessFlags::SHADER_WRITE,
                        vk::AccessFlags::MEMORY_READ,
                    ),
                ],
            );

            bind(cmd, Stage::BlurHorizontal);
            let (x, y) = blur_horizontal_groups(ao_extent);
            device.cmd_dispatch(cmd, x, y, 1);

            compute_barrier(
                cmd,
                &[barrier(
                    self.blur_horizontal.image,
                    vk::ImageLayout::GENERAL,
                    vk::ImageLayout::GENERAL,
                    vk::AccessFlags::SHADER_WRITE,
                    vk::AccessFlags::MEMORY_READ,
                )],
            );

            bind(cmd, Stage::BlurVertical);
            let (x, y) = blur_vertical_groups(ao_extent);
            device.cmd_dispatch(cmd, x, y, 1);

            // Hand the raw and blurred AO over to the composition pass
            compute_barrier(
                cmd,
                &[
                    barrier(
                        self.ssao_target.image,
                        vk::ImageLayout::GENERAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::SHADER_WRITE,
                        vk::AccessFlags::MEMORY_READ,
                    ),
                    barrier(
                        self.blur_vertical.image,
                        vk::ImageLayout::GENERAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::SHADER_WRITE,
                        vk::AccessFlags::MEMORY_READ,
                    ),
                ],
            );

            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    fn record_composition(&self, base: &Base) -> Result<()> {
        let device = &base.device.device;
        let extent = base.extent();

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

        for (i, &cmd) in base.draw_commands.iter().enumerate() {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device.begin_command_buffer(cmd, &begin_info)?;

                let begin = vk::RenderPassBeginInfo::builder()
                    .render_pass(base.render_pass)
                    .framebuffer(base.framebuffers[i])
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(&clear_values);
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
                device.end_command_buffer(cmd)?;
            }
        }

        Ok(())
    }
}

fn cis_binding(binding: u32) -> descriptor::Binding {
    descriptor::Binding::new(
        binding,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::ShaderStageFlags::FRAGMENT,
    )
}

fn allocate_command(device: &VulkanDevice, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers = unsafe {
        device
            .device
            .allocate_command_buffers(&alloc_info)
            .context("Failed to allocate command buffer")?
    };
    Ok(buffers[0])
}

/// AO runs at half resolution, rounded down
fn half_extent(extent: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width / 2,
        height: extent.height / 2,
    }
}

// Work group shapes. The SSAO shader uses 8x8 local size; the blur shaders
// process a strip per invocation.

fn ssao_groups(extent: vk::Extent2D) -> (u32, u32) {
    (extent.width.div_ceil(8), extent.height.div_ceil(8))
}

// TODO: not the transpose of the vertical shape below; check the local size
// in blur_horizontal.comp before making these symmetric.
fn blur_horizontal_groups(extent: vk::Extent2D) -> (u32, u32) {
    (extent.width.div_ceil(8), extent.height)
}

fn blur_vertical_groups(extent: vk::Extent2D) -> (u32, u32) {
    (extent.width, extent.height.div_ceil(8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn half_extent_floors_odd_sizes() {
        let half = half_extent(extent(1281, 721));
        assert_eq!((half.width, half.height), (640, 360));
    }

    #[test]
    fn ssao_groups_cover_tiles() {
        assert_eq!(ssao_groups(extent(640, 360)), (80, 45));

        // partial tiles still get a group
        let (x, y) = ssao_groups(extent(641, 361));
        assert!(x * 8 >= 641 && y * 8 >= 361);
    }

    #[test]
    fn blur_group_shapes() {
        let ao = extent(640, 360);
        assert_eq!(blur_horizontal_groups(ao), (80, 360));
        assert_eq!(blur_vertical_groups(ao), (640, 45));
    }

    #[test]
    fn stage_table_order_matches_enum() {
        assert_eq!(Stage::Ssao as usize, 0);
        assert_eq!(Stage::BlurHorizontal as usize, 1);
        assert_eq!(Stage::BlurVertical as usize, 2);
        assert_eq!(Stage::ALL.len(), 3);
    }
}
