// Render target and storage image attachments
//
// An attachment owns its image, memory and views. Color and depth targets are
// created for render passes; storage targets are written by compute shaders
// and start their life in the GENERAL layout.

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;

/// Full single-mip, single-layer color range
pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

pub struct Attachment {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    /// View covering every aspect of the image; bound to framebuffers.
    pub view: vk::ImageView,
    /// Depth-only view for sampling. Identical to `view` unless the format
    /// carries a stencil aspect, which sampled-image descriptors must exclude.
    pub sample_view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Attachment {
    /// Create a color or depth render target, also usable as a sampled image
    pub fn new(
        device: &VulkanDevice,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let depth = usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        let aspect_mask = if depth {
            if has_stencil(format) {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            } else {
                vk::ImageAspectFlags::DEPTH
            }
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let full_usage = usage
            | vk::ImageUsageFlags::SAMPLED
            | if depth {
                vk::ImageUsageFlags::INPUT_ATTACHMENT
            } else {
                vk::ImageUsageFlags::empty()
            };

        let (image, memory) = create_image(
            device,
            format,
            extent,
            full_usage,
            vk::SharingMode::EXCLUSIVE,
            &[],
        )?;

        let view = create_view(device, image, format, aspect_mask)?;
        let sample_view = if depth && has_stencil(format) {
            create_view(device, image, format, vk::ImageAspectFlags::DEPTH)?
        } else {
            view
        };

        Ok(Self {
            image,
            memory,
            view,
            sample_view,
            format,
            extent,
        })
    }

    /// Create a storage image a compute shader can write. The format must
    /// support storage-image operations with optimal tiling (fatal if not).
    ///
    /// When graphics and compute queue families differ and the image is also
    /// sampled by the graphics queue, it is created with concurrent sharing.
    /// This costs some performance but saves queue-ownership transfers.
    pub fn new_storage(
        device: &VulkanDevice,
        pool: vk::CommandPool,
        format: vk::Format,
        extent: vk::Extent2D,
        compute_only: bool,
    ) -> Result<Self> {
        device.require_format_features(format, vk::FormatFeatureFlags::STORAGE_IMAGE)?;

        let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE;

        let shared_families = [device.graphics_queue_family, device.compute_queue_family];
        let (sharing_mode, family_indices): (vk::SharingMode, &[u32]) =
            if !compute_only && device.has_dedicated_compute() {
                (vk::SharingMode::CONCURRENT, &shared_families)
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let (image, memory) =
            create_image(device, format, extent, usage, sharing_mode, family_indices)?;

        // Storage images are consumed in the GENERAL layout; transition once
        // here so the first compute dispatch sees defined contents.
        device.one_time_submit(pool, |cmd| {
            let barrier = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE)
                .build();
            unsafe {
                device.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }
        })?;

        let view = create_view(device, image, format, vk::ImageAspectFlags::COLOR)?;

        Ok(Self {
            image,
            memory,
            view,
            sample_view: view,
            format,
            extent,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            if self.sample_view != self.view {
                device.destroy_image_view(self.sample_view, None);
            }
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn create_image(
    device: &VulkanDevice,
    format: vk::Format,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
    sharing_mode: vk::SharingMode,
    queue_family_indices: &[u32],
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(sharing_mode)
        .queue_family_indices(queue_family_indices)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe {
        device
            .device
            .create_image(&image_info, None)
            .context("Failed to create attachment image")?
    };

    let mem_requirements = unsafe { device.device.get_image_memory_requirements(image) };

    let memory_type_index = device.find_memory_type(
        mem_requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe {
        device
            .device
            .allocate_memory(&alloc_info, None)
            .context("Failed to allocate attachment memory")?
    };

    unsafe {
        device
            .device
            .bind_image_memory(image, memory, 0)
            .context("Failed to bind attachment memory")?;
    }

    Ok((image, memory))
}

fn create_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe {
        device
            .device
            .create_image_view(&view_info, None)
            .context("Failed to create attachment view")
    }
}
