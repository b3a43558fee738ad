// Descriptor set helpers
//
// Every set in the demos is written once at startup (and again on resize),
// so there is no per-frame descriptor churn to manage.

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;

/// One binding slot in a descriptor set layout
pub struct Binding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

impl Binding {
    pub fn new(binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            ty,
            stages,
        }
    }
}

pub fn create_set_layout(
    device: &VulkanDevice,
    bindings: &[Binding],
) -> Result<vk::DescriptorSetLayout> {
    let vk_bindings: Vec<_> = bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(b.binding)
                .descriptor_type(b.ty)
                .descriptor_count(1)
                .stage_flags(b.stages)
                .build()
        })
        .collect();

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);

    unsafe {
        device
            .device
            .create_descriptor_set_layout(&layout_info, None)
            .context("Failed to create descriptor set layout")
    }
}

pub fn create_pool(
    device: &VulkanDevice,
    sizes: &[(vk::DescriptorType, u32)],
    max_sets: u32,
) -> Result<vk::DescriptorPool> {
    let pool_sizes: Vec<_> = sizes
        .iter()
        .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect();

    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(max_sets);

    unsafe {
        device
            .device
            .create_descriptor_pool(&pool_info, None)
            .context("Failed to create descriptor pool")
    }
}

pub fn allocate_set(
    device: &VulkanDevice,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet> {
    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = unsafe {
        device
            .device
            .allocate_descriptor_sets(&alloc_info)
            .context("Failed to allocate descriptor set")?
    };

    Ok(sets[0])
}

/// Sampler for reading render targets: clamp to a white border so samples
/// past the edge read as unoccluded / far depth.
pub fn create_sampler(device: &VulkanDevice, filter: vk::Filter) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
        .max_anisotropy(1.0);

    unsafe {
        device
            .device
            .create_sampler(&sampler_info, None)
            .context("Failed to create sampler")
    }
}

/// Pending write to one binding of one set
pub enum Write {
    Buffer(u32, vk::DescriptorBufferInfo),
    /// Combined image sampler in the given layout
    Sampled(u32, vk::ImageView, vk::ImageLayout, vk::Sampler),
    /// Storage image, always GENERAL
    Storage(u32, vk::ImageView),
}

/// Flush a batch of writes targeting a single descriptor set
pub fn update_set(device: &VulkanDevice, set: vk::DescriptorSet, writes: &[Write]) {
    // Parallel info storage, one slot per write, so the slices handed to the
    // WriteDescriptorSet builders stay alive until the update call.
    let mut buffer_infos = vec![[vk::DescriptorBufferInfo::default()]; writes.len()];
    let mut image_infos = vec![[vk::DescriptorImageInfo::default()]; writes.len()];

    for (i, write) in writes.iter().enumerate() {
        match *write {
            Write::Buffer(_, info) => buffer_infos[i] = [info],
            Write::Sampled(_, view, layout, sampler) => {
                image_infos[i] = [vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                }]
            }
            Write::Storage(_, view) => {
                image_infos[i] = [vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view,
                    image_layout: vk::ImageLayout::GENERAL,
                }]
            }
        }
    }

    let vk_writes: Vec<_> = writes
        .iter()
        .enumerate()
        .map(|(i, write)| match *write {
            Write::Buffer(binding, _) => vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_infos[i])
                .build(),
            Write::Sampled(binding, ..) => vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_infos[i])
                .build(),
            Write::Storage(binding, _) => vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&image_infos[i])
                .build(),
        })
        .collect();

    unsafe {
        device.device.update_descriptor_sets(&vk_writes, &[]);
    }
}
