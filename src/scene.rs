// glTF scene loading
//
// Node transforms are baked into the vertices at load time and Y is flipped
// to match the projection, so drawing needs no per-node state. Each primitive
// keeps its material's base color texture as a descriptor set.

use crate::backend::{buffer, descriptor, VulkanDevice};
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};
use std::path::Path;

/// Interleaved vertex, shader locations: 0 position, 1 uv, 2 color, 3 normal
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 32,
            },
            vk::VertexInputAttributeDescription {
                location: 3,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
        ]
    }
}

struct Texture {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

struct Primitive {
    first_index: u32,
    index_count: u32,
    /// Index into `textures`; materials without a base color texture
    /// fall back to the 1x1 white texture at slot 0.
    texture: usize,
}

pub struct Scene {
    vertex_buffer: vk::Buffer,
    vertex_memory: vk::DeviceMemory,
    index_buffer: vk::Buffer,
    index_memory: vk::DeviceMemory,
    textures: Vec<Texture>,
    texture_sets: Vec<vk::DescriptorSet>,
    primitives: Vec<Primitive>,
    sampler: vk::Sampler,
    descriptor_pool: vk::DescriptorPool,
}

impl Scene {
    pub fn load<P: AsRef<Path>>(
        device: &VulkanDevice,
        pool: vk::CommandPool,
        path: P,
    ) -> Result<Self> {
        let path = path.as_ref();
        let (document, buffers, images) = gltf::import(path)
            .with_context(|| format!("Failed to load glTF scene {:?}", path))?;

        let mut vertices: Vec<Vertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut primitives: Vec<Primitive> = Vec::new();

        // Slot 0 is the white fallback for untextured materials
        let mut textures = vec![create_texture(device, pool, &[255u8; 4], 1, 1)?];
        let mut image_slots = vec![None; images.len()];

        for scene in document.scenes() {
            for node in scene.nodes() {
                load_node(
                    &node,
                    Mat4::IDENTITY,
                    &buffers,
                    &mut vertices,
                    &mut indices,
                    &mut primitives,
                    &mut |image_index| -> Result<usize> {
                        if let Some(slot) = image_slots[image_index] {
                            return Ok(slot);
                        }
                        let data = &images[image_index];
                        let rgba = to_rgba(data)?;
                        textures.push(create_texture(
                            device,
                            pool,
                            &rgba,
                            data.width,
                            data.height,
                        )?);
                        let slot = textures.len() - 1;
                        image_slots[image_index] = Some(slot);
                        Ok(slot)
                    },
                )?;
            }
        }

        anyhow::ensure!(!vertices.is_empty(), "Scene {:?} contains no geometry", path);

        log::info!(
            "Loaded {:?}: {} vertices, {} indices, {} primitives, {} textures",
            path,
            vertices.len(),
            indices.len(),
            primitives.len(),
            textures.len()
        );

        let (vertex_buffer, vertex_memory) = buffer::create_buffer_with_data(
            device,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &vertices,
        )?;
        let (index_buffer, index_memory) =
            buffer::create_buffer_with_data(device, vk::BufferUsageFlags::INDEX_BUFFER, &indices)?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_anisotropy(1.0);
        let sampler = unsafe {
            device
                .device
                .create_sampler(&sampler_info, None)
                .context("Failed to create material sampler")?
        };

        Ok(Self {
            vertex_buffer,
            vertex_memory,
            index_buffer,
            index_memory,
            textures,
            texture_sets: Vec::new(),
            primitives,
            sampler,
            descriptor_pool: vk::DescriptorPool::null(),
        })
    }

    /// Allocate one combined-image-sampler set per texture against the given
    /// material set layout. Called once the G-buffer pipeline layout exists.
    pub fn create_descriptor_sets(
        &mut self,
        device: &VulkanDevice,
        layout: vk::DescriptorSetLayout,
    ) -> Result<()> {
        let count = self.textures.len() as u32;
        self.descriptor_pool = descriptor::create_pool(
            device,
            &[(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, count)],
            count,
        )?;

        self.texture_sets = self
            .textures
            .iter()
            .map(|texture| {
                let set = descriptor::allocate_set(device, self.descriptor_pool, layout)?;
                descriptor::update_set(
                    device,
                    set,
                    &[descriptor::Write::Sampled(
                        0,
                        texture.view,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        self.sampler,
                    )],
                );
                Ok(set)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(())
    }

    /// Record draws for every primitive. The material set binds at set 1.
    pub fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
    ) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT32);

            for primitive in &self.primitives {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline_layout,
                    1,
                    &[self.texture_sets[primitive.texture]],
                    &[],
                );
                device.cmd_draw_indexed(cmd, primitive.index_count, 1, primitive.first_index, 0, 0);
            }
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_sampler(self.sampler, None);
            for texture in &self.textures {
                device.destroy_image_view(texture.view, None);
                device.destroy_image(texture.image, None);
                device.free_memory(texture.memory, None);
            }
            device.destroy_buffer(self.vertex_buffer, None);
            device.free_memory(self.vertex_memory, None);
            device.destroy_buffer(self.index_buffer, None);
            device.free_memory(self.index_memory, None);
        }
    }
}

fn load_node(
    node: &gltf::Node,
    parent_transform: Mat4,
    buffers: &[gltf::buffer::Data],
    vertices: &mut Vec<Vertex>,
    indices: &mut Vec<u32>,
    primitives: &mut Vec<Primitive>,
    upload_image: &mut dyn FnMut(usize) -> Result<usize>,
) -> Result<()> {
    let local = Mat4::from_cols_array_2d(&node.transform().matrix());
    let transform = parent_transform * local;

    if let Some(mesh) = node.mesh() {
        let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();

        for primitive in mesh.primitives() {
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .context("Primitive has no positions")?
                .collect();
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|iter| iter.collect())
                .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; positions.len()]);
            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|iter| iter.into_f32().collect())
                .unwrap_or_else(|| vec![[0.0, 0.0]; positions.len()]);
            let colors: Vec<[f32; 4]> = reader
                .read_colors(0)
                .map(|iter| iter.into_rgba_f32().collect())
                .unwrap_or_else(|| vec![[1.0, 1.0, 1.0, 1.0]; positions.len()]);

            let vertex_offset = vertices.len() as u32;
            for i in 0..positions.len() {
                // Bake the node transform and flip Y into Vulkan's frame
                let mut position = transform.transform_point3(Vec3::from(positions[i]));
                position.y *= -1.0;
                let mut normal = (normal_matrix * Vec3::from(normals[i])).normalize_or_zero();
                normal.y *= -1.0;

                vertices.push(Vertex {
                    position: position.into(),
                    normal: normal.into(),
                    uv: uvs[i],
                    color: colors[i],
                });
            }

            let first_index = indices.len() as u32;
            let prim_indices: Vec<u32> = match reader.read_indices() {
                Some(read) => read.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };
            indices.extend(prim_indices.iter().map(|&i| i + vertex_offset));

            let texture = match primitive
                .material()
                .pbr_metallic_roughness()
                .base_color_texture()
            {
                Some(info) => upload_image(info.texture().source().index())?,
                None => 0,
            };

            primitives.push(Primitive {
                first_index,
                index_count: prim_indices.len() as u32,
                texture,
            });
        }
    }

    for child in node.children() {
        load_node(
            &child,
            transform,
            buffers,
            vertices,
            indices,
            primitives,
            upload_image,
        )?;
    }

    Ok(())
}

/// Expand whatever channel layout the image decoded to into RGBA8
fn to_rgba(data: &gltf::image::Data) -> Result<Vec<u8>> {
    use gltf::image::Format;

    let pixel_count = (data.width * data.height) as usize;
    let rgba = match data.format {
        Format::R8G8B8A8 => data.pixels.clone(),
        Format::R8G8B8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for rgb in data.pixels.chunks_exact(3) {
                out.extend_from_slice(rgb);
                out.push(255);
            }
            out
        }
        Format::R8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for &r in &data.pixels {
                out.extend_from_slice(&[r, r, r, 255]);
            }
            out
        }
        Format::R8G8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for rg in data.pixels.chunks_exact(2) {
                out.extend_from_slice(&[rg[0], rg[1], 0, 255]);
            }
            out
        }
        other => anyhow::bail!("Unsupported glTF image format {:?}", other),
    };

    Ok(rgba)
}

fn create_texture(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    rgba: &[u8],
    width: u32,
    height: u32,
) -> Result<Texture> {
    let (staging_buffer, staging_memory) =
        buffer::create_buffer_with_data(device, vk::BufferUsageFlags::TRANSFER_SRC, rgba)?;

    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk::Format::R8G8B8A8_UNORM)
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe {
        device
            .device
            .create_image(&image_info, None)
            .context("Failed to create texture image")?
    };

    let requirements = unsafe { device.device.get_image_memory_requirements(image) };
    let memory_type = device.find_memory_type(
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    let memory = unsafe {
        device
            .device
            .allocate_memory(&alloc_info, None)
            .context("Failed to allocate texture memory")?
    };
    unsafe {
        device
            .device
            .bind_image_memory(image, memory, 0)
            .context("Failed to bind texture memory")?;
    }

    let range = crate::backend::attachment::COLOR_RANGE;

    device.one_time_submit(pool, |cmd| unsafe {
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .build();
        device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_transfer],
        );

        let region = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .build();
        device.device.cmd_copy_buffer_to_image(
            cmd,
            staging_buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        let to_sampled = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .build();
        device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_sampled],
        );
    })?;

    unsafe {
        device.device.destroy_buffer(staging_buffer, None);
        device.device.free_memory(staging_memory, None);
    }

    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(vk::Format::R8G8B8A8_UNORM)
        .subresource_range(range);
    let view = unsafe {
        device
            .device
            .create_image_view(&view_info, None)
            .context("Failed to create texture view")?
    };

    Ok(Texture {
        image,
        memory,
        view,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);

        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs.len(), 4);
        // uv sits after position + normal
        assert_eq!(attrs[1].offset, 24);
        // normal at location 3 points back into the middle of the struct
        assert_eq!(attrs[3].offset, 12);
    }

    #[test]
    fn rgb_expands_to_rgba() {
        let data = gltf::image::Data {
            pixels: vec![10, 20, 30, 40, 50, 60],
            format: gltf::image::Format::R8G8B8,
            width: 2,
            height: 1,
        };
        let rgba = to_rgba(&data).unwrap();
        assert_eq!(rgba, vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }
}
