// Buffer utilities for vertex, index, uniform and staging buffers

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;

/// Helper to create a GPU buffer with specified usage and memory properties
pub fn create_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe {
        device
            .device
            .create_buffer(&buffer_info, None)
            .context("Failed to create buffer")?
    };

    let mem_requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let memory_type_index =
        device.find_memory_type(mem_requirements.memory_type_bits, memory_properties)?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type_index);

    let buffer_memory = unsafe {
        device
            .device
            .allocate_memory(&alloc_info, None)
            .context("Failed to allocate buffer memory")?
    };

    unsafe {
        device
            .device
            .bind_buffer_memory(buffer, buffer_memory, 0)
            .context("Failed to bind buffer memory")?;
    }

    Ok((buffer, buffer_memory))
}

/// Create a host-visible buffer and fill it with data
pub fn create_buffer_with_data<T: Copy>(
    device: &VulkanDevice,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;

    let (buffer, memory) = create_buffer(
        device,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    unsafe {
        let ptr = device
            .device
            .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())? as *mut T;

        ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
        device.device.unmap_memory(memory);
    }

    Ok((buffer, memory))
}

/// Small host-coherent uniform buffer, mapped for its whole lifetime and
/// rewritten from the CPU every frame.
pub struct UniformBuffer<T: Pod> {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut T,
}

impl<T: Pod> UniformBuffer<T> {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let size = std::mem::size_of::<T>() as vk::DeviceSize;
        let (buffer, memory) = create_buffer(
            device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let mapped = unsafe {
            device
                .device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())? as *mut T
        };

        Ok(Self {
            buffer,
            memory,
            mapped,
        })
    }

    /// Write the whole struct. The memory is host-coherent, so the write is
    /// visible to the GPU without an explicit flush.
    pub fn update(&self, value: &T) {
        unsafe {
            self.mapped.write_volatile(*value);
        }
    }

    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: std::mem::size_of::<T>() as vk::DeviceSize,
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.unmap_memory(self.memory);
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}
