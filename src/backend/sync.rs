// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync. Command buffers are
// recorded once and reused, so the demos run a single frame in flight.

use super::VulkanDevice;
use anyhow::Result;
use ash::vk;
use std::sync::Arc;

/// Per-frame synchronization objects
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: create_semaphore(device)?,
                render_finished: create_semaphore(device)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Bare binary semaphore, used for the cross-queue handoff chain
pub fn create_semaphore(device: &VulkanDevice) -> Result<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::builder();
    unsafe { Ok(device.device.create_semaphore(&info, None)?) }
}
