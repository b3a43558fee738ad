// Vulkan backend
//
// Thin layer over ash: device and queue setup, swapchain, memory-backed
// resources and the small helpers the demos share.

pub mod attachment;
pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use attachment::Attachment;
pub use buffer::UniformBuffer;
pub use device::VulkanDevice;
pub use swapchain::Swapchain;
pub use sync::FrameSync;
