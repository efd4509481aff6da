//! 基于 ash + vk-mem 的 backend
//!
//! 需要 Vulkan 1.3：dynamic rendering 与 synchronization2 都是必须的。

mod backend;
mod debug_messenger;
mod device;
mod instance;
mod physical_device;
mod surface;
mod swapchain;

pub use backend::{VulkanBackend, VulkanBackendCreateInfo};
