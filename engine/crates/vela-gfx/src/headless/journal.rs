use ash::vk;

use crate::{
    backend::{AcquireOutcome, PresentOutcome},
    commands::command::GfxCommand,
};

/// headless backend 记录下来的事件，按调用顺序排列
#[derive(Debug, Clone)]
pub enum JournalEvent {
    CreateFence { fence: vk::Fence, signaled: bool },
    /// 等待结束时 fence 一定处于 signaled
    WaitFence { fence: vk::Fence },
    ResetFence { fence: vk::Fence },

    ResetCommandPool { pool: vk::CommandPool },
    AllocateCommandBuffer { pool: vk::CommandPool, cmd: vk::CommandBuffer },
    BeginCommandBuffer { cmd: vk::CommandBuffer },
    EndCommandBuffer { cmd: vk::CommandBuffer },
    Command { cmd: vk::CommandBuffer, command: GfxCommand },
    Submit { command_buffers: Vec<vk::CommandBuffer>, fence: Option<vk::Fence> },
    WaitIdle,

    ResetDescriptorPool { pool: vk::DescriptorPool },
    AllocateDescriptorSet { pool: vk::DescriptorPool, set: vk::DescriptorSet },
    UpdateDescriptorSets { count: usize },

    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize },
    WriteBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, size: usize },
    DestroyBuffer { buffer: vk::Buffer },
    CreateImage { image: vk::Image, extent: vk::Extent2D, format: vk::Format, layers: u32 },
    UploadImage { image: vk::Image, size: usize },
    DestroyImage { image: vk::Image },

    RecreateSwapchain { extent: vk::Extent2D },
    Acquire { outcome: AcquireOutcome },
    Present { image_index: u32, outcome: PresentOutcome },
}

impl JournalEvent {
    #[inline]
    pub fn as_command(&self) -> Option<&GfxCommand> {
        match self {
            JournalEvent::Command { command, .. } => Some(command),
            _ => None,
        }
    }
}
