use ash::vk;
use itertools::Itertools;

use crate::commands::{command_buffer::GfxCommandBuffer, semaphore::GfxSemaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreSubmit {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags2,
}

/// Gfx 关于 submitInfo 的封装，只持有 handle，backend 负责转换为 `vk::SubmitInfo2`
#[derive(Debug, Clone, Default)]
pub struct GfxSubmitInfo {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_infos: Vec<SemaphoreSubmit>,
    pub signal_infos: Vec<SemaphoreSubmit>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[GfxCommandBuffer]) -> Self {
        Self {
            command_buffers: commands.iter().map(|cmd| cmd.vk_handle()).collect_vec(),
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.wait_infos.push(SemaphoreSubmit {
            semaphore: semaphore.handle(),
            stage,
        });
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: &GfxSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.signal_infos.push(SemaphoreSubmit {
            semaphore: semaphore.handle(),
            stage,
        });
        self
    }
}
