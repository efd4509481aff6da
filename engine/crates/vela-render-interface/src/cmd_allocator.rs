use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    GfxBackend, GfxResult,
    commands::{command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool},
};

use crate::{
    frame_counter::FrameLabel,
    frame_multiplexer::{FrameSlotReset, PerFrame},
};

/// 一个 frame slot 的 command pool 以及从中分配出去的 command buffer
pub struct FrameCommandPool {
    pool: GfxCommandPool,
    allocated: Vec<GfxCommandBuffer>,
}
impl FrameSlotReset for FrameCommandPool {
    fn reset_slot(&mut self) -> GfxResult<()> {
        // command buffer 的内存属于 pool，reset pool 之后全部回到初始状态
        self.allocated.clear();
        self.pool.reset_all_buffers()
    }
}

/// 为每个 frame 分配一个 command pool
pub struct CmdAllocator {
    pools: PerFrame<FrameCommandPool>,
}
// new & init
impl CmdAllocator {
    pub fn new(backend: Rc<dyn GfxBackend>) -> GfxResult<Self> {
        let pools = PerFrame::try_new(|frame_label| {
            Ok(FrameCommandPool {
                pool: GfxCommandPool::new(
                    backend.clone(),
                    vk::CommandPoolCreateFlags::TRANSIENT,
                    &format!("frame-{frame_label}-graphics"),
                )?,
                allocated: Vec::new(),
            })
        })?;
        Ok(Self { pools })
    }
}
// tools
impl CmdAllocator {
    /// 分配 command buffer，只在 `frame_label` 这一帧内有效
    pub fn alloc_command_buffer(&mut self, frame_label: FrameLabel, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        let slot = self.pools.get_mut(frame_label);
        let cmd = slot.pool.alloc_command_buffer(debug_name)?;
        slot.allocated.push(cmd.clone());
        Ok(cmd)
    }

    /// 只能在该 frame 的 fence signaled 之后调用
    pub fn free_frame_commands(&mut self, frame_label: FrameLabel) -> GfxResult<()> {
        self.pools.reset(frame_label)
    }

    #[inline]
    pub fn allocated_count(&self, frame_label: FrameLabel) -> usize {
        self.pools.get(frame_label).allocated.len()
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::{HeadlessBackend, JournalEvent};

    use super::*;

    #[test]
    fn test_free_frame_commands_resets_only_that_pool() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut allocator = CmdAllocator::new(backend.clone()).unwrap();
        allocator.alloc_command_buffer(FrameLabel::A, "a").unwrap();
        allocator.alloc_command_buffer(FrameLabel::B, "b").unwrap();

        backend.clear_journal();
        allocator.free_frame_commands(FrameLabel::A).unwrap();
        assert_eq!(allocator.allocated_count(FrameLabel::A), 0);
        assert_eq!(allocator.allocated_count(FrameLabel::B), 1);

        let resets = backend
            .journal()
            .into_iter()
            .filter(|event| matches!(event, JournalEvent::ResetCommandPool { .. }))
            .count();
        assert_eq!(resets, 1);
    }
}
