use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, commands::command_buffer::GfxCommandBuffer, gfx_error::GfxResult};

/// command pool 是和 queue family 绑定的，backend 只使用一个全能的 graphics queue
///
/// move-only，Drop 时销毁；pool 内的 command buffer 随之释放
pub struct GfxCommandPool {
    backend: Rc<dyn GfxBackend>,
    handle: vk::CommandPool,
    debug_name: String,
}
// init & destroy
impl GfxCommandPool {
    pub fn new(backend: Rc<dyn GfxBackend>, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> GfxResult<Self> {
        let handle = backend.create_command_pool(flags, debug_name)?;
        Ok(Self {
            backend,
            handle,
            debug_name: debug_name.to_string(),
        })
    }
}
impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        log::debug!("destroy command pool: {}", self.debug_name);
        self.backend.destroy_command_pool(self.handle);
    }
}
// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }
}
// tools
impl GfxCommandPool {
    /// 这个调用并不会释放资源，而是将 pool 内的 command buffer 设置到初始状态
    ///
    /// reset 之后，pool 内的 command buffer 又可以重新录制命令
    pub fn reset_all_buffers(&self) -> GfxResult<()> {
        self.backend.reset_command_pool(self.handle)
    }

    pub fn alloc_command_buffer(&self, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        let name = format!("{}-{}", self.debug_name, debug_name);
        let cmd = self.backend.allocate_command_buffer(self.handle, &name)?;
        Ok(GfxCommandBuffer::new(self.backend.clone(), cmd, &name))
    }
}
