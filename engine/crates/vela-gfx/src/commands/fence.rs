use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

/// move-only 的 fence，Drop 时销毁
pub struct GfxFence {
    backend: Rc<dyn GfxBackend>,
    fence: vk::Fence,
}

// 创建与销毁
impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(backend: Rc<dyn GfxBackend>, signaled: bool, debug_name: &str) -> GfxResult<Self> {
        let fence = backend.create_fence(signaled, debug_name)?;
        Ok(Self { backend, fence })
    }
}
impl Drop for GfxFence {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.fence);
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

// tools
impl GfxFence {
    /// 阻塞等待 fence，不设超时
    #[inline]
    pub fn wait(&self) -> GfxResult<()> {
        self.backend.wait_fences(std::slice::from_ref(&self.fence), u64::MAX)
    }

    #[inline]
    pub fn reset(&self) -> GfxResult<()> {
        self.backend.reset_fences(std::slice::from_ref(&self.fence))
    }

    #[inline]
    pub fn is_signaled(&self) -> GfxResult<bool> {
        self.backend.fence_signaled(self.fence)
    }
}
