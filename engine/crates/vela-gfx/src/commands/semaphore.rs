use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

/// move-only 的 binary semaphore，Drop 时销毁
pub struct GfxSemaphore {
    backend: Rc<dyn GfxBackend>,
    semaphore: vk::Semaphore,
}

// 创建与销毁
impl GfxSemaphore {
    pub fn new(backend: Rc<dyn GfxBackend>, debug_name: &str) -> GfxResult<Self> {
        let semaphore = backend.create_semaphore(debug_name)?;
        Ok(Self { backend, semaphore })
    }
}
impl Drop for GfxSemaphore {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.semaphore);
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}
