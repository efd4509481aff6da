use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

/// move-only 的 shader module，pipeline 创建完成后即可释放
pub struct GfxShaderModule {
    backend: Rc<dyn GfxBackend>,
    handle: vk::ShaderModule,
    name: String,
}
impl GfxShaderModule {
    pub fn new(backend: Rc<dyn GfxBackend>, code: &[u32], name: &str) -> GfxResult<Self> {
        let handle = backend.create_shader_module(code, name)?;
        Ok(Self {
            backend,
            handle,
            name: name.to_string(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
impl Drop for GfxShaderModule {
    fn drop(&mut self) {
        self.backend.destroy_shader_module(self.handle);
    }
}

/// pipeline 中的一个 shader stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

impl ShaderStageDesc {
    pub fn new(stage: vk::ShaderStageFlags, module: &GfxShaderModule) -> Self {
        Self {
            stage,
            module: module.handle(),
            entry_point: "main".to_string(),
        }
    }
}
