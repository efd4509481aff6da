use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub max_lod: f32,
    /// 深度比较采样，用于阴影
    pub compare_op: Option<vk::CompareOp>,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerDesc {
    /// 默认配置：linear，repeat
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_lod: vk::LOD_CLAMP_NONE,
            compare_op: None,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        }
    }
}

impl SamplerDesc {
    pub fn linear_clamp() -> Self {
        Self {
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Default::default()
        }
    }

    /// 阴影贴图：border 为白色，超出范围的区域视为不在阴影中
    pub fn shadow() -> Self {
        Self {
            address_mode: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
            max_lod: 1.0,
            compare_op: Some(vk::CompareOp::LESS_OR_EQUAL),
            ..Default::default()
        }
    }
}

pub struct GfxSampler {
    backend: Rc<dyn GfxBackend>,
    handle: vk::Sampler,
}
impl GfxSampler {
    pub fn new(backend: Rc<dyn GfxBackend>, desc: SamplerDesc, debug_name: &str) -> GfxResult<Self> {
        let handle = backend.create_sampler(&desc, debug_name)?;
        Ok(Self { backend, handle })
    }

    /// getter
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}
impl Drop for GfxSampler {
    fn drop(&mut self) {
        self.backend.destroy_sampler(self.handle);
    }
}
