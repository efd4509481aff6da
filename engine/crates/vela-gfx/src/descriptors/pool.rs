use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

/// 引擎中会用到的所有 descriptor 类型，每种类型使用相同的预算
pub const BUDGETED_DESCRIPTOR_TYPES: [vk::DescriptorType; 6] = [
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::SAMPLER,
];

#[derive(Debug, Clone)]
pub struct DescriptorPoolDesc {
    pub max_sets: u32,
    pub pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl DescriptorPoolDesc {
    /// 每种 descriptor 类型使用相同的数量上限
    pub fn uniform_budget(max_sets: u32, per_type: u32) -> Self {
        let pool_sizes = BUDGETED_DESCRIPTOR_TYPES
            .iter()
            .map(|ty| vk::DescriptorPoolSize {
                ty: *ty,
                descriptor_count: per_type,
            })
            .collect_vec();
        Self { max_sets, pool_sizes }
    }

    pub fn capacity_of(&self, ty: vk::DescriptorType) -> u32 {
        self.pool_sizes.iter().filter(|size| size.ty == ty).map(|size| size.descriptor_count).sum()
    }
}

/// move-only 的 descriptor pool，不支持单独 free，只能整体 reset
pub struct GfxDescriptorPool {
    backend: Rc<dyn GfxBackend>,
    handle: vk::DescriptorPool,
    desc: DescriptorPoolDesc,
}
impl GfxDescriptorPool {
    pub fn new(backend: Rc<dyn GfxBackend>, desc: DescriptorPoolDesc, debug_name: &str) -> GfxResult<Self> {
        let handle = backend.create_descriptor_pool(&desc, debug_name)?;
        Ok(Self { backend, handle, desc })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &DescriptorPoolDesc {
        &self.desc
    }

    pub fn reset(&self) -> GfxResult<()> {
        self.backend.reset_descriptor_pool(self.handle)
    }

    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> GfxResult<vk::DescriptorSet> {
        self.backend.allocate_descriptor_set(self.handle, layout)
    }
}
impl Drop for GfxDescriptorPool {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_pool(self.handle);
    }
}
