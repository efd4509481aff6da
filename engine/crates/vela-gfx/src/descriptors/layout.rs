use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

/// descriptor set layout 中的一个 binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingDesc {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBindingDesc {
    pub const fn new(binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            stages,
        }
    }

    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
    }
}

/// move-only 的 descriptor set layout，同时记录 bindings 以便校验写入
pub struct GfxDescriptorSetLayout {
    backend: Rc<dyn GfxBackend>,
    handle: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBindingDesc>,
}
impl GfxDescriptorSetLayout {
    pub fn new(backend: Rc<dyn GfxBackend>, bindings: &[DescriptorBindingDesc], debug_name: &str) -> GfxResult<Self> {
        let handle = backend.create_descriptor_set_layout(bindings, debug_name)?;
        Ok(Self {
            backend,
            handle,
            bindings: bindings.to_vec(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBindingDesc] {
        &self.bindings
    }

    pub fn binding(&self, binding: u32) -> Option<&DescriptorBindingDesc> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}
impl Drop for GfxDescriptorSetLayout {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_set_layout(self.handle);
    }
}
