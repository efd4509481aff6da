use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

pub struct GfxPipelineLayout {
    backend: Rc<dyn GfxBackend>,
    handle: vk::PipelineLayout,
}
impl GfxPipelineLayout {
    pub fn new(
        backend: Rc<dyn GfxBackend>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        debug_name: &str,
    ) -> GfxResult<Self> {
        let handle = backend.create_pipeline_layout(descriptor_set_layouts, push_constant_ranges, debug_name)?;
        Ok(Self { backend, handle })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }
}
impl Drop for GfxPipelineLayout {
    fn drop(&mut self) {
        self.backend.destroy_pipeline_layout(self.handle);
    }
}
