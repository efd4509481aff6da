use ash::vk;

use crate::pipelines::shader::ShaderStageDesc;

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub stage: ShaderStageDesc,
    pub layout: vk::PipelineLayout,
}
