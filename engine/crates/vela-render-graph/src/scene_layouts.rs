//! 场景 pass 使用的 descriptor set layout
//!
//! 所有 SceneRenderer 共享同一组 layout，保存在 RenderContext 中。

use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    GfxBackend, GfxResult,
    descriptors::layout::{DescriptorBindingDesc, GfxDescriptorSetLayout},
};

const fn stage_union(a: vk::ShaderStageFlags, b: vk::ShaderStageFlags) -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::from_raw(a.as_raw() | b.as_raw())
}

const VERTEX_FRAGMENT: vk::ShaderStageFlags = stage_union(vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT);
const FRAGMENT_COMPUTE: vk::ShaderStageFlags =
    stage_union(vk::ShaderStageFlags::FRAGMENT, vk::ShaderStageFlags::COMPUTE);
const ALL_SCENE_STAGES: vk::ShaderStageFlags = stage_union(VERTEX_FRAGMENT, vk::ShaderStageFlags::COMPUTE);

/// renderer 内部全局 set 的编号，配合 `RendererId::global_set_key` 使用
pub struct GlobalSetSlot;
impl GlobalSetSlot {
    pub const FRAME: u32 = 0;
    pub const DEPTH_INPUT: u32 = 1;
    pub const COMPOSITE: u32 = 2;
}

/// 帧数据：set 0
pub struct FrameSetBindings;
impl FrameSetBindings {
    pub const CAMERA: u32 = 0;
    pub const SHADOW: u32 = 1;
    pub const LIGHTS: u32 = 2;
    pub const POINT_LIGHTS: u32 = 3;
    pub const LIGHT_GRID: u32 = 4;
    pub const SHADOW_MAP: u32 = 5;
    pub const ENVIRONMENT: u32 = 6;

    const BINDINGS: [DescriptorBindingDesc; 7] = [
        DescriptorBindingDesc::new(Self::CAMERA, vk::DescriptorType::UNIFORM_BUFFER, ALL_SCENE_STAGES),
        DescriptorBindingDesc::new(Self::SHADOW, vk::DescriptorType::UNIFORM_BUFFER, VERTEX_FRAGMENT),
        DescriptorBindingDesc::new(Self::LIGHTS, vk::DescriptorType::UNIFORM_BUFFER, FRAGMENT_COMPUTE),
        DescriptorBindingDesc::new(Self::POINT_LIGHTS, vk::DescriptorType::STORAGE_BUFFER, FRAGMENT_COMPUTE),
        DescriptorBindingDesc::new(Self::LIGHT_GRID, vk::DescriptorType::STORAGE_BUFFER, FRAGMENT_COMPUTE),
        DescriptorBindingDesc::new(
            Self::SHADOW_MAP,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
        DescriptorBindingDesc::new(
            Self::ENVIRONMENT,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ];
}

/// 材质：set 1
pub struct MaterialSetBindings;
impl MaterialSetBindings {
    pub const SET: u32 = 1;
    pub const UNIFORM: u32 = 0;
    pub const ALBEDO: u32 = 1;

    const BINDINGS: [DescriptorBindingDesc; 2] = [
        DescriptorBindingDesc::new(Self::UNIFORM, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT),
        DescriptorBindingDesc::new(
            Self::ALBEDO,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ];
}

/// light culling 读取的深度：set 1
pub struct DepthInputBindings;
impl DepthInputBindings {
    pub const DEPTH: u32 = 0;

    const BINDINGS: [DescriptorBindingDesc; 1] = [DescriptorBindingDesc::new(
        Self::DEPTH,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::ShaderStageFlags::COMPUTE,
    )];
}

/// bloom 的每次 dispatch：set 0
pub struct BloomBindings;
impl BloomBindings {
    pub const INPUT: u32 = 0;
    pub const OUTPUT: u32 = 1;
    /// upsample 时叠加的 downsample 结果
    pub const BLEND: u32 = 2;

    const BINDINGS: [DescriptorBindingDesc; 3] = [
        DescriptorBindingDesc::new(
            Self::INPUT,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::COMPUTE,
        ),
        DescriptorBindingDesc::new(Self::OUTPUT, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE),
        DescriptorBindingDesc::new(
            Self::BLEND,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::COMPUTE,
        ),
    ];
}

/// composite 的输入：set 0
pub struct CompositeBindings;
impl CompositeBindings {
    pub const SCENE_COLOR: u32 = 0;
    pub const BLOOM: u32 = 1;
    pub const DEPTH: u32 = 2;

    const BINDINGS: [DescriptorBindingDesc; 3] = [
        DescriptorBindingDesc::new(
            Self::SCENE_COLOR,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
        DescriptorBindingDesc::new(
            Self::BLOOM,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
        DescriptorBindingDesc::new(
            Self::DEPTH,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ];
}

pub struct SceneLayouts {
    pub frame: GfxDescriptorSetLayout,
    pub material: GfxDescriptorSetLayout,
    pub depth_input: GfxDescriptorSetLayout,
    pub bloom: GfxDescriptorSetLayout,
    pub composite: GfxDescriptorSetLayout,
}
impl SceneLayouts {
    pub fn new(backend: &Rc<dyn GfxBackend>) -> GfxResult<Self> {
        Ok(Self {
            frame: GfxDescriptorSetLayout::new(backend.clone(), &FrameSetBindings::BINDINGS, "scene-frame")?,
            material: GfxDescriptorSetLayout::new(backend.clone(), &MaterialSetBindings::BINDINGS, "scene-material")?,
            depth_input: GfxDescriptorSetLayout::new(backend.clone(), &DepthInputBindings::BINDINGS, "depth-input")?,
            bloom: GfxDescriptorSetLayout::new(backend.clone(), &BloomBindings::BINDINGS, "bloom")?,
            composite: GfxDescriptorSetLayout::new(backend.clone(), &CompositeBindings::BINDINGS, "composite")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::HeadlessBackend;

    use super::*;

    #[test]
    fn test_frame_set_bindings() {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let layouts = SceneLayouts::new(&backend).unwrap();
        assert_eq!(layouts.frame.bindings().len(), 7);
        let grid = layouts.frame.binding(FrameSetBindings::LIGHT_GRID).unwrap();
        assert_eq!(grid.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert!(grid.stages.contains(vk::ShaderStageFlags::COMPUTE));
        assert_eq!(
            layouts.bloom.binding(BloomBindings::OUTPUT).map(|b| b.descriptor_type),
            Some(vk::DescriptorType::STORAGE_IMAGE)
        );
    }
}
