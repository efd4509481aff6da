//! 和 shader 共享的数据结构
//!
//! 所有结构体都按照 std140/std430 对齐，只使用 vec4 与标量组合，大小是 16 的倍数。
//! [`SCENE_SHADER_REFLECTIONS`] 与 `engine/shader/src` 中的 block 定义一同维护，
//! 创建 [`crate::render_context::RenderContext`] 时会和这里的结构体大小进行校验。

use ash::vk;
use vela_gfx::GfxResult;
use vela_render_interface::shader_library::{ReflectedBinding, ShaderLibrary, ShaderReflection};
use vela_scene::{lights::GpuPointLight, material::GpuMaterialUniform};

use crate::shadow_cascade::{SHADOW_CASCADE_COUNT, ShadowCascade};

pub type GpuMat4 = [[f32; 4]; 4];

/// set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuCameraUniform {
    pub view: GpuMat4,
    pub projection: GpuMat4,
    pub view_projection: GpuMat4,
    /// light culling 用来把 tile 还原到 view space
    pub inverse_projection: GpuMat4,
    /// xyz: 相机位置
    pub position: [f32; 4],
    /// (width, height, 1/width, 1/height)
    pub viewport: [f32; 4],
    /// (near, far, 0, 0)
    pub near_far: [f32; 4],
}
impl GpuCameraUniform {
    pub fn new(camera: &vela_scene::camera::Camera, extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let view = camera.view_matrix();
        let projection = camera.projection_matrix(aspect);
        let (width, height) = (extent.width.max(1) as f32, extent.height.max(1) as f32);
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            view_projection: (projection * view).to_cols_array_2d(),
            inverse_projection: projection.inverse().to_cols_array_2d(),
            position: camera.position.extend(1.0).to_array(),
            viewport: [width, height, 1.0 / width, 1.0 / height],
            near_far: [camera.near, camera.far, 0.0, 0.0],
        }
    }
}

/// set 0, binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuShadowUniform {
    pub cascade_view_projections: [GpuMat4; SHADOW_CASCADE_COUNT],
    /// view space 中的 split 深度（负数），fragment 按照它选择 cascade
    pub split_depths: [f32; SHADOW_CASCADE_COUNT],
    /// (1 / map_size, cast_shadows, 0, 0)
    pub params: [f32; 4],
}
impl GpuShadowUniform {
    pub fn new(cascades: &[ShadowCascade; SHADOW_CASCADE_COUNT], map_size: u32, cast_shadows: bool) -> Self {
        Self {
            cascade_view_projections: cascades.map(|c| c.view_projection.to_cols_array_2d()),
            split_depths: cascades.map(|c| c.signed_split_depth()),
            params: [1.0 / map_size.max(1) as f32, cast_shadows as u32 as f32, 0.0, 0.0],
        }
    }
}

/// set 0, binding 2
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLightUniform {
    /// xyz: 光线传播方向（归一化），w: 强度
    pub direction: [f32; 4],
    /// xyz: 颜色，w: 天空光强度
    pub color: [f32; 4],
    pub point_light_count: u32,
    pub tile_count_x: u32,
    pub tile_count_y: u32,
    pub max_lights_per_tile: u32,
}

/// 阴影 pass 的 push constant，选择当前渲染的 cascade
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowPushConstants {
    pub cascade_index: u32,
    pub _padding: [u32; 3],
}

/// debug grid 的 push constant
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GridPushConstants {
    pub transform: GpuMat4,
    /// 线宽（相对于格子）
    pub res: f32,
    /// 格子数量
    pub scale: f32,
    pub _padding: [f32; 2],
}
impl GridPushConstants {
    pub fn new() -> Self {
        let transform = glam::Mat4::from_rotation_x(90f32.to_radians()) * glam::Mat4::from_scale(glam::Vec3::splat(16.0));
        Self {
            transform: transform.to_cols_array_2d(),
            res: 0.025,
            scale: 16.025,
            _padding: [0.0; 2],
        }
    }
}
impl Default for GridPushConstants {
    fn default() -> Self {
        Self::new()
    }
}

/// bloom 各个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BloomStage {
    Prefilter = 0,
    Downsample = 1,
    FirstUpsample = 2,
    Upsample = 3,
}

/// bloom compute 的 push constant
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BloomPushConstants {
    /// (threshold, knee - threshold, 2 * knee, knee / 0.25)
    pub params: [f32; 4],
    /// 读取输入的 mip
    pub lod: f32,
    pub stage: u32,
    pub _padding: [f32; 2],
}
impl BloomPushConstants {
    pub fn new(threshold: f32, knee: f32, lod: f32, stage: BloomStage) -> Self {
        Self {
            params: [threshold, knee - threshold, knee * 2.0, knee / 0.25],
            lod,
            stage: stage as u32,
            _padding: [0.0; 2],
        }
    }
}

/// composite 的 push constant
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositePushConstants {
    pub exposure: f32,
    pub bloom_intensity: f32,
    pub near: f32,
    pub far: f32,
}

/// overlay 线框的 push constant
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OverlayPushConstants {
    pub transform: GpuMat4,
    pub color: [f32; 4],
}

/// push constant 的 range，stage 覆盖整个 pipeline
pub fn push_constant_range<T>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: size_of::<T>() as u32,
    }
}

const GRAPHICS: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

const fn block(set: u32, binding: u32, size: usize, stages: vk::ShaderStageFlags) -> ReflectedBinding {
    ReflectedBinding {
        set,
        binding,
        size: size as u32,
        stages,
    }
}

/// 场景 shader 的反射表
pub const SCENE_SHADER_REFLECTIONS: [ShaderReflection; 3] = [
    ShaderReflection {
        shader: "geometry.frag",
        bindings: &[
            block(0, 0, size_of::<GpuCameraUniform>(), GRAPHICS),
            block(0, 1, size_of::<GpuShadowUniform>(), GRAPHICS),
            block(0, 2, size_of::<GpuLightUniform>(), vk::ShaderStageFlags::FRAGMENT),
            block(0, 3, size_of::<GpuPointLight>(), vk::ShaderStageFlags::FRAGMENT),
            block(1, 0, size_of::<GpuMaterialUniform>(), vk::ShaderStageFlags::FRAGMENT),
        ],
    },
    ShaderReflection {
        shader: "light_culling.comp",
        bindings: &[
            block(0, 0, size_of::<GpuCameraUniform>(), vk::ShaderStageFlags::COMPUTE),
            block(0, 2, size_of::<GpuLightUniform>(), vk::ShaderStageFlags::COMPUTE),
            block(0, 3, size_of::<GpuPointLight>(), vk::ShaderStageFlags::COMPUTE),
            block(0, 4, size_of::<u32>(), vk::ShaderStageFlags::COMPUTE),
        ],
    },
    ShaderReflection {
        shader: "shadow.vert",
        bindings: &[block(0, 1, size_of::<GpuShadowUniform>(), vk::ShaderStageFlags::VERTEX)],
    },
];

/// 注册反射表，并校验 Rust 端的 block 与 shader 一致
pub fn register_scene_reflections(shader_library: &mut ShaderLibrary) -> GfxResult<()> {
    for reflection in SCENE_SHADER_REFLECTIONS {
        shader_library.register_reflection(reflection);
    }

    shader_library.validate_block::<GpuCameraUniform>("geometry.frag", 0, 0)?;
    shader_library.validate_block::<GpuShadowUniform>("geometry.frag", 0, 1)?;
    shader_library.validate_block::<GpuLightUniform>("geometry.frag", 0, 2)?;
    shader_library.validate_block::<GpuPointLight>("geometry.frag", 0, 3)?;
    shader_library.validate_block::<GpuMaterialUniform>("geometry.frag", 1, 0)?;
    shader_library.validate_block::<GpuCameraUniform>("light_culling.comp", 0, 0)?;
    shader_library.validate_block::<GpuLightUniform>("light_culling.comp", 0, 2)?;
    shader_library.validate_block::<GpuPointLight>("light_culling.comp", 0, 3)?;
    shader_library.validate_block::<GpuShadowUniform>("shadow.vert", 0, 1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std140_sizes() {
        assert_eq!(size_of::<GpuCameraUniform>(), 4 * 64 + 3 * 16);
        assert_eq!(size_of::<GpuShadowUniform>(), 4 * 64 + 16 + 16);
        assert_eq!(size_of::<GpuLightUniform>(), 48);
        assert_eq!(size_of::<GridPushConstants>(), 80);
        assert_eq!(size_of::<BloomPushConstants>(), 32);
        assert!(size_of::<OverlayPushConstants>() <= 128);
        for size in [
            size_of::<GpuCameraUniform>(),
            size_of::<GpuShadowUniform>(),
            size_of::<GpuLightUniform>(),
            size_of::<ShadowPushConstants>(),
            size_of::<CompositePushConstants>(),
        ] {
            assert_eq!(size % 16, 0);
        }
    }

    #[test]
    fn test_bloom_soft_knee_params() {
        let push = BloomPushConstants::new(1.0, 0.1, 2.0, BloomStage::Downsample);
        assert_eq!(push.params[0], 1.0);
        assert!((push.params[1] - (0.1 - 1.0)).abs() < 1e-6);
        assert!((push.params[2] - 0.2).abs() < 1e-6);
        assert!((push.params[3] - 0.4).abs() < 1e-6);
        assert_eq!(push.stage, 1);
    }

    #[test]
    fn test_grid_constants() {
        let grid = GridPushConstants::new();
        assert_eq!(grid.res, 0.025);
        assert_eq!(grid.scale, 16.025);
        // 绕 X 轴旋转 90 度之后，局部 Y 轴指向世界 Z
        let y = glam::Mat4::from_cols_array_2d(&grid.transform).transform_vector3(glam::Vec3::Y);
        assert!((y - glam::vec3(0.0, 0.0, 16.0)).length() < 1e-3);

        // Default 走 new()，不是全零
        let grid = GridPushConstants::default();
        assert_eq!(grid.scale, 16.025);
        assert_eq!(bytemuck::bytes_of(&grid), bytemuck::bytes_of(&GridPushConstants::new()));
    }
}
