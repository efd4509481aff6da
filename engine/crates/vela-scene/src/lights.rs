use vela_render_interface::handles::GfxImageViewHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// 光线传播的方向，不要求归一化
    pub direction: glam::Vec3,
    pub color: glam::Vec3,
    pub intensity: f32,
    pub cast_shadows: bool,
}
impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: glam::vec3(-0.4, -1.0, -0.3),
            color: glam::Vec3::ONE,
            intensity: 1.0,
            cast_shadows: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: glam::Vec3,
    /// 影响范围，用于 tile 剔除时的包围球
    pub radius: f32,
    pub color: glam::Vec3,
    pub intensity: f32,
    pub falloff: f32,
}
impl PointLight {
    pub fn to_gpu(&self) -> GpuPointLight {
        GpuPointLight {
            position: self.position.to_array(),
            radius: self.radius,
            color: self.color.to_array(),
            intensity: self.intensity,
            falloff: self.falloff,
            _padding: [0.0; 3],
        }
    }
}

/// 和 shader 中 `PointLight` 的 std430 布局一致
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPointLight {
    pub position: [f32; 3],
    pub radius: f32,
    pub color: [f32; 3],
    pub intensity: f32,
    pub falloff: f32,
    pub _padding: [f32; 3],
}

/// 天空光，没有设置环境贴图时使用中性的 fallback cubemap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyLight {
    pub environment: Option<GfxImageViewHandle>,
    pub intensity: f32,
}

/// 一帧内的全部光源
#[derive(Debug, Clone, Default)]
pub struct LightEnvironment {
    pub directional: Option<DirectionalLight>,
    pub point_lights: Vec<PointLight>,
    pub sky_light: Option<SkyLight>,
}
impl LightEnvironment {
    pub fn gpu_point_lights(&self) -> Vec<GpuPointLight> {
        self.point_lights.iter().map(PointLight::to_gpu).collect()
    }

    /// 没有方向光时使用一个强度为 0 的默认方向光
    pub fn directional_or_default(&self) -> DirectionalLight {
        self.directional.unwrap_or(DirectionalLight {
            intensity: 0.0,
            cast_shadows: false,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_point_light_layout() {
        assert_eq!(size_of::<GpuPointLight>(), 48);
        let light = PointLight {
            position: glam::vec3(1.0, 2.0, 3.0),
            radius: 5.0,
            color: glam::Vec3::ONE,
            intensity: 2.0,
            falloff: 1.0,
        };
        let gpu = light.to_gpu();
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&gpu));
        assert_eq!(&floats[..4], &[1.0, 2.0, 3.0, 5.0]);
    }
}
