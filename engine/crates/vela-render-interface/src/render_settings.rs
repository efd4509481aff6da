use std::path::Path;

use anyhow::Context;
use ash::vk;
use serde::{Deserialize, Serialize};
use vela_gfx::{GfxError, GfxResult};

use crate::descriptor_set_manager::DescriptorBudget;

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    /// 场景颜色使用 HDR，bloom 和 composite 都在线性空间完成
    pub const DEFAULT_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
    /// composite 的输出，最终会被 blit 到 swapchain
    pub const DEFAULT_COMPOSITE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
    pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

    /// 以下几个值编译进了 shader，修改时要同步 `frame.glsl` 和 `bloom.comp`
    pub const LIGHT_TILE_SIZE: u32 = 16;
    pub const MAX_LIGHTS_PER_TILE: u32 = 256;
    pub const BLOOM_WORKGROUP_SIZE: u32 = 16;
}

/// 帧级渲染配置
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameSettings {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub frame_extent: vk::Extent2D,
}
impl FrameSettings {
    pub fn new(frame_extent: vk::Extent2D) -> Self {
        Self {
            color_format: DefaultRendererSettings::DEFAULT_COLOR_FORMAT,
            depth_format: DefaultRendererSettings::DEFAULT_DEPTH_FORMAT,
            frame_extent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    Fifo,
    Mailbox,
    Immediate,
}
impl PresentModeSetting {
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// shadow map 每个 cascade 的边长
    pub map_size: u32,
    /// log 与 uniform 划分之间的插值系数
    pub split_lambda: f32,
    /// 光源正交投影的近平面与远平面相对于 cascade 包围球的偏移
    pub near_plane_offset: f32,
    pub far_plane_offset: f32,
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
}
impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            map_size: 4096,
            split_lambda: 0.92,
            near_plane_offset: -50.0,
            far_plane_offset: 50.0,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightCullingSettings {
    pub tile_size: u32,
    pub max_lights_per_tile: u32,
    pub max_point_lights: u32,
}
impl Default for LightCullingSettings {
    fn default() -> Self {
        Self {
            tile_size: DefaultRendererSettings::LIGHT_TILE_SIZE,
            max_lights_per_tile: DefaultRendererSettings::MAX_LIGHTS_PER_TILE,
            max_point_lights: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub enabled: bool,
    pub threshold: f32,
    pub knee: f32,
    pub intensity: f32,
    /// compute shader 的 local size，需要和 shader 中的定义一致
    pub workgroup_size: u32,
}
impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
            knee: 0.1,
            intensity: 1.0,
            workgroup_size: DefaultRendererSettings::BLOOM_WORKGROUP_SIZE,
        }
    }
}

/// 渲染器的全部可配置项，从 toml 文件读取，缺失的字段使用默认值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub present_mode: PresentModeSetting,
    pub shadow: ShadowSettings,
    pub light_culling: LightCullingSettings,
    pub bloom: BloomSettings,
    /// 每帧 transform buffer 可容纳的 instance 数量
    pub max_instances: u32,
    pub descriptor_max_sets: u32,
    pub descriptors_per_type: u32,
    pub show_grid: bool,
}
impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            present_mode: PresentModeSetting::Fifo,
            shadow: ShadowSettings::default(),
            light_culling: LightCullingSettings::default(),
            bloom: BloomSettings::default(),
            max_instances: 10_000,
            descriptor_max_sets: 100_000,
            descriptors_per_type: 1_000,
            show_grid: true,
        }
    }
}
impl RendererSettings {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(content).context("failed to parse renderer settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// 检查和 shader 中写死的常量是否一致，以及各个容量是否为 0
    pub fn validate(&self) -> GfxResult<()> {
        let culling = &self.light_culling;
        if culling.tile_size != DefaultRendererSettings::LIGHT_TILE_SIZE {
            return Err(GfxError::Config(format!(
                "light_culling.tile_size = {}, shader is compiled with {}",
                culling.tile_size,
                DefaultRendererSettings::LIGHT_TILE_SIZE
            )));
        }
        if !(1..=DefaultRendererSettings::MAX_LIGHTS_PER_TILE).contains(&culling.max_lights_per_tile) {
            return Err(GfxError::Config(format!(
                "light_culling.max_lights_per_tile = {}, expected 1..={}",
                culling.max_lights_per_tile,
                DefaultRendererSettings::MAX_LIGHTS_PER_TILE
            )));
        }
        if culling.max_point_lights == 0 {
            return Err(GfxError::Config("light_culling.max_point_lights must not be 0".to_string()));
        }
        if self.bloom.workgroup_size != DefaultRendererSettings::BLOOM_WORKGROUP_SIZE {
            return Err(GfxError::Config(format!(
                "bloom.workgroup_size = {}, shader is compiled with {}",
                self.bloom.workgroup_size,
                DefaultRendererSettings::BLOOM_WORKGROUP_SIZE
            )));
        }
        if self.max_instances == 0 || self.shadow.map_size == 0 {
            return Err(GfxError::Config("max_instances and shadow.map_size must not be 0".to_string()));
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid settings file {}", path.display()))
    }

    /// 文件不存在时使用默认配置，文件格式错误仍然报错
    pub fn from_file_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    #[inline]
    pub fn descriptor_budget(&self) -> DescriptorBudget {
        DescriptorBudget {
            max_sets: self.descriptor_max_sets,
            descriptors_per_type: self.descriptors_per_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings = RendererSettings::from_toml_str(
            r#"
            present_mode = "mailbox"
            max_instances = 256

            [bloom]
            threshold = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(settings.present_mode.to_vk(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(settings.max_instances, 256);
        assert_eq!(settings.bloom.threshold, 1.5);
        assert_eq!(settings.bloom.knee, 0.1);
        assert_eq!(settings.shadow.map_size, 4096);
        assert_eq!(settings.light_culling.tile_size, 16);
        assert_eq!(settings.descriptor_budget(), DescriptorBudget::default());
    }

    #[test]
    fn test_invalid_settings_are_reported() {
        assert!(RendererSettings::from_toml_str("max_instances = \"many\"").is_err());
    }

    #[test]
    fn test_validate_rejects_shader_mismatch() {
        assert!(RendererSettings::default().validate().is_ok());

        for tile_size in [0, 8, 32] {
            let mut settings = RendererSettings::default();
            settings.light_culling.tile_size = tile_size;
            assert!(matches!(settings.validate(), Err(GfxError::Config(_))), "tile_size {tile_size}");
        }
        for workgroup_size in [0, 8] {
            let mut settings = RendererSettings::default();
            settings.bloom.workgroup_size = workgroup_size;
            assert!(matches!(settings.validate(), Err(GfxError::Config(_))));
        }

        let mut settings = RendererSettings::default();
        settings.light_culling.max_lights_per_tile = 0;
        assert!(settings.validate().is_err());
        settings.light_culling.max_lights_per_tile = DefaultRendererSettings::MAX_LIGHTS_PER_TILE + 1;
        assert!(settings.validate().is_err());
        settings.light_culling.max_lights_per_tile = 16;
        assert!(settings.validate().is_ok());

        // 从文件读取时同样会被拒绝
        assert!(RendererSettings::from_toml_str("[light_culling]\ntile_size = 8").is_err());
        assert!(RendererSettings::from_toml_str("[bloom]\nworkgroup_size = 0").is_err());
        assert!(RendererSettings::from_toml_str("[light_culling]\nmax_lights_per_tile = 1024").is_err());
    }

    /// 读取 `#define NAME value`
    fn shader_define(source: &str, name: &str) -> Option<u32> {
        source.lines().find_map(|line| {
            let mut parts = line.trim().strip_prefix("#define")?.split_whitespace();
            if parts.next()? != name {
                return None;
            }
            parts.next()?.parse().ok()
        })
    }

    #[test]
    fn test_constants_match_shader_source() {
        let frame = include_str!("../../../shader/include/frame.glsl");
        let bloom = include_str!("../../../shader/src/bloom.comp");
        assert_eq!(shader_define(frame, "LIGHT_TILE_SIZE"), Some(DefaultRendererSettings::LIGHT_TILE_SIZE));
        assert_eq!(shader_define(frame, "MAX_LIGHTS_PER_TILE"), Some(DefaultRendererSettings::MAX_LIGHTS_PER_TILE));
        assert_eq!(shader_define(bloom, "WORKGROUP_SIZE"), Some(DefaultRendererSettings::BLOOM_WORKGROUP_SIZE));

        let defaults = RendererSettings::default();
        assert_eq!(defaults.light_culling.tile_size, DefaultRendererSettings::LIGHT_TILE_SIZE);
        assert_eq!(defaults.light_culling.max_lights_per_tile, DefaultRendererSettings::MAX_LIGHTS_PER_TILE);
        assert_eq!(defaults.bloom.workgroup_size, DefaultRendererSettings::BLOOM_WORKGROUP_SIZE);
    }

    #[test]
    fn test_missing_file_uses_default() {
        let settings = RendererSettings::from_file_or_default("definitely/not/here.toml").unwrap();
        assert_eq!(settings, RendererSettings::default());
    }
}
