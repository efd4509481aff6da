use ash::vk;
use vela_render_interface::{descriptor_set_manager::MaterialId, handles::GfxImageViewHandle};

use crate::asset_registry::AssetHandle;

/// 材质：shader + uniform 参数 + 贴图绑定
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    /// 使用的 shader 名，例如 `geometry`
    pub shader: String,

    pub base_color: glam::Vec4,
    pub emissive: glam::Vec4,
    pub metallic: f32,
    pub roughness: f32,

    /// 为空时绑定 1x1 白色 fallback 贴图
    pub albedo_map: Option<GfxImageViewHandle>,
}
impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            shader: "geometry".to_string(),
            base_color: glam::Vec4::ONE,
            emissive: glam::Vec4::ZERO,
            metallic: 0.0,
            roughness: 0.5,
            albedo_map: None,
        }
    }
}
impl Material {
    pub fn uniform(&self) -> GpuMaterialUniform {
        GpuMaterialUniform {
            base_color: self.base_color.to_array(),
            emissive: self.emissive.to_array(),
            metallic: self.metallic,
            roughness: self.roughness,
            has_albedo_map: self.albedo_map.is_some() as u32,
            _padding: 0,
        }
    }
}

/// 和 shader 中 set 1 的 `MaterialUniform` 一致
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuMaterialUniform {
    pub base_color: [f32; 4],
    pub emissive: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub has_albedo_map: u32,
    pub _padding: u32,
}
impl GpuMaterialUniform {
    pub const SIZE: vk::DeviceSize = size_of::<Self>() as vk::DeviceSize;
}

/// 一个 mesh 的所有材质槽，submesh 通过 `material_index` 选择
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialRegistry {
    slots: Vec<AssetHandle<Material>>,
}
impl MaterialRegistry {
    pub fn new(slots: Vec<AssetHandle<Material>>) -> Self {
        Self { slots }
    }

    /// 越界时使用第一个槽
    pub fn material(&self, material_index: u32) -> Option<AssetHandle<Material>> {
        self.slots.get(material_index as usize).or_else(|| self.slots.first()).copied()
    }

    #[inline]
    pub fn slots(&self) -> &[AssetHandle<Material>] {
        &self.slots
    }
}

/// descriptor set 缓存使用的材质 identity
#[inline]
pub fn material_id(handle: AssetHandle<Material>) -> MaterialId {
    MaterialId(handle.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_registry::AssetRegistry;

    #[test]
    fn test_uniform_layout() {
        assert_eq!(GpuMaterialUniform::SIZE, 48);
        let uniform = Material::default().uniform();
        assert_eq!(uniform.has_albedo_map, 0);
    }

    #[test]
    fn test_registry_slot_fallback() {
        let mut assets = AssetRegistry::new();
        let a = assets.insert(Material::default());
        let b = assets.insert(Material::default());
        let registry = MaterialRegistry::new(vec![a, b]);
        assert_eq!(registry.material(1), Some(b));
        assert_eq!(registry.material(9), Some(a));
        assert_ne!(material_id(a), material_id(b));
        assert!(MaterialRegistry::default().material(0).is_none());
    }
}
