//! 每帧的绘制请求
//!
//! 同一个 (mesh, material registry, submesh) 的所有实例合并为一个 [`DrawKey`]，
//! 用 `IndexMap` 保存以保证 pack 的顺序就是首次提交的顺序。

use indexmap::IndexMap;
use vela_scene::{EntityId, asset_registry::AssetHandle, material::MaterialRegistry, mesh::StaticMesh};

/// 一个可绘制的表面
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawKey {
    pub mesh: AssetHandle<StaticMesh>,
    pub materials: AssetHandle<MaterialRegistry>,
    pub submesh_index: u32,
}

/// 每个 instance 的变换矩阵，按行存储（4 个 vec4）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformRecord {
    pub rows: [[f32; 4]; 4],
}
impl TransformRecord {
    pub const SIZE: usize = size_of::<Self>();

    #[inline]
    pub fn from_mat4(transform: &glam::Mat4) -> Self {
        Self {
            rows: transform.transpose().to_cols_array_2d(),
        }
    }
}

/// 同一个 DrawKey 下按提交顺序排列的实例
#[derive(Debug, Clone, Default)]
pub struct InstanceList {
    transforms: Vec<TransformRecord>,
    entities: Vec<EntityId>,
}
impl InstanceList {
    #[inline]
    pub fn count(&self) -> u32 {
        self.transforms.len() as u32
    }

    #[inline]
    pub fn transforms(&self) -> &[TransformRecord] {
        &self.transforms
    }

    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }
}

/// 线框 overlay，例如碰撞体
#[derive(Debug, Clone, Copy)]
pub struct OverlayDraw {
    pub mesh: AssetHandle<StaticMesh>,
    pub transform: glam::Mat4,
    pub color: glam::Vec4,
}

/// pack 之后的一个 draw batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBatch {
    pub key: DrawKey,
    /// 在 transform buffer 中的起始字节偏移
    pub byte_offset: u64,
    pub instance_count: u32,
}

/// 整帧的 transform 数据，batch 的顺序与 DrawKey 的插入顺序一致
#[derive(Debug, Clone, Default)]
pub struct PackedDraws {
    pub batches: Vec<DrawBatch>,
    pub records: Vec<TransformRecord>,
}
impl PackedDraws {
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.records.len() * TransformRecord::SIZE
    }
}

#[derive(Default)]
pub struct DrawList {
    entries: IndexMap<DrawKey, InstanceList>,
    overlays: Vec<OverlayDraw>,
}
impl DrawList {
    /// 提交一个 drawable，mesh 的每个 submesh 对应一个 DrawKey
    pub fn submit(
        &mut self,
        entity: EntityId,
        mesh: AssetHandle<StaticMesh>,
        materials: AssetHandle<MaterialRegistry>,
        submesh_count: u32,
        transform: &glam::Mat4,
    ) {
        let record = TransformRecord::from_mat4(transform);
        for submesh_index in 0..submesh_count {
            let instances = self
                .entries
                .entry(DrawKey {
                    mesh,
                    materials,
                    submesh_index,
                })
                .or_default();
            instances.transforms.push(record);
            instances.entities.push(entity);
        }
    }

    pub fn submit_overlay(&mut self, overlay: OverlayDraw) {
        self.overlays.push(overlay);
    }

    /// 按插入顺序展开所有实例，记录每个 DrawKey 的起始偏移
    pub fn pack(&self) -> PackedDraws {
        let _span = vela_crate_tools::profile_span!("DrawList::pack");

        let mut packed = PackedDraws {
            batches: Vec::with_capacity(self.entries.len()),
            records: Vec::with_capacity(self.instance_count()),
        };
        for (key, instances) in &self.entries {
            packed.batches.push(DrawBatch {
                key: *key,
                byte_offset: (packed.records.len() * TransformRecord::SIZE) as u64,
                instance_count: instances.count(),
            });
            packed.records.extend_from_slice(&instances.transforms);
        }
        packed
    }

    /// 帧结束时清空，下一帧重新提交
    pub fn clear(&mut self) {
        self.entries.clear();
        self.overlays.clear();
    }

    #[inline]
    pub fn get(&self, key: &DrawKey) -> Option<&InstanceList> {
        self.entries.get(key)
    }

    #[inline]
    pub fn overlays(&self) -> &[OverlayDraw] {
        &self.overlays
    }

    #[inline]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn instance_count(&self) -> usize {
        self.entries.values().map(|instances| instances.transforms.len()).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.overlays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use vela_gfx::{GfxBackend, headless::HeadlessBackend};
    use vela_scene::{asset_registry::AssetRegistry, shapes::CubeShape};

    use super::*;

    struct Handles {
        meshes: Vec<AssetHandle<StaticMesh>>,
        materials: AssetHandle<MaterialRegistry>,
    }

    fn handles(mesh_count: usize) -> Handles {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let mut registry = AssetRegistry::new();
        let materials = registry.insert(MaterialRegistry::default());
        let meshes = (0..mesh_count)
            .map(|_| registry.insert(CubeShape::create_mesh(backend.clone()).unwrap()))
            .collect();
        Handles { meshes, materials }
    }

    #[test]
    fn test_pack_offsets_follow_insertion_order() {
        let h = handles(3);
        let mut list = DrawList::default();
        let counts = [3usize, 1, 2];
        // 交错提交，key 的顺序仍然是首次出现的顺序
        for round in 0..3 {
            for (mesh_idx, count) in counts.iter().enumerate() {
                if round < *count {
                    let transform = glam::Mat4::from_translation(glam::vec3(mesh_idx as f32, round as f32, 0.0));
                    list.submit(EntityId(round as u64), h.meshes[mesh_idx], h.materials, 1, &transform);
                }
            }
        }

        let packed = list.pack();
        assert_eq!(packed.batches.len(), 3);
        let mut running = 0;
        for (i, batch) in packed.batches.iter().enumerate() {
            assert_eq!(batch.key.mesh, h.meshes[i]);
            assert_eq!(batch.byte_offset, (TransformRecord::SIZE * running) as u64);
            assert_eq!(batch.instance_count as usize, counts[i]);
            running += counts[i];
        }
        assert_eq!(packed.byte_size(), TransformRecord::SIZE * 6);
    }

    #[test]
    fn test_submesh_keys_and_clear() {
        let h = handles(1);
        let mut list = DrawList::default();
        list.submit(EntityId(7), h.meshes[0], h.materials, 2, &glam::Mat4::IDENTITY);
        assert_eq!(list.key_count(), 2);
        assert_eq!(list.instance_count(), 2);

        let key = DrawKey {
            mesh: h.meshes[0],
            materials: h.materials,
            submesh_index: 1,
        };
        assert_eq!(list.get(&key).map(|instances| instances.entities().to_vec()), Some(vec![EntityId(7)]));

        list.clear();
        assert!(list.is_empty());
        assert!(list.pack().batches.is_empty());
    }

    #[test]
    fn test_transform_record_is_row_major() {
        let transform = glam::Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0));
        let record = TransformRecord::from_mat4(&transform);
        assert_eq!(TransformRecord::SIZE, 64);
        assert_eq!(record.rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(record.rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(record.rows[2], [0.0, 0.0, 1.0, 3.0]);
    }
}
