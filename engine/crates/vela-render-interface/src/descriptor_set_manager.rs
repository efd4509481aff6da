//! Descriptor set 的分配、缓存与写入
//!
//! - 每个 frame slot 拥有一个 descriptor pool，只能整体 reset，不支持单独 free
//! - 同一个 pool generation 内，一个 [`DescriptorSetKey`] 只对应一个 descriptor set
//! - 写入按 (set, binding) 去重，只有资源发生变化时才会真正调用 `vkUpdateDescriptorSets`

use std::{collections::HashMap, rc::Rc};

use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;
use vela_gfx::{
    GfxBackend, GfxError, GfxResult,
    descriptors::{
        layout::GfxDescriptorSetLayout,
        pool::{DescriptorPoolDesc, GfxDescriptorPool},
        write::{DescriptorResource, DescriptorWrite},
    },
};

use crate::{
    frame_counter::{FrameCounter, FrameLabel},
    frame_multiplexer::{FrameSlotReset, PerFrame},
};

/// 材质的 identity，由 material registry 分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetKey {
    pub set_index: u32,
    pub frame_label: FrameLabel,
    pub material: Option<MaterialId>,
}
impl DescriptorSetKey {
    #[inline]
    pub fn global(set_index: u32, frame_label: FrameLabel) -> Self {
        Self {
            set_index,
            frame_label,
            material: None,
        }
    }

    #[inline]
    pub fn material(set_index: u32, frame_label: FrameLabel, material: MaterialId) -> Self {
        Self {
            set_index,
            frame_label,
            material: Some(material),
        }
    }
}

/// 带有 pool generation 的 descriptor set，pool reset 之后旧的 handle 失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetHandle {
    set: vk::DescriptorSet,
    frame_label: FrameLabel,
    generation: u64,
}
impl DescriptorSetHandle {
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        self.frame_label
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// 每个 frame pool 的固定预算，超出即为致命错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBudget {
    pub max_sets: u32,
    pub descriptors_per_type: u32,
}
impl Default for DescriptorBudget {
    fn default() -> Self {
        Self {
            max_sets: 100_000,
            descriptors_per_type: 1_000,
        }
    }
}

struct FrameDescriptorPool {
    pool: GfxDescriptorPool,

    allocated_sets: u32,
    allocated_descriptors: HashMap<vk::DescriptorType, u32>,

    /// (set index, material) -> set
    live_sets: HashMap<(u32, Option<MaterialId>), vk::DescriptorSet>,

    /// 等待 flush 的写入，保持写入顺序
    staged_writes: IndexMap<(vk::DescriptorSet, u32), DescriptorResource>,
    /// 已经写入 device 的资源
    flushed_writes: HashMap<(vk::DescriptorSet, u32), DescriptorResource>,
}
impl FrameSlotReset for FrameDescriptorPool {
    fn reset_slot(&mut self) -> GfxResult<()> {
        self.pool.reset()?;
        self.allocated_sets = 0;
        self.allocated_descriptors.clear();
        self.live_sets.clear();
        self.staged_writes.clear();
        self.flushed_writes.clear();
        Ok(())
    }
}
impl FrameDescriptorPool {
    fn allocate(&mut self, layout: &GfxDescriptorSetLayout, budget: &DescriptorBudget) -> GfxResult<vk::DescriptorSet> {
        if self.allocated_sets + 1 > budget.max_sets {
            return Err(GfxError::BudgetExhausted {
                budget: "descriptor-sets",
                requested: self.allocated_sets as usize + 1,
                capacity: budget.max_sets as usize,
            });
        }
        for binding in layout.bindings() {
            let used = self.allocated_descriptors.get(&binding.descriptor_type).copied().unwrap_or(0);
            if used + binding.count > budget.descriptors_per_type {
                return Err(GfxError::BudgetExhausted {
                    budget: "descriptors-per-type",
                    requested: (used + binding.count) as usize,
                    capacity: budget.descriptors_per_type as usize,
                });
            }
        }

        let set = self.pool.allocate(layout.handle()).map_err(|e| match e {
            GfxError::Vk {
                result: vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
                ..
            } => GfxError::BudgetExhausted {
                budget: "descriptor-pool",
                requested: self.allocated_sets as usize + 1,
                capacity: budget.max_sets as usize,
            },
            e => e,
        })?;

        self.allocated_sets += 1;
        for binding in layout.bindings() {
            *self.allocated_descriptors.entry(binding.descriptor_type).or_default() += binding.count;
        }
        Ok(set)
    }
}

pub struct DescriptorSetManager {
    backend: Rc<dyn GfxBackend>,
    pools: PerFrame<FrameDescriptorPool>,
    budget: DescriptorBudget,
}
// new & init
impl DescriptorSetManager {
    pub fn new(backend: Rc<dyn GfxBackend>, budget: DescriptorBudget) -> GfxResult<Self> {
        let pools = PerFrame::try_new(|frame_label| {
            let desc = DescriptorPoolDesc::uniform_budget(budget.max_sets, budget.descriptors_per_type);
            Ok(FrameDescriptorPool {
                pool: GfxDescriptorPool::new(backend.clone(), desc, &format!("frame-{frame_label}"))?,
                allocated_sets: 0,
                allocated_descriptors: HashMap::new(),
                live_sets: HashMap::new(),
                staged_writes: IndexMap::new(),
                flushed_writes: HashMap::new(),
            })
        })?;

        Ok(Self { backend, pools, budget })
    }
}
// allocation
impl DescriptorSetManager {
    /// 返回 key 对应的 descriptor set，不存在时从该帧的 pool 中分配
    ///
    /// 材质 set 会一次性为所有 frame slot 分配（已经存在的 slot 保持不变），
    /// 全局 set 只在请求的 frame 上延迟分配。
    pub fn allocate_or_find(
        &mut self,
        key: DescriptorSetKey,
        layout: &GfxDescriptorSetLayout,
    ) -> GfxResult<DescriptorSetHandle> {
        if key.material.is_some() {
            for frame_label in FrameCounter::frame_labels() {
                self.ensure_set(frame_label, key.set_index, key.material, layout)?;
            }
        } else {
            self.ensure_set(key.frame_label, key.set_index, None, layout)?;
        }

        self.find(key).ok_or_else(|| GfxError::InvalidHandle(format!("{key:?}")))
    }

    /// 只查找，不分配
    pub fn find(&self, key: DescriptorSetKey) -> Option<DescriptorSetHandle> {
        let slot = self.pools.get(key.frame_label);
        slot.live_sets.get(&(key.set_index, key.material)).map(|set| DescriptorSetHandle {
            set: *set,
            frame_label: key.frame_label,
            generation: self.pools.generation(key.frame_label),
        })
    }

    /// 只在当前 pool generation 内有效的 set，不做缓存，例如每次 dispatch 都不同的 set
    pub fn allocate_transient(
        &mut self,
        layout: &GfxDescriptorSetLayout,
        frame_label: FrameLabel,
    ) -> GfxResult<DescriptorSetHandle> {
        let set = self.pools.get_mut(frame_label).allocate(layout, &self.budget)?;
        Ok(DescriptorSetHandle {
            set,
            frame_label,
            generation: self.pools.generation(frame_label),
        })
    }

    fn ensure_set(
        &mut self,
        frame_label: FrameLabel,
        set_index: u32,
        material: Option<MaterialId>,
        layout: &GfxDescriptorSetLayout,
    ) -> GfxResult<()> {
        let slot = self.pools.get_mut(frame_label);
        if slot.live_sets.contains_key(&(set_index, material)) {
            return Ok(());
        }
        let set = slot.allocate(layout, &self.budget)?;
        slot.live_sets.insert((set_index, material), set);
        Ok(())
    }
}
// write
impl DescriptorSetManager {
    /// 暂存一次写入；如果和已经写入 device 的资源相同，则不会再次写入
    pub fn write_descriptor(
        &mut self,
        handle: DescriptorSetHandle,
        binding: u32,
        resource: DescriptorResource,
    ) -> GfxResult<()> {
        let set = self.resolve(handle)?;
        let slot = self.pools.get_mut(handle.frame_label);
        let key = (set, binding);
        if slot.flushed_writes.get(&key) == Some(&resource) {
            slot.staged_writes.shift_remove(&key);
        } else {
            slot.staged_writes.insert(key, resource);
        }
        Ok(())
    }

    /// 将该帧暂存的写入一次性提交给 device，返回实际写入的数量
    pub fn flush(&mut self, frame_label: FrameLabel) -> usize {
        let _span = vela_crate_tools::profile_span!("DescriptorSetManager::flush");
        let slot = self.pools.get_mut(frame_label);
        if slot.staged_writes.is_empty() {
            return 0;
        }

        let writes = slot
            .staged_writes
            .drain(..)
            .map(|((set, binding), resource)| DescriptorWrite { set, binding, resource })
            .collect_vec();
        self.backend.update_descriptor_sets(&writes);
        slot.flushed_writes.extend(writes.iter().map(|write| ((write.set, write.binding), write.resource)));
        writes.len()
    }

    /// 只能在该帧的 fence signaled 之后调用；之前分配的所有 handle 全部失效
    pub fn reset_frame(&mut self, frame_label: FrameLabel) -> GfxResult<()> {
        self.pools.reset(frame_label)
    }
}
// getters
impl DescriptorSetManager {
    /// 取得裸 descriptor set，handle 属于过期的 pool generation 时返回错误
    pub fn resolve(&self, handle: DescriptorSetHandle) -> GfxResult<vk::DescriptorSet> {
        let generation = self.pools.generation(handle.frame_label);
        if handle.generation != generation {
            return Err(GfxError::InvalidHandle(format!(
                "descriptor set {:?} from generation {} (current {})",
                handle.set, handle.generation, generation
            )));
        }
        Ok(handle.set)
    }

    #[inline]
    pub fn live_set_count(&self, frame_label: FrameLabel) -> usize {
        self.pools.get(frame_label).live_sets.len()
    }

    #[inline]
    pub fn allocated_set_count(&self, frame_label: FrameLabel) -> u32 {
        self.pools.get(frame_label).allocated_sets
    }

    #[inline]
    pub fn budget(&self) -> &DescriptorBudget {
        &self.budget
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::{
        descriptors::layout::DescriptorBindingDesc,
        headless::{HeadlessBackend, JournalEvent},
    };

    use super::*;

    fn uniform_layout(backend: Rc<dyn GfxBackend>) -> GfxDescriptorSetLayout {
        GfxDescriptorSetLayout::new(
            backend,
            &[DescriptorBindingDesc::new(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)],
            "test-layout",
        )
        .unwrap()
    }

    fn update_count(backend: &HeadlessBackend) -> usize {
        backend
            .journal()
            .iter()
            .map(|event| match event {
                JournalEvent::UpdateDescriptorSets { count } => *count,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_allocate_or_find_is_idempotent_within_generation() {
        let backend = Rc::new(HeadlessBackend::new());
        let layout = uniform_layout(backend.clone());
        let mut manager = DescriptorSetManager::new(backend, DescriptorBudget::default()).unwrap();

        let key = DescriptorSetKey::global(0, FrameLabel::A);
        let first = manager.allocate_or_find(key, &layout).unwrap();
        let second = manager.allocate_or_find(key, &layout).unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.allocated_set_count(FrameLabel::A), 1);
        // 全局 set 延迟分配
        assert!(manager.find(DescriptorSetKey::global(0, FrameLabel::B)).is_none());

        manager.reset_frame(FrameLabel::A).unwrap();
        let third = manager.allocate_or_find(key, &layout).unwrap();
        assert_ne!(first, third);
        assert!(manager.resolve(first).is_err());
        assert!(manager.resolve(third).is_ok());
    }

    #[test]
    fn test_material_sets_cover_every_frame() {
        let backend = Rc::new(HeadlessBackend::new());
        let layout = uniform_layout(backend.clone());
        let mut manager = DescriptorSetManager::new(backend, DescriptorBudget::default()).unwrap();

        let material = MaterialId(7);
        let handle_b = manager.allocate_or_find(DescriptorSetKey::material(1, FrameLabel::B, material), &layout).unwrap();
        assert_eq!(handle_b.frame_label(), FrameLabel::B);
        for frame_label in FrameCounter::frame_labels() {
            assert_eq!(manager.live_set_count(frame_label), 1);
        }

        // 只有被 reset 的 slot 会重新分配
        let handle_a = manager.find(DescriptorSetKey::material(1, FrameLabel::A, material)).unwrap();
        manager.reset_frame(FrameLabel::C).unwrap();
        manager.allocate_or_find(DescriptorSetKey::material(1, FrameLabel::C, material), &layout).unwrap();
        assert_eq!(manager.find(DescriptorSetKey::material(1, FrameLabel::A, material)), Some(handle_a));
        assert_eq!(manager.allocated_set_count(FrameLabel::A), 1);
        assert_eq!(manager.allocated_set_count(FrameLabel::C), 1);
    }

    #[test]
    fn test_writes_are_deduplicated() {
        let backend = Rc::new(HeadlessBackend::new());
        let layout = uniform_layout(backend.clone());
        let mut manager = DescriptorSetManager::new(backend.clone(), DescriptorBudget::default()).unwrap();
        let handle = manager.allocate_or_find(DescriptorSetKey::global(0, FrameLabel::A), &layout).unwrap();

        let buffer_a = DescriptorResource::uniform(vk::Handle::from_raw(0x100));
        let buffer_b = DescriptorResource::uniform(vk::Handle::from_raw(0x200));

        manager.write_descriptor(handle, 0, buffer_a).unwrap();
        manager.write_descriptor(handle, 0, buffer_b).unwrap();
        manager.write_descriptor(handle, 0, buffer_a).unwrap();
        assert_eq!(manager.flush(FrameLabel::A), 1);

        // 相同资源不会再次写入
        manager.write_descriptor(handle, 0, buffer_a).unwrap();
        assert_eq!(manager.flush(FrameLabel::A), 0);
        assert_eq!(update_count(&backend), 1);

        manager.write_descriptor(handle, 0, buffer_b).unwrap();
        assert_eq!(manager.flush(FrameLabel::A), 1);
        assert_eq!(update_count(&backend), 2);
    }

    #[test]
    fn test_stale_handle_write_is_rejected() {
        let backend = Rc::new(HeadlessBackend::new());
        let layout = uniform_layout(backend.clone());
        let mut manager = DescriptorSetManager::new(backend, DescriptorBudget::default()).unwrap();
        let handle = manager.allocate_or_find(DescriptorSetKey::global(0, FrameLabel::A), &layout).unwrap();
        manager.reset_frame(FrameLabel::A).unwrap();

        let result = manager.write_descriptor(handle, 0, DescriptorResource::uniform(vk::Buffer::null()));
        assert!(matches!(result, Err(GfxError::InvalidHandle(_))));
    }

    #[test]
    fn test_budget_exhaustion_is_fatal() {
        let backend = Rc::new(HeadlessBackend::new());
        let layout = uniform_layout(backend.clone());
        let budget = DescriptorBudget {
            max_sets: 2,
            descriptors_per_type: 1_000,
        };
        let mut manager = DescriptorSetManager::new(backend, budget).unwrap();

        manager.allocate_or_find(DescriptorSetKey::global(0, FrameLabel::A), &layout).unwrap();
        manager.allocate_transient(&layout, FrameLabel::A).unwrap();
        let err = manager.allocate_or_find(DescriptorSetKey::global(1, FrameLabel::A), &layout).unwrap_err();
        assert!(matches!(
            err,
            GfxError::BudgetExhausted {
                budget: "descriptor-sets",
                requested: 3,
                capacity: 2
            }
        ));
        assert!(err.is_fatal());

        // 其他帧不受影响
        assert!(manager.allocate_or_find(DescriptorSetKey::global(1, FrameLabel::B), &layout).is_ok());
    }

    #[test]
    fn test_descriptor_type_budget() {
        let backend = Rc::new(HeadlessBackend::new());
        let layout = uniform_layout(backend.clone());
        let budget = DescriptorBudget {
            max_sets: 100,
            descriptors_per_type: 1,
        };
        let mut manager = DescriptorSetManager::new(backend, budget).unwrap();
        manager.allocate_transient(&layout, FrameLabel::A).unwrap();
        let err = manager.allocate_transient(&layout, FrameLabel::A).unwrap_err();
        assert!(matches!(err, GfxError::BudgetExhausted { budget: "descriptors-per-type", .. }));
    }
}
