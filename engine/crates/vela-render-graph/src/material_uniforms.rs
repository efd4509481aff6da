//! 材质 uniform 的逐帧线性分配器
//!
//! 每个 frame slot 一个 host visible 的 uniform buffer，按固定 stride 切分。
//! 一帧内同一个材质只写入一次，多个 SceneRenderer 共享同一份数据，
//! 因此材质 descriptor set 在不同 renderer 之间也可以共享。

use std::{collections::HashMap, rc::Rc};

use ash::vk;
use vela_gfx::{
    GfxBackend, GfxError, GfxResult,
    descriptors::write::DescriptorResource,
    resources::buffer::{BufferDesc, GfxBuffer},
};
use vela_render_interface::{
    descriptor_set_manager::MaterialId,
    frame_counter::FrameLabel,
    frame_multiplexer::{FrameSlotReset, PerFrame},
};
use vela_scene::material::GpuMaterialUniform;

pub struct MaterialArena {
    buffer: GfxBuffer,
    offsets: HashMap<MaterialId, vk::DeviceSize>,
}
impl FrameSlotReset for MaterialArena {
    fn reset_slot(&mut self) -> GfxResult<()> {
        self.offsets.clear();
        Ok(())
    }
}

pub struct MaterialUniforms {
    arenas: PerFrame<MaterialArena>,
}
impl MaterialUniforms {
    pub const CAPACITY: usize = 256;
    /// 满足 minUniformBufferOffsetAlignment 的常见上限
    pub const STRIDE: vk::DeviceSize = 256;

    pub fn new(backend: &Rc<dyn GfxBackend>) -> GfxResult<Self> {
        const _: () = assert!(GpuMaterialUniform::SIZE <= MaterialUniforms::STRIDE);
        let arenas = PerFrame::try_new(|label| {
            Ok(MaterialArena {
                buffer: GfxBuffer::new(
                    backend.clone(),
                    BufferDesc::host_visible(
                        Self::CAPACITY as vk::DeviceSize * Self::STRIDE,
                        vk::BufferUsageFlags::UNIFORM_BUFFER,
                    ),
                    &format!("material-uniforms-{label}"),
                )?,
                offsets: HashMap::new(),
            })
        })?;
        Ok(Self { arenas })
    }

    /// 返回材质在本帧中的 uniform 区间，首次请求时写入数据
    pub fn bind(
        &mut self,
        frame_label: FrameLabel,
        material: MaterialId,
        uniform: &GpuMaterialUniform,
    ) -> GfxResult<DescriptorResource> {
        let arena = self.arenas.get_mut(frame_label);
        let offset = match arena.offsets.get(&material) {
            Some(offset) => *offset,
            None => {
                let slot = arena.offsets.len();
                if slot >= Self::CAPACITY {
                    return Err(GfxError::BudgetExhausted {
                        budget: "material-uniforms",
                        requested: slot + 1,
                        capacity: Self::CAPACITY,
                    });
                }
                let offset = slot as vk::DeviceSize * Self::STRIDE;
                arena.buffer.write_pod(offset, std::slice::from_ref(uniform))?;
                arena.offsets.insert(material, offset);
                offset
            }
        };

        Ok(DescriptorResource::UniformBuffer {
            buffer: arena.buffer.vk_buffer(),
            offset,
            range: GpuMaterialUniform::SIZE,
        })
    }

    /// 只能在该 slot 的 fence signaled 之后调用
    pub fn reset(&mut self, frame_label: FrameLabel) -> GfxResult<()> {
        self.arenas.reset(frame_label)
    }

    pub fn used_slots(&self, frame_label: FrameLabel) -> usize {
        self.arenas.get(frame_label).offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::HeadlessBackend;

    use super::*;

    fn uniform(metallic: f32) -> GpuMaterialUniform {
        GpuMaterialUniform {
            metallic,
            ..Default::default()
        }
    }

    #[test]
    fn test_same_material_written_once_per_frame() {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let mut uniforms = MaterialUniforms::new(&backend).unwrap();

        let a = uniforms.bind(FrameLabel::A, MaterialId(1), &uniform(0.5)).unwrap();
        let b = uniforms.bind(FrameLabel::A, MaterialId(2), &uniform(0.1)).unwrap();
        let a_again = uniforms.bind(FrameLabel::A, MaterialId(1), &uniform(0.9)).unwrap();
        assert_eq!(a, a_again);
        assert!(matches!(b, DescriptorResource::UniformBuffer { offset: 256, .. }));
        assert_eq!(uniforms.used_slots(FrameLabel::A), 2);
        assert_eq!(uniforms.used_slots(FrameLabel::B), 0);

        uniforms.reset(FrameLabel::A).unwrap();
        assert_eq!(uniforms.used_slots(FrameLabel::A), 0);
    }

    #[test]
    fn test_capacity_exhausted() {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let mut uniforms = MaterialUniforms::new(&backend).unwrap();
        for id in 0..MaterialUniforms::CAPACITY as u64 {
            uniforms.bind(FrameLabel::B, MaterialId(id), &uniform(0.0)).unwrap();
        }
        let err = uniforms.bind(FrameLabel::B, MaterialId(9999), &uniform(0.0)).unwrap_err();
        assert!(matches!(err, GfxError::BudgetExhausted { budget: "material-uniforms", .. }));
    }
}
