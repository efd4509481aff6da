//! 逐帧的 instance transform buffer

use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    GfxBackend, GfxError, GfxResult,
    resources::buffer::{BufferDesc, GfxBuffer},
};
use vela_render_interface::{frame_counter::FrameLabel, frame_multiplexer::PerFrame};

use crate::draw_list::{PackedDraws, TransformRecord};

/// 每个 frame slot 一个容量固定的 vertex buffer，内容每帧覆盖
pub struct TransformBuffer {
    buffers: PerFrame<GfxBuffer>,
    capacity: usize,
}
impl TransformBuffer {
    pub fn new(backend: &Rc<dyn GfxBackend>, capacity: usize, name: &str) -> GfxResult<Self> {
        let buffers = PerFrame::try_new(|label| {
            GfxBuffer::new(
                backend.clone(),
                BufferDesc::host_visible(
                    (capacity.max(1) * TransformRecord::SIZE) as vk::DeviceSize,
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                ),
                &format!("{name}-transforms-{label}"),
            )
        })?;
        Ok(Self { buffers, capacity })
    }

    /// 写入本帧的 transform，超过容量时返回 `BudgetExhausted`
    pub fn upload(&self, frame_label: FrameLabel, packed: &PackedDraws) -> GfxResult<vk::Buffer> {
        let _span = vela_crate_tools::profile_span!("TransformBuffer::upload");
        if packed.records.len() > self.capacity {
            return Err(GfxError::BudgetExhausted {
                budget: "transform-buffer",
                requested: packed.records.len(),
                capacity: self.capacity,
            });
        }

        let buffer = self.buffers.get(frame_label);
        if !packed.records.is_empty() {
            buffer.write_pod(0, &packed.records)?;
        }
        Ok(buffer.vk_buffer())
    }

    #[inline]
    pub fn vk_buffer(&self, frame_label: FrameLabel) -> vk::Buffer {
        self.buffers.get(frame_label).vk_buffer()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::HeadlessBackend;

    use super::*;

    fn packed(count: usize) -> PackedDraws {
        PackedDraws {
            batches: Vec::new(),
            records: (0..count)
                .map(|i| TransformRecord::from_mat4(&glam::Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0))))
                .collect(),
        }
    }

    #[test]
    fn test_upload_writes_current_slot_only() {
        let headless = Rc::new(HeadlessBackend::new());
        let backend: Rc<dyn GfxBackend> = headless.clone();
        let transforms = TransformBuffer::new(&backend, 4, "scene").unwrap();

        let buffer = transforms.upload(FrameLabel::B, &packed(2)).unwrap();
        assert_eq!(buffer, transforms.vk_buffer(FrameLabel::B));
        assert_ne!(buffer, transforms.vk_buffer(FrameLabel::A));

        let contents = headless.buffer_contents(buffer).unwrap();
        let records: &[TransformRecord] = bytemuck::cast_slice(&contents[..2 * TransformRecord::SIZE]);
        assert_eq!(records[1].rows[0][3], 1.0);
        let untouched = headless.buffer_contents(transforms.vk_buffer(FrameLabel::A)).unwrap();
        assert!(untouched.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_capacity_exhausted() {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let transforms = TransformBuffer::new(&backend, 4, "scene").unwrap();
        let err = transforms.upload(FrameLabel::A, &packed(5)).unwrap_err();
        assert!(matches!(
            err,
            GfxError::BudgetExhausted {
                budget: "transform-buffer",
                requested: 5,
                capacity: 4
            }
        ));
        assert!(err.is_fatal());
    }
}
