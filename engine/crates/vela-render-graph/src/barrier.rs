//! 根据资源状态的转换生成 barrier

use ash::vk;
use vela_gfx::commands::barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier};

use crate::resource_state::{RgBufferState, RgImageState};

/// 图像 barrier 描述
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrierDesc {
    pub src_state: RgImageState,
    pub dst_state: RgImageState,
    /// 图像 aspect（COLOR / DEPTH）
    pub aspect: vk::ImageAspectFlags,
    pub layer_count: u32,
    pub mip_count: u32,
}

impl ImageBarrierDesc {
    pub fn new(src_state: RgImageState, dst_state: RgImageState) -> Self {
        Self {
            src_state,
            dst_state,
            aspect: vk::ImageAspectFlags::COLOR,
            layer_count: 1,
            mip_count: 1,
        }
    }

    /// builder
    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// builder，覆盖所有 layer 和 mip
    pub fn with_range(mut self, layer_count: u32, mip_count: u32) -> Self {
        self.layer_count = layer_count;
        self.mip_count = mip_count;
        self
    }

    /// 只读到只读，并且 layout 不变时可以跳过
    pub fn needs_barrier(&self) -> bool {
        if self.src_state.layout != self.dst_state.layout {
            return true;
        }
        self.src_state.is_write() || self.dst_state.is_write()
    }

    pub fn to_gfx_barrier(&self, image: vk::Image) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(image)
            .layout_transfer(self.src_state.layout, self.dst_state.layout)
            .src_mask(self.src_state.stage, self.src_state.src_access())
            .dst_mask(self.dst_state.stage, self.dst_state.access)
            .image_aspect_flag(self.aspect)
            .layers(0, self.layer_count)
            .mips(0, self.mip_count)
    }
}

/// 缓冲区 barrier 描述，总是覆盖整个 buffer
#[derive(Clone, Copy, Debug)]
pub struct BufferBarrierDesc {
    pub src_state: RgBufferState,
    pub dst_state: RgBufferState,
}

impl BufferBarrierDesc {
    pub fn new(src_state: RgBufferState, dst_state: RgBufferState) -> Self {
        Self { src_state, dst_state }
    }

    pub fn needs_barrier(&self) -> bool {
        self.src_state.is_write() || self.dst_state.is_write()
    }

    pub fn to_gfx_barrier(&self, buffer: vk::Buffer) -> GfxBufferBarrier {
        GfxBufferBarrier::new().buffer(buffer, 0, vk::WHOLE_SIZE).mask(GfxBarrierMask {
            src_stage: self.src_state.stage,
            dst_stage: self.dst_state.stage,
            src_access: self.src_state.access,
            dst_access: self.dst_state.access,
        })
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn test_read_to_read_skipped() {
        let desc = ImageBarrierDesc::new(RgImageState::SHADER_READ_COMPUTE, RgImageState::SHADER_READ_FRAGMENT);
        assert!(!desc.needs_barrier());

        let desc = ImageBarrierDesc::new(RgImageState::SHADER_READ_FRAGMENT, RgImageState::DEPTH_ATTACHMENT_WRITE);
        assert!(desc.needs_barrier());
    }

    #[test]
    fn test_image_barrier_range() {
        let desc = ImageBarrierDesc::new(RgImageState::UNDEFINED, RgImageState::DEPTH_ATTACHMENT_WRITE)
            .with_aspect(vk::ImageAspectFlags::DEPTH)
            .with_range(4, 1);
        let barrier = desc.to_gfx_barrier(vk::Image::null());
        let inner = barrier.inner();
        assert_eq!(inner.subresource_range.layer_count, 4);
        assert_eq!(inner.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(inner.new_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::NONE);
    }
}
