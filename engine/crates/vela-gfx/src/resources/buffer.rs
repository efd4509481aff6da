use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// 是否需要 CPU 写入，需要的话会在创建时持久映射
    pub host_visible: bool,
}

impl BufferDesc {
    /// 每帧由 CPU 写入的 buffer（uniform、instance transform ...）
    pub fn host_visible(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            host_visible: true,
        }
    }

    /// 只在 GPU 上读写的 buffer
    pub fn device_local(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            host_visible: false,
        }
    }
}

/// move-only 的 buffer，Drop 时销毁
pub struct GfxBuffer {
    backend: Rc<dyn GfxBackend>,
    handle: vk::Buffer,
    desc: BufferDesc,
}
// init & destroy
impl GfxBuffer {
    pub fn new(backend: Rc<dyn GfxBackend>, desc: BufferDesc, debug_name: &str) -> GfxResult<Self> {
        // 不允许 UNIFORM + 过大的 size，部分驱动限制为 64KB
        debug_assert!(!desc.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) || desc.size <= 65536);
        let handle = backend.create_buffer(&desc, debug_name)?;
        Ok(Self { backend, handle, desc })
    }
}
impl Drop for GfxBuffer {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.handle);
    }
}
// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }
}
// tools
impl GfxBuffer {
    /// 写入映射内存，越界是调用方的 bug
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        debug_assert!(self.desc.host_visible, "buffer is not host visible");
        debug_assert!(offset + data.len() as vk::DeviceSize <= self.desc.size);
        self.backend.write_buffer(self.handle, offset, data)
    }

    #[inline]
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> GfxResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }
}
