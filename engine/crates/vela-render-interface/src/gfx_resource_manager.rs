use std::rc::Rc;

use slotmap::{SecondaryMap, SlotMap};
use vela_gfx::{
    GfxBackend, GfxError, GfxResult,
    resources::{
        buffer::{BufferDesc, GfxBuffer},
        image::{GfxImage, ImageDesc},
        image_view::{GfxImageView, ImageViewDesc},
    },
};

use crate::{
    frame_counter::FrameCounter,
    handles::{GfxBufferHandle, GfxImageHandle, GfxImageViewHandle},
};

/// 延迟执行的销毁回调，只会在 device idle 之后执行
pub type TerminationFn = Box<dyn FnOnce()>;

/// 资源管理器
///
/// 使用 SlotMap 存储 Buffer、Image 和 ImageView，对外提供带代际检查的 Handle。
/// 销毁是延迟的：handle 先进入待销毁队列，等提交销毁时的那一帧在 GPU 上完成之后再真正释放。
pub struct GfxResourceManager {
    backend: Rc<dyn GfxBackend>,

    buffer_pool: SlotMap<GfxBufferHandle, GfxBuffer>,
    image_pool: SlotMap<GfxImageHandle, GfxImage>,
    image_view_pool: SlotMap<GfxImageViewHandle, GfxImageView>,

    /// ImageHandle -> 所有关联的 ImageViewHandle
    image_to_views: SecondaryMap<GfxImageHandle, Vec<GfxImageViewHandle>>,

    // 待销毁队列，(handle, 提交销毁时的 frame id)
    pending_destroy_buffers: Vec<(GfxBufferHandle, u64)>,
    pending_destroy_images: Vec<(GfxImageHandle, u64)>,

    termination_queue: Vec<TerminationFn>,
}
// new & init
impl GfxResourceManager {
    pub fn new(backend: Rc<dyn GfxBackend>) -> Self {
        Self {
            backend,
            buffer_pool: SlotMap::with_key(),
            image_pool: SlotMap::with_key(),
            image_view_pool: SlotMap::with_key(),
            image_to_views: SecondaryMap::new(),
            pending_destroy_buffers: Vec::new(),
            pending_destroy_images: Vec::new(),
            termination_queue: Vec::new(),
        }
    }
}
// destroy
impl GfxResourceManager {
    /// 调用前需要确保 device 已经 idle
    pub fn destroy_all(&mut self) {
        let _span = vela_crate_tools::profile_span!("ResourceManager::destroy_all");

        // 先执行外部提交的销毁回调，它们可能仍然引用着 arena 中的资源
        for terminate in self.termination_queue.drain(..).rev() {
            terminate();
        }

        // view 需要先于 image 释放
        self.image_view_pool.clear();
        self.image_to_views.clear();
        self.image_pool.clear();
        self.buffer_pool.clear();

        self.pending_destroy_buffers.clear();
        self.pending_destroy_images.clear();
    }
}
impl Drop for GfxResourceManager {
    fn drop(&mut self) {
        debug_assert!(self.termination_queue.is_empty(), "termination queue is not drained");
        self.destroy_all();
    }
}
// Subsystem API
impl GfxResourceManager {
    /// 清理已过期的资源
    ///
    /// 只有在 `current_frame_id` 对应 slot 的 fence 已经 signaled 之后调用：
    /// 此时提交销毁的帧满足 `frame_id + FIF <= current_frame_id`，GPU 一定已经用完。
    pub fn cleanup(&mut self, current_frame_id: u64) {
        let _span = vela_crate_tools::profile_span!("ResourceManager::cleanup");

        const FIF: u64 = FrameCounter::fif_count() as u64;
        let expired = |frame_id: u64| frame_id + FIF <= current_frame_id;

        let mut buffers_to_destroy = Vec::new();
        self.pending_destroy_buffers.retain(|(handle, frame_id)| {
            if expired(*frame_id) {
                buffers_to_destroy.push(*handle);
                false
            } else {
                true
            }
        });
        for handle in buffers_to_destroy {
            self.buffer_pool.remove(handle);
        }

        let mut images_to_destroy = Vec::new();
        self.pending_destroy_images.retain(|(handle, frame_id)| {
            if expired(*frame_id) {
                images_to_destroy.push(*handle);
                false
            } else {
                true
            }
        });
        for handle in images_to_destroy {
            self.remove_image_now(handle);
        }
    }

    /// 提交一个在 shutdown 时（device idle 之后）执行的销毁回调，按提交的逆序执行
    pub fn submit_termination(&mut self, terminate: impl FnOnce() + 'static) {
        self.termination_queue.push(Box::new(terminate));
    }

    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy_buffers.len() + self.pending_destroy_images.len()
    }

    #[inline]
    pub fn backend(&self) -> &Rc<dyn GfxBackend> {
        &self.backend
    }

    fn remove_image_now(&mut self, handle: GfxImageHandle) {
        if let Some(views) = self.image_to_views.remove(handle) {
            for view in views {
                self.image_view_pool.remove(view);
            }
        }
        self.image_pool.remove(handle);
    }
}
// Buffer API
impl GfxResourceManager {
    pub fn create_buffer(&mut self, desc: BufferDesc, debug_name: &str) -> GfxResult<GfxBufferHandle> {
        let buffer = GfxBuffer::new(self.backend.clone(), desc, debug_name)?;
        Ok(self.buffer_pool.insert(buffer))
    }

    pub fn get_buffer(&self, handle: GfxBufferHandle) -> GfxResult<&GfxBuffer> {
        self.buffer_pool.get(handle).ok_or_else(|| GfxError::InvalidHandle(format!("{handle:?}")))
    }

    /// 在 `current_frame_id` 对应的帧完成后销毁
    pub fn destroy_buffer(&mut self, handle: GfxBufferHandle, current_frame_id: u64) {
        self.pending_destroy_buffers.push((handle, current_frame_id));
    }
}
// Image API
impl GfxResourceManager {
    pub fn create_image(&mut self, desc: ImageDesc, debug_name: &str) -> GfxResult<GfxImageHandle> {
        let image = GfxImage::new(self.backend.clone(), desc, debug_name)?;
        Ok(self.register_image(image))
    }

    pub fn create_image_with_data(
        &mut self,
        desc: ImageDesc,
        data: &[u8],
        debug_name: &str,
    ) -> GfxResult<GfxImageHandle> {
        let image = GfxImage::new_with_data(self.backend.clone(), desc, data, debug_name)?;
        Ok(self.register_image(image))
    }

    pub fn register_image(&mut self, image: GfxImage) -> GfxImageHandle {
        let handle = self.image_pool.insert(image);
        self.image_to_views.insert(handle, Vec::new());
        handle
    }

    pub fn get_image(&self, handle: GfxImageHandle) -> GfxResult<&GfxImage> {
        self.image_pool.get(handle).ok_or_else(|| GfxError::InvalidHandle(format!("{handle:?}")))
    }

    /// 在 `current_frame_id` 对应的帧完成后销毁，同时销毁基于它创建的所有 view
    pub fn destroy_image(&mut self, handle: GfxImageHandle, current_frame_id: u64) {
        self.pending_destroy_images.push((handle, current_frame_id));
    }
}
// ImageView API
impl GfxResourceManager {
    pub fn create_image_view(
        &mut self,
        image_handle: GfxImageHandle,
        make_desc: impl FnOnce(&GfxImage) -> ImageViewDesc,
        debug_name: &str,
    ) -> GfxResult<GfxImageViewHandle> {
        let image = self.get_image(image_handle)?;
        let view = GfxImageView::new(self.backend.clone(), make_desc(image), debug_name)?;
        let view_handle = self.image_view_pool.insert(view);
        if let Some(views) = self.image_to_views.get_mut(image_handle) {
            views.push(view_handle);
        }
        Ok(view_handle)
    }

    pub fn get_image_view(&self, handle: GfxImageViewHandle) -> GfxResult<&GfxImageView> {
        self.image_view_pool.get(handle).ok_or_else(|| GfxError::InvalidHandle(format!("{handle:?}")))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use ash::vk;
    use vela_gfx::headless::HeadlessBackend;

    use super::*;

    #[test]
    fn test_retired_resources_wait_for_frames_in_flight() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend.clone());

        let image = manager
            .create_image(
                ImageDesc::new_2d(
                    vk::Extent2D { width: 4, height: 4 },
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::SAMPLED,
                ),
                "retire-test",
            )
            .unwrap();
        let view = manager.create_image_view(image, ImageViewDesc::whole, "retire-test").unwrap();
        assert_eq!(backend.live_object_count(), 2);

        manager.destroy_image(image, 10);
        manager.cleanup(11);
        manager.cleanup(12);
        assert!(manager.get_image(image).is_ok());
        assert_eq!(manager.pending_destroy_count(), 1);

        manager.cleanup(13);
        assert!(manager.get_image(image).is_err());
        assert!(manager.get_image_view(view).is_err());
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend);
        let buffer = manager
            .create_buffer(BufferDesc::host_visible(64, vk::BufferUsageFlags::STORAGE_BUFFER), "stale")
            .unwrap();
        manager.destroy_buffer(buffer, 0);
        manager.cleanup(3);

        let _new_buffer = manager
            .create_buffer(BufferDesc::host_visible(64, vk::BufferUsageFlags::STORAGE_BUFFER), "fresh")
            .unwrap();
        assert!(matches!(manager.get_buffer(buffer), Err(GfxError::InvalidHandle(_))));
    }

    #[test]
    fn test_termination_runs_in_reverse_order() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend);
        let order = Rc::new(Cell::new(0_u32));

        for expected in [2, 1] {
            let order = order.clone();
            manager.submit_termination(move || {
                order.set(order.get() + 1);
                assert_eq!(order.get(), expected);
            });
        }
        manager.destroy_all();
        assert_eq!(order.get(), 2);
    }
}
