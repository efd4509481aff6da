//! SceneRenderer 内部 pass 之间共享的 target
//!
//! 每个 target 由产出它的 pass 创建，在 resize 时由该 pass 重建；
//! 旧的资源交给 [`GfxResourceManager`] 延迟销毁，直到引用它的帧都已经完成。
//! target 的当前状态记录在这里，pass 在使用前调用 `transition` 生成 barrier。

use std::collections::HashMap;

use ash::vk;
use vela_gfx::{
    GfxError, GfxResult,
    commands::command_buffer::GfxCommandBuffer,
    resources::{buffer::BufferDesc, image::ImageDesc, image_view::ImageViewDesc},
};
use vela_render_interface::{
    gfx_resource_manager::GfxResourceManager,
    handles::{GfxBufferHandle, GfxImageHandle, GfxImageViewHandle},
};

use crate::{
    barrier::{BufferBarrierDesc, ImageBarrierDesc},
    resource_state::{RgBufferState, RgImageState},
};

/// pass 之间传递的 target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetId {
    ShadowMap,
    Depth,
    LightGrid,
    SceneColor,
    /// bloom 的三张中间纹理，最终结果在 `Bloom(2)`
    Bloom(u8),
    Composite,
}

/// 额外创建的子 view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubViews {
    None,
    /// 每个 array layer 一个 2D view
    PerLayer,
    /// 每个 mip 一个 2D view
    PerMip,
}

pub struct SceneImage {
    pub image: GfxImageHandle,
    pub view: GfxImageViewHandle,
    pub sub_views: Vec<GfxImageViewHandle>,
    pub desc: ImageDesc,

    vk_image: vk::Image,
    vk_view: vk::ImageView,
    vk_sub_views: Vec<vk::ImageView>,
    state: RgImageState,
}
impl SceneImage {
    pub fn create(
        gfx_resource_manager: &mut GfxResourceManager,
        desc: ImageDesc,
        sub_views: SubViews,
        name: &str,
    ) -> GfxResult<Self> {
        let image = gfx_resource_manager.create_image(desc, name)?;
        let view = gfx_resource_manager.create_image_view(image, ImageViewDesc::whole, name)?;

        let sub_views = match sub_views {
            SubViews::None => Vec::new(),
            SubViews::PerLayer => (0..desc.array_layers)
                .map(|layer| {
                    gfx_resource_manager.create_image_view(
                        image,
                        |img| ImageViewDesc::single_layer(img, layer),
                        &format!("{name}-layer-{layer}"),
                    )
                })
                .collect::<GfxResult<Vec<_>>>()?,
            SubViews::PerMip => (0..desc.mip_levels)
                .map(|mip| {
                    gfx_resource_manager.create_image_view(
                        image,
                        |img| ImageViewDesc::single_mip(img, mip),
                        &format!("{name}-mip-{mip}"),
                    )
                })
                .collect::<GfxResult<Vec<_>>>()?,
        };

        let vk_image = gfx_resource_manager.get_image(image)?.handle();
        let vk_view = gfx_resource_manager.get_image_view(view)?.handle();
        let vk_sub_views = sub_views
            .iter()
            .map(|view| gfx_resource_manager.get_image_view(*view).map(|view| view.handle()))
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(Self {
            image,
            view,
            sub_views,
            desc,
            vk_image,
            vk_view,
            vk_sub_views,
            state: RgImageState::UNDEFINED,
        })
    }

    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.vk_image
    }

    #[inline]
    pub fn vk_view(&self) -> vk::ImageView {
        self.vk_view
    }

    #[inline]
    pub fn vk_sub_view(&self, index: usize) -> GfxResult<vk::ImageView> {
        self.vk_sub_views
            .get(index)
            .copied()
            .ok_or_else(|| GfxError::InvalidHandle(format!("sub view {index} of {:?}", self.image)))
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn state(&self) -> RgImageState {
        self.state
    }

    /// 整个 image（所有 layer 和 mip）转换到 `dst`，不需要 barrier 时什么都不做
    pub fn transition(&mut self, cmd: &GfxCommandBuffer, dst: RgImageState) {
        let barrier = ImageBarrierDesc::new(self.state, dst)
            .with_aspect(self.desc.aspect())
            .with_range(self.desc.array_layers, self.desc.mip_levels);
        if barrier.needs_barrier() {
            cmd.image_memory_barrier(&[barrier.to_gfx_barrier(self.vk_image)]);
        }
        self.state = dst;
    }

    /// 同一状态下前一次写入对后续读取可见，用于多次 dispatch 之间
    pub fn write_barrier(&self, cmd: &GfxCommandBuffer) {
        let barrier = ImageBarrierDesc::new(self.state, self.state)
            .with_aspect(self.desc.aspect())
            .with_range(self.desc.array_layers, self.desc.mip_levels);
        cmd.image_memory_barrier(&[barrier.to_gfx_barrier(self.vk_image)]);
    }

    fn retire(self, gfx_resource_manager: &mut GfxResourceManager, frame_id: u64) {
        // view 随 image 一起销毁
        gfx_resource_manager.destroy_image(self.image, frame_id);
    }
}

pub struct SceneBuffer {
    pub buffer: GfxBufferHandle,
    pub size: vk::DeviceSize,

    vk_buffer: vk::Buffer,
    state: RgBufferState,
}
impl SceneBuffer {
    pub fn create(gfx_resource_manager: &mut GfxResourceManager, desc: BufferDesc, name: &str) -> GfxResult<Self> {
        let buffer = gfx_resource_manager.create_buffer(desc, name)?;
        let vk_buffer = gfx_resource_manager.get_buffer(buffer)?.vk_buffer();
        Ok(Self {
            buffer,
            size: desc.size,
            vk_buffer,
            state: RgBufferState::UNDEFINED,
        })
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.vk_buffer
    }

    #[inline]
    pub fn state(&self) -> RgBufferState {
        self.state
    }

    pub fn transition(&mut self, cmd: &GfxCommandBuffer, dst: RgBufferState) {
        let barrier = BufferBarrierDesc::new(self.state, dst);
        if barrier.needs_barrier() {
            cmd.buffer_memory_barrier(&[barrier.to_gfx_barrier(self.vk_buffer)]);
        }
        self.state = dst;
    }
}

/// SceneRenderer 持有的全部 target
#[derive(Default)]
pub struct SceneTargets {
    images: HashMap<TargetId, SceneImage>,
    buffers: HashMap<TargetId, SceneBuffer>,
}
impl SceneTargets {
    /// 插入新的 image，同名的旧 image 在 `frame_id` 完成后销毁
    pub fn insert_image(
        &mut self,
        id: TargetId,
        image: SceneImage,
        gfx_resource_manager: &mut GfxResourceManager,
        frame_id: u64,
    ) {
        if let Some(old) = self.images.insert(id, image) {
            log::debug!("retire scene target {id:?} at frame {frame_id}");
            old.retire(gfx_resource_manager, frame_id);
        }
    }

    pub fn insert_buffer(
        &mut self,
        id: TargetId,
        buffer: SceneBuffer,
        gfx_resource_manager: &mut GfxResourceManager,
        frame_id: u64,
    ) {
        if let Some(old) = self.buffers.insert(id, buffer) {
            log::debug!("retire scene buffer {id:?} at frame {frame_id}");
            gfx_resource_manager.destroy_buffer(old.buffer, frame_id);
        }
    }

    pub fn image(&self, id: TargetId) -> GfxResult<&SceneImage> {
        self.images.get(&id).ok_or_else(|| GfxError::InvalidHandle(format!("scene target {id:?}")))
    }

    pub fn image_mut(&mut self, id: TargetId) -> GfxResult<&mut SceneImage> {
        self.images.get_mut(&id).ok_or_else(|| GfxError::InvalidHandle(format!("scene target {id:?}")))
    }

    pub fn buffer(&self, id: TargetId) -> GfxResult<&SceneBuffer> {
        self.buffers.get(&id).ok_or_else(|| GfxError::InvalidHandle(format!("scene buffer {id:?}")))
    }

    pub fn buffer_mut(&mut self, id: TargetId) -> GfxResult<&mut SceneBuffer> {
        self.buffers.get_mut(&id).ok_or_else(|| GfxError::InvalidHandle(format!("scene buffer {id:?}")))
    }

    #[inline]
    pub fn contains(&self, id: TargetId) -> bool {
        self.images.contains_key(&id) || self.buffers.contains_key(&id)
    }

    /// 状态追踪回到 UNDEFINED，下一次 transition 丢弃原有内容
    ///
    /// 录制过 transition 的 command buffer 没有被提交时使用
    pub fn discard_states(&mut self) {
        for image in self.images.values_mut() {
            image.state = RgImageState::UNDEFINED;
        }
        for buffer in self.buffers.values_mut() {
            buffer.state = RgBufferState::UNDEFINED;
        }
    }

    /// 全部交给 resource manager 延迟销毁
    pub fn retire_all(&mut self, gfx_resource_manager: &mut GfxResourceManager, frame_id: u64) {
        for (_, image) in self.images.drain() {
            image.retire(gfx_resource_manager, frame_id);
        }
        for (_, buffer) in self.buffers.drain() {
            gfx_resource_manager.destroy_buffer(buffer.buffer, frame_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use vela_gfx::headless::HeadlessBackend;

    use super::*;

    fn color_desc(width: u32, height: u32) -> ImageDesc {
        ImageDesc::new_2d(
            vk::Extent2D { width, height },
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
    }

    #[test]
    fn test_replaced_target_is_retired_after_frames_in_flight() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend.clone());
        let mut targets = SceneTargets::default();

        let first = SceneImage::create(&mut manager, color_desc(64, 64), SubViews::None, "color").unwrap();
        let first_handle = first.image;
        targets.insert_image(TargetId::SceneColor, first, &mut manager, 0);

        let second = SceneImage::create(&mut manager, color_desc(32, 32), SubViews::None, "color").unwrap();
        targets.insert_image(TargetId::SceneColor, second, &mut manager, 5);
        assert_eq!(targets.image(TargetId::SceneColor).unwrap().extent().width, 32);

        // 旧 image 仍然存活，直到第 5 帧完成
        manager.cleanup(6);
        assert!(manager.get_image(first_handle).is_ok());
        manager.cleanup(8);
        assert!(manager.get_image(first_handle).is_err());
    }

    #[test]
    fn test_sub_views() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend);

        let bloom = SceneImage::create(&mut manager, color_desc(64, 32).mips(4), SubViews::PerMip, "bloom").unwrap();
        assert_eq!(bloom.sub_views.len(), 4);
        assert!(bloom.vk_sub_view(3).is_ok());
        assert!(bloom.vk_sub_view(4).is_err());

        let shadow_desc = ImageDesc::new_2d(
            vk::Extent2D { width: 128, height: 128 },
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .layers(4);
        let shadow = SceneImage::create(&mut manager, shadow_desc, SubViews::PerLayer, "shadow").unwrap();
        assert_eq!(shadow.sub_views.len(), 4);
    }

    #[test]
    fn test_discard_states() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend);
        let mut targets = SceneTargets::default();

        let mut color = SceneImage::create(&mut manager, color_desc(16, 16), SubViews::None, "color").unwrap();
        color.state = RgImageState::SHADER_READ_FRAGMENT;
        targets.insert_image(TargetId::SceneColor, color, &mut manager, 0);
        let mut grid = SceneBuffer::create(
            &mut manager,
            BufferDesc::device_local(64, vk::BufferUsageFlags::STORAGE_BUFFER),
            "grid",
        )
        .unwrap();
        grid.state = RgBufferState::STORAGE_READ_FRAGMENT;
        targets.insert_buffer(TargetId::LightGrid, grid, &mut manager, 0);

        targets.discard_states();
        assert_eq!(targets.image(TargetId::SceneColor).unwrap().state(), RgImageState::UNDEFINED);
        assert_eq!(targets.buffer(TargetId::LightGrid).unwrap().state(), RgBufferState::UNDEFINED);
    }

    #[test]
    fn test_missing_target() {
        let targets = SceneTargets::default();
        assert!(matches!(targets.image(TargetId::Depth), Err(GfxError::InvalidHandle(_))));
        assert!(!targets.contains(TargetId::LightGrid));
    }
}
