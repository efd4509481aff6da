use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult, resources::image::GfxImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl ImageViewDesc {
    /// 覆盖整个 image 的 view，view type 由 layer 数量推断
    pub fn whole(image: &GfxImage) -> Self {
        let desc = image.desc();
        let view_type = if desc.cube_compatible {
            vk::ImageViewType::CUBE
        } else if desc.array_layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        Self {
            image: image.handle(),
            view_type,
            format: desc.format,
            aspect: desc.aspect(),
            base_mip: 0,
            mip_count: desc.mip_levels,
            base_layer: 0,
            layer_count: desc.array_layers,
        }
    }

    /// 单个 mip 的单层 view，用于 storage image
    pub fn single_mip(image: &GfxImage, mip: u32) -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            base_mip: mip,
            mip_count: 1,
            base_layer: 0,
            layer_count: 1,
            ..Self::whole(image)
        }
    }

    /// 单个 layer 的 view，用于渲染到 layered image 的某一层
    pub fn single_layer(image: &GfxImage, layer: u32) -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            base_mip: 0,
            mip_count: 1,
            base_layer: layer,
            layer_count: 1,
            ..Self::whole(image)
        }
    }
}

/// move-only 的 image view，Drop 时销毁
pub struct GfxImageView {
    backend: Rc<dyn GfxBackend>,
    handle: vk::ImageView,
    desc: ImageViewDesc,
}
impl GfxImageView {
    pub fn new(backend: Rc<dyn GfxBackend>, desc: ImageViewDesc, debug_name: &str) -> GfxResult<Self> {
        let handle = backend.create_image_view(&desc, debug_name)?;
        Ok(Self { backend, handle, desc })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &ImageViewDesc {
        &self.desc
    }
}
impl Drop for GfxImageView {
    fn drop(&mut self) {
        self.backend.destroy_image_view(self.handle);
    }
}
