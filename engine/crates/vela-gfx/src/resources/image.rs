use std::rc::Rc;

use ash::vk;

use crate::{backend::GfxBackend, gfx_error::GfxResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// 6 个 layer 的 cube map
    pub cube_compatible: bool,
}

impl ImageDesc {
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
            array_layers: 1,
            cube_compatible: false,
        }
    }

    pub fn new_cube(size: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent: vk::Extent2D {
                width: size,
                height: size,
            },
            format,
            usage,
            mip_levels: 1,
            array_layers: 6,
            cube_compatible: true,
        }
    }

    /// builder
    #[inline]
    pub fn layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// builder
    #[inline]
    pub fn mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn is_depth(&self) -> bool {
        Self::is_depth_format(self.format)
    }

    pub fn is_depth_format(format: vk::Format) -> bool {
        matches!(
            format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
                | vk::Format::X8_D24_UNORM_PACK32
        )
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.is_depth() { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR }
    }

    /// 某一级 mip 的尺寸，最小为 1
    #[inline]
    pub fn mip_extent(&self, mip: u32) -> vk::Extent2D {
        vk::Extent2D {
            width: (self.extent.width >> mip).max(1),
            height: (self.extent.height >> mip).max(1),
        }
    }

    /// 每个 texel 的字节数，只覆盖引擎用到的格式
    pub fn texel_size(format: vk::Format) -> usize {
        match format {
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_UNORM => 4,
            vk::Format::B8G8R8A8_SRGB | vk::Format::D32_SFLOAT | vk::Format::R32_SFLOAT => 4,
            vk::Format::R16G16B16A16_SFLOAT => 8,
            vk::Format::R32G32B32A32_SFLOAT => 16,
            _ => 4,
        }
    }
}

/// move-only 的 image，Drop 时销毁
pub struct GfxImage {
    backend: Rc<dyn GfxBackend>,
    handle: vk::Image,
    desc: ImageDesc,
    debug_name: String,
}
// init & destroy
impl GfxImage {
    pub fn new(backend: Rc<dyn GfxBackend>, desc: ImageDesc, debug_name: &str) -> GfxResult<Self> {
        let handle = backend.create_image(&desc, debug_name)?;
        Ok(Self {
            backend,
            handle,
            desc,
            debug_name: debug_name.to_string(),
        })
    }

    /// 创建并上传初始数据，完成后处于 `SHADER_READ_ONLY_OPTIMAL`
    pub fn new_with_data(
        backend: Rc<dyn GfxBackend>,
        desc: ImageDesc,
        data: &[u8],
        debug_name: &str,
    ) -> GfxResult<Self> {
        let image = Self::new(backend, desc, debug_name)?;
        image.backend.upload_image(image.handle, &image.desc, data)?;
        Ok(image)
    }
}
impl Drop for GfxImage {
    fn drop(&mut self) {
        log::debug!("destroy image: {}", self.debug_name);
        self.backend.destroy_image(self.handle);
    }
}
// getters
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
