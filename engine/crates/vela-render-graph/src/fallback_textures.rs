//! 缺失资源时使用的默认纹理与全局 sampler

use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    GfxBackend, GfxResult,
    resources::{
        image::ImageDesc,
        image_view::ImageViewDesc,
        sampler::{GfxSampler, SamplerDesc},
    },
};
use vela_render_interface::{
    gfx_resource_manager::GfxResourceManager,
    handles::{GfxImageHandle, GfxImageViewHandle},
};

/// 1x1 的默认纹理
///
/// - 材质没有 albedo 贴图时采样白色
/// - 没有环境贴图时采样黑色的 cubemap，天空与环境光都不产生贡献
pub struct FallbackTextures {
    pub white_2d: GfxImageHandle,
    pub white_2d_view: GfxImageViewHandle,
    pub black_cube: GfxImageHandle,
    pub black_cube_view: GfxImageViewHandle,

    white_2d_vk: vk::ImageView,
    black_cube_vk: vk::ImageView,
}
impl FallbackTextures {
    const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    pub fn new(gfx_resource_manager: &mut GfxResourceManager) -> GfxResult<Self> {
        let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;

        let white_2d = gfx_resource_manager.create_image_with_data(
            ImageDesc::new_2d(vk::Extent2D { width: 1, height: 1 }, Self::FORMAT, usage),
            &[255, 255, 255, 255],
            "fallback-white-2d",
        )?;
        let white_2d_view = gfx_resource_manager.create_image_view(white_2d, ImageViewDesc::whole, "fallback-white-2d")?;

        let black_face = [0u8, 0, 0, 255];
        let black_cube = gfx_resource_manager.create_image_with_data(
            ImageDesc::new_cube(1, Self::FORMAT, usage),
            &black_face.repeat(6),
            "fallback-black-cube",
        )?;
        let black_cube_view =
            gfx_resource_manager.create_image_view(black_cube, ImageViewDesc::whole, "fallback-black-cube")?;

        Ok(Self {
            white_2d,
            white_2d_view,
            black_cube,
            black_cube_view,
            white_2d_vk: gfx_resource_manager.get_image_view(white_2d_view)?.handle(),
            black_cube_vk: gfx_resource_manager.get_image_view(black_cube_view)?.handle(),
        })
    }

    /// 材质贴图：句柄为空或者已经失效时使用白色纹理
    pub fn resolve_2d(&self, gfx_resource_manager: &GfxResourceManager, view: Option<GfxImageViewHandle>) -> vk::ImageView {
        Self::resolve(gfx_resource_manager, view, self.white_2d_vk)
    }

    /// 环境贴图：句柄为空或者已经失效时使用黑色 cubemap
    pub fn resolve_cube(
        &self,
        gfx_resource_manager: &GfxResourceManager,
        view: Option<GfxImageViewHandle>,
    ) -> vk::ImageView {
        Self::resolve(gfx_resource_manager, view, self.black_cube_vk)
    }

    fn resolve(
        gfx_resource_manager: &GfxResourceManager,
        view: Option<GfxImageViewHandle>,
        fallback: vk::ImageView,
    ) -> vk::ImageView {
        match view.map(|view| gfx_resource_manager.get_image_view(view)) {
            Some(Ok(view)) => view.handle(),
            Some(Err(e)) => {
                log::warn!("texture fallback: {e}");
                fallback
            }
            None => fallback,
        }
    }
}

/// 场景 pass 共用的 sampler
pub struct RenderSamplers {
    pub linear_repeat: GfxSampler,
    pub linear_clamp: GfxSampler,
    pub nearest_clamp: GfxSampler,
    /// 带深度比较
    pub shadow: GfxSampler,
}
impl RenderSamplers {
    pub fn new(backend: &Rc<dyn GfxBackend>) -> GfxResult<Self> {
        Ok(Self {
            linear_repeat: GfxSampler::new(backend.clone(), SamplerDesc::default(), "linear-repeat")?,
            linear_clamp: GfxSampler::new(backend.clone(), SamplerDesc::linear_clamp(), "linear-clamp")?,
            nearest_clamp: GfxSampler::new(
                backend.clone(),
                SamplerDesc {
                    filter: vk::Filter::NEAREST,
                    mipmap_mode: vk::SamplerMipmapMode::NEAREST,
                    ..SamplerDesc::linear_clamp()
                },
                "nearest-clamp",
            )?,
            shadow: GfxSampler::new(backend.clone(), SamplerDesc::shadow(), "shadow")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::{HeadlessBackend, JournalEvent};

    use super::*;

    #[test]
    fn test_fallback_uploads() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend.clone());
        let fallback = FallbackTextures::new(&mut manager).unwrap();

        let uploads: Vec<usize> = backend
            .journal()
            .into_iter()
            .filter_map(|event| match event {
                JournalEvent::UploadImage { size, .. } => Some(size),
                _ => None,
            })
            .collect();
        assert_eq!(uploads, vec![4, 24]);
        assert!(backend.image_desc(manager.get_image(fallback.black_cube).unwrap().handle()).unwrap().cube_compatible);
    }

    #[test]
    fn test_stale_handle_falls_back() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut manager = GfxResourceManager::new(backend.clone());
        let fallback = FallbackTextures::new(&mut manager).unwrap();

        let image = manager
            .create_image(
                ImageDesc::new_2d(vk::Extent2D { width: 4, height: 4 }, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED),
                "albedo",
            )
            .unwrap();
        let view = manager.create_image_view(image, ImageViewDesc::whole, "albedo").unwrap();
        let albedo_vk = manager.get_image_view(view).unwrap().handle();

        assert_eq!(fallback.resolve_2d(&manager, Some(view)), albedo_vk);
        assert_eq!(fallback.resolve_2d(&manager, None), fallback.white_2d_vk);

        manager.destroy_image(image, 0);
        manager.cleanup(10);
        assert_eq!(fallback.resolve_2d(&manager, Some(view)), fallback.white_2d_vk);
    }
}
