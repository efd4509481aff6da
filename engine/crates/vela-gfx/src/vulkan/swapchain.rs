use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{AcquireOutcome, PresentOutcome, SwapchainInfo},
    gfx_error::{GfxResult, VkResultExt},
    vulkan::{device::GfxDevice, surface::GfxSurface},
};

pub(crate) struct GfxRenderSwapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

// new & init
impl GfxRenderSwapchain {
    /// `old` 不为空时，新的 swapchain 会复用其资源，调用方随后需要销毁 old
    pub fn new(
        device: &GfxDevice,
        surface: &GfxSurface,
        pdevice: vk::PhysicalDevice,
        preferred_present_mode: vk::PresentModeKHR,
        window_extent: vk::Extent2D,
        old: vk::SwapchainKHR,
    ) -> GfxResult<Self> {
        let caps = surface.capabilities(pdevice)?;
        let surface_format = Self::select_surface_format(&surface.formats(pdevice)?);
        let present_mode = Self::select_present_mode(&surface.present_modes(pdevice)?, preferred_present_mode);
        let extent = Self::calculate_swapchain_extent(&caps, window_extent);
        log::info!(
            "create swapchain: surface current extent: {}x{}, window extent: {}x{}, final extent: {}x{}, present mode: {:?}",
            caps.current_extent.width,
            caps.current_extent.height,
            window_extent.width,
            window_extent.height,
            extent.width,
            extent.height,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(Self::image_count(&caps))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 blit 最终画面
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(old);

        let handle =
            unsafe { device.swapchain.create_swapchain(&create_info, None) }.vk_context("vkCreateSwapchainKHR")?;
        device.set_object_debug_name(handle, "Swapchain::main");
        let images =
            unsafe { device.swapchain.get_swapchain_images(handle) }.vk_context("vkGetSwapchainImagesKHR")?;

        let image_views = images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let view_ci = vk::ImageViewCreateInfo::default()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                let view = unsafe { device.create_image_view(&view_ci, None) }.vk_context("vkCreateImageView")?;
                device.set_object_debug_name(*image, &format!("SwapchainImage::{idx}"));
                Ok(view)
            })
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(Self {
            handle,
            images,
            image_views,
            surface_format,
            present_mode,
            extent,
        })
    }

    pub fn destroy(&self, device: &GfxDevice) {
        unsafe {
            for view in &self.image_views {
                device.destroy_image_view(*view, None);
            }
            device.swapchain.destroy_swapchain(self.handle, None);
        }
    }
}
// getters
impl GfxRenderSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn info(&self) -> SwapchainInfo {
        SwapchainInfo {
            extent: self.extent,
            format: self.surface_format.format,
            present_mode: self.present_mode,
            images: self.images.clone(),
            image_views: self.image_views.clone(),
        }
    }
}
// tools
impl GfxRenderSwapchain {
    /// 确定 window 的 extent 尺寸
    ///
    /// 如果 current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        caps: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = caps.current_extent;
        if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
            vk::Extent2D {
                width: window_physical_extent.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: window_physical_extent.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        } else {
            surface_extent
        }
    }

    /// max_image_count == 0，表示不限制 image 数量
    pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
        if caps.max_image_count == 0 {
            caps.min_image_count + 1
        } else {
            u32::min(caps.max_image_count, caps.min_image_count + 1)
        }
    }

    /// 优先 B8G8R8A8_UNORM + SRGB_NONLINEAR，合成结果已经是 gamma 空间
    pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
        formats
            .iter()
            .copied()
            .find_or_first(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            })
    }

    /// 不支持时回退到 FIFO，FIFO 总是可用
    pub fn select_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
        if modes.contains(&preferred) { preferred } else { vk::PresentModeKHR::FIFO }
    }
}
// update
impl GfxRenderSwapchain {
    pub fn acquire_next_image(&self, device: &GfxDevice, semaphore: vk::Semaphore) -> GfxResult<AcquireOutcome> {
        let result =
            unsafe { device.swapchain.acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null()) };
        match result {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", image_index);
                }
                Ok(AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(e) => Err(e).vk_context("vkAcquireNextImageKHR"),
        }
    }

    pub fn present_image(
        &self,
        device: &GfxDevice,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> GfxResult<PresentOutcome> {
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.handle));

        match unsafe { device.swapchain.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => {
                log::warn!("swapchain present image index {} is not optimal", image_index);
                Ok(PresentOutcome::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(e).vk_context("vkQueuePresentKHR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: vk::Extent2D, min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: min_count,
            max_image_count: max_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_swapchain_extent() {
        let window = vk::Extent2D {
            width: 5000,
            height: 720,
        };
        let free = caps(
            vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            2,
            0,
        );
        assert_eq!(
            GfxRenderSwapchain::calculate_swapchain_extent(&free, window),
            vk::Extent2D {
                width: 4096,
                height: 720
            }
        );

        let fixed = caps(
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            2,
            0,
        );
        assert_eq!(GfxRenderSwapchain::calculate_swapchain_extent(&fixed, window).width, 800);
    }

    #[test]
    fn test_image_count() {
        let unlimited = caps(vk::Extent2D::default(), 2, 0);
        assert_eq!(GfxRenderSwapchain::image_count(&unlimited), 3);
        let limited = caps(vk::Extent2D::default(), 3, 3);
        assert_eq!(GfxRenderSwapchain::image_count(&limited), 3);
    }

    #[test]
    fn test_present_mode_fallback() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            GfxRenderSwapchain::select_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            GfxRenderSwapchain::select_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }
}
