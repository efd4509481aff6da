use ash::vk;

use crate::gfx_error::{GfxResult, VkResultExt};

pub(crate) struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

impl GfxSurface {
    pub fn new(
        vk_entry: &ash::Entry,
        instance: &ash::Instance,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
    ) -> GfxResult<Self> {
        let pf = ash::khr::surface::Instance::new(vk_entry, instance);
        let handle = unsafe {
            ash_window::create_surface(vk_entry, instance, raw_display_handle, raw_window_handle, None)
                .vk_context("vkCreateSurfaceKHR")?
        };
        Ok(Self { handle, pf })
    }

    /// 实时获取 surface capabilities
    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.pf.get_physical_device_surface_capabilities(pdevice, self.handle) }
            .vk_context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn formats(&self, pdevice: vk::PhysicalDevice) -> GfxResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.pf.get_physical_device_surface_formats(pdevice, self.handle) }
            .vk_context("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn present_modes(&self, pdevice: vk::PhysicalDevice) -> GfxResult<Vec<vk::PresentModeKHR>> {
        unsafe { self.pf.get_physical_device_surface_present_modes(pdevice, self.handle) }
            .vk_context("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }

    pub fn destroy(&self) {
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}
