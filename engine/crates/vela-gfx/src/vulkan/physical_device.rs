use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::gfx_error::{GfxError, GfxResult, VkResultExt};

/// 表示一张物理显卡
pub(crate) struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,
    pub(crate) basic_props: vk::PhysicalDeviceProperties,
    /// 全能的 queue family：graphics, compute, transfer
    pub(crate) gfx_queue_family_index: u32,
}

impl GfxPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    ///
    /// 如果提供了 surface，queue family 还需要支持 present
    pub fn pick(
        instance: &ash::Instance,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }.vk_context("vkEnumeratePhysicalDevices")?;
        let candidates = pdevices.iter().filter_map(|pdevice| Self::new(*pdevice, instance, surface)).collect_vec();
        candidates
            .into_iter()
            // 优先使用独立显卡
            .find_or_first(Self::is_discrete_gpu)
            .ok_or_else(|| GfxError::Config("no suitable vulkan physical device".to_string()))
    }

    fn new(
        pdevice: vk::PhysicalDevice,
        instance: &ash::Instance,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> Option<Self> {
        let basic_props = unsafe { instance.get_physical_device_properties(pdevice) };
        let device_name = unsafe { CStr::from_ptr(basic_props.device_name.as_ptr()) };
        log::info!("found gpu: {:?}", device_name);

        if basic_props.api_version < vk::API_VERSION_1_3 {
            log::warn!("gpu {:?} does not support vulkan 1.3, skip", device_name);
            return None;
        }

        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        log::debug!("physical device: queue family props:\n{:#?}", queue_family_props);

        let gfx_flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let gfx_queue_family_index = queue_family_props
            .iter()
            .enumerate()
            .find(|(family_idx, props)| {
                let present_ok = surface.is_none_or(|(loader, surface)| unsafe {
                    loader.get_physical_device_surface_support(pdevice, *family_idx as u32, surface).unwrap_or(false)
                });
                props.queue_flags.contains(gfx_flags) && present_ok
            })
            .map(|(family_idx, _)| family_idx as u32)?;

        Some(Self {
            vk_handle: pdevice,
            basic_props,
            gfx_queue_family_index,
        })
    }

    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}
