use std::{
    ffi::{CStr, CString},
    ops::Deref,
};

use ash::vk;
use itertools::Itertools;

use crate::gfx_error::{GfxResult, VkResultExt};

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及扩展的函数指针，这些函数指针在应用生命周期中保持不变。
/// dynamic rendering 与 synchronization2 已经是 1.3 core，直接通过 `ash::Device` 调用。
pub(crate) struct GfxDevice {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 调试工具扩展 API
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
    /// 交换链扩展 API
    pub(crate) swapchain: ash::khr::swapchain::Device,
}

// 构造与销毁
impl GfxDevice {
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, queue_family_index: u32) -> GfxResult<Self> {
        let _span = vela_crate_tools::profile_span!("GfxDevice::new");

        let device_exts = Self::basic_device_exts().iter().map(|e| e.as_ptr()).collect_vec();
        let exts_str = Self::basic_device_exts().iter().map(|e| format!("\n\t{e:?}")).join("");
        log::info!("device exts: {}", exts_str);

        // Nvidia 使用的是 Unified Scheduler，Graphics 和 Compute 并没法做到真正的并行
        // 为了简化设计，所有工作都提交到同一个 queue
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let mut vk13_features = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut all_features =
            vk::PhysicalDeviceFeatures2::default().features(Self::physical_device_basic_features());

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features)
            .push_next(&mut vk13_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None) }.vk_context("vkCreateDevice")?;

        let debug_utils = ash::ext::debug_utils::Device::new(instance, &device);
        let swapchain = ash::khr::swapchain::Device::new(instance, &device);

        Ok(Self {
            device,
            debug_utils,
            swapchain,
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying device");
        unsafe {
            self.device.destroy_device(None);
        }
    }

    /// 必要的 physical device core features
    fn physical_device_basic_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            // 阴影贴图的 depth clamp
            .depth_clamp(true)
            // collider 线框
            .fill_mode_non_solid(true)
            .fragment_stores_and_atomics(true)
    }

    /// 必要的 device extensions
    fn basic_device_exts() -> Vec<&'static CStr> {
        vec![ash::khr::swapchain::NAME]
    }
}

// tools
impl GfxDevice {
    /// debug name 中的 0 字节会导致 CString 失败，此时忽略该名称
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: &str) {
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle);
        if let Err(e) = unsafe { self.debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}
