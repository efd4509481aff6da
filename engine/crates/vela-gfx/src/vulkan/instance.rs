use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char},
};

use ash::vk;
use itertools::Itertools;

use crate::{
    gfx_error::{GfxError, GfxResult, VkResultExt},
    vulkan::debug_messenger::GfxDebugMsger,
};

pub(crate) struct GfxInstance {
    pub(crate) ash_instance: ash::Instance,
}

impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        extra_instance_exts: &[&'static CStr],
    ) -> GfxResult<Self> {
        let app_name = CString::new(app_name).map_err(|e| GfxError::Config(e.to_string()))?;
        let engine_name = CString::new(engine_name).map_err(|e| GfxError::Config(e.to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, extra_instance_exts)?;
        let enabled_extensions_str = enabled_extensions
            .iter()
            .map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }))
            .join("");
        log::info!("instance extensions: {}", enabled_extensions_str);

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions);

        // 为 instance info 添加 debug messenger，可以捕获 instance 创建过程中的消息
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None) }.vk_context("vkCreateInstance")?;
        Ok(Self { ash_instance })
    }

    pub fn destroy(&self) {
        log::info!("destroying instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

/// 构造过程
impl GfxInstance {
    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry, extra_instance_exts: &[&'static CStr]) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None) }
            .vk_context("vkEnumerateInstanceExtensionProperties")?;
        let mut enabled_extensions: HashSet<&'static CStr> = HashSet::new();

        let required = extra_instance_exts.iter().copied().chain(Self::basic_instance_exts());
        for ext in required {
            let supported = all_ext_props
                .iter()
                .any(|supported_ext| ext == unsafe { CStr::from_ptr(supported_ext.extension_name.as_ptr()) });
            if !supported {
                return Err(GfxError::Config(format!("required instance extension {ext:?} is missing")));
            }
            enabled_extensions.insert(ext);
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    /// 必须要开启的 instance extensions
    ///
    /// validation layer 不在这里开启，使用 vulkan configurator 控制
    fn basic_instance_exts() -> Vec<&'static CStr> {
        // debug messenger、object debug name 以及 command buffer label
        vec![vk::EXT_DEBUG_UTILS_NAME]
    }
}
