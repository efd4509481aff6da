use std::ffi::CStr;

use ash::vk;

use crate::gfx_error::{GfxResult, VkResultExt};

pub(crate) struct GfxDebugMsger {
    vk_debug_utils_instance: ash::ext::debug_utils::Instance,
    vk_debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

impl GfxDebugMsger {
    pub fn new(vk_pf: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_pf, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let debug_messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .vk_context("vkCreateDebugUtilsMessengerEXT")?;

        Ok(Self {
            vk_debug_utils_instance: loader,
            vk_debug_utils_messenger: debug_messenger,
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying debug messenger");
        unsafe {
            self.vk_debug_utils_instance.destroy_debug_utils_messenger(self.vk_debug_utils_messenger, None);
        }
    }

    /// 用于创建 debug messenger 的结构体
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

/// validation layer 的消息可能是 json，其中 MainMessage 字段里面有换行符，需要单独输出
fn format_validation_message(msg: &str) -> String {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg);
    let mut json_obj = json_value.as_mut().ok().and_then(|v| v.as_object_mut());
    let main_msg_value = json_obj.as_mut().and_then(|obj| obj.remove("MainMessage"));
    let main_msg_str = main_msg_value.as_ref().and_then(|value| value.as_str()).unwrap_or_default();

    match json_obj.and_then(|obj| serde_json::to_string_pretty(&obj).ok()) {
        Some(rest) => format!("{rest}\n{main_msg_str}"),
        None => msg.to_string(),
    }
}

/// debug messenger 的回调函数
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };
    let format_msg = format!("[{:?}]\n{}\n", message_type, format_validation_message(msg.as_ref()));

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_validation_message() {
        let plain = "vkQueueSubmit2: fence is already in use";
        assert_eq!(format_validation_message(plain), plain);

        let json = r#"{"MainMessage": "line1\nline2", "MessageID": "0x1234"}"#;
        let formatted = format_validation_message(json);
        assert!(formatted.contains("MessageID"));
        assert!(formatted.ends_with("line1\nline2"));
        assert!(!formatted.contains("MainMessage"));
    }
}
