use ash::vk;

/// GFX 层的错误类型
///
/// 除了 `SwapchainLost` 之外的 out-of-date 由调用方就地处理，不会出现在这里；
/// 出现在这里的错误几乎都是致命的，见 [`GfxError::is_fatal`]。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("vulkan call `{call}` failed: {result:?}")]
    Vk { call: &'static str, result: vk::Result },

    #[error("device lost")]
    DeviceLost,

    /// 交换链重建之后仍然 out-of-date
    #[error("swapchain lost during {stage}: still out of date after recreation")]
    SwapchainLost { stage: &'static str },

    /// 固定预算被耗尽：descriptor pool、transform buffer、light buffer
    #[error("budget `{budget}` exhausted: requested {requested}, capacity {capacity}")]
    BudgetExhausted { budget: &'static str, requested: usize, capacity: usize },

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("failed to load shader `{name}`: {reason}")]
    ShaderLoad { name: String, reason: String },

    /// shader 反射出来的布局与 Rust 端定义不一致
    #[error("reflection mismatch in `{shader}`: {detail}")]
    ReflectionMismatch { shader: String, detail: String },

    #[error("config error: {0}")]
    Config(String),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    /// 将 vk::Result 转换为 GfxError，`ERROR_DEVICE_LOST` 单独归类
    pub fn vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            result => GfxError::Vk { call, result },
        }
    }

    /// 是否需要终止渲染循环
    ///
    /// 目前只有 `InvalidHandle` 被视为可恢复（调用方可以丢弃这次请求）
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GfxError::InvalidHandle(_))
    }
}

/// 给 `VkResult` 附加调用名
pub trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    fn vk_context(self, call: &'static str) -> GfxResult<T> {
        self.map_err(|result| GfxError::vk(call, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_mapping() {
        let err: GfxResult<()> = Err(vk::Result::ERROR_DEVICE_LOST).vk_context("vkQueueSubmit2");
        assert!(matches!(err, Err(GfxError::DeviceLost)));

        let err = GfxError::vk("vkAllocateDescriptorSets", vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("vkAllocateDescriptorSets"));
    }

    #[test]
    fn test_budget_message() {
        let err = GfxError::BudgetExhausted { budget: "transform-buffer", requested: 10_001, capacity: 10_000 };
        assert_eq!(err.to_string(), "budget `transform-buffer` exhausted: requested 10001, capacity 10000");
        assert!(!GfxError::InvalidHandle("mesh".into()).is_fatal());
    }
}
