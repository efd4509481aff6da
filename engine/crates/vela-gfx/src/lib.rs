//! Vulkan GFX 抽象层
//!
//! 所有 GPU 调用都经过 [`backend::GfxBackend`]，由显式传递的 `Rc<dyn GfxBackend>` 共享。
//! - [`vulkan::VulkanBackend`]：基于 ash + vk-mem 的真实实现
//! - [`headless::HeadlessBackend`]：不需要 GPU，记录每一次调用，用于测试
//!
//! 上层拿到的都是 move-only 的 RAII 封装（fence、semaphore、command pool、buffer、image ...），
//! Drop 时自动归还给 backend。

pub mod backend;
pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod gfx_error;
pub mod headless;
pub mod pipelines;
pub mod resources;
pub mod vulkan;

pub use backend::{AcquireOutcome, GfxBackend, PresentOutcome, SwapchainInfo};
pub use gfx_error::{GfxError, GfxResult};
