use ash::vk;

use crate::{
    commands::{command::GfxCommand, submit_info::GfxSubmitInfo},
    descriptors::{layout::DescriptorBindingDesc, pool::DescriptorPoolDesc, write::DescriptorWrite},
    gfx_error::GfxResult,
    pipelines::{compute_pipeline::ComputePipelineDesc, graphics_pipeline::GraphicsPipelineDesc},
    resources::{buffer::BufferDesc, image::ImageDesc, image_view::ImageViewDesc, sampler::SamplerDesc},
};

/// acquire 的结果，out-of-date 不是错误，由 FrameScheduler 负责重建
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// suboptimal 也视为成功，但是会在下次 present 之后重建
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// 当前交换链的基本信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

/// 渲染器和 GPU 之间唯一的边界
///
/// 所有方法都是 `&self`，实现内部负责可变状态；上层通过 `Rc<dyn GfxBackend>` 共享。
/// 返回的 handle 都是裸 vk handle，生命周期由上层的 RAII 封装管理。
pub trait GfxBackend {
    fn name(&self) -> &str;

    // --- 同步原语
    fn create_fence(&self, signaled: bool, debug_name: &str) -> GfxResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// timeout 为 `u64::MAX` 时表示无限等待
    fn wait_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> GfxResult<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> GfxResult<bool>;

    fn create_semaphore(&self, debug_name: &str) -> GfxResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // --- command
    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> GfxResult<vk::CommandPool>;
    /// 将 pool 内的 command buffer 恢复到初始状态
    fn reset_command_pool(&self, pool: vk::CommandPool) -> GfxResult<()>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool, debug_name: &str) -> GfxResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> GfxResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> GfxResult<()>;
    /// 录制一条命令
    fn record(&self, cmd: vk::CommandBuffer, command: &GfxCommand);

    fn queue_submit(&self, submits: &[GfxSubmitInfo], fence: Option<vk::Fence>) -> GfxResult<()>;
    fn wait_idle(&self) -> GfxResult<()>;

    // --- descriptor
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBindingDesc],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc, debug_name: &str) -> GfxResult<vk::DescriptorPool>;
    /// 整体回收 pool 内的所有 descriptor set
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> GfxResult<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> GfxResult<vk::DescriptorSet>;
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // --- 资源
    fn create_buffer(&self, desc: &BufferDesc, debug_name: &str) -> GfxResult<vk::Buffer>;
    /// 只能用于 `host_visible` 的 buffer
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn create_image(&self, desc: &ImageDesc, debug_name: &str) -> GfxResult<vk::Image>;
    /// 通过 stage buffer 上传整个 image 的数据，完成后 image 处于 `SHADER_READ_ONLY_OPTIMAL`
    ///
    /// 只在初始化阶段调用，会阻塞到传输完成
    fn upload_image(&self, image: vk::Image, desc: &ImageDesc, data: &[u8]) -> GfxResult<()>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, desc: &ImageViewDesc, debug_name: &str) -> GfxResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, desc: &SamplerDesc, debug_name: &str) -> GfxResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // --- pipeline
    fn create_shader_module(&self, code: &[u32], debug_name: &str) -> GfxResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        debug_name: &str,
    ) -> GfxResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc, debug_name: &str) -> GfxResult<vk::Pipeline>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc, debug_name: &str) -> GfxResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // --- swapchain
    /// 没有 surface 的 backend 返回 None
    fn swapchain_info(&self) -> Option<SwapchainInfo>;
    /// 在原 swapchain 的基础上重建（old_swapchain），旧的 image view 由 backend 负责销毁
    fn recreate_swapchain(&self, extent: vk::Extent2D) -> GfxResult<SwapchainInfo>;
    fn acquire_next_image(&self, signal_semaphore: vk::Semaphore) -> GfxResult<AcquireOutcome>;
    fn present(&self, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> GfxResult<PresentOutcome>;
}
