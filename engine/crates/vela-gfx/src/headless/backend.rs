use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
};

use ash::vk::{self, Handle};

use crate::{
    backend::{AcquireOutcome, GfxBackend, PresentOutcome, SwapchainInfo},
    commands::{command::GfxCommand, submit_info::GfxSubmitInfo},
    descriptors::{layout::DescriptorBindingDesc, pool::DescriptorPoolDesc, write::DescriptorWrite},
    gfx_error::{GfxError, GfxResult},
    headless::journal::JournalEvent,
    pipelines::{compute_pipeline::ComputePipelineDesc, graphics_pipeline::GraphicsPipelineDesc},
    resources::{buffer::BufferDesc, image::ImageDesc, image_view::ImageViewDesc, sampler::SamplerDesc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Unsignaled,
    /// 已经随 submit 提交，等待时立即完成
    Pending,
    Signaled,
}

struct PoolUsage {
    max_sets: u32,
    allocated: u32,
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u64,
    /// raw handle -> 对象类型，用于检查泄漏与重复销毁
    live_objects: HashMap<u64, &'static str>,

    fences: HashMap<vk::Fence, FenceState>,
    descriptor_pools: HashMap<vk::DescriptorPool, PoolUsage>,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    images: HashMap<vk::Image, ImageDesc>,

    swapchain: Option<SwapchainInfo>,
    next_image_index: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,

    journal: Vec<JournalEvent>,
}

impl HeadlessState {
    fn alloc<H: Handle>(&mut self, kind: &'static str) -> H {
        self.next_handle += 1;
        self.live_objects.insert(self.next_handle, kind);
        H::from_raw(self.next_handle)
    }

    fn release<H: Handle>(&mut self, handle: H) {
        let raw = handle.as_raw();
        if self.live_objects.remove(&raw).is_none() {
            log::error!("headless: destroy unknown or already destroyed handle {raw:#x}");
            debug_assert!(false, "double destroy of handle {raw:#x}");
        }
    }

    fn swapchain_images(&mut self, extent: vk::Extent2D, format: vk::Format) -> SwapchainInfo {
        const IMAGE_COUNT: usize = 3;
        let images = (0..IMAGE_COUNT).map(|_| self.alloc::<vk::Image>("swapchain-image")).collect();
        let image_views = (0..IMAGE_COUNT).map(|_| self.alloc::<vk::ImageView>("swapchain-view")).collect();
        SwapchainInfo {
            extent,
            format,
            present_mode: vk::PresentModeKHR::FIFO,
            images,
            image_views,
        }
    }
}

/// 记录所有调用的 backend，见模块文档
pub struct HeadlessBackend {
    state: RefCell<HeadlessState>,
}

// new & init
impl HeadlessBackend {
    /// 没有 surface 的 backend，只能用于离屏渲染
    pub fn new() -> Self {
        Self {
            state: RefCell::new(HeadlessState::default()),
        }
    }

    /// 带有 3 张 image 的假交换链
    pub fn with_swapchain(extent: vk::Extent2D) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.borrow_mut();
            let info = state.swapchain_images(extent, vk::Format::B8G8R8A8_UNORM);
            state.swapchain = Some(info);
        }
        backend
    }
}
impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}
// 测试用的脚本与查询
impl HeadlessBackend {
    /// 下一次 acquire 的结果，按队列顺序消费
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.borrow_mut().acquire_script.push_back(outcome);
    }

    /// 下一次 present 的结果，按队列顺序消费
    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.borrow_mut().present_script.push_back(outcome);
    }

    pub fn journal(&self) -> Vec<JournalEvent> {
        self.state.borrow().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.borrow_mut().journal.clear();
    }

    /// 所有录制的命令
    pub fn commands(&self) -> Vec<GfxCommand> {
        self.state.borrow().journal.iter().filter_map(|e| e.as_command().cloned()).collect()
    }

    /// 所有 dispatch 的 group count
    pub fn dispatches(&self) -> Vec<[u32; 3]> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                GfxCommand::Dispatch { group_count } => Some(group_count),
                _ => None,
            })
            .collect()
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence).copied()
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).cloned()
    }

    pub fn image_desc(&self, image: vk::Image) -> Option<ImageDesc> {
        self.state.borrow().images.get(&image).copied()
    }

    /// 尚未销毁的对象数量（不包括交换链 image）
    pub fn live_object_count(&self) -> usize {
        self.state.borrow().live_objects.values().filter(|kind| !kind.starts_with("swapchain")).count()
    }

    fn push(&self, event: JournalEvent) {
        self.state.borrow_mut().journal.push(event);
    }

    fn alloc<H: Handle>(&self, kind: &'static str) -> H {
        self.state.borrow_mut().alloc(kind)
    }

    fn release<H: Handle>(&self, handle: H) {
        self.state.borrow_mut().release(handle);
    }
}

impl GfxBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_fence(&self, signaled: bool, _debug_name: &str) -> GfxResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let fence: vk::Fence = state.alloc("fence");
        let fence_state = if signaled { FenceState::Signaled } else { FenceState::Unsignaled };
        state.fences.insert(fence, fence_state);
        state.journal.push(JournalEvent::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        state.fences.remove(&fence);
        state.release(fence);
    }

    fn wait_fences(&self, fences: &[vk::Fence], _timeout_ns: u64) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        for fence in fences {
            match state.fences.get(fence).copied() {
                Some(FenceState::Pending) | Some(FenceState::Signaled) => {
                    state.fences.insert(*fence, FenceState::Signaled);
                    state.journal.push(JournalEvent::WaitFence { fence: *fence });
                }
                // 从未提交的 fence 在真实设备上会永远等待下去
                Some(FenceState::Unsignaled) => return Err(GfxError::DeviceLost),
                None => return Err(GfxError::InvalidHandle(format!("fence {:#x}", fence.as_raw()))),
            }
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        for fence in fences {
            if state.fences.insert(*fence, FenceState::Unsignaled).is_none() {
                return Err(GfxError::InvalidHandle(format!("fence {:#x}", fence.as_raw())));
            }
            state.journal.push(JournalEvent::ResetFence { fence: *fence });
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> GfxResult<bool> {
        match self.fence_state(fence) {
            Some(state) => Ok(state != FenceState::Unsignaled),
            None => Err(GfxError::InvalidHandle(format!("fence {:#x}", fence.as_raw()))),
        }
    }

    fn create_semaphore(&self, _debug_name: &str) -> GfxResult<vk::Semaphore> {
        Ok(self.alloc("semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore);
    }

    fn create_command_pool(&self, _flags: vk::CommandPoolCreateFlags, _debug_name: &str) -> GfxResult<vk::CommandPool> {
        Ok(self.alloc("command-pool"))
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> GfxResult<()> {
        self.push(JournalEvent::ResetCommandPool { pool });
        Ok(())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.release(pool);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool, _debug_name: &str) -> GfxResult<vk::CommandBuffer> {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        // command buffer 随 pool 释放，不计入存活对象
        let cmd = vk::CommandBuffer::from_raw(state.next_handle);
        state.journal.push(JournalEvent::AllocateCommandBuffer { pool, cmd });
        Ok(cmd)
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _flags: vk::CommandBufferUsageFlags) -> GfxResult<()> {
        self.push(JournalEvent::BeginCommandBuffer { cmd });
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> GfxResult<()> {
        self.push(JournalEvent::EndCommandBuffer { cmd });
        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, command: &GfxCommand) {
        self.push(JournalEvent::Command {
            cmd,
            command: command.clone(),
        });
    }

    fn queue_submit(&self, submits: &[GfxSubmitInfo], fence: Option<vk::Fence>) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(fence) = fence {
            // vulkan 要求提交时 fence 处于 unsignaled
            match state.fences.get(&fence) {
                Some(FenceState::Unsignaled) => {
                    state.fences.insert(fence, FenceState::Pending);
                }
                Some(_) => return Err(GfxError::vk("vkQueueSubmit2", vk::Result::ERROR_UNKNOWN)),
                None => return Err(GfxError::InvalidHandle(format!("fence {:#x}", fence.as_raw()))),
            }
        }
        let command_buffers = submits.iter().flat_map(|s| s.command_buffers.iter().copied()).collect();
        state.journal.push(JournalEvent::Submit { command_buffers, fence });
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        for fence_state in state.fences.values_mut() {
            if *fence_state == FenceState::Pending {
                *fence_state = FenceState::Signaled;
            }
        }
        state.journal.push(JournalEvent::WaitIdle);
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBindingDesc],
        _debug_name: &str,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        Ok(self.alloc("descriptor-set-layout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.release(layout);
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc, _debug_name: &str) -> GfxResult<vk::DescriptorPool> {
        let mut state = self.state.borrow_mut();
        let pool: vk::DescriptorPool = state.alloc("descriptor-pool");
        state.descriptor_pools.insert(
            pool,
            PoolUsage {
                max_sets: desc.max_sets,
                allocated: 0,
            },
        );
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        let usage = state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or_else(|| GfxError::InvalidHandle(format!("descriptor pool {:#x}", pool.as_raw())))?;
        usage.allocated = 0;
        state.journal.push(JournalEvent::ResetDescriptorPool { pool });
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.borrow_mut();
        state.descriptor_pools.remove(&pool);
        state.release(pool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> GfxResult<vk::DescriptorSet> {
        let mut state = self.state.borrow_mut();
        let usage = state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or_else(|| GfxError::InvalidHandle(format!("descriptor pool {:#x}", pool.as_raw())))?;
        if usage.allocated >= usage.max_sets {
            return Err(GfxError::vk("vkAllocateDescriptorSets", vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        usage.allocated += 1;

        // descriptor set 随 pool 回收，不计入存活对象
        state.next_handle += 1;
        let set = vk::DescriptorSet::from_raw(state.next_handle);
        state.journal.push(JournalEvent::AllocateDescriptorSet { pool, set });
        Ok(set)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        self.push(JournalEvent::UpdateDescriptorSets { count: writes.len() });
    }

    fn create_buffer(&self, desc: &BufferDesc, _debug_name: &str) -> GfxResult<vk::Buffer> {
        let mut state = self.state.borrow_mut();
        let buffer: vk::Buffer = state.alloc("buffer");
        state.buffers.insert(buffer, vec![0; desc.size as usize]);
        state.journal.push(JournalEvent::CreateBuffer { buffer, size: desc.size });
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        let contents = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GfxError::InvalidHandle(format!("buffer {:#x}", buffer.as_raw())))?;
        let begin = offset as usize;
        let end = begin + data.len();
        if end > contents.len() {
            return Err(GfxError::BudgetExhausted {
                budget: "buffer-write",
                requested: end,
                capacity: contents.len(),
            });
        }
        contents[begin..end].copy_from_slice(data);
        state.journal.push(JournalEvent::WriteBuffer {
            buffer,
            offset,
            size: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.borrow_mut();
        state.buffers.remove(&buffer);
        state.release(buffer);
        state.journal.push(JournalEvent::DestroyBuffer { buffer });
    }

    fn create_image(&self, desc: &ImageDesc, _debug_name: &str) -> GfxResult<vk::Image> {
        let mut state = self.state.borrow_mut();
        let image: vk::Image = state.alloc("image");
        state.images.insert(image, *desc);
        state.journal.push(JournalEvent::CreateImage {
            image,
            extent: desc.extent,
            format: desc.format,
            layers: desc.array_layers,
        });
        Ok(image)
    }

    fn upload_image(&self, image: vk::Image, _desc: &ImageDesc, data: &[u8]) -> GfxResult<()> {
        self.push(JournalEvent::UploadImage { image, size: data.len() });
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.borrow_mut();
        state.images.remove(&image);
        state.release(image);
        state.journal.push(JournalEvent::DestroyImage { image });
    }

    fn create_image_view(&self, _desc: &ImageViewDesc, _debug_name: &str) -> GfxResult<vk::ImageView> {
        Ok(self.alloc("image-view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view);
    }

    fn create_sampler(&self, _desc: &SamplerDesc, _debug_name: &str) -> GfxResult<vk::Sampler> {
        Ok(self.alloc("sampler"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.release(sampler);
    }

    fn create_shader_module(&self, code: &[u32], debug_name: &str) -> GfxResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(GfxError::ShaderLoad {
                name: debug_name.to_string(),
                reason: "empty bytecode".to_string(),
            });
        }
        Ok(self.alloc("shader-module"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.release(module);
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
        _debug_name: &str,
    ) -> GfxResult<vk::PipelineLayout> {
        Ok(self.alloc("pipeline-layout"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release(layout);
    }

    fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDesc, _debug_name: &str) -> GfxResult<vk::Pipeline> {
        Ok(self.alloc("pipeline"))
    }

    fn create_compute_pipeline(&self, _desc: &ComputePipelineDesc, _debug_name: &str) -> GfxResult<vk::Pipeline> {
        Ok(self.alloc("pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.release(pipeline);
    }

    fn swapchain_info(&self) -> Option<SwapchainInfo> {
        self.state.borrow().swapchain.clone()
    }

    fn recreate_swapchain(&self, extent: vk::Extent2D) -> GfxResult<SwapchainInfo> {
        let mut state = self.state.borrow_mut();
        let old = state.swapchain.take().ok_or_else(|| GfxError::InvalidHandle("swapchain".to_string()))?;
        for (image, view) in old.images.into_iter().zip(old.image_views) {
            state.release(image);
            state.release(view);
        }
        let info = state.swapchain_images(extent, old.format);
        state.swapchain = Some(info.clone());
        state.next_image_index = 0;
        state.journal.push(JournalEvent::RecreateSwapchain { extent });
        Ok(info)
    }

    fn acquire_next_image(&self, _signal_semaphore: vk::Semaphore) -> GfxResult<AcquireOutcome> {
        let mut state = self.state.borrow_mut();
        let image_count = match &state.swapchain {
            Some(info) => info.images.len() as u32,
            None => return Err(GfxError::InvalidHandle("swapchain".to_string())),
        };
        let outcome = match state.acquire_script.pop_front() {
            Some(outcome) => outcome,
            None => {
                let image_index = state.next_image_index;
                state.next_image_index = (image_index + 1) % image_count;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }
        };
        state.journal.push(JournalEvent::Acquire { outcome });
        Ok(outcome)
    }

    fn present(&self, image_index: u32, _wait_semaphores: &[vk::Semaphore]) -> GfxResult<PresentOutcome> {
        let mut state = self.state.borrow_mut();
        let outcome = state.present_script.pop_front().unwrap_or(PresentOutcome::Presented);
        state.journal.push(JournalEvent::Present { image_index, outcome });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::commands::{command_pool::GfxCommandPool, fence::GfxFence};

    #[test]
    fn test_fence_lifecycle() {
        let backend = Rc::new(HeadlessBackend::new());
        let fence = GfxFence::new(backend.clone(), false, "test").unwrap();
        // 从未提交的 fence 不能等待
        assert!(matches!(fence.wait(), Err(GfxError::DeviceLost)));

        backend.queue_submit(&[GfxSubmitInfo::default()], Some(fence.handle())).unwrap();
        assert_eq!(backend.fence_state(fence.handle()), Some(FenceState::Pending));
        fence.wait().unwrap();
        assert!(fence.is_signaled().unwrap());

        // signaled 的 fence 不能再次提交
        assert!(backend.queue_submit(&[], Some(fence.handle())).is_err());
        fence.reset().unwrap();
        assert_eq!(backend.fence_state(fence.handle()), Some(FenceState::Unsignaled));
    }

    #[test]
    fn test_raii_releases_objects() {
        let backend = Rc::new(HeadlessBackend::new());
        {
            let _pool = GfxCommandPool::new(backend.clone(), vk::CommandPoolCreateFlags::TRANSIENT, "pool").unwrap();
            let _fence = GfxFence::new(backend.clone(), true, "fence").unwrap();
            assert_eq!(backend.live_object_count(), 2);
        }
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_descriptor_pool_exhaustion() {
        let backend = HeadlessBackend::new();
        let pool = backend.create_descriptor_pool(&DescriptorPoolDesc::uniform_budget(2, 4), "pool").unwrap();
        let layout = backend.create_descriptor_set_layout(&[], "layout").unwrap();
        backend.allocate_descriptor_set(pool, layout).unwrap();
        backend.allocate_descriptor_set(pool, layout).unwrap();
        assert!(backend.allocate_descriptor_set(pool, layout).is_err());

        backend.reset_descriptor_pool(pool).unwrap();
        assert!(backend.allocate_descriptor_set(pool, layout).is_ok());
    }

    #[test]
    fn test_scripted_swapchain() {
        let backend = HeadlessBackend::with_swapchain(vk::Extent2D {
            width: 800,
            height: 600,
        });
        backend.script_acquire(AcquireOutcome::OutOfDate);
        let semaphore = backend.create_semaphore("acquire").unwrap();
        assert_eq!(backend.acquire_next_image(semaphore).unwrap(), AcquireOutcome::OutOfDate);
        assert_eq!(
            backend.acquire_next_image(semaphore).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: false
            }
        );

        let info = backend
            .recreate_swapchain(vk::Extent2D {
                width: 1024,
                height: 768,
            })
            .unwrap();
        assert_eq!(info.extent.width, 1024);
        assert_eq!(backend.swapchain_info().unwrap().images.len(), 3);
    }
}
