use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::{CStr, CString},
    mem::ManuallyDrop,
};

use ash::vk;
use itertools::Itertools;
use vk_mem::Alloc;

use crate::{
    backend::{AcquireOutcome, GfxBackend, PresentOutcome, SwapchainInfo},
    commands::{command::GfxCommand, submit_info::GfxSubmitInfo},
    descriptors::{
        layout::DescriptorBindingDesc,
        pool::DescriptorPoolDesc,
        write::{DescriptorResource, DescriptorWrite},
    },
    gfx_error::{GfxError, GfxResult, VkResultExt},
    pipelines::{compute_pipeline::ComputePipelineDesc, graphics_pipeline::GraphicsPipelineDesc},
    resources::{buffer::BufferDesc, image::ImageDesc, image_view::ImageViewDesc, sampler::SamplerDesc},
    vulkan::{
        debug_messenger::GfxDebugMsger, device::GfxDevice, instance::GfxInstance,
        physical_device::GfxPhysicalDevice, surface::GfxSurface, swapchain::GfxRenderSwapchain,
    },
};

pub struct VulkanBackendCreateInfo {
    pub app_name: String,
    /// None 表示只做离屏渲染
    pub window: Option<(raw_window_handle::RawDisplayHandle, raw_window_handle::RawWindowHandle)>,
    /// 窗口的物理像素尺寸
    pub window_extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

struct BufferAllocation {
    allocation: vk_mem::Allocation,
    /// 在初始化阶段写死
    map_ptr: Option<*mut u8>,
    size: vk::DeviceSize,
}

/// 基于 ash + vk-mem 的 [`GfxBackend`]
///
/// 只有一个全能 queue；所有 vk-mem 分配记录在表中，以便通过裸 handle 销毁
pub struct VulkanBackend {
    allocator: ManuallyDrop<vk_mem::Allocator>,
    buffers: RefCell<HashMap<vk::Buffer, BufferAllocation>>,
    images: RefCell<HashMap<vk::Image, vk_mem::Allocation>>,

    swapchain: RefCell<Option<GfxRenderSwapchain>>,
    preferred_present_mode: vk::PresentModeKHR,
    surface: Option<GfxSurface>,

    /// 初始化阶段上传数据使用的 pool
    upload_pool: vk::CommandPool,
    queue: vk::Queue,

    device: GfxDevice,
    physical_device: GfxPhysicalDevice,
    debug_msger: GfxDebugMsger,
    instance: GfxInstance,

    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    _vk_entry: ash::Entry,
}

const ENGINE_NAME: &str = "Vela";

// new & init
impl VulkanBackend {
    pub fn new(create_info: VulkanBackendCreateInfo) -> GfxResult<Self> {
        let _span = vela_crate_tools::profile_span!("VulkanBackend::new");

        let vk_entry = unsafe { ash::Entry::load() }
            .map_err(|e| GfxError::Config(format!("failed to load vulkan entry: {e}")))?;

        let mut extra_exts: Vec<&'static CStr> = vec![];
        if let Some((display, _)) = create_info.window {
            let required = ash_window::enumerate_required_extensions(display)
                .vk_context("vkEnumerateRequiredExtensions")?;
            extra_exts.extend(required.iter().map(|ext| unsafe { CStr::from_ptr(*ext) }));
        }

        let instance = GfxInstance::new(&vk_entry, &create_info.app_name, ENGINE_NAME, &extra_exts)?;
        let debug_msger = GfxDebugMsger::new(&vk_entry, &instance.ash_instance)?;

        let surface = match create_info.window {
            Some((display, window)) => Some(GfxSurface::new(&vk_entry, &instance.ash_instance, display, window)?),
            None => None,
        };
        let physical_device =
            GfxPhysicalDevice::pick(&instance.ash_instance, surface.as_ref().map(|s| (&s.pf, s.handle)))?;
        let device = GfxDevice::new(
            &instance.ash_instance,
            physical_device.vk_handle,
            physical_device.gfx_queue_family_index,
        )?;
        let queue = unsafe { device.get_device_queue(physical_device.gfx_queue_family_index, 0) };
        device.set_object_debug_name(queue, "Queue::gfx");

        // vma 需要引用 Instance 以及 Device，因此在其他部分都初始化完成后再初始化
        let allocator = {
            let mut vma_ci =
                vk_mem::AllocatorCreateInfo::new(&instance.ash_instance, &device.device, physical_device.vk_handle);
            vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
            unsafe { vk_mem::Allocator::new(vma_ci) }.vk_context("vmaCreateAllocator")?
        };

        let upload_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(physical_device.gfx_queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT),
                None,
            )
        }
        .vk_context("vkCreateCommandPool")?;

        let swapchain = match &surface {
            Some(surface) => Some(GfxRenderSwapchain::new(
                &device,
                surface,
                physical_device.vk_handle,
                create_info.present_mode,
                create_info.window_extent,
                vk::SwapchainKHR::null(),
            )?),
            None => None,
        };

        Ok(Self {
            allocator: ManuallyDrop::new(allocator),
            buffers: RefCell::new(HashMap::new()),
            images: RefCell::new(HashMap::new()),
            swapchain: RefCell::new(swapchain),
            preferred_present_mode: create_info.present_mode,
            surface,
            upload_pool,
            queue,
            device,
            physical_device,
            debug_msger,
            instance,
            _vk_entry: vk_entry,
        })
    }
}
impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("destroying vulkan backend");
        unsafe {
            let _ = self.device.device_wait_idle();

            if let Some(swapchain) = self.swapchain.get_mut().take() {
                swapchain.destroy(&self.device);
            }
            self.device.destroy_command_pool(self.upload_pool, None);

            for (buffer, mut alloc) in self.buffers.get_mut().drain() {
                log::warn!("buffer {:?} leaked until backend shutdown", buffer);
                if alloc.map_ptr.is_some() {
                    self.allocator.unmap_memory(&mut alloc.allocation);
                }
                self.allocator.destroy_buffer(buffer, &mut alloc.allocation);
            }
            for (image, mut alloc) in self.images.get_mut().drain() {
                log::warn!("image {:?} leaked until backend shutdown", image);
                self.allocator.destroy_image(image, &mut alloc);
            }
            ManuallyDrop::drop(&mut self.allocator);
        }

        self.device.destroy();
        if let Some(surface) = &self.surface {
            surface.destroy();
        }
        self.debug_msger.destroy();
        self.instance.destroy();
    }
}
// tools
impl VulkanBackend {
    /// 录制并提交一次性的命令，阻塞到完成
    fn one_time_submit(&self, debug_name: &str, func: impl FnOnce(vk::CommandBuffer)) -> GfxResult<()> {
        let device = &self.device;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.upload_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }.vk_context("vkAllocateCommandBuffers")?[0];
        device.set_object_debug_name(cmd, &format!("CommandBuffer::{debug_name}"));

        let result = (|| unsafe {
            device
                .begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .vk_context("vkBeginCommandBuffer")?;
            func(cmd);
            device.end_command_buffer(cmd).vk_context("vkEndCommandBuffer")?;

            let fence = device.create_fence(&vk::FenceCreateInfo::default(), None).vk_context("vkCreateFence")?;
            let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
            let submit_result = device
                .queue_submit2(self.queue, std::slice::from_ref(&submit), fence)
                .vk_context("vkQueueSubmit2")
                .and_then(|_| device.wait_for_fences(&[fence], true, u64::MAX).vk_context("vkWaitForFences"));
            device.destroy_fence(fence, None);
            submit_result
        })();

        unsafe { device.free_command_buffers(self.upload_pool, &[cmd]) };
        result
    }

    fn image_subresource_range(desc: &ImageDesc) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: desc.aspect(),
            base_mip_level: 0,
            level_count: desc.mip_levels,
            base_array_layer: 0,
            layer_count: desc.array_layers,
        }
    }
}

impl GfxBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn create_fence(&self, signaled: bool, debug_name: &str) -> GfxResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .vk_context("vkCreateFence")?;
        self.device.set_object_debug_name(fence, &format!("Fence::{debug_name}"));
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> GfxResult<()> {
        unsafe { self.device.wait_for_fences(fences, true, timeout_ns) }.vk_context("vkWaitForFences")
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()> {
        unsafe { self.device.reset_fences(fences) }.vk_context("vkResetFences")
    }

    fn fence_signaled(&self, fence: vk::Fence) -> GfxResult<bool> {
        unsafe { self.device.get_fence_status(fence) }.vk_context("vkGetFenceStatus")
    }

    fn create_semaphore(&self, debug_name: &str) -> GfxResult<vk::Semaphore> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .vk_context("vkCreateSemaphore")?;
        self.device.set_object_debug_name(semaphore, &format!("Semaphore::{debug_name}"));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> GfxResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.physical_device.gfx_queue_family_index)
            .flags(flags);
        let pool =
            unsafe { self.device.create_command_pool(&create_info, None) }.vk_context("vkCreateCommandPool")?;
        self.device.set_object_debug_name(pool, &format!("CommandPool::{debug_name}"));
        Ok(pool)
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> GfxResult<()> {
        unsafe { self.device.reset_command_pool(pool, vk::CommandPoolResetFlags::RELEASE_RESOURCES) }
            .vk_context("vkResetCommandPool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool, debug_name: &str) -> GfxResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&info) }.vk_context("vkAllocateCommandBuffers")?[0];
        self.device.set_object_debug_name(cmd, &format!("CommandBuffer::{debug_name}"));
        Ok(cmd)
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> GfxResult<()> {
        unsafe { self.device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default().flags(flags)) }
            .vk_context("vkBeginCommandBuffer")
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> GfxResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }.vk_context("vkEndCommandBuffer")
    }

    fn record(&self, cmd: vk::CommandBuffer, command: &GfxCommand) {
        let device = &self.device;
        unsafe {
            match command {
                GfxCommand::BeginLabel { name, color } => {
                    let name = CString::new(name.as_str()).unwrap_or_default();
                    device.debug_utils.cmd_begin_debug_utils_label(
                        cmd,
                        &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(*color),
                    );
                }
                GfxCommand::EndLabel => device.debug_utils.cmd_end_debug_utils_label(cmd),
                GfxCommand::BeginRendering(rendering) => {
                    let to_vk = |attach: &crate::commands::command::AttachmentDesc| {
                        vk::RenderingAttachmentInfo::default()
                            .image_view(attach.view)
                            .image_layout(attach.layout)
                            .load_op(attach.load_op)
                            .store_op(attach.store_op)
                            .clear_value(attach.clear.to_vk())
                    };
                    let colors = rendering.color_attachments.iter().map(to_vk).collect_vec();
                    let depth = rendering.depth_attachment.as_ref().map(to_vk);
                    let mut info = vk::RenderingInfo::default()
                        .render_area(rendering.extent.into())
                        .layer_count(rendering.layer_count)
                        .color_attachments(&colors);
                    if let Some(depth) = &depth {
                        info = info.depth_attachment(depth);
                    }
                    device.cmd_begin_rendering(cmd, &info);
                }
                GfxCommand::EndRendering => device.cmd_end_rendering(cmd),
                GfxCommand::SetViewport(extent) => {
                    let viewport = vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: extent.width as f32,
                        height: extent.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    device.cmd_set_viewport(cmd, 0, &[viewport]);
                    device.cmd_set_scissor(cmd, 0, &[(*extent).into()]);
                }
                GfxCommand::BindPipeline { bind_point, pipeline } => {
                    device.cmd_bind_pipeline(cmd, *bind_point, *pipeline)
                }
                GfxCommand::BindDescriptorSets {
                    bind_point,
                    layout,
                    first_set,
                    sets,
                } => device.cmd_bind_descriptor_sets(cmd, *bind_point, *layout, *first_set, sets, &[]),
                GfxCommand::PushConstants {
                    layout,
                    stages,
                    offset,
                    data,
                } => device.cmd_push_constants(cmd, *layout, *stages, *offset, data),
                GfxCommand::BindVertexBuffers {
                    first_binding,
                    buffers,
                    offsets,
                } => device.cmd_bind_vertex_buffers(cmd, *first_binding, buffers, offsets),
                GfxCommand::BindIndexBuffer {
                    buffer,
                    offset,
                    index_type,
                } => device.cmd_bind_index_buffer(cmd, *buffer, *offset, *index_type),
                GfxCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => device.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance),
                GfxCommand::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => device.cmd_draw_indexed(
                    cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                ),
                GfxCommand::Dispatch { group_count } => {
                    device.cmd_dispatch(cmd, group_count[0], group_count[1], group_count[2])
                }
                GfxCommand::PipelineBarrier {
                    image_barriers,
                    buffer_barriers,
                } => {
                    let image_barriers = image_barriers.iter().map(|b| *b.inner()).collect_vec();
                    let buffer_barriers = buffer_barriers.iter().map(|b| *b.inner()).collect_vec();
                    let dependency_info = vk::DependencyInfo::default()
                        .image_memory_barriers(&image_barriers)
                        .buffer_memory_barriers(&buffer_barriers);
                    device.cmd_pipeline_barrier2(cmd, &dependency_info);
                }
                GfxCommand::UpdateBuffer { buffer, offset, data } => {
                    device.cmd_update_buffer(cmd, *buffer, *offset, data)
                }
                GfxCommand::CopyBuffer { src, dst, regions } => device.cmd_copy_buffer(cmd, *src, *dst, regions),
                GfxCommand::BlitImage(blit) => {
                    let layers = vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    let corner = |extent: vk::Extent2D| vk::Offset3D {
                        x: extent.width as i32,
                        y: extent.height as i32,
                        z: 1,
                    };
                    let region = vk::ImageBlit {
                        src_subresource: layers,
                        src_offsets: [vk::Offset3D::default(), corner(blit.src_extent)],
                        dst_subresource: layers,
                        dst_offsets: [vk::Offset3D::default(), corner(blit.dst_extent)],
                    };
                    device.cmd_blit_image(
                        cmd,
                        blit.src,
                        blit.src_layout,
                        blit.dst,
                        blit.dst_layout,
                        &[region],
                        blit.filter,
                    );
                }
            }
        }
    }

    fn queue_submit(&self, submits: &[GfxSubmitInfo], fence: Option<vk::Fence>) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("VulkanBackend::queue_submit");
        let to_semaphore_info = |info: &crate::commands::submit_info::SemaphoreSubmit| {
            vk::SemaphoreSubmitInfo::default().semaphore(info.semaphore).stage_mask(info.stage)
        };
        let storage = submits
            .iter()
            .map(|submit| {
                (
                    submit
                        .command_buffers
                        .iter()
                        .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
                        .collect_vec(),
                    submit.wait_infos.iter().map(to_semaphore_info).collect_vec(),
                    submit.signal_infos.iter().map(to_semaphore_info).collect_vec(),
                )
            })
            .collect_vec();
        let submit_infos = storage
            .iter()
            .map(|(cmds, waits, signals)| {
                vk::SubmitInfo2::default()
                    .command_buffer_infos(cmds)
                    .wait_semaphore_infos(waits)
                    .signal_semaphore_infos(signals)
            })
            .collect_vec();

        unsafe { self.device.queue_submit2(self.queue, &submit_infos, fence.unwrap_or_default()) }
            .vk_context("vkQueueSubmit2")
    }

    fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle() }.vk_context("vkDeviceWaitIdle")
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBindingDesc],
        debug_name: &str,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        let bindings = bindings.iter().map(DescriptorBindingDesc::to_vk).collect_vec();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .vk_context("vkCreateDescriptorSetLayout")?;
        self.device.set_object_debug_name(layout, &format!("DescriptorSetLayout::{debug_name}"));
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc, debug_name: &str) -> GfxResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default().max_sets(desc.max_sets).pool_sizes(&desc.pool_sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .vk_context("vkCreateDescriptorPool")?;
        self.device.set_object_debug_name(pool, &format!("DescriptorPool::{debug_name}"));
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> GfxResult<()> {
        unsafe { self.device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
            .vk_context("vkResetDescriptorPool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> GfxResult<vk::DescriptorSet> {
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&layout));
        let sets =
            unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.vk_context("vkAllocateDescriptorSets")?;
        Ok(sets[0])
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        // info 需要在 vk::WriteDescriptorSet 的生命周期内保持有效
        let buffer_infos = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::UniformBuffer { buffer, offset, range }
                | DescriptorResource::StorageBuffer { buffer, offset, range } => {
                    vk::DescriptorBufferInfo { buffer, offset, range }
                }
                _ => vk::DescriptorBufferInfo::default(),
            })
            .collect_vec();
        let image_infos = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::CombinedImageSampler { view, sampler, layout } => vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                },
                DescriptorResource::StorageImage { view } => vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view,
                    image_layout: vk::ImageLayout::GENERAL,
                },
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect_vec();

        let vk_writes = writes
            .iter()
            .enumerate()
            .map(|(idx, write)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.resource.descriptor_type());
                match write.resource {
                    DescriptorResource::UniformBuffer { .. } | DescriptorResource::StorageBuffer { .. } => {
                        vk_write.buffer_info(std::slice::from_ref(&buffer_infos[idx]))
                    }
                    _ => vk_write.image_info(std::slice::from_ref(&image_infos[idx])),
                }
            })
            .collect_vec();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_buffer(&self, desc: &BufferDesc, debug_name: &str) -> GfxResult<vk::Buffer> {
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if desc.host_visible {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, 8) }
            .vk_context("vmaCreateBuffer")?;
        let map_ptr = if desc.host_visible {
            Some(unsafe { self.allocator.map_memory(&mut allocation) }.vk_context("vmaMapMemory")?)
        } else {
            None
        };

        self.device.set_object_debug_name(buffer, &format!("Buffer::{debug_name}"));
        self.buffers.borrow_mut().insert(
            buffer,
            BufferAllocation {
                allocation,
                map_ptr,
                size: desc.size,
            },
        );
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let buffers = self.buffers.borrow();
        let alloc = buffers.get(&buffer).ok_or_else(|| GfxError::InvalidHandle(format!("buffer {buffer:?}")))?;
        let map_ptr = alloc.map_ptr.ok_or_else(|| GfxError::InvalidHandle(format!("buffer {buffer:?} is not mapped")))?;
        let end = offset + data.len() as vk::DeviceSize;
        if end > alloc.size {
            return Err(GfxError::BudgetExhausted {
                budget: "buffer-write",
                requested: end as usize,
                capacity: alloc.size as usize,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), map_ptr.add(offset as usize), data.len());
        }
        self.allocator
            .flush_allocation(&alloc.allocation, offset, data.len() as vk::DeviceSize)
            .vk_context("vmaFlushAllocation")
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let Some(mut alloc) = self.buffers.borrow_mut().remove(&buffer) else {
            log::error!("destroy unknown buffer {:?}", buffer);
            return;
        };
        unsafe {
            if alloc.map_ptr.is_some() {
                self.allocator.unmap_memory(&mut alloc.allocation);
            }
            self.allocator.destroy_buffer(buffer, &mut alloc.allocation);
        }
    }

    fn create_image(&self, desc: &ImageDesc, debug_name: &str) -> GfxResult<vk::Image> {
        let image_ci = vk::ImageCreateInfo::default()
            .flags(if desc.cube_compatible {
                vk::ImageCreateFlags::CUBE_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            })
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent.into())
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) =
            unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }.vk_context("vmaCreateImage")?;
        self.device.set_object_debug_name(image, &format!("Image::{debug_name}"));
        self.images.borrow_mut().insert(image, allocation);
        Ok(image)
    }

    fn upload_image(&self, image: vk::Image, desc: &ImageDesc, data: &[u8]) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("VulkanBackend::upload_image");
        let stage_desc = BufferDesc::host_visible(data.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC);
        let stage_buffer = self.create_buffer(&stage_desc, "image-upload-stage")?;
        let write_result = self.write_buffer(stage_buffer, 0, data);

        let range = Self::image_subresource_range(desc);
        let layer_size = (data.len() as u32 / desc.array_layers.max(1)) as vk::DeviceSize;
        let result = write_result.and_then(|_| {
            self.one_time_submit("image-upload", |cmd| unsafe {
                let to_transfer = vk::ImageMemoryBarrier2::default()
                    .image(image)
                    .subresource_range(range)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                    .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE);
                self.device
                    .cmd_pipeline_barrier2(cmd, &vk::DependencyInfo::default().image_memory_barriers(&[to_transfer]));

                let regions = (0..desc.array_layers)
                    .map(|layer| vk::BufferImageCopy {
                        buffer_offset: layer as vk::DeviceSize * layer_size,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: desc.aspect(),
                            mip_level: 0,
                            base_array_layer: layer,
                            layer_count: 1,
                        },
                        image_extent: desc.extent.into(),
                        ..Default::default()
                    })
                    .collect_vec();
                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    stage_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );

                let to_shader_read = vk::ImageMemoryBarrier2::default()
                    .image(image)
                    .subresource_range(range)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                    .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
                    .dst_access_mask(vk::AccessFlags2::SHADER_READ);
                self.device.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo::default().image_memory_barriers(&[to_shader_read]),
                );
            })
        });
        self.destroy_buffer(stage_buffer);
        result
    }

    fn destroy_image(&self, image: vk::Image) {
        let Some(mut allocation) = self.images.borrow_mut().remove(&image) else {
            log::error!("destroy unknown image {:?}", image);
            return;
        };
        unsafe { self.allocator.destroy_image(image, &mut allocation) }
    }

    fn create_image_view(&self, desc: &ImageViewDesc, debug_name: &str) -> GfxResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: desc.base_mip,
                level_count: desc.mip_count,
                base_array_layer: desc.base_layer,
                layer_count: desc.layer_count,
            });
        let view = unsafe { self.device.create_image_view(&create_info, None) }.vk_context("vkCreateImageView")?;
        self.device.set_object_debug_name(view, &format!("ImageView::{debug_name}"));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_sampler(&self, desc: &SamplerDesc, debug_name: &str) -> GfxResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .max_lod(desc.max_lod)
            .border_color(desc.border_color)
            .compare_enable(desc.compare_op.is_some())
            .compare_op(desc.compare_op.unwrap_or(vk::CompareOp::ALWAYS));
        let sampler = unsafe { self.device.create_sampler(&create_info, None) }.vk_context("vkCreateSampler")?;
        self.device.set_object_debug_name(sampler, &format!("Sampler::{debug_name}"));
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, code: &[u32], debug_name: &str) -> GfxResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }.map_err(|e| {
            GfxError::ShaderLoad {
                name: debug_name.to_string(),
                reason: format!("vkCreateShaderModule: {e:?}"),
            }
        })?;
        self.device.set_object_debug_name(module, &format!("ShaderModule::{debug_name}"));
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        debug_name: &str,
    ) -> GfxResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .vk_context("vkCreatePipelineLayout")?;
        self.device.set_object_debug_name(layout, &format!("PipelineLayout::{debug_name}"));
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc, debug_name: &str) -> GfxResult<vk::Pipeline> {
        // dynamic rendering 需要的 framebuffer 信息
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&desc.color_formats)
            .depth_attachment_format(desc.depth_format);

        let entry_points = desc
            .stages
            .iter()
            .map(|stage| CString::new(stage.entry_point.as_str()).map_err(|e| GfxError::Config(e.to_string())))
            .collect::<GfxResult<Vec<_>>>()?;
        let stages = desc
            .stages
            .iter()
            .zip(&entry_points)
            .map(|(stage, entry)| {
                vk::PipelineShaderStageCreateInfo::default().stage(stage.stage).module(stage.module).name(entry)
            })
            .collect_vec();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology).primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let (bias_constant, bias_slope) = desc.depth_bias.unwrap_or((0.0, 0.0));
        let rasterize_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(desc.depth_clamp)
            .rasterizer_discard_enable(false)
            .polygon_mode(desc.polygon_mode)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(desc.depth_bias.is_some())
            .depth_bias_constant_factor(bias_constant)
            .depth_bias_slope_factor(bias_slope);

        let msaa_state =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // 混合设置：需要为每个 color attachment 分别指定
        let blend_states = desc.blend_modes.iter().map(|mode| mode.to_vk()).collect_vec();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().logic_op_enable(false).attachments(&blend_states);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test.is_some())
            .depth_compare_op(desc.depth_test.unwrap_or(vk::CompareOp::ALWAYS))
            .depth_write_enable(desc.depth_write)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterize_state)
            .multisample_state(&msaa_state)
            .color_blend_state(&color_blend_state)
            .depth_stencil_state(&depth_stencil_state)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .push_next(&mut attach_info);

        let pipelines = unsafe {
            self.device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        }
        .map_err(|(_, result)| GfxError::vk("vkCreateGraphicsPipelines", result))?;
        self.device.set_object_debug_name(pipelines[0], &format!("GraphicsPipeline::{debug_name}"));
        Ok(pipelines[0])
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc, debug_name: &str) -> GfxResult<vk::Pipeline> {
        let entry = CString::new(desc.stage.entry_point.as_str()).map_err(|e| GfxError::Config(e.to_string()))?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(desc.stage.module)
            .name(&entry);
        let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(desc.layout);
        let pipelines = unsafe {
            self.device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        }
        .map_err(|(_, result)| GfxError::vk("vkCreateComputePipelines", result))?;
        self.device.set_object_debug_name(pipelines[0], &format!("ComputePipeline::{debug_name}"));
        Ok(pipelines[0])
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn swapchain_info(&self) -> Option<SwapchainInfo> {
        self.swapchain.borrow().as_ref().map(GfxRenderSwapchain::info)
    }

    fn recreate_swapchain(&self, extent: vk::Extent2D) -> GfxResult<SwapchainInfo> {
        let _span = vela_crate_tools::profile_span!("VulkanBackend::recreate_swapchain");
        let surface = self.surface.as_ref().ok_or_else(|| GfxError::InvalidHandle("surface".to_string()))?;

        // 旧的 swapchain image 可能仍在被 present 使用
        self.wait_idle()?;
        let mut swapchain = self.swapchain.borrow_mut();
        let old = swapchain.take();
        let present_mode = old.as_ref().map_or(self.preferred_present_mode, GfxRenderSwapchain::present_mode);
        let new = GfxRenderSwapchain::new(
            &self.device,
            surface,
            self.physical_device.vk_handle,
            present_mode,
            extent,
            old.as_ref().map_or(vk::SwapchainKHR::null(), GfxRenderSwapchain::handle),
        );
        if let Some(old) = old {
            old.destroy(&self.device);
        }
        let new = new?;
        let info = new.info();
        *swapchain = Some(new);
        Ok(info)
    }

    fn acquire_next_image(&self, signal_semaphore: vk::Semaphore) -> GfxResult<AcquireOutcome> {
        let swapchain = self.swapchain.borrow();
        let swapchain = swapchain.as_ref().ok_or_else(|| GfxError::InvalidHandle("swapchain".to_string()))?;
        swapchain.acquire_next_image(&self.device, signal_semaphore)
    }

    fn present(&self, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> GfxResult<PresentOutcome> {
        let swapchain = self.swapchain.borrow();
        let swapchain = swapchain.as_ref().ok_or_else(|| GfxError::InvalidHandle("swapchain".to_string()))?;
        swapchain.present_image(&self.device, self.queue, image_index, wait_semaphores)
    }
}
