use std::rc::Rc;

use ash::vk;

use crate::{
    backend::GfxBackend,
    basic::color::LabelColor,
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        command::{BlitDesc, GfxCommand, RenderingDesc},
    },
    gfx_error::GfxResult,
};

/// 命令缓冲封装
///
/// 所有 `cmd_*` 方法都转换为 [`GfxCommand`] 交给 backend 录制。
/// command buffer 的内存属于 command pool，随 pool 的 reset 一起回收，因此这里可以 Clone。
///
/// # 使用示例
/// ```ignore
/// let cmd = pool.alloc_command_buffer("frame-A")?;
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "frame-A")?;
/// cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
/// // 绘制命令...
/// cmd.end()?;
/// ```
#[derive(Clone)]
pub struct GfxCommandBuffer {
    backend: Rc<dyn GfxBackend>,
    vk_handle: vk::CommandBuffer,
    name: String,
}
// new & init
impl GfxCommandBuffer {
    pub(crate) fn new(backend: Rc<dyn GfxBackend>, vk_handle: vk::CommandBuffer, name: &str) -> Self {
        Self {
            backend,
            vk_handle,
            name: name.to_string(),
        }
    }
}
// Basic 命令
impl GfxCommandBuffer {
    /// 开始录制 command，自动设置 debug label
    #[inline]
    pub fn begin(&self, usage_flag: vk::CommandBufferUsageFlags, debug_label_name: &str) -> GfxResult<()> {
        self.backend.begin_command_buffer(self.vk_handle, usage_flag)?;
        self.begin_label(debug_label_name, LabelColor::COLOR_CMD);
        Ok(())
    }

    /// 结束录制 command，同时结束 debug label
    #[inline]
    pub fn end(&self) -> GfxResult<()> {
        self.end_label();
        self.backend.end_command_buffer(self.vk_handle)
    }

    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: [f32; 4]) {
        self.record(GfxCommand::BeginLabel {
            name: label_name.to_string(),
            color: label_color,
        });
    }

    #[inline]
    pub fn end_label(&self) {
        self.record(GfxCommand::EndLabel);
    }

    #[inline]
    fn record(&self, command: GfxCommand) {
        self.backend.record(self.vk_handle, &command);
    }
}
// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
// 数据传输类型
impl GfxCommandBuffer {
    /// 将 data 传输到 buffer 中，大小限制：65536Bytes=64KB
    ///
    /// 需要在 render pass 之外进行，注意同步
    #[inline]
    pub fn cmd_update_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        debug_assert!(data.len() <= 65536);
        self.record(GfxCommand::UpdateBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    #[inline]
    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.record(GfxCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    #[inline]
    pub fn cmd_blit_image(&self, blit: BlitDesc) {
        self.record(GfxCommand::BlitImage(blit));
    }

    /// - command type: state
    /// - 支持的 queue: graphics, compute
    #[inline]
    pub fn cmd_push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(GfxCommand::PushConstants {
            layout: pipeline_layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }
}
// 绘制类型的命令
impl GfxCommandBuffer {
    #[inline]
    pub fn cmd_begin_rendering(&self, rendering: &RenderingDesc) {
        self.record(GfxCommand::BeginRendering(rendering.clone()));
    }

    #[inline]
    pub fn cmd_end_rendering(&self) {
        self.record(GfxCommand::EndRendering);
    }

    #[inline]
    pub fn cmd_set_viewport(&self, extent: vk::Extent2D) {
        self.record(GfxCommand::SetViewport(extent));
    }

    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(GfxCommand::BindPipeline { bind_point, pipeline });
    }

    #[inline]
    pub fn cmd_bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.record(GfxCommand::BindDescriptorSets {
            bind_point,
            layout: pipeline_layout,
            first_set,
            sets: descriptor_sets.to_vec(),
        });
    }

    /// buffers 每个 vertex buffer 以及 offset
    #[inline]
    pub fn cmd_bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        debug_assert_eq!(buffers.len(), offsets.len());
        self.record(GfxCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    #[inline]
    pub fn cmd_bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.record(GfxCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    /// 不使用 index buffer 的绘制
    #[inline]
    pub fn cmd_draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.record(GfxCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    #[inline]
    pub fn cmd_draw_indexed(
        &self,
        index_count: u32,
        first_index: u32,
        instance_count: u32,
        first_instance: u32,
        vertex_offset: i32,
    ) {
        self.record(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    #[inline]
    pub fn cmd_dispatch(&self, group_count: [u32; 3]) {
        self.record(GfxCommand::Dispatch { group_count });
    }
}
// 同步命令
impl GfxCommandBuffer {
    #[inline]
    pub fn cmd_pipeline_barrier(&self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
        if image_barriers.is_empty() && buffer_barriers.is_empty() {
            return;
        }
        self.record(GfxCommand::PipelineBarrier {
            image_barriers: image_barriers.to_vec(),
            buffer_barriers: buffer_barriers.to_vec(),
        });
    }

    #[inline]
    pub fn image_memory_barrier(&self, barriers: &[GfxImageBarrier]) {
        self.cmd_pipeline_barrier(barriers, &[]);
    }

    #[inline]
    pub fn buffer_memory_barrier(&self, barriers: &[GfxBufferBarrier]) {
        self.cmd_pipeline_barrier(&[], barriers);
    }
}
