use ash::vk;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};

/// attachment 的清屏值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// dynamic rendering 的一个 attachment
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDesc {
    pub view: vk::ImageView,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: ClearValue,
}

impl AttachmentDesc {
    /// 清屏后写入
    pub fn clear(view: vk::ImageView, layout: vk::ImageLayout, clear: ClearValue) -> Self {
        Self {
            view,
            layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear,
        }
    }

    /// 保留之前的内容
    pub fn load(view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self {
            view,
            layout,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear: ClearValue::Color([0.0; 4]),
        }
    }
}

/// 对应 `vkCmdBeginRendering` 的参数
#[derive(Debug, Clone)]
pub struct RenderingDesc {
    pub extent: vk::Extent2D,
    pub layer_count: u32,
    pub color_attachments: Vec<AttachmentDesc>,
    pub depth_attachment: Option<AttachmentDesc>,
}

impl RenderingDesc {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            layer_count: 1,
            color_attachments: vec![],
            depth_attachment: None,
        }
    }

    /// builder
    pub fn color(mut self, attachment: AttachmentDesc) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    /// builder
    pub fn depth(mut self, attachment: AttachmentDesc) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }
}

/// image 之间的 blit 区域，只拷贝 mip 0 的单个 layer
#[derive(Debug, Clone, Copy)]
pub struct BlitDesc {
    pub src: vk::Image,
    pub src_layout: vk::ImageLayout,
    pub src_extent: vk::Extent2D,
    pub dst: vk::Image,
    pub dst_layout: vk::ImageLayout,
    pub dst_extent: vk::Extent2D,
    pub filter: vk::Filter,
}

/// 录制到 command buffer 中的一条命令
///
/// 命令持有自己的数据，因此可以被 headless backend 原样记录下来
#[derive(Debug, Clone)]
pub enum GfxCommand {
    BeginLabel {
        name: String,
        color: [f32; 4],
    },
    EndLabel,

    BeginRendering(RenderingDesc),
    EndRendering,
    /// viewport 与 scissor 都设置为整个 extent，viewport 的 y 轴翻转由 shader 负责
    SetViewport(vk::Extent2D),

    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },

    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        group_count: [u32; 3],
    },

    PipelineBarrier {
        image_barriers: Vec<GfxImageBarrier>,
        buffer_barriers: Vec<GfxBufferBarrier>,
    },
    /// 数据大小限制为 64KB，需要在 render pass 之外调用
    UpdateBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    BlitImage(BlitDesc),
}

impl GfxCommand {
    /// 用于日志和调试的简短名称
    pub fn kind(&self) -> &'static str {
        match self {
            GfxCommand::BeginLabel { .. } => "BeginLabel",
            GfxCommand::EndLabel => "EndLabel",
            GfxCommand::BeginRendering(_) => "BeginRendering",
            GfxCommand::EndRendering => "EndRendering",
            GfxCommand::SetViewport(_) => "SetViewport",
            GfxCommand::BindPipeline { .. } => "BindPipeline",
            GfxCommand::BindDescriptorSets { .. } => "BindDescriptorSets",
            GfxCommand::PushConstants { .. } => "PushConstants",
            GfxCommand::BindVertexBuffers { .. } => "BindVertexBuffers",
            GfxCommand::BindIndexBuffer { .. } => "BindIndexBuffer",
            GfxCommand::Draw { .. } => "Draw",
            GfxCommand::DrawIndexed { .. } => "DrawIndexed",
            GfxCommand::Dispatch { .. } => "Dispatch",
            GfxCommand::PipelineBarrier { .. } => "PipelineBarrier",
            GfxCommand::UpdateBuffer { .. } => "UpdateBuffer",
            GfxCommand::CopyBuffer { .. } => "CopyBuffer",
            GfxCommand::BlitImage(_) => "BlitImage",
        }
    }
}
