use std::rc::Rc;

use ash::vk;

use crate::{
    backend::GfxBackend,
    gfx_error::GfxResult,
    pipelines::{compute_pipeline::ComputePipelineDesc, pipeline_layout::GfxPipelineLayout, shader::ShaderStageDesc},
};

/// color attachment 的混合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    /// dst + src，用于叠加 overlay
    Additive,
    /// src * a + dst * (1 - a)
    AlphaBlend,
}

impl BlendMode {
    pub fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            BlendMode::Opaque => state.blend_enable(false),
            BlendMode::Additive => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD),
            BlendMode::AlphaBlend => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// graphics pipeline 的创建参数，只持有 handle 和普通数据
///
/// viewport 和 scissor 总是 dynamic state
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// dynamic render 需要的 framebuffer 信息
    pub color_formats: Vec<vk::Format>,
    /// `UNDEFINED` 表示不使用这个 attachment
    pub depth_format: vk::Format,

    pub stages: Vec<ShaderStageDesc>,
    pub layout: vk::PipelineLayout,

    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,

    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    /// 阴影贴图使用：超出 near/far 的几何体被 clamp 而不是裁剪
    pub depth_clamp: bool,
    /// (constant factor, slope factor)
    pub depth_bias: Option<(f32, f32)>,

    /// None 表示关闭深度测试
    pub depth_test: Option<vk::CompareOp>,
    pub depth_write: bool,

    pub blend_modes: Vec<BlendMode>,
}

impl GraphicsPipelineDesc {
    pub fn new(layout: &GfxPipelineLayout, stages: Vec<ShaderStageDesc>) -> Self {
        Self {
            color_formats: vec![],
            depth_format: vk::Format::UNDEFINED,
            stages,
            layout: layout.handle(),
            vertex_bindings: vec![],
            vertex_attributes: vec![],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_clamp: false,
            depth_bias: None,
            depth_test: Some(vk::CompareOp::LESS),
            depth_write: true,
            blend_modes: vec![],
        }
    }
}
// builder
impl GraphicsPipelineDesc {
    /// 每个 color attachment 使用相同的 blend 方式
    pub fn attachments(mut self, color_formats: &[vk::Format], depth_format: Option<vk::Format>, blend: BlendMode) -> Self {
        self.color_formats = color_formats.to_vec();
        self.blend_modes = vec![blend; color_formats.len()];
        self.depth_format = depth_format.unwrap_or(vk::Format::UNDEFINED);
        self
    }

    pub fn vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn depth_test(mut self, depth_test_op: Option<vk::CompareOp>, depth_write: bool) -> Self {
        self.depth_test = depth_test_op;
        self.depth_write = depth_write;
        self
    }

    pub fn depth_bias(mut self, constant: f32, slope: f32) -> Self {
        self.depth_bias = Some((constant, slope));
        self
    }

    pub fn depth_clamp(mut self, enable: bool) -> Self {
        self.depth_clamp = enable;
        self
    }
}

/// graphics 和 compute pipeline 共用的 RAII 封装
pub struct GfxPipeline {
    backend: Rc<dyn GfxBackend>,
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
}
impl GfxPipeline {
    pub fn new_graphics(backend: Rc<dyn GfxBackend>, desc: &GraphicsPipelineDesc, debug_name: &str) -> GfxResult<Self> {
        debug_assert_eq!(desc.color_formats.len(), desc.blend_modes.len());
        let handle = backend.create_graphics_pipeline(desc, debug_name)?;
        Ok(Self {
            backend,
            handle,
            layout: desc.layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    pub fn new_compute(backend: Rc<dyn GfxBackend>, desc: &ComputePipelineDesc, debug_name: &str) -> GfxResult<Self> {
        let handle = backend.create_compute_pipeline(desc, debug_name)?;
        Ok(Self {
            backend,
            handle,
            layout: desc.layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}
impl Drop for GfxPipeline {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.handle);
    }
}
