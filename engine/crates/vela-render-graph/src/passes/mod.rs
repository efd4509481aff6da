//! SceneRenderer 的各个 pass
//!
//! 每个 pass 的生命周期：
//! - `new`：创建与尺寸无关的 pipeline
//! - `rebuild`：创建或重建依赖 viewport 尺寸的 target，构造时以及 resize 之后调用
//! - `prepare`：写入本帧需要的 descriptor，此时还没有开始录制命令
//! - `record`：录制命令，通过 [`SceneTargets`] 中记录的状态生成 barrier

use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    GfxResult,
    commands::command_buffer::GfxCommandBuffer,
    pipelines::{
        graphics_pipeline::{GfxPipeline, GraphicsPipelineDesc},
        pipeline_layout::GfxPipelineLayout,
        shader::{GfxShaderModule, ShaderStageDesc},
    },
    resources::vertex_layout::StaticMeshVertexLayout,
};
use vela_scene::{camera::Camera, lights::LightEnvironment, mesh::StaticMesh};

use crate::{
    draw_list::{DrawBatch, OverlayDraw, PackedDraws},
    render_context::{RenderContext, RendererId},
    scene_targets::{SceneTargets, TargetId},
    shadow_cascade::{SHADOW_CASCADE_COUNT, ShadowCascade},
};

pub mod bloom_pass;
pub mod composite_pass;
pub mod geometry_pass;
pub mod late_composite_pass;
pub mod light_culling_pass;
pub mod pre_depth_pass;
pub mod present_blit_pass;
pub mod shadow_pass;

/// 呈现到 swapchain 时的目标 image
#[derive(Debug, Clone, Copy)]
pub struct PresentTarget {
    pub image: vk::Image,
    pub extent: vk::Extent2D,
}

/// 一帧内所有 pass 共享的只读数据
pub struct FrameData<'a> {
    pub renderer_id: RendererId,
    pub extent: vk::Extent2D,
    pub camera: &'a Camera,
    pub lights: &'a LightEnvironment,
    pub cascades: &'a [ShadowCascade; SHADOW_CASCADE_COUNT],
    pub draws: &'a PackedDraws,
    pub overlays: &'a [OverlayDraw],
    pub transform_buffer: vk::Buffer,
    /// 本帧的 set 0
    pub frame_set: vk::DescriptorSet,
    pub present_target: Option<PresentTarget>,
}

pub trait ScenePass {
    fn name(&self) -> &'static str;

    /// 读取的其他 pass 的 target
    fn inputs(&self) -> &'static [TargetId] {
        &[]
    }

    /// 自己创建的 target
    fn outputs(&self) -> &'static [TargetId] {
        &[]
    }

    /// 输出是否依赖 viewport 尺寸
    fn size_dependent(&self) -> bool;

    fn rebuild(&mut self, ctx: &mut RenderContext, targets: &mut SceneTargets, extent: vk::Extent2D) -> GfxResult<()>;

    fn prepare(&mut self, _ctx: &mut RenderContext, _targets: &SceneTargets, _frame: &FrameData) -> GfxResult<()> {
        Ok(())
    }

    fn record(
        &mut self,
        ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()>;
}

/// 加载 shader 并组装 stage 列表
pub(crate) fn load_stages(
    ctx: &mut RenderContext,
    stages: &[(vk::ShaderStageFlags, &str)],
) -> GfxResult<(Vec<Rc<GfxShaderModule>>, Vec<ShaderStageDesc>)> {
    let modules = stages
        .iter()
        .map(|(_, name)| ctx.shader_library.load(name))
        .collect::<GfxResult<Vec<_>>>()?;
    let stage_descs =
        stages.iter().zip(modules.iter()).map(|((stage, _), module)| ShaderStageDesc::new(*stage, module)).collect();
    Ok((modules, stage_descs))
}

/// 创建 graphics pipeline，`configure` 用于修改默认的 desc
pub(crate) fn create_graphics_pipeline(
    ctx: &mut RenderContext,
    layout: &GfxPipelineLayout,
    stages: &[(vk::ShaderStageFlags, &str)],
    configure: impl FnOnce(GraphicsPipelineDesc) -> GraphicsPipelineDesc,
    name: &str,
) -> GfxResult<GfxPipeline> {
    let (_modules, stage_descs) = load_stages(ctx, stages)?;
    let desc = configure(GraphicsPipelineDesc::new(layout, stage_descs));
    GfxPipeline::new_graphics(ctx.backend.clone(), &desc, name)
}

/// 静态网格使用的 vertex input：binding 0 为顶点，binding 1 为 instance transform
pub(crate) fn static_mesh_vertex_input(desc: GraphicsPipelineDesc) -> GraphicsPipelineDesc {
    desc.vertex_input(
        StaticMeshVertexLayout::vertex_input_bindings(),
        StaticMeshVertexLayout::vertex_input_attributes(),
    )
}

/// 绘制 batch 中的一个 submesh；mesh 已经失效时跳过这个 batch
pub(crate) fn draw_batch(
    ctx: &RenderContext,
    cmd: &GfxCommandBuffer,
    frame: &FrameData,
    batch: &DrawBatch,
    filter: impl Fn(&StaticMesh) -> bool,
) -> bool {
    let Some(mesh) = ctx.assets.get(batch.key.mesh) else {
        log::warn!("skip draw of missing mesh {:?}", batch.key.mesh);
        return false;
    };
    if !filter(mesh) {
        return false;
    }
    let Some(submesh) = mesh.submesh(batch.key.submesh_index) else {
        log::warn!("skip draw of missing submesh {} in {}", batch.key.submesh_index, mesh.name());
        return false;
    };

    cmd.cmd_bind_vertex_buffers(
        StaticMeshVertexLayout::VERTEX_BINDING,
        &[mesh.vertex_buffer(), frame.transform_buffer],
        &[0, batch.byte_offset],
    );
    cmd.cmd_bind_index_buffer(mesh.index_buffer(), 0, vk::IndexType::UINT32);
    cmd.cmd_draw_indexed(submesh.index_count, submesh.first_index, batch.instance_count, 0, submesh.vertex_offset);
    true
}

/// 向上取整的 workgroup 数量
#[inline]
pub fn group_count(extent: vk::Extent2D, tile: u32) -> [u32; 3] {
    [extent.width.div_ceil(tile), extent.height.div_ceil(tile), 1]
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::rc::Rc;

    use vela_gfx::headless::HeadlessBackend;
    use vela_render_interface::{render_settings::RendererSettings, shader_library::ShaderSource};

    use crate::render_context::RenderContext;

    pub fn headless_context() -> (Rc<HeadlessBackend>, RenderContext) {
        headless_context_with(RendererSettings::default())
    }

    pub fn headless_context_with(settings: RendererSettings) -> (Rc<HeadlessBackend>, RenderContext) {
        let backend = Rc::new(HeadlessBackend::new());
        let ctx = RenderContext::new(backend.clone(), settings, ShaderSource::Placeholder).unwrap();
        (backend, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_count_rounds_up() {
        assert_eq!(group_count(vk::Extent2D { width: 1920, height: 1080 }, 16), [120, 68, 1]);
        assert_eq!(group_count(vk::Extent2D { width: 960, height: 540 }, 16), [60, 34, 1]);
        assert_eq!(group_count(vk::Extent2D { width: 1, height: 17 }, 16), [1, 2, 1]);
    }
}
