use ash::vk;
use vela_gfx::{
    GfxError, GfxResult,
    commands::{
        command::{AttachmentDesc, RenderingDesc},
        command_buffer::GfxCommandBuffer,
    },
    pipelines::{graphics_pipeline::{BlendMode, GfxPipeline}, pipeline_layout::GfxPipelineLayout},
    resources::vertex_layout::StaticMeshVertexLayout,
};
use vela_render_interface::render_settings::DefaultRendererSettings;

use crate::{
    gpu_data::{OverlayPushConstants, push_constant_range},
    passes::{FrameData, ScenePass, create_graphics_pipeline},
    render_context::RenderContext,
    resource_state::RgImageState,
    scene_targets::{SceneTargets, TargetId},
};

/// 在 composite 的结果上叠加线框 overlay，深度测试使用 pre-depth 的结果
pub struct LateCompositePass {
    pipeline_layout: GfxPipelineLayout,
    pipeline: GfxPipeline,
    rendering: Option<RenderingDesc>,
}
impl LateCompositePass {
    const STAGES: vk::ShaderStageFlags =
        vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

    pub fn new(ctx: &mut RenderContext) -> GfxResult<Self> {
        let pipeline_layout = GfxPipelineLayout::new(
            ctx.backend.clone(),
            &[],
            &[push_constant_range::<OverlayPushConstants>(Self::STAGES)],
            "late-composite",
        )?;

        // overlay 只使用顶点数据，不需要 instance transform
        let bindings = StaticMeshVertexLayout::vertex_input_bindings()
            .into_iter()
            .filter(|binding| binding.binding == StaticMeshVertexLayout::VERTEX_BINDING)
            .collect();
        let attributes = StaticMeshVertexLayout::vertex_input_attributes()
            .into_iter()
            .filter(|attribute| attribute.binding == StaticMeshVertexLayout::VERTEX_BINDING)
            .collect();

        let pipeline = create_graphics_pipeline(
            ctx,
            &pipeline_layout,
            &[(vk::ShaderStageFlags::VERTEX, "overlay.vert"), (vk::ShaderStageFlags::FRAGMENT, "overlay.frag")],
            |desc| {
                desc.vertex_input(bindings, attributes)
                    .attachments(
                        &[DefaultRendererSettings::DEFAULT_COMPOSITE_FORMAT],
                        Some(DefaultRendererSettings::DEFAULT_DEPTH_FORMAT),
                        BlendMode::Additive,
                    )
                    .polygon_mode(vk::PolygonMode::LINE)
                    .cull_mode(vk::CullModeFlags::NONE)
                    .depth_test(Some(vk::CompareOp::LESS_OR_EQUAL), false)
            },
            "late-composite",
        )?;

        Ok(Self {
            pipeline_layout,
            pipeline,
            rendering: None,
        })
    }
}
impl ScenePass for LateCompositePass {
    fn name(&self) -> &'static str {
        "late-composite"
    }

    fn inputs(&self) -> &'static [TargetId] {
        &[TargetId::Composite, TargetId::Depth]
    }

    /// target 来自 composite 和 pre-depth，随它们的重建一起刷新
    fn size_dependent(&self) -> bool {
        false
    }

    fn rebuild(&mut self, _ctx: &mut RenderContext, targets: &mut SceneTargets, _extent: vk::Extent2D) -> GfxResult<()> {
        let composite = targets.image(TargetId::Composite)?;
        let depth = targets.image(TargetId::Depth)?;
        self.rendering = Some(
            RenderingDesc::new(composite.extent())
                .color(AttachmentDesc::load(composite.vk_view(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .depth(AttachmentDesc::load(depth.vk_view(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
        );
        Ok(())
    }

    fn record(
        &mut self,
        ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()> {
        let rendering = self
            .rendering
            .as_ref()
            .ok_or_else(|| GfxError::InvalidHandle("late composite pass is not built".to_string()))?;
        targets.image_mut(TargetId::Composite)?.transition(cmd, RgImageState::COLOR_ATTACHMENT_READ_WRITE);
        targets.image_mut(TargetId::Depth)?.transition(cmd, RgImageState::DEPTH_ATTACHMENT_READ_WRITE);

        if frame.overlays.is_empty() {
            return Ok(());
        }

        let aspect = frame.extent.width as f32 / frame.extent.height.max(1) as f32;
        let view_projection = frame.camera.view_projection(aspect);

        cmd.cmd_begin_rendering(rendering);
        cmd.cmd_set_viewport(rendering.extent);
        cmd.cmd_bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        for overlay in frame.overlays {
            let Some(mesh) = ctx.assets.get(overlay.mesh) else {
                log::warn!("skip overlay of missing mesh {:?}", overlay.mesh);
                continue;
            };
            let push = OverlayPushConstants {
                transform: (view_projection * overlay.transform).to_cols_array_2d(),
                color: overlay.color.to_array(),
            };
            cmd.cmd_push_constants(self.pipeline_layout.handle(), Self::STAGES, 0, bytemuck::bytes_of(&push));
            cmd.cmd_bind_vertex_buffers(StaticMeshVertexLayout::VERTEX_BINDING, &[mesh.vertex_buffer()], &[0]);
            cmd.cmd_bind_index_buffer(mesh.index_buffer(), 0, vk::IndexType::UINT32);
            cmd.cmd_draw_indexed(mesh.index_count(), 0, 1, 0, 0);
        }
        cmd.cmd_end_rendering();
        Ok(())
    }
}
