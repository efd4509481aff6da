use ash::vk;
use vela_gfx::{
    GfxResult,
    commands::{
        command::{AttachmentDesc, ClearValue, RenderingDesc},
        command_buffer::GfxCommandBuffer,
    },
    pipelines::{graphics_pipeline::{BlendMode, GfxPipeline}, pipeline_layout::GfxPipelineLayout},
    resources::image::ImageDesc,
};
use vela_render_interface::render_settings::DefaultRendererSettings;

use crate::{
    passes::{FrameData, ScenePass, create_graphics_pipeline, draw_batch, static_mesh_vertex_input},
    render_context::RenderContext,
    resource_state::RgImageState,
    scene_targets::{SceneImage, SceneTargets, SubViews, TargetId},
};

/// 只写深度，供 light culling 计算 tile 的深度范围，geometry 与 late composite 复用
pub struct PreDepthPass {
    pipeline_layout: GfxPipelineLayout,
    pipeline: GfxPipeline,
}
impl PreDepthPass {
    pub fn new(ctx: &mut RenderContext) -> GfxResult<Self> {
        let pipeline_layout =
            GfxPipelineLayout::new(ctx.backend.clone(), &[ctx.layouts.frame.handle()], &[], "pre-depth")?;
        let pipeline = create_graphics_pipeline(
            ctx,
            &pipeline_layout,
            &[(vk::ShaderStageFlags::VERTEX, "pre_depth.vert")],
            |desc| {
                static_mesh_vertex_input(desc).attachments(
                    &[],
                    Some(DefaultRendererSettings::DEFAULT_DEPTH_FORMAT),
                    BlendMode::Opaque,
                )
            },
            "pre-depth",
        )?;
        Ok(Self {
            pipeline_layout,
            pipeline,
        })
    }
}
impl ScenePass for PreDepthPass {
    fn name(&self) -> &'static str {
        "pre-depth"
    }

    fn outputs(&self) -> &'static [TargetId] {
        &[TargetId::Depth]
    }

    fn size_dependent(&self) -> bool {
        true
    }

    fn rebuild(&mut self, ctx: &mut RenderContext, targets: &mut SceneTargets, extent: vk::Extent2D) -> GfxResult<()> {
        let desc = ImageDesc::new_2d(
            extent,
            DefaultRendererSettings::DEFAULT_DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        );
        let frame_id = ctx.frame_id();
        let depth = SceneImage::create(&mut ctx.gfx_resource_manager, desc, SubViews::None, "scene-depth")?;
        targets.insert_image(TargetId::Depth, depth, &mut ctx.gfx_resource_manager, frame_id);
        Ok(())
    }

    fn record(
        &mut self,
        ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()> {
        let depth = targets.image_mut(TargetId::Depth)?;
        depth.transition(cmd, RgImageState::DEPTH_ATTACHMENT_WRITE);

        let rendering = RenderingDesc::new(depth.extent()).depth(AttachmentDesc::clear(
            depth.vk_view(),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
        ));
        cmd.cmd_begin_rendering(&rendering);
        cmd.cmd_set_viewport(depth.extent());
        cmd.cmd_bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        cmd.cmd_bind_descriptor_sets(self.pipeline.bind_point(), self.pipeline_layout.handle(), 0, &[frame.frame_set]);
        for batch in &frame.draws.batches {
            draw_batch(ctx, cmd, frame, batch, |_| true);
        }
        cmd.cmd_end_rendering();
        Ok(())
    }
}
