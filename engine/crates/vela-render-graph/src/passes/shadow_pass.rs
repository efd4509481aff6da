use ash::vk;
use vela_gfx::{
    GfxResult,
    basic::color::LabelColor,
    commands::{
        command::{AttachmentDesc, ClearValue, RenderingDesc},
        command_buffer::GfxCommandBuffer,
    },
    pipelines::{graphics_pipeline::{BlendMode, GfxPipeline}, pipeline_layout::GfxPipelineLayout},
    resources::image::ImageDesc,
};
use vela_render_interface::render_settings::DefaultRendererSettings;

use crate::{
    gpu_data::{ShadowPushConstants, push_constant_range},
    passes::{FrameData, ScenePass, create_graphics_pipeline, draw_batch, static_mesh_vertex_input},
    render_context::RenderContext,
    resource_state::RgImageState,
    scene_targets::{SceneImage, SceneTargets, SubViews, TargetId},
    shadow_cascade::SHADOW_CASCADE_COUNT,
};

/// 4 个 cascade 分别渲染到 shadow map 的一个 layer
pub struct ShadowPass {
    pipeline_layout: GfxPipelineLayout,
    pipeline: GfxPipeline,
    map_size: u32,
}
impl ShadowPass {
    pub fn new(ctx: &mut RenderContext) -> GfxResult<Self> {
        let pipeline_layout = GfxPipelineLayout::new(
            ctx.backend.clone(),
            &[ctx.layouts.frame.handle()],
            &[push_constant_range::<ShadowPushConstants>(vk::ShaderStageFlags::VERTEX)],
            "shadow",
        )?;
        let bias = ctx.settings.shadow;
        let pipeline = create_graphics_pipeline(
            ctx,
            &pipeline_layout,
            &[(vk::ShaderStageFlags::VERTEX, "shadow.vert")],
            |desc| {
                static_mesh_vertex_input(desc)
                    .attachments(&[], Some(DefaultRendererSettings::SHADOW_MAP_FORMAT), BlendMode::Opaque)
                    .depth_test(Some(vk::CompareOp::LESS_OR_EQUAL), true)
                    .depth_bias(bias.depth_bias_constant, bias.depth_bias_slope)
                    .depth_clamp(true)
                    .cull_mode(vk::CullModeFlags::NONE)
            },
            "shadow",
        )?;

        Ok(Self {
            pipeline_layout,
            pipeline,
            map_size: ctx.settings.shadow.map_size,
        })
    }
}
impl ScenePass for ShadowPass {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn outputs(&self) -> &'static [TargetId] {
        &[TargetId::ShadowMap]
    }

    fn size_dependent(&self) -> bool {
        false
    }

    fn rebuild(&mut self, ctx: &mut RenderContext, targets: &mut SceneTargets, _extent: vk::Extent2D) -> GfxResult<()> {
        if targets.contains(TargetId::ShadowMap) {
            return Ok(());
        }
        let desc = ImageDesc::new_2d(
            vk::Extent2D {
                width: self.map_size,
                height: self.map_size,
            },
            DefaultRendererSettings::SHADOW_MAP_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
        .layers(SHADOW_CASCADE_COUNT as u32);
        let frame_id = ctx.frame_id();
        let shadow_map = SceneImage::create(&mut ctx.gfx_resource_manager, desc, SubViews::PerLayer, "shadow-map")?;
        targets.insert_image(TargetId::ShadowMap, shadow_map, &mut ctx.gfx_resource_manager, frame_id);
        Ok(())
    }

    fn record(
        &mut self,
        ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()> {
        let shadow_map = targets.image_mut(TargetId::ShadowMap)?;
        shadow_map.transition(cmd, RgImageState::DEPTH_ATTACHMENT_WRITE);

        // 不投射阴影时仍然清空，采样结果为 1.0，即不在阴影中
        let cast_shadows = frame.lights.directional_or_default().cast_shadows;
        let extent = shadow_map.extent();

        for cascade_idx in 0..SHADOW_CASCADE_COUNT {
            cmd.begin_label(&format!("cascade-{cascade_idx}"), LabelColor::COLOR_STAGE);
            let rendering = RenderingDesc::new(extent).depth(AttachmentDesc::clear(
                shadow_map.vk_sub_view(cascade_idx)?,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
            ));
            cmd.cmd_begin_rendering(&rendering);
            cmd.cmd_set_viewport(extent);

            if cast_shadows {
                cmd.cmd_bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
                cmd.cmd_bind_descriptor_sets(
                    self.pipeline.bind_point(),
                    self.pipeline_layout.handle(),
                    0,
                    &[frame.frame_set],
                );
                let push = ShadowPushConstants {
                    cascade_index: cascade_idx as u32,
                    ..Default::default()
                };
                cmd.cmd_push_constants(
                    self.pipeline_layout.handle(),
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
                for batch in &frame.draws.batches {
                    draw_batch(ctx, cmd, frame, batch, |mesh| mesh.cast_shadows);
                }
            }

            cmd.cmd_end_rendering();
            cmd.end_label();
        }

        shadow_map.transition(cmd, RgImageState::SHADER_READ_FRAGMENT);
        Ok(())
    }
}
