use ash::vk;
use vela_gfx::{
    GfxError, GfxResult,
    commands::{
        command::{AttachmentDesc, ClearValue, RenderingDesc},
        command_buffer::GfxCommandBuffer,
    },
    descriptors::write::DescriptorResource,
    pipelines::{graphics_pipeline::{BlendMode, GfxPipeline}, pipeline_layout::GfxPipelineLayout},
    resources::image::ImageDesc,
};
use vela_render_interface::{descriptor_set_manager::DescriptorSetKey, render_settings::DefaultRendererSettings};

use crate::{
    gpu_data::{CompositePushConstants, push_constant_range},
    passes::{FrameData, ScenePass, create_graphics_pipeline},
    render_context::RenderContext,
    resource_state::RgImageState,
    scene_layouts::{CompositeBindings, GlobalSetSlot},
    scene_targets::{SceneImage, SceneTargets, SubViews, TargetId},
};

/// 全屏 pass：tone mapping 之后叠加 bloom
pub struct CompositePass {
    pipeline_layout: GfxPipelineLayout,
    pipeline: GfxPipeline,
    bloom_intensity: f32,
    composite_set: vk::DescriptorSet,
    rendering: Option<RenderingDesc>,
}
impl CompositePass {
    const FORMAT: vk::Format = DefaultRendererSettings::DEFAULT_COMPOSITE_FORMAT;
    const EXPOSURE: f32 = 1.0;

    pub fn new(ctx: &mut RenderContext) -> GfxResult<Self> {
        let pipeline_layout = GfxPipelineLayout::new(
            ctx.backend.clone(),
            &[ctx.layouts.composite.handle()],
            &[push_constant_range::<CompositePushConstants>(vk::ShaderStageFlags::FRAGMENT)],
            "composite",
        )?;
        let pipeline = create_graphics_pipeline(
            ctx,
            &pipeline_layout,
            &[(vk::ShaderStageFlags::VERTEX, "fullscreen.vert"), (vk::ShaderStageFlags::FRAGMENT, "composite.frag")],
            |desc| {
                desc.attachments(&[Self::FORMAT], None, BlendMode::Opaque)
                    .depth_test(None, false)
                    .cull_mode(vk::CullModeFlags::NONE)
            },
            "composite",
        )?;

        // 关闭 bloom 时强度为 0，shader 不会采样 bloom 纹理
        let bloom = ctx.settings.bloom;
        let bloom_intensity = if bloom.enabled { bloom.intensity } else { 0.0 };

        Ok(Self {
            pipeline_layout,
            pipeline,
            bloom_intensity,
            composite_set: vk::DescriptorSet::null(),
            rendering: None,
        })
    }

    #[inline]
    pub fn bloom_intensity(&self) -> f32 {
        self.bloom_intensity
    }
}
impl ScenePass for CompositePass {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn inputs(&self) -> &'static [TargetId] {
        &[TargetId::SceneColor, TargetId::Bloom(2), TargetId::Depth]
    }

    fn outputs(&self) -> &'static [TargetId] {
        &[TargetId::Composite]
    }

    fn size_dependent(&self) -> bool {
        true
    }

    fn rebuild(&mut self, ctx: &mut RenderContext, targets: &mut SceneTargets, extent: vk::Extent2D) -> GfxResult<()> {
        let desc = ImageDesc::new_2d(
            extent,
            Self::FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
        );
        let frame_id = ctx.frame_id();
        let composite = SceneImage::create(&mut ctx.gfx_resource_manager, desc, SubViews::None, "composite")?;
        targets.insert_image(TargetId::Composite, composite, &mut ctx.gfx_resource_manager, frame_id);

        self.rendering = Some(RenderingDesc::new(extent).color(AttachmentDesc::clear(
            targets.image(TargetId::Composite)?.vk_view(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
        )));
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut RenderContext, targets: &SceneTargets, frame: &FrameData) -> GfxResult<()> {
        let frame_label = ctx.frame_label();
        let key = DescriptorSetKey::global(frame.renderer_id.global_set_key(GlobalSetSlot::COMPOSITE), frame_label);
        let handle = ctx.descriptor_set_manager.allocate_or_find(key, &ctx.layouts.composite)?;

        let linear = ctx.samplers.linear_clamp.handle();
        let writes = [
            (
                CompositeBindings::SCENE_COLOR,
                DescriptorResource::sampled(targets.image(TargetId::SceneColor)?.vk_view(), linear),
            ),
            (
                CompositeBindings::BLOOM,
                DescriptorResource::CombinedImageSampler {
                    view: targets.image(TargetId::Bloom(2))?.vk_view(),
                    sampler: linear,
                    layout: vk::ImageLayout::GENERAL,
                },
            ),
            (
                CompositeBindings::DEPTH,
                DescriptorResource::sampled(
                    targets.image(TargetId::Depth)?.vk_view(),
                    ctx.samplers.nearest_clamp.handle(),
                ),
            ),
        ];
        for (binding, resource) in writes {
            ctx.descriptor_set_manager.write_descriptor(handle, binding, resource)?;
        }
        self.composite_set = ctx.descriptor_set_manager.resolve(handle)?;
        Ok(())
    }

    fn record(
        &mut self,
        _ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()> {
        let rendering =
            self.rendering.as_ref().ok_or_else(|| GfxError::InvalidHandle("composite pass is not built".to_string()))?;
        targets.image_mut(TargetId::Depth)?.transition(cmd, RgImageState::SHADER_READ_FRAGMENT);
        targets.image_mut(TargetId::Composite)?.transition(cmd, RgImageState::COLOR_ATTACHMENT_WRITE);

        let push = CompositePushConstants {
            exposure: Self::EXPOSURE,
            bloom_intensity: self.bloom_intensity,
            near: frame.camera.near,
            far: frame.camera.far,
        };

        cmd.cmd_begin_rendering(rendering);
        cmd.cmd_set_viewport(rendering.extent);
        cmd.cmd_bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        cmd.cmd_bind_descriptor_sets(self.pipeline.bind_point(), self.pipeline_layout.handle(), 0, &[self.composite_set]);
        cmd.cmd_push_constants(
            self.pipeline_layout.handle(),
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(&push),
        );
        cmd.cmd_draw(3, 1, 0, 0);
        cmd.cmd_end_rendering();
        Ok(())
    }
}
