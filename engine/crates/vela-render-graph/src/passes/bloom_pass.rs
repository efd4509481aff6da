use ash::vk;
use vela_gfx::{
    GfxResult,
    commands::command_buffer::GfxCommandBuffer,
    descriptors::write::DescriptorResource,
    pipelines::{
        compute_pipeline::ComputePipelineDesc, graphics_pipeline::GfxPipeline, pipeline_layout::GfxPipelineLayout,
        shader::ShaderStageDesc,
    },
    resources::image::ImageDesc,
};
use vela_render_interface::render_settings::{BloomSettings, DefaultRendererSettings};

use crate::{
    gpu_data::{BloomPushConstants, BloomStage, push_constant_range},
    passes::{FrameData, ScenePass, group_count},
    render_context::RenderContext,
    resource_state::RgImageState,
    scene_layouts::BloomBindings,
    scene_targets::{SceneImage, SceneTargets, SubViews, TargetId},
};

/// 三张中间纹理：downsample 链、downsample 的临时结果、upsample 链（最终结果）
const BLOOM_TEXTURES: [TargetId; 3] = [TargetId::Bloom(0), TargetId::Bloom(1), TargetId::Bloom(2)];

/// bloom 纹理的尺寸：场景的一半
pub fn bloom_extent(extent: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width / 2).max(1),
        height: (extent.height / 2).max(1),
    }
}

/// mip 数量，最小的两级不参与
pub fn bloom_mip_count(extent: vk::Extent2D) -> u32 {
    let max_dim = extent.width.max(extent.height).max(1);
    (max_dim.ilog2() + 1).saturating_sub(2).max(1)
}

/// 一次 dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomStep {
    pub stage: BloomStage,
    pub input: TargetId,
    pub input_mip: u32,
    pub output: TargetId,
    pub output_mip: u32,
    /// upsample 时叠加的同一级 downsample 结果
    pub blend: Option<TargetId>,
}

/// 按顺序列出所有 dispatch
pub fn bloom_plan(mip_count: u32) -> Vec<BloomStep> {
    let [down, temp, up] = BLOOM_TEXTURES;
    let step = |stage, input, input_mip, output, output_mip, blend| BloomStep {
        stage,
        input,
        input_mip,
        output,
        output_mip,
        blend,
    };

    let mut steps = vec![step(BloomStage::Prefilter, TargetId::SceneColor, 0, down, 0, None)];
    for mip in 1..mip_count {
        steps.push(step(BloomStage::Downsample, down, mip - 1, temp, mip, None));
        steps.push(step(BloomStage::Downsample, temp, mip, down, mip, None));
    }

    let last = mip_count - 1;
    steps.push(step(BloomStage::FirstUpsample, down, last, up, last, None));
    for mip in (0..last).rev() {
        steps.push(step(BloomStage::Upsample, up, mip + 1, up, mip, Some(down)));
    }
    steps
}

/// 基于 compute 的 bloom：prefilter 之后逐级 downsample，再逐级 upsample 叠加
pub struct BloomPass {
    pipeline_layout: GfxPipelineLayout,
    pipeline: GfxPipeline,
    settings: BloomSettings,

    mip_count: u32,
    plan: Vec<BloomStep>,
    /// 与 `plan` 一一对应，本帧的 transient set
    step_sets: Vec<vk::DescriptorSet>,
}
impl BloomPass {
    const FORMAT: vk::Format = DefaultRendererSettings::DEFAULT_COLOR_FORMAT;

    pub fn new(ctx: &mut RenderContext) -> GfxResult<Self> {
        let pipeline_layout = GfxPipelineLayout::new(
            ctx.backend.clone(),
            &[ctx.layouts.bloom.handle()],
            &[push_constant_range::<BloomPushConstants>(vk::ShaderStageFlags::COMPUTE)],
            "bloom",
        )?;
        let module = ctx.shader_library.load("bloom.comp")?;
        let pipeline = GfxPipeline::new_compute(
            ctx.backend.clone(),
            &ComputePipelineDesc {
                stage: ShaderStageDesc::new(vk::ShaderStageFlags::COMPUTE, &module),
                layout: pipeline_layout.handle(),
            },
            "bloom",
        )?;

        Ok(Self {
            pipeline_layout,
            pipeline,
            settings: ctx.settings.bloom,
            mip_count: 0,
            plan: Vec::new(),
            step_sets: Vec::new(),
        })
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    #[inline]
    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// 读取 `input` 的描述符；scene color 处于只读布局，bloom 纹理一直处于 GENERAL
    fn sampled_input(targets: &SceneTargets, input: TargetId, sampler: vk::Sampler) -> GfxResult<DescriptorResource> {
        let view = targets.image(input)?.vk_view();
        Ok(match input {
            TargetId::SceneColor => DescriptorResource::sampled(view, sampler),
            _ => DescriptorResource::CombinedImageSampler {
                view,
                sampler,
                layout: vk::ImageLayout::GENERAL,
            },
        })
    }
}
impl ScenePass for BloomPass {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn inputs(&self) -> &'static [TargetId] {
        &[TargetId::SceneColor]
    }

    fn outputs(&self) -> &'static [TargetId] {
        &BLOOM_TEXTURES
    }

    fn size_dependent(&self) -> bool {
        true
    }

    fn rebuild(&mut self, ctx: &mut RenderContext, targets: &mut SceneTargets, extent: vk::Extent2D) -> GfxResult<()> {
        let bloom_extent = bloom_extent(extent);
        self.mip_count = bloom_mip_count(bloom_extent);
        self.plan = bloom_plan(self.mip_count);
        log::info!("bloom: {bloom_extent:?}, {} mips, {} dispatches", self.mip_count, self.plan.len());

        let desc = ImageDesc::new_2d(
            bloom_extent,
            Self::FORMAT,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
        )
        .mips(self.mip_count);
        let frame_id = ctx.frame_id();
        for (idx, id) in BLOOM_TEXTURES.into_iter().enumerate() {
            let image = SceneImage::create(&mut ctx.gfx_resource_manager, desc, SubViews::PerMip, &format!("bloom-{idx}"))?;
            targets.insert_image(id, image, &mut ctx.gfx_resource_manager, frame_id);
        }
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut RenderContext, targets: &SceneTargets, _frame: &FrameData) -> GfxResult<()> {
        self.step_sets.clear();
        if !self.enabled() {
            return Ok(());
        }

        let frame_label = ctx.frame_label();
        let sampler = ctx.samplers.linear_clamp.handle();
        for step in &self.plan {
            let handle = ctx.descriptor_set_manager.allocate_transient(&ctx.layouts.bloom, frame_label)?;
            let input = Self::sampled_input(targets, step.input, sampler)?;
            let blend = match step.blend {
                Some(blend) => Self::sampled_input(targets, blend, sampler)?,
                None => input,
            };
            let output = DescriptorResource::StorageImage {
                view: targets.image(step.output)?.vk_sub_view(step.output_mip as usize)?,
            };

            ctx.descriptor_set_manager.write_descriptor(handle, BloomBindings::INPUT, input)?;
            ctx.descriptor_set_manager.write_descriptor(handle, BloomBindings::OUTPUT, output)?;
            ctx.descriptor_set_manager.write_descriptor(handle, BloomBindings::BLEND, blend)?;
            self.step_sets.push(ctx.descriptor_set_manager.resolve(handle)?);
        }
        Ok(())
    }

    fn record(
        &mut self,
        _ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        _frame: &FrameData,
    ) -> GfxResult<()> {
        for id in BLOOM_TEXTURES {
            targets.image_mut(id)?.transition(cmd, RgImageState::STORAGE_READ_WRITE_COMPUTE);
        }

        if self.enabled() {
            let bind_point = self.pipeline.bind_point();
            let layout = self.pipeline_layout.handle();
            cmd.cmd_bind_pipeline(bind_point, self.pipeline.handle());

            for (step, set) in self.plan.iter().zip(&self.step_sets) {
                let output = targets.image(step.output)?;
                let mip_extent = output.desc.mip_extent(step.output_mip);
                let push = BloomPushConstants::new(
                    self.settings.threshold,
                    self.settings.knee,
                    step.input_mip as f32,
                    step.stage,
                );

                cmd.cmd_bind_descriptor_sets(bind_point, layout, 0, &[*set]);
                cmd.cmd_push_constants(layout, vk::ShaderStageFlags::COMPUTE, 0, bytemuck::bytes_of(&push));
                cmd.cmd_dispatch(group_count(mip_extent, self.settings.workgroup_size));
                // 下一次 dispatch 读取这次的输出
                output.write_barrier(cmd);
            }
        }

        targets.image_mut(TargetId::Bloom(2))?.transition(cmd, RgImageState::GENERAL_READ_FRAGMENT);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_bloom_mip_count() {
        assert_eq!(bloom_extent(extent(1920, 1080)), extent(960, 540));
        assert_eq!(bloom_mip_count(extent(960, 540)), 8);
        assert_eq!(bloom_mip_count(extent(1024, 1)), 9);
        assert_eq!(bloom_mip_count(extent(2, 2)), 1);
        assert_eq!(bloom_extent(extent(1, 1)), extent(1, 1));
        assert_eq!(bloom_mip_count(extent(1, 1)), 1);
    }

    #[test]
    fn test_bloom_plan_order() {
        let plan = bloom_plan(3);
        // prefilter + 2 * (mips - 1) + first upsample + (mips - 1)
        assert_eq!(plan.len(), 1 + 4 + 1 + 2);

        assert_eq!(plan[0].stage, BloomStage::Prefilter);
        assert_eq!((plan[0].input, plan[0].output, plan[0].output_mip), (TargetId::SceneColor, TargetId::Bloom(0), 0));

        assert_eq!((plan[1].input, plan[1].input_mip), (TargetId::Bloom(0), 0));
        assert_eq!((plan[1].output, plan[1].output_mip), (TargetId::Bloom(1), 1));
        assert_eq!((plan[2].input, plan[2].input_mip), (TargetId::Bloom(1), 1));
        assert_eq!((plan[2].output, plan[2].output_mip), (TargetId::Bloom(0), 1));

        let first_up = plan[5];
        assert_eq!(first_up.stage, BloomStage::FirstUpsample);
        assert_eq!((first_up.input, first_up.input_mip), (TargetId::Bloom(0), 2));
        assert_eq!((first_up.output, first_up.output_mip), (TargetId::Bloom(2), 2));

        let mips = plan[6..].iter().map(|step| (step.input_mip, step.output_mip)).collect::<Vec<_>>();
        assert_eq!(mips, vec![(2, 1), (1, 0)]);
        assert!(plan[6..].iter().all(|step| step.blend == Some(TargetId::Bloom(0)) && step.stage == BloomStage::Upsample));
    }

    #[test]
    fn test_single_mip_plan() {
        let plan = bloom_plan(1);
        assert_eq!(plan.iter().map(|step| step.stage).collect::<Vec<_>>(), vec![
            BloomStage::Prefilter,
            BloomStage::FirstUpsample
        ]);
    }
}
