use ash::vk;
use vela_gfx::{
    GfxResult,
    commands::command_buffer::GfxCommandBuffer,
    descriptors::write::DescriptorResource,
    pipelines::{
        compute_pipeline::ComputePipelineDesc, graphics_pipeline::GfxPipeline, pipeline_layout::GfxPipelineLayout,
        shader::ShaderStageDesc,
    },
    resources::buffer::BufferDesc,
};
use vela_render_interface::descriptor_set_manager::DescriptorSetKey;

use crate::{
    passes::{FrameData, ScenePass, group_count},
    render_context::RenderContext,
    resource_state::{RgBufferState, RgImageState},
    scene_layouts::{DepthInputBindings, GlobalSetSlot},
    scene_targets::{SceneBuffer, SceneTargets, TargetId},
};

/// 每个 light index 占用的字节数
const LIGHT_INDEX_SIZE: u64 = size_of::<u32>() as u64;

/// 按 tile 剔除点光源
///
/// 每个 tile 的深度范围来自 pre-depth，结果写入 light grid：
/// 每个 tile 最多 `max_lights_per_tile` 个 light index，以 `-1` 结尾
pub struct LightCullingPass {
    pipeline_layout: GfxPipelineLayout,
    pipeline: GfxPipeline,
    tile_size: u32,
    max_lights_per_tile: u32,
    depth_set: vk::DescriptorSet,
}
impl LightCullingPass {
    pub fn new(ctx: &mut RenderContext) -> GfxResult<Self> {
        let pipeline_layout = GfxPipelineLayout::new(
            ctx.backend.clone(),
            &[ctx.layouts.frame.handle(), ctx.layouts.depth_input.handle()],
            &[],
            "light-culling",
        )?;
        let module = ctx.shader_library.load("light_culling.comp")?;
        let pipeline = GfxPipeline::new_compute(
            ctx.backend.clone(),
            &ComputePipelineDesc {
                stage: ShaderStageDesc::new(vk::ShaderStageFlags::COMPUTE, &module),
                layout: pipeline_layout.handle(),
            },
            "light-culling",
        )?;

        Ok(Self {
            pipeline_layout,
            pipeline,
            tile_size: ctx.settings.light_culling.tile_size,
            max_lights_per_tile: ctx.settings.light_culling.max_lights_per_tile,
            depth_set: vk::DescriptorSet::null(),
        })
    }

    /// tile 的数量
    #[inline]
    pub fn tile_count(&self, extent: vk::Extent2D) -> [u32; 3] {
        group_count(extent, self.tile_size)
    }

    pub fn light_grid_size(&self, extent: vk::Extent2D) -> vk::DeviceSize {
        let [x, y, _] = self.tile_count(extent);
        x as u64 * y as u64 * self.max_lights_per_tile as u64 * LIGHT_INDEX_SIZE
    }
}
impl ScenePass for LightCullingPass {
    fn name(&self) -> &'static str {
        "light-culling"
    }

    fn inputs(&self) -> &'static [TargetId] {
        &[TargetId::Depth]
    }

    fn outputs(&self) -> &'static [TargetId] {
        &[TargetId::LightGrid]
    }

    fn size_dependent(&self) -> bool {
        true
    }

    fn rebuild(&mut self, ctx: &mut RenderContext, targets: &mut SceneTargets, extent: vk::Extent2D) -> GfxResult<()> {
        let size = self.light_grid_size(extent);
        log::info!("light grid: {:?} tiles, {} bytes", self.tile_count(extent), size);

        let frame_id = ctx.frame_id();
        let grid = SceneBuffer::create(
            &mut ctx.gfx_resource_manager,
            BufferDesc::device_local(size, vk::BufferUsageFlags::STORAGE_BUFFER),
            "light-grid",
        )?;
        targets.insert_buffer(TargetId::LightGrid, grid, &mut ctx.gfx_resource_manager, frame_id);
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut RenderContext, targets: &SceneTargets, frame: &FrameData) -> GfxResult<()> {
        let frame_label = ctx.frame_label();
        let key = DescriptorSetKey::global(frame.renderer_id.global_set_key(GlobalSetSlot::DEPTH_INPUT), frame_label);
        let handle = ctx.descriptor_set_manager.allocate_or_find(key, &ctx.layouts.depth_input)?;
        ctx.descriptor_set_manager.write_descriptor(
            handle,
            DepthInputBindings::DEPTH,
            DescriptorResource::sampled(targets.image(TargetId::Depth)?.vk_view(), ctx.samplers.nearest_clamp.handle()),
        )?;
        self.depth_set = ctx.descriptor_set_manager.resolve(handle)?;
        Ok(())
    }

    fn record(
        &mut self,
        _ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()> {
        targets.image_mut(TargetId::Depth)?.transition(cmd, RgImageState::SHADER_READ_COMPUTE);
        targets.buffer_mut(TargetId::LightGrid)?.transition(cmd, RgBufferState::STORAGE_WRITE_COMPUTE);

        cmd.cmd_bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        cmd.cmd_bind_descriptor_sets(
            self.pipeline.bind_point(),
            self.pipeline_layout.handle(),
            0,
            &[frame.frame_set, self.depth_set],
        );
        cmd.cmd_dispatch(self.tile_count(frame.extent));

        // geometry 的 fragment shader 读取结果
        targets.buffer_mut(TargetId::LightGrid)?.transition(cmd, RgBufferState::STORAGE_READ_FRAGMENT);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vela_render_interface::render_settings::DefaultRendererSettings;

    use super::*;
    use crate::passes::test_utils::headless_context;

    /// geometry.frag 中查找 tile 的方式
    fn fragment_tile(pixel: u32, tile_size: u32, tile_count: u32) -> u32 {
        (pixel / tile_size).min(tile_count - 1)
    }

    #[test]
    fn test_fragment_tile_matches_culling_workgroup() {
        let tile_size = DefaultRendererSettings::LIGHT_TILE_SIZE;
        for extent in [
            vk::Extent2D { width: 1920, height: 1080 },
            vk::Extent2D { width: 1280, height: 721 },
            vk::Extent2D { width: 17, height: 1 },
        ] {
            let [count_x, count_y, _] = group_count(extent, tile_size);
            // 两个轴相互独立，分别检查
            for (size, count) in [(extent.width, count_x), (extent.height, count_y)] {
                for group in 0..count {
                    for local in 0..tile_size {
                        let pixel = group * tile_size + local;
                        if pixel >= size {
                            continue;
                        }
                        assert_eq!(fragment_tile(pixel, tile_size, count), group, "pixel {pixel} of {size}");
                    }
                }
            }
        }

        // 1080 不能被 16 整除，最后一行 tile 只覆盖 8 个像素
        assert_eq!(fragment_tile(1079, tile_size, 68), 67);
        assert_eq!(fragment_tile(1072, tile_size, 68), 67);
        assert_eq!(fragment_tile(1071, tile_size, 68), 66);
    }

    #[test]
    fn test_light_grid_size() {
        let (_backend, mut ctx) = headless_context();
        let pass = LightCullingPass::new(&mut ctx).unwrap();
        let extent = vk::Extent2D { width: 1920, height: 1080 };
        assert_eq!(pass.tile_count(extent), [120, 68, 1]);
        assert_eq!(
            pass.light_grid_size(extent),
            120 * 68 * DefaultRendererSettings::MAX_LIGHTS_PER_TILE as u64 * LIGHT_INDEX_SIZE
        );
    }
}
