use ash::vk;
use vela_gfx::{
    GfxResult,
    basic::color::LabelColor,
    commands::{command::BlitDesc, command_buffer::GfxCommandBuffer},
};

use crate::{
    barrier::ImageBarrierDesc,
    passes::{FrameData, ScenePass},
    render_context::RenderContext,
    resource_state::RgImageState,
    scene_targets::{SceneTargets, TargetId},
};

/// 把 composite 的结果 blit 到 swapchain image
///
/// 没有 present target 的 renderer（离屏预览）只把 composite 转换为可采样状态
#[derive(Default)]
pub struct PresentBlitPass;
impl ScenePass for PresentBlitPass {
    fn name(&self) -> &'static str {
        "present-blit"
    }

    fn inputs(&self) -> &'static [TargetId] {
        &[TargetId::Composite]
    }

    fn size_dependent(&self) -> bool {
        false
    }

    fn rebuild(&mut self, _ctx: &mut RenderContext, _targets: &mut SceneTargets, _extent: vk::Extent2D) -> GfxResult<()> {
        Ok(())
    }

    fn record(
        &mut self,
        _ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()> {
        let composite = targets.image_mut(TargetId::Composite)?;
        let Some(present) = frame.present_target else {
            composite.transition(cmd, RgImageState::SHADER_READ_FRAGMENT);
            return Ok(());
        };

        cmd.begin_label("present-blit", LabelColor::COLOR_PRESENT);
        composite.transition(cmd, RgImageState::TRANSFER_SRC);

        // swapchain image 的旧内容不需要保留
        cmd.image_memory_barrier(&[ImageBarrierDesc::new(RgImageState::UNDEFINED, RgImageState::TRANSFER_DST)
            .to_gfx_barrier(present.image)]);
        cmd.cmd_blit_image(BlitDesc {
            src: composite.vk_image(),
            src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_extent: composite.extent(),
            dst: present.image,
            dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            dst_extent: present.extent,
            filter: vk::Filter::LINEAR,
        });
        cmd.image_memory_barrier(&[ImageBarrierDesc::new(RgImageState::TRANSFER_DST, RgImageState::PRESENT)
            .to_gfx_barrier(present.image)]);
        cmd.end_label();
        Ok(())
    }
}
