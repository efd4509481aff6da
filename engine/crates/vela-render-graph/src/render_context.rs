use std::rc::Rc;

use vela_gfx::{GfxBackend, GfxResult};
use vela_render_interface::{
    cmd_allocator::CmdAllocator,
    descriptor_set_manager::DescriptorSetManager,
    frame_counter::{FrameCounter, FrameLabel},
    gfx_resource_manager::GfxResourceManager,
    render_settings::RendererSettings,
    shader_library::{ShaderLibrary, ShaderSource},
};
use vela_scene::asset_registry::AssetRegistry;

use crate::{
    fallback_textures::{FallbackTextures, RenderSamplers},
    gpu_data,
    material_uniforms::MaterialUniforms,
    scene_layouts::SceneLayouts,
};

/// SceneRenderer 的编号，用来区分各自的全局 descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(pub u32);
impl RendererId {
    /// 全局 set 在 DescriptorSetManager 中的 key：高位是 renderer，低 8 位是 renderer 内部的编号
    #[inline]
    pub fn global_set_key(self, local: u32) -> u32 {
        debug_assert!(local < 256);
        (self.0 << 8) | local
    }
}

/// 渲染期间所有 SceneRenderer 共享的状态
///
/// 只构建一次，显式地以引用传递给需要的地方
pub struct RenderContext {
    pub backend: Rc<dyn GfxBackend>,
    pub settings: RendererSettings,
    pub frame_counter: FrameCounter,

    pub gfx_resource_manager: GfxResourceManager,
    pub descriptor_set_manager: DescriptorSetManager,
    pub cmd_allocator: CmdAllocator,
    pub shader_library: ShaderLibrary,

    pub layouts: SceneLayouts,
    pub samplers: RenderSamplers,
    pub fallback_textures: FallbackTextures,
    pub material_uniforms: MaterialUniforms,

    /// 场景一侧提交的 mesh、材质等
    pub assets: AssetRegistry,

    pub delta_time_s: f32,
    pub total_time_s: f32,

    next_renderer_id: u32,
}
// new & init
impl RenderContext {
    pub fn new(backend: Rc<dyn GfxBackend>, settings: RendererSettings, shader_source: ShaderSource) -> GfxResult<Self> {
        let _span = vela_crate_tools::profile_span!("RenderContext::new");
        settings.validate()?;

        let mut shader_library = ShaderLibrary::new(backend.clone(), shader_source);
        gpu_data::register_scene_reflections(&mut shader_library)?;

        let mut gfx_resource_manager = GfxResourceManager::new(backend.clone());
        let fallback_textures = FallbackTextures::new(&mut gfx_resource_manager)?;

        let ctx = Self {
            settings,
            frame_counter: FrameCounter::default(),
            descriptor_set_manager: DescriptorSetManager::new(backend.clone(), settings.descriptor_budget())?,
            cmd_allocator: CmdAllocator::new(backend.clone())?,
            shader_library,
            layouts: SceneLayouts::new(&backend)?,
            samplers: RenderSamplers::new(&backend)?,
            fallback_textures,
            material_uniforms: MaterialUniforms::new(&backend)?,
            gfx_resource_manager,
            assets: AssetRegistry::new(),
            delta_time_s: 0.0,
            total_time_s: 0.0,
            next_renderer_id: 0,
            backend,
        };
        log::info!("render context created: {:?}", ctx.settings);
        Ok(ctx)
    }

    /// 先等待 GPU 空闲，再销毁所有资源
    pub fn destroy(&mut self) -> GfxResult<()> {
        self.backend.wait_idle()?;
        self.assets.clear();
        self.gfx_resource_manager.destroy_all();
        Ok(())
    }
}
// tools
impl RenderContext {
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        self.frame_counter.frame_label()
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.frame_id()
    }

    pub fn allocate_renderer_id(&mut self) -> RendererId {
        let id = RendererId(self.next_renderer_id);
        self.next_renderer_id += 1;
        id
    }

    /// 复用 frame slot 之前的重置：descriptor pool、command pool、材质 uniform，以及到期的资源
    ///
    /// 只能在该 slot 的 fence signaled 之后调用
    pub fn reset_frame_slot(&mut self) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("RenderContext::reset_frame_slot");
        let frame_label = self.frame_label();
        self.descriptor_set_manager.reset_frame(frame_label)?;
        self.cmd_allocator.free_frame_commands(frame_label)?;
        self.material_uniforms.reset(frame_label)?;
        self.gfx_resource_manager.cleanup(self.frame_id());
        Ok(())
    }

    /// 更新计时，每帧开始时调用
    pub fn advance_time(&mut self, delta_time_s: f32) {
        self.delta_time_s = delta_time_s;
        self.total_time_s += delta_time_s;
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::{GfxError, headless::HeadlessBackend};

    use super::*;

    #[test]
    fn test_new_validates_reflection_and_allocates_ids() {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let mut ctx = RenderContext::new(backend, RendererSettings::default(), ShaderSource::Placeholder).unwrap();
        assert!(ctx.shader_library.reflection("geometry.frag").is_some());

        let a = ctx.allocate_renderer_id();
        let b = ctx.allocate_renderer_id();
        assert_ne!(a.global_set_key(0), b.global_set_key(0));
        assert_ne!(a.global_set_key(1), a.global_set_key(2));
        ctx.destroy().unwrap();
    }

    #[test]
    fn test_new_rejects_settings_shader_mismatch() {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let mut settings = RendererSettings::default();
        settings.light_culling.tile_size = 8;
        assert!(matches!(
            RenderContext::new(backend.clone(), settings, ShaderSource::Placeholder),
            Err(GfxError::Config(_))
        ));

        // 为 0 时不能走到 group_count 的除法
        let mut settings = RendererSettings::default();
        settings.bloom.workgroup_size = 0;
        assert!(matches!(
            RenderContext::new(backend, settings, ShaderSource::Placeholder),
            Err(GfxError::Config(_))
        ));
    }

    #[test]
    fn test_reset_frame_slot_clears_descriptors() {
        let backend: Rc<dyn GfxBackend> = Rc::new(HeadlessBackend::new());
        let mut ctx = RenderContext::new(backend, RendererSettings::default(), ShaderSource::Placeholder).unwrap();
        let label = ctx.frame_label();
        let key = vela_render_interface::descriptor_set_manager::DescriptorSetKey::global(0, label);
        ctx.descriptor_set_manager.allocate_or_find(key, &ctx.layouts.frame).unwrap();
        assert_eq!(ctx.descriptor_set_manager.live_set_count(label), 1);

        ctx.reset_frame_slot().unwrap();
        assert_eq!(ctx.descriptor_set_manager.live_set_count(label), 0);
    }
}
