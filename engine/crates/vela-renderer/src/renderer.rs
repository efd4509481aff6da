use std::{rc::Rc, time::Instant};

use ash::vk;
use indexmap::IndexMap;
use vela_gfx::{GfxBackend, GfxError, GfxResult};
use vela_render_graph::{
    draw_list::OverlayDraw,
    render_context::{RenderContext, RendererId},
    scene_renderer::SceneRenderer,
};
use vela_render_interface::{
    render_settings::{FrameSettings, RendererSettings},
    shader_library::ShaderSource,
};
use vela_scene::{
    EntityId,
    asset_registry::AssetHandle,
    camera::Camera,
    lights::LightEnvironment,
    material::MaterialRegistry,
    mesh::StaticMesh,
};

use crate::{
    frame_scheduler::{FrameBegin, FrameScheduler},
    frame_timings::{FrameTimings, Timer},
};

/// SceneRenderer 的输出位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewTarget {
    /// blit 到交换链，尺寸跟随窗口；最多只有一个
    Swapchain,
    /// 离屏预览，结果可以通过 [`SceneRenderer::output_view`] 采样
    Offscreen(vk::Extent2D),
}

struct SceneView {
    scene_renderer: SceneRenderer,
    target: ViewTarget,
    camera: Camera,
}

/// 渲染器入口
///
/// 持有 [`RenderContext`] 与 [`FrameScheduler`]，在同一帧内按创建顺序驱动所有 SceneRenderer
pub struct Renderer {
    pub render_context: RenderContext,
    frame_scheduler: FrameScheduler,

    views: IndexMap<RendererId, SceneView>,

    pub timer: Timer,
    timings: FrameTimings,
}
// new & init
impl Renderer {
    pub fn new(backend: Rc<dyn GfxBackend>, settings: RendererSettings, shader_source: ShaderSource) -> GfxResult<Self> {
        let _span = vela_crate_tools::profile_span!("Renderer::new");
        let frame_scheduler = FrameScheduler::new(backend.clone())?;
        let render_context = RenderContext::new(backend, settings, shader_source)?;
        Ok(Self {
            render_context,
            frame_scheduler,
            views: IndexMap::new(),
            timer: Timer::default(),
            timings: FrameTimings::default(),
        })
    }

    /// 等待所有帧完成，然后销毁所有 GPU 资源
    pub fn destroy(mut self) -> GfxResult<()> {
        self.frame_scheduler.wait_all_frames()?;
        for (_, view) in self.views.drain(..) {
            view.scene_renderer.destroy(&mut self.render_context);
        }
        self.render_context.destroy()
    }
}
// scene views
impl Renderer {
    pub fn create_scene_view(&mut self, name: &str, target: ViewTarget) -> GfxResult<RendererId> {
        let extent = match target {
            ViewTarget::Swapchain => {
                if self.swapchain_view().is_some() {
                    return Err(GfxError::Config("only one scene view can target the swapchain".to_string()));
                }
                self.frame_scheduler
                    .presenter()
                    .map(|presenter| presenter.extent())
                    .ok_or_else(|| GfxError::Config(format!("scene view `{name}` targets a missing swapchain")))?
            }
            ViewTarget::Offscreen(extent) => extent,
        };

        let scene_renderer = SceneRenderer::new(&mut self.render_context, name, extent)?;
        let id = scene_renderer.id();
        log::info!("scene view `{name}` created: {id:?} {target:?}");
        self.views.insert(
            id,
            SceneView {
                scene_renderer,
                target,
                camera: Camera::default(),
            },
        );
        Ok(id)
    }

    pub fn destroy_scene_view(&mut self, id: RendererId) -> GfxResult<()> {
        let view = self.views.shift_remove(&id).ok_or_else(|| Self::missing_view(id))?;
        view.scene_renderer.destroy(&mut self.render_context);
        Ok(())
    }

    #[inline]
    pub fn scene_renderer(&self, id: RendererId) -> Option<&SceneRenderer> {
        self.views.get(&id).map(|view| &view.scene_renderer)
    }

    #[inline]
    pub fn camera_mut(&mut self, id: RendererId) -> Option<&mut Camera> {
        self.views.get_mut(&id).map(|view| &mut view.camera)
    }

    pub fn frame_settings(&self, id: RendererId) -> Option<FrameSettings> {
        self.views.get(&id).map(|view| FrameSettings::new(view.scene_renderer.extent()))
    }

    fn swapchain_view(&self) -> Option<RendererId> {
        self.views.iter().find(|(_, view)| view.target == ViewTarget::Swapchain).map(|(id, _)| *id)
    }

    fn view_mut(&mut self, id: RendererId) -> GfxResult<&mut SceneView> {
        self.views.get_mut(&id).ok_or_else(|| Self::missing_view(id))
    }

    fn missing_view(id: RendererId) -> GfxError {
        GfxError::InvalidHandle(format!("scene view {id:?}"))
    }
}
// submit
impl Renderer {
    /// 提交一个 drawable，这一帧结束后清空
    pub fn submit(
        &mut self,
        id: RendererId,
        entity: EntityId,
        mesh: AssetHandle<StaticMesh>,
        materials: AssetHandle<MaterialRegistry>,
        transform: &glam::Mat4,
    ) -> GfxResult<()> {
        let view = self.views.get_mut(&id).ok_or_else(|| Self::missing_view(id))?;
        view.scene_renderer.submit(&self.render_context, entity, mesh, materials, transform)
    }

    pub fn submit_overlay(&mut self, id: RendererId, overlay: OverlayDraw) -> GfxResult<()> {
        self.view_mut(id)?.scene_renderer.submit_overlay(overlay);
        Ok(())
    }

    /// 离屏 view 的尺寸，下一帧开始时生效
    pub fn set_viewport_size(&mut self, id: RendererId, extent: vk::Extent2D) -> GfxResult<()> {
        let view = self.view_mut(id)?;
        if view.target == ViewTarget::Swapchain {
            return Err(GfxError::Config("the swapchain view follows the window size".to_string()));
        }
        view.target = ViewTarget::Offscreen(extent);
        view.scene_renderer.set_viewport_size(extent);
        Ok(())
    }

    /// 窗口尺寸变化，交换链在下一次 acquire 之前重建
    pub fn resize_window(&mut self, extent: vk::Extent2D) {
        if let Some(presenter) = self.frame_scheduler.presenter_mut() {
            presenter.resize(extent);
        }
    }
}
// update
impl Renderer {
    /// 完整的一帧：begin frame、按创建顺序录制所有 view、提交与呈现
    ///
    /// 不论成功与否，这一帧的 draw list 都会被清空
    pub fn render_frame(&mut self, lights: &LightEnvironment) -> GfxResult<FrameTimings> {
        let _span = vela_crate_tools::profile_span!("Renderer::render_frame");
        self.timer.tick();
        self.render_context.advance_time(self.timer.delta_time_s());

        let mut timings = FrameTimings::new(self.render_context.frame_id(), self.timer.delta_time());
        let result = self.render_views(lights, &mut timings);
        for view in self.views.values_mut() {
            view.scene_renderer.end_frame();
        }
        result?;

        vela_crate_tools::profile::frame_mark();
        self.timings = timings;
        Ok(timings)
    }

    fn render_views(&mut self, lights: &LightEnvironment, timings: &mut FrameTimings) -> GfxResult<()> {
        let begin = Instant::now();
        let frame = self.frame_scheduler.begin_frame(&mut self.render_context)?;
        timings.begin_frame = begin.elapsed();

        if let Err(err) = self.record_views(&frame, lights, timings) {
            // 录制到一半的 command buffer 不提交，其中的 layout 转换也就不算数
            for view in self.views.values_mut() {
                view.scene_renderer.discard_target_states();
            }
            self.frame_scheduler.abort_frame(&mut self.render_context)?;
            return Err(err);
        }

        let end = Instant::now();
        self.frame_scheduler.end_frame(&mut self.render_context)?;
        timings.end_frame = end.elapsed();
        Ok(())
    }

    fn record_views(
        &mut self,
        frame: &FrameBegin,
        lights: &LightEnvironment,
        timings: &mut FrameTimings,
    ) -> GfxResult<()> {
        // acquire 时交换链可能被重建
        if let Some(present_target) = frame.present_target {
            for view in self.views.values_mut().filter(|view| view.target == ViewTarget::Swapchain) {
                view.scene_renderer.set_viewport_size(present_target.extent);
            }
        }

        for view in self.views.values_mut() {
            let present_target = match view.target {
                ViewTarget::Swapchain => frame.present_target,
                ViewTarget::Offscreen(_) => None,
            };
            view.scene_renderer.render(
                &mut self.render_context,
                &frame.cmd,
                &view.camera,
                lights,
                present_target,
            )?;
            timings.accumulate_passes(view.scene_renderer.timings());
        }
        Ok(())
    }
}
// getters
impl Renderer {
    /// 上一帧发布的耗时快照
    #[inline]
    pub fn timings(&self) -> FrameTimings {
        self.timings
    }

    #[inline]
    pub fn frame_scheduler(&self) -> &FrameScheduler {
        &self.frame_scheduler
    }

    #[inline]
    pub fn backend(&self) -> &Rc<dyn GfxBackend> {
        &self.render_context.backend
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::{
        commands::command::GfxCommand,
        headless::{HeadlessBackend, JournalEvent},
    };
    use vela_render_interface::frame_counter::FRAMES_IN_FLIGHT;
    use vela_scene::{lights::PointLight, material::Material, shapes::CubeShape};

    use super::*;
    use crate::frame_scheduler::FrameState;

    const WINDOW: vk::Extent2D = vk::Extent2D {
        width: 960,
        height: 540,
    };
    const PREVIEW: vk::Extent2D = vk::Extent2D {
        width: 320,
        height: 240,
    };

    fn test_renderer(backend: HeadlessBackend) -> (Rc<HeadlessBackend>, Renderer) {
        let mut settings = RendererSettings::default();
        settings.shadow.map_size = 512;
        settings.light_culling.max_lights_per_tile = 16;
        settings.max_instances = 64;

        let backend = Rc::new(backend);
        let renderer = Renderer::new(backend.clone(), settings, ShaderSource::Placeholder).unwrap();
        (backend, renderer)
    }

    fn cube(renderer: &mut Renderer) -> (AssetHandle<StaticMesh>, AssetHandle<MaterialRegistry>) {
        let ctx = &mut renderer.render_context;
        let mesh = ctx.assets.insert(CubeShape::create_mesh(ctx.backend.clone()).unwrap());
        let material = ctx.assets.insert(Material::default());
        let materials = ctx.assets.insert(MaterialRegistry::new(vec![material]));
        (mesh, materials)
    }

    fn blit_targets(backend: &HeadlessBackend) -> Vec<vk::Image> {
        backend
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                GfxCommand::BlitImage(blit) => Some(blit.dst),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_swapchain_and_preview_in_one_frame() {
        let (backend, mut renderer) = test_renderer(HeadlessBackend::with_swapchain(WINDOW));
        let main = renderer.create_scene_view("main", ViewTarget::Swapchain).unwrap();
        let preview = renderer.create_scene_view("preview", ViewTarget::Offscreen(PREVIEW)).unwrap();
        let (mesh, materials) = cube(&mut renderer);

        renderer.submit(main, EntityId(0), mesh, materials, &glam::Mat4::IDENTITY).unwrap();
        renderer.submit(preview, EntityId(0), mesh, materials, &glam::Mat4::IDENTITY).unwrap();
        backend.clear_journal();
        let timings = renderer.render_frame(&LightEnvironment::default()).unwrap();

        assert_eq!(timings.frame_id, 0);
        assert_eq!(renderer.timings(), timings);
        assert_eq!(renderer.render_context.frame_id(), 1);

        // 两个 view 录制在同一个 command buffer 中，只提交一次
        let submits = backend
            .journal()
            .into_iter()
            .filter(|event| matches!(event, JournalEvent::Submit { .. }))
            .count();
        assert_eq!(submits, 1);
        // 只有 swapchain view 会 blit
        let swapchain = backend.swapchain_info().unwrap();
        assert_eq!(blit_targets(&backend), [swapchain.images[0]]);
        // 两个 view 的 light culling：960x540 与 320x240
        let dispatches = backend.dispatches();
        assert!(dispatches.contains(&[60, 34, 1]));
        assert!(dispatches.contains(&[20, 15, 1]));

        for id in [main, preview] {
            assert!(renderer.scene_renderer(id).unwrap().draw_list().is_empty());
        }
        renderer.destroy().unwrap();
    }

    #[test]
    fn test_window_resize_follows_swapchain() {
        let (backend, mut renderer) = test_renderer(HeadlessBackend::with_swapchain(WINDOW));
        let main = renderer.create_scene_view("main", ViewTarget::Swapchain).unwrap();
        renderer.render_frame(&LightEnvironment::default()).unwrap();

        let resized = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        renderer.resize_window(resized);
        backend.clear_journal();
        renderer.render_frame(&LightEnvironment::default()).unwrap();

        assert!(
            backend
                .journal()
                .iter()
                .any(|event| matches!(event, JournalEvent::RecreateSwapchain { extent } if *extent == resized))
        );
        assert_eq!(renderer.scene_renderer(main).unwrap().extent(), resized);
        assert_eq!(renderer.frame_settings(main).unwrap().frame_extent, resized);
        assert_eq!(backend.dispatches()[0], [80, 45, 1]);
        assert!(renderer.set_viewport_size(main, PREVIEW).is_err());
    }

    #[test]
    fn test_frame_index_wraps_over_many_frames() {
        let (_backend, mut renderer) = test_renderer(HeadlessBackend::new());
        renderer.create_scene_view("preview", ViewTarget::Offscreen(PREVIEW)).unwrap();
        for _ in 0..5 {
            renderer.render_frame(&LightEnvironment::default()).unwrap();
        }
        assert_eq!(renderer.render_context.frame_label().index(), 5 % FRAMES_IN_FLIGHT);
        assert_eq!(renderer.timings().frame_id, 4);
    }

    #[test]
    fn test_scene_view_errors() {
        let (_backend, mut renderer) = test_renderer(HeadlessBackend::new());
        // 没有交换链
        let err = renderer.create_scene_view("main", ViewTarget::Swapchain).unwrap_err();
        assert!(matches!(err, GfxError::Config(_)));

        let preview = renderer.create_scene_view("preview", ViewTarget::Offscreen(PREVIEW)).unwrap();
        renderer.destroy_scene_view(preview).unwrap();
        assert!(matches!(renderer.destroy_scene_view(preview), Err(GfxError::InvalidHandle(_))));
        assert!(renderer.camera_mut(preview).is_none());

        let (_backend, mut renderer) = test_renderer(HeadlessBackend::with_swapchain(WINDOW));
        renderer.create_scene_view("main", ViewTarget::Swapchain).unwrap();
        assert!(renderer.create_scene_view("second", ViewTarget::Swapchain).is_err());
    }

    #[test]
    fn test_draw_list_cleared_after_failed_frame() {
        let mut settings = RendererSettings::default();
        settings.shadow.map_size = 512;
        settings.light_culling.max_point_lights = 1;
        let backend = Rc::new(HeadlessBackend::new());
        let mut renderer = Renderer::new(backend, settings, ShaderSource::Placeholder).unwrap();
        let preview = renderer.create_scene_view("preview", ViewTarget::Offscreen(PREVIEW)).unwrap();
        let (mesh, materials) = cube(&mut renderer);
        renderer.submit(preview, EntityId(1), mesh, materials, &glam::Mat4::IDENTITY).unwrap();

        let lights = LightEnvironment {
            point_lights: vec![
                PointLight {
                    position: glam::Vec3::ZERO,
                    radius: 2.0,
                    color: glam::Vec3::ONE,
                    intensity: 1.0,
                    falloff: 1.0,
                };
                2
            ],
            ..Default::default()
        };
        let err = renderer.render_frame(&lights).unwrap_err();
        assert!(matches!(err, GfxError::BudgetExhausted { budget: "point-lights", .. }));
        assert!(renderer.scene_renderer(preview).unwrap().draw_list().is_empty());
        assert_eq!(renderer.frame_scheduler().state(), FrameState::Idle);
    }

    #[test]
    fn test_frames_continue_after_failed_frame() {
        let mut settings = RendererSettings::default();
        settings.shadow.map_size = 512;
        settings.light_culling.max_point_lights = 1;
        let backend = Rc::new(HeadlessBackend::with_swapchain(WINDOW));
        let mut renderer = Renderer::new(backend.clone(), settings, ShaderSource::Placeholder).unwrap();
        renderer.create_scene_view("main", ViewTarget::Swapchain).unwrap();
        renderer.render_frame(&LightEnvironment::default()).unwrap();

        let too_many = LightEnvironment {
            point_lights: vec![
                PointLight {
                    position: glam::Vec3::ZERO,
                    radius: 2.0,
                    color: glam::Vec3::ONE,
                    intensity: 1.0,
                    falloff: 1.0,
                };
                2
            ],
            ..Default::default()
        };
        assert!(renderer.render_frame(&too_many).is_err());
        assert_eq!(renderer.frame_scheduler().state(), FrameState::Idle);
        assert_eq!(renderer.render_context.frame_id(), 1);

        // 失败的那一帧不会 present，之后每个 slot 都还能正常开始
        backend.clear_journal();
        for _ in 0..=FRAMES_IN_FLIGHT {
            renderer.render_frame(&LightEnvironment::default()).unwrap();
        }
        assert_eq!(renderer.render_context.frame_id(), FRAMES_IN_FLIGHT as u64 + 2);
        let presents = backend
            .journal()
            .iter()
            .filter(|event| matches!(event, JournalEvent::Present { .. }))
            .count();
        assert_eq!(presents, FRAMES_IN_FLIGHT + 1);
        assert!(
            backend
                .journal()
                .iter()
                .any(|event| matches!(event, JournalEvent::RecreateSwapchain { .. }))
        );
        renderer.destroy().unwrap();
    }
}
