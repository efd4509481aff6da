use std::rc::Rc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vela_crate_tools::resource::VelaPath;
use vela_gfx::vulkan::{VulkanBackend, VulkanBackendCreateInfo};
use vela_render_graph::render_context::RendererId;
use vela_render_interface::{render_settings::RendererSettings, shader_library::ShaderSource};
use vela_renderer::{
    frame_timings::FrameTimings,
    render_thread::RenderThread,
    renderer::{Renderer, ViewTarget},
};
use winit::{
    application::ApplicationHandler,
    event::{StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowId},
};

use crate::{camera_controller::CameraController, demo_scene::DemoScene};

/// window 创建之后才能初始化的部分
struct WindowState {
    renderer: Renderer,
    main_view: RendererId,
    scene: DemoScene,

    /// 必须在 renderer 之后 drop，surface 依赖 window
    window: Window,
}

pub struct WinitApp {
    app_name: String,
    settings: RendererSettings,
    state: Option<WindowState>,
    camera_controller: CameraController,

    /// 日志之类的杂项放到渲染线程之外执行
    render_thread: RenderThread,
    /// 多少帧输出一次 timings
    timings_log_interval: u64,

    error: Option<anyhow::Error>,
}
// 总的 main 函数
impl WinitApp {
    /// 整个程序的入口
    pub fn run(app_name: &str) -> anyhow::Result<()> {
        let settings = RendererSettings::from_file_or_default(VelaPath::config_path("renderer.toml"))?;
        log::info!("renderer settings: {settings:?}");

        let event_loop = EventLoop::new()?;
        let mut app = Self {
            app_name: app_name.to_string(),
            settings,
            state: None,
            camera_controller: CameraController::default(),
            render_thread: RenderThread::new("vela-worker")?,
            timings_log_interval: 300,
            error: None,
        };
        event_loop.run_app(&mut app)?;
        log::info!("end run.");

        app.destroy()?;
        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
// new & init
impl WinitApp {
    fn init_after_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window = event_loop.create_window(
            Window::default_attributes()
                .with_title(self.app_name.clone())
                .with_inner_size(winit::dpi::LogicalSize::new(1280.0, 720.0)),
        )?;
        let size = window.inner_size();

        let backend = VulkanBackend::new(VulkanBackendCreateInfo {
            app_name: self.app_name.clone(),
            window: Some((window.display_handle()?.as_raw(), window.window_handle()?.as_raw())),
            window_extent: vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            present_mode: self.settings.present_mode.to_vk(),
        })?;
        let mut renderer = Renderer::new(Rc::new(backend), self.settings, ShaderSource::default())?;
        let main_view = renderer.create_scene_view("main", ViewTarget::Swapchain)?;
        let scene = DemoScene::new(&mut renderer)?;

        self.state = Some(WindowState {
            renderer,
            main_view,
            scene,
            window,
        });
        Ok(())
    }
}
// destroy
impl WinitApp {
    fn destroy(&mut self) -> anyhow::Result<()> {
        self.render_thread.wait_all();
        if let Some(state) = self.state.take() {
            state.renderer.destroy()?;
        }
        Ok(())
    }
}
// update
impl WinitApp {
    fn update(&mut self) -> anyhow::Result<()> {
        let _span = vela_crate_tools::profile_span!("WinitApp::update");
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let delta_time_s = state.renderer.timer.delta_time_s();
        if let Some(camera) = state.renderer.camera_mut(state.main_view) {
            self.camera_controller.update(camera, delta_time_s);
        }
        let total_time_s = state.renderer.timer.total_time_s();
        state.scene.submit(&mut state.renderer, state.main_view, total_time_s)?;

        match state.renderer.render_frame(state.scene.lights()) {
            Ok(timings) => self.publish_timings(timings),
            Err(e) if !e.is_fatal() => log::warn!("frame skipped: {e}"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn publish_timings(&self, timings: FrameTimings) {
        if timings.frame_id % self.timings_log_interval != 0 {
            return;
        }
        self.render_thread.queue(move || log::info!("{timings}"));
        self.render_thread.execute_all();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("fatal error: {error:#}");
        self.error.get_or_insert(error);
        event_loop.exit();
    }
}
// 各种 winit 的事件处理
impl ApplicationHandler for WinitApp {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {}

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("winit event: resumed");
        if self.state.is_some() {
            return;
        }
        if let Err(e) = self.init_after_window(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        self.camera_controller.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = self.state.as_mut() {
                    state.renderer.resize_window(vk::Extent2D {
                        width: size.width,
                        height: size.height,
                    });
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.update() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.as_ref() {
            state.window.request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
    }

    fn memory_warning(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("memory warning");
    }
}
