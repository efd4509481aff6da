//! 渲染器入口：把 [`vela_render_graph`] 的 SceneRenderer 接到帧调度与交换链上
//!
//! - [`frame_scheduler::FrameScheduler`]：fence 等待、acquire、提交、present、帧序号推进
//! - [`presenter::Presenter`]：交换链与呈现相关的 semaphore，负责重建
//! - [`renderer::Renderer`]：驱动任意数量的 SceneRenderer，发布每帧的 [`frame_timings::FrameTimings`]
//! - [`render_thread::RenderThread`]：延迟执行的任务队列

pub mod frame_scheduler;
pub mod frame_timings;
pub mod presenter;
pub mod render_thread;
pub mod renderer;
