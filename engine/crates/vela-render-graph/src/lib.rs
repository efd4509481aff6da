//! 场景渲染：从每帧提交的 draw 请求，到按固定顺序录制的 pass
//!
//! 所有共享状态都放在显式传递的 [`render_context::RenderContext`] 中，
//! 同一个 context 可以驱动多个 [`scene_renderer::SceneRenderer`]。

pub mod barrier;
pub mod draw_list;
pub mod fallback_textures;
pub mod gpu_data;
pub mod material_uniforms;
pub mod passes;
pub mod rebuild_graph;
pub mod render_context;
pub mod resource_state;
pub mod scene_layouts;
pub mod scene_renderer;
pub mod scene_targets;
pub mod shadow_cascade;
pub mod transform_buffer;
