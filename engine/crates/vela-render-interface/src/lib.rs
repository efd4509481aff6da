pub mod cmd_allocator;
pub mod descriptor_set_manager;
pub mod frame_counter;
pub mod frame_multiplexer;
pub mod gfx_resource_manager;
pub mod handles;
pub mod render_settings;
pub mod shader_library;
