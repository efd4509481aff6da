pub mod buffer;
pub mod image;
pub mod image_view;
pub mod sampler;
pub mod vertex_layout;
