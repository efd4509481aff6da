pub mod app;
pub mod camera_controller;
pub mod demo_scene;
