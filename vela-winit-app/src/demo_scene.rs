use vela_gfx::GfxResult;
use vela_render_graph::{draw_list::OverlayDraw, render_context::RendererId};
use vela_renderer::renderer::Renderer;
use vela_scene::{
    EntityId,
    asset_registry::AssetHandle,
    lights::{DirectionalLight, LightEnvironment, PointLight, SkyLight},
    material::{Material, MaterialRegistry},
    mesh::StaticMesh,
    shapes::{CubeShape, PlaneShape},
};

/// 地面加上一圈立方体，几个绕中心旋转的点光源
pub struct DemoScene {
    cube: AssetHandle<StaticMesh>,
    plane: AssetHandle<StaticMesh>,
    cube_materials: Vec<AssetHandle<MaterialRegistry>>,
    ground_materials: AssetHandle<MaterialRegistry>,

    lights: LightEnvironment,
}
impl DemoScene {
    const CUBE_COUNT: usize = 8;
    const RING_RADIUS: f32 = 4.0;
    const POINT_LIGHT_COUNT: usize = 4;

    pub fn new(renderer: &mut Renderer) -> GfxResult<Self> {
        let ctx = &mut renderer.render_context;
        let cube = ctx.assets.insert(CubeShape::create_mesh(ctx.backend.clone())?);
        let plane = ctx.assets.insert(PlaneShape::create_mesh(ctx.backend.clone())?);

        let cube_materials = (0..Self::CUBE_COUNT)
            .map(|i| {
                let hue = i as f32 / Self::CUBE_COUNT as f32;
                let material = ctx.assets.insert(Material {
                    name: format!("cube-{i}"),
                    base_color: hue_color(hue).extend(1.0),
                    metallic: if i % 2 == 0 { 0.0 } else { 0.8 },
                    roughness: 0.3 + 0.5 * hue,
                    ..Default::default()
                });
                ctx.assets.insert(MaterialRegistry::new(vec![material]))
            })
            .collect();
        let ground = ctx.assets.insert(Material {
            name: "ground".to_string(),
            base_color: glam::vec4(0.5, 0.5, 0.5, 1.0),
            roughness: 0.9,
            ..Default::default()
        });
        let ground_materials = ctx.assets.insert(MaterialRegistry::new(vec![ground]));

        Ok(Self {
            cube,
            plane,
            cube_materials,
            ground_materials,
            lights: LightEnvironment {
                directional: Some(DirectionalLight {
                    direction: glam::vec3(-0.4, -1.0, -0.3).normalize(),
                    color: glam::Vec3::ONE,
                    intensity: 3.0,
                    cast_shadows: true,
                }),
                point_lights: Vec::new(),
                sky_light: Some(SkyLight {
                    environment: None,
                    intensity: 0.3,
                }),
            },
        })
    }

    pub fn lights(&self) -> &LightEnvironment {
        &self.lights
    }

    /// 更新动画并提交到 view
    pub fn submit(&mut self, renderer: &mut Renderer, view: RendererId, total_time_s: f32) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("DemoScene::submit");

        renderer.submit(
            view,
            EntityId(0),
            self.plane,
            self.ground_materials,
            &glam::Mat4::from_scale(glam::vec3(20.0, 1.0, 20.0)),
        )?;

        for (i, materials) in self.cube_materials.iter().enumerate() {
            let angle = i as f32 / Self::CUBE_COUNT as f32 * std::f32::consts::TAU;
            let translation = glam::vec3(angle.cos(), 0.0, angle.sin()) * Self::RING_RADIUS + glam::Vec3::Y * 0.5;
            let transform = glam::Mat4::from_translation(translation)
                * glam::Mat4::from_rotation_y(total_time_s * 0.5 + angle);
            renderer.submit(view, EntityId(i as u64 + 1), self.cube, *materials, &transform)?;
        }

        self.lights.point_lights = (0..Self::POINT_LIGHT_COUNT)
            .map(|i| {
                let angle = total_time_s * 0.8 + i as f32 / Self::POINT_LIGHT_COUNT as f32 * std::f32::consts::TAU;
                PointLight {
                    position: glam::vec3(angle.cos() * 2.5, 1.5, angle.sin() * 2.5),
                    radius: 6.0,
                    color: hue_color(i as f32 / Self::POINT_LIGHT_COUNT as f32),
                    intensity: 8.0,
                    falloff: 2.0,
                }
            })
            .collect();

        // 用线框标出点光源的位置
        for light in &self.lights.point_lights {
            renderer.submit_overlay(
                view,
                OverlayDraw {
                    mesh: self.cube,
                    transform: glam::Mat4::from_translation(light.position) * glam::Mat4::from_scale(glam::Vec3::splat(0.15)),
                    color: light.color.extend(1.0),
                },
            )?;
        }
        Ok(())
    }
}

fn hue_color(hue: f32) -> glam::Vec3 {
    let channel = |offset: f32| ((hue + offset) * std::f32::consts::TAU).cos() * 0.5 + 0.5;
    glam::vec3(channel(0.0), channel(1.0 / 3.0), channel(2.0 / 3.0))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use ash::vk;
    use vela_gfx::headless::HeadlessBackend;
    use vela_render_interface::{render_settings::RendererSettings, shader_library::ShaderSource};
    use vela_renderer::renderer::ViewTarget;

    use super::*;

    #[test]
    fn test_demo_scene_renders() {
        let backend = Rc::new(HeadlessBackend::with_swapchain(vk::Extent2D {
            width: 640,
            height: 360,
        }));
        let mut settings = RendererSettings::default();
        settings.shadow.map_size = 256;
        let mut renderer = Renderer::new(backend, settings, ShaderSource::Placeholder).unwrap();
        let view = renderer.create_scene_view("main", ViewTarget::Swapchain).unwrap();
        let mut scene = DemoScene::new(&mut renderer).unwrap();

        for frame in 0..4 {
            scene.submit(&mut renderer, view, frame as f32 * 0.016).unwrap();
            let timings = renderer.render_frame(scene.lights()).unwrap();
            assert_eq!(timings.frame_id, frame);
        }
        assert_eq!(scene.lights().point_lights.len(), DemoScene::POINT_LIGHT_COUNT);
        renderer.destroy().unwrap();
    }

    #[test]
    fn test_hue_color_in_range() {
        for i in 0..16 {
            let color = hue_color(i as f32 / 16.0);
            assert!(color.min_element() >= 0.0 && color.max_element() <= 1.0);
        }
    }
}
