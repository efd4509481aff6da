use std::time::{Duration, Instant};

use ash::vk;
use vela_gfx::{
    GfxError, GfxResult,
    basic::color::LabelColor,
    commands::command_buffer::GfxCommandBuffer,
    descriptors::write::DescriptorResource,
    resources::buffer::{BufferDesc, GfxBuffer},
};
use vela_render_interface::{
    descriptor_set_manager::DescriptorSetKey,
    frame_counter::FrameLabel,
    frame_multiplexer::PerFrame,
};
use vela_scene::{
    EntityId,
    asset_registry::AssetHandle,
    camera::Camera,
    lights::{GpuPointLight, LightEnvironment},
    material::MaterialRegistry,
    mesh::StaticMesh,
};

use crate::{
    draw_list::{DrawList, OverlayDraw},
    gpu_data::{GpuCameraUniform, GpuLightUniform, GpuShadowUniform},
    passes::{
        FrameData, PresentTarget, ScenePass, bloom_pass::BloomPass, composite_pass::CompositePass,
        geometry_pass::GeometryPass, group_count, late_composite_pass::LateCompositePass,
        light_culling_pass::LightCullingPass, pre_depth_pass::PreDepthPass, present_blit_pass::PresentBlitPass,
        shadow_pass::ShadowPass,
    },
    rebuild_graph::RebuildGraph,
    render_context::{RenderContext, RendererId},
    scene_layouts::{FrameSetBindings, GlobalSetSlot},
    scene_targets::{SceneTargets, TargetId},
    shadow_cascade::{SHADOW_CASCADE_COUNT, ShadowCascade, compute_cascades},
    transform_buffer::TransformBuffer,
};

/// 部分 pass 的 CPU 录制耗时
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassTimings {
    pub shadow: Duration,
    pub geometry: Duration,
    pub bloom: Duration,
}
impl PassTimings {
    fn record(&mut self, pass_name: &str, elapsed: Duration) {
        match pass_name {
            "shadow" => self.shadow = elapsed,
            "geometry" => self.geometry = elapsed,
            "bloom" => self.bloom = elapsed,
            _ => {}
        }
    }
}

/// set 0 中的 buffer，每个 frame slot 一份
struct FrameUniforms {
    camera: GfxBuffer,
    shadow: GfxBuffer,
    lights: GfxBuffer,
    point_lights: GfxBuffer,
}
impl FrameUniforms {
    fn new(ctx: &RenderContext, name: &str, frame_label: FrameLabel, max_point_lights: usize) -> GfxResult<Self> {
        let uniform = |size: usize, what: &str| {
            GfxBuffer::new(
                ctx.backend.clone(),
                BufferDesc::host_visible(size as vk::DeviceSize, vk::BufferUsageFlags::UNIFORM_BUFFER),
                &format!("{name}-{what}-{frame_label}"),
            )
        };
        Ok(Self {
            camera: uniform(size_of::<GpuCameraUniform>(), "camera")?,
            shadow: uniform(size_of::<GpuShadowUniform>(), "shadow")?,
            lights: uniform(size_of::<GpuLightUniform>(), "lights")?,
            point_lights: GfxBuffer::new(
                ctx.backend.clone(),
                BufferDesc::host_visible(
                    (max_point_lights.max(1) * size_of::<GpuPointLight>()) as vk::DeviceSize,
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                ),
                &format!("{name}-point-lights-{frame_label}"),
            )?,
        })
    }
}

/// 一个视口的完整渲染流程
///
/// 每帧流程：
/// 1. `submit` / `submit_overlay` 收集 draw 请求
/// 2. `render` 录制所有 pass
/// 3. `end_frame` 清空 draw list
///
/// 多个 SceneRenderer 共享同一个 [`RenderContext`]，各自持有自己的 target 和全局 descriptor set。
pub struct SceneRenderer {
    id: RendererId,
    name: String,

    passes: Vec<Box<dyn ScenePass>>,
    rebuild_graph: RebuildGraph,
    targets: SceneTargets,

    draw_list: DrawList,
    transform_buffer: TransformBuffer,
    uniforms: PerFrame<FrameUniforms>,
    max_point_lights: usize,
    tile_size: u32,
    max_lights_per_tile: u32,

    extent: vk::Extent2D,
    /// None 表示还没有创建任何 target
    built_extent: Option<vk::Extent2D>,

    timings: PassTimings,
}
// new & init
impl SceneRenderer {
    pub fn new(ctx: &mut RenderContext, name: &str, extent: vk::Extent2D) -> GfxResult<Self> {
        let _span = vela_crate_tools::profile_span!("SceneRenderer::new");

        let passes: Vec<Box<dyn ScenePass>> = vec![
            Box::new(ShadowPass::new(ctx)?),
            Box::new(PreDepthPass::new(ctx)?),
            Box::new(LightCullingPass::new(ctx)?),
            Box::new(GeometryPass::new(ctx)?),
            Box::new(BloomPass::new(ctx)?),
            Box::new(CompositePass::new(ctx)?),
            Box::new(LateCompositePass::new(ctx)?),
            Box::new(PresentBlitPass),
        ];
        let io = passes.iter().map(|pass| (pass.inputs(), pass.outputs())).collect::<Vec<_>>();
        let rebuild_graph = RebuildGraph::analyze(&io);
        rebuild_graph
            .topological_sort()
            .map_err(|cycle| GfxError::Config(format!("cyclic scene pass dependencies: {cycle:?}")))?;

        let settings = ctx.settings;
        let max_point_lights = settings.light_culling.max_point_lights as usize;
        let uniforms = PerFrame::try_new(|label| FrameUniforms::new(ctx, name, label, max_point_lights))?;
        let transform_buffer = TransformBuffer::new(&ctx.backend, settings.max_instances as usize, name)?;

        let id = ctx.allocate_renderer_id();
        log::info!("scene renderer `{name}` ({id:?}) created, extent {extent:?}");
        Ok(Self {
            id,
            name: name.to_string(),
            passes,
            rebuild_graph,
            targets: SceneTargets::default(),
            draw_list: DrawList::default(),
            transform_buffer,
            uniforms,
            max_point_lights,
            tile_size: settings.light_culling.tile_size,
            max_lights_per_tile: settings.light_culling.max_lights_per_tile,
            extent: Self::clamp_extent(extent),
            built_extent: None,
            timings: PassTimings::default(),
        })
    }

    /// 旧的 target 交给延迟销毁队列，其余资源随 drop 释放
    pub fn destroy(mut self, ctx: &mut RenderContext) {
        let frame_id = ctx.frame_id();
        self.targets.retire_all(&mut ctx.gfx_resource_manager, frame_id);
        log::info!("scene renderer `{}` destroyed", self.name);
    }

    fn clamp_extent(extent: vk::Extent2D) -> vk::Extent2D {
        vk::Extent2D {
            width: extent.width.max(1),
            height: extent.height.max(1),
        }
    }
}
// submit
impl SceneRenderer {
    /// 提交一个 drawable；mesh 不存在时返回 `InvalidHandle`，这次提交被丢弃
    pub fn submit(
        &mut self,
        ctx: &RenderContext,
        entity: EntityId,
        mesh: AssetHandle<StaticMesh>,
        materials: AssetHandle<MaterialRegistry>,
        transform: &glam::Mat4,
    ) -> GfxResult<()> {
        let submesh_count = ctx
            .assets
            .get(mesh)
            .map(|mesh| mesh.submeshes().len() as u32)
            .ok_or_else(|| GfxError::InvalidHandle(format!("mesh {mesh:?} submitted by {entity:?}")))?;
        self.draw_list.submit(entity, mesh, materials, submesh_count, transform);
        Ok(())
    }

    pub fn submit_overlay(&mut self, overlay: OverlayDraw) {
        self.draw_list.submit_overlay(overlay);
    }

    /// 尺寸不变时什么都不做，否则在下一次 `render` 时重建
    pub fn set_viewport_size(&mut self, extent: vk::Extent2D) {
        let extent = Self::clamp_extent(extent);
        if extent == self.extent {
            return;
        }
        log::info!("scene renderer `{}` resize: {:?} -> {:?}", self.name, self.extent, extent);
        self.extent = extent;
    }

    /// 帧结束，清空这一帧的提交
    pub fn end_frame(&mut self) {
        self.draw_list.clear();
    }

    /// 这一帧的 command buffer 被放弃
    #[inline]
    pub fn discard_target_states(&mut self) {
        self.targets.discard_states();
    }
}
// render
impl SceneRenderer {
    /// 按固定顺序录制所有 pass
    ///
    /// `present_target` 为 None 时结果留在 composite target 中，可以通过 [`Self::output_view`] 采样
    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        cmd: &GfxCommandBuffer,
        camera: &Camera,
        lights: &LightEnvironment,
        present_target: Option<PresentTarget>,
    ) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("SceneRenderer::render");
        self.rebuild_if_needed(ctx)?;

        let frame_label = ctx.frame_label();
        let packed = self.draw_list.pack();
        let transform_buffer = self.transform_buffer.upload(frame_label, &packed)?;

        let aspect = self.extent.width as f32 / self.extent.height as f32;
        let directional = lights.directional_or_default();
        let cascades = compute_cascades(camera, aspect, directional.direction, &ctx.settings.shadow);
        self.write_uniforms(ctx, camera, lights, &cascades)?;
        let frame_set = self.write_frame_set(ctx, lights)?;

        let frame = FrameData {
            renderer_id: self.id,
            extent: self.extent,
            camera,
            lights,
            cascades: &cascades,
            draws: &packed,
            overlays: self.draw_list.overlays(),
            transform_buffer,
            frame_set,
            present_target,
        };

        {
            let _span = vela_crate_tools::profile_span!("SceneRenderer::prepare");
            for pass in &mut self.passes {
                pass.prepare(ctx, &self.targets, &frame)?;
            }
            ctx.descriptor_set_manager.flush(frame_label);
        }

        cmd.begin_label(&self.name, LabelColor::COLOR_PASS);
        for pass in &mut self.passes {
            let start = Instant::now();
            cmd.begin_label(pass.name(), LabelColor::COLOR_PASS);
            pass.record(ctx, &mut self.targets, cmd, &frame)?;
            cmd.end_label();
            self.timings.record(pass.name(), start.elapsed());
        }
        cmd.end_label();
        Ok(())
    }

    /// 第一次渲染时创建所有 target；尺寸变化后只重建依赖尺寸的 pass 及其下游
    fn rebuild_if_needed(&mut self, ctx: &mut RenderContext) -> GfxResult<()> {
        let order = match self.built_extent {
            Some(built) if built == self.extent => return Ok(()),
            Some(_) => {
                let size_dependent = self.passes.iter().map(|pass| pass.size_dependent()).collect::<Vec<_>>();
                self.rebuild_graph.rebuild_order(&size_dependent)
            }
            None => self.rebuild_graph.topological_sort(),
        }
        .map_err(|cycle| GfxError::Config(format!("cyclic scene pass dependencies: {cycle:?}")))?;

        let _span = vela_crate_tools::profile_span!("SceneRenderer::rebuild");
        for idx in order {
            let pass = &mut self.passes[idx];
            log::debug!("rebuild pass `{}` for {:?}", pass.name(), self.extent);
            pass.rebuild(ctx, &mut self.targets, self.extent)?;
        }
        self.built_extent = Some(self.extent);
        Ok(())
    }

    fn write_uniforms(
        &self,
        ctx: &RenderContext,
        camera: &Camera,
        lights: &LightEnvironment,
        cascades: &[ShadowCascade; SHADOW_CASCADE_COUNT],
    ) -> GfxResult<()> {
        let point_lights = lights.gpu_point_lights();
        if point_lights.len() > self.max_point_lights {
            return Err(GfxError::BudgetExhausted {
                budget: "point-lights",
                requested: point_lights.len(),
                capacity: self.max_point_lights,
            });
        }

        let directional = lights.directional_or_default();
        let [tile_count_x, tile_count_y, _] = group_count(self.extent, self.tile_size);
        let light_uniform = GpuLightUniform {
            direction: directional.direction.normalize_or_zero().extend(directional.intensity).to_array(),
            color: directional.color.extend(lights.sky_light.map_or(0.0, |sky| sky.intensity)).to_array(),
            point_light_count: point_lights.len() as u32,
            tile_count_x,
            tile_count_y,
            max_lights_per_tile: self.max_lights_per_tile,
        };
        let shadow_uniform = GpuShadowUniform::new(cascades, ctx.settings.shadow.map_size, directional.cast_shadows);

        let uniforms = self.uniforms.get(ctx.frame_label());
        uniforms.camera.write_pod(0, &[GpuCameraUniform::new(camera, self.extent)])?;
        uniforms.shadow.write_pod(0, &[shadow_uniform])?;
        uniforms.lights.write_pod(0, &[light_uniform])?;
        if !point_lights.is_empty() {
            uniforms.point_lights.write_pod(0, &point_lights)?;
        }
        Ok(())
    }

    /// set 0：所有 pass 共享
    fn write_frame_set(&self, ctx: &mut RenderContext, lights: &LightEnvironment) -> GfxResult<vk::DescriptorSet> {
        let frame_label = ctx.frame_label();
        let key = DescriptorSetKey::global(self.id.global_set_key(GlobalSetSlot::FRAME), frame_label);
        let handle = ctx.descriptor_set_manager.allocate_or_find(key, &ctx.layouts.frame)?;

        let uniforms = self.uniforms.get(frame_label);
        let environment = ctx
            .fallback_textures
            .resolve_cube(&ctx.gfx_resource_manager, lights.sky_light.and_then(|sky| sky.environment));
        let writes = [
            (FrameSetBindings::CAMERA, DescriptorResource::uniform(uniforms.camera.vk_buffer())),
            (FrameSetBindings::SHADOW, DescriptorResource::uniform(uniforms.shadow.vk_buffer())),
            (FrameSetBindings::LIGHTS, DescriptorResource::uniform(uniforms.lights.vk_buffer())),
            (FrameSetBindings::POINT_LIGHTS, DescriptorResource::storage(uniforms.point_lights.vk_buffer())),
            (
                FrameSetBindings::LIGHT_GRID,
                DescriptorResource::storage(self.targets.buffer(TargetId::LightGrid)?.vk_buffer()),
            ),
            (
                FrameSetBindings::SHADOW_MAP,
                DescriptorResource::sampled(
                    self.targets.image(TargetId::ShadowMap)?.vk_view(),
                    ctx.samplers.shadow.handle(),
                ),
            ),
            (
                FrameSetBindings::ENVIRONMENT,
                DescriptorResource::sampled(environment, ctx.samplers.linear_clamp.handle()),
            ),
        ];
        for (binding, resource) in writes {
            ctx.descriptor_set_manager.write_descriptor(handle, binding, resource)?;
        }
        ctx.descriptor_set_manager.resolve(handle)
    }
}
// getters
impl SceneRenderer {
    #[inline]
    pub fn id(&self) -> RendererId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn targets(&self) -> &SceneTargets {
        &self.targets
    }

    #[inline]
    pub fn draw_list(&self) -> &DrawList {
        &self.draw_list
    }

    #[inline]
    pub fn timings(&self) -> PassTimings {
        self.timings
    }

    /// 最终结果，离屏 renderer 渲染之后处于可采样状态
    pub fn output_view(&self) -> GfxResult<vk::ImageView> {
        self.targets.image(TargetId::Composite).map(|image| image.vk_view())
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use vela_gfx::commands::command::GfxCommand;
    use vela_render_interface::render_settings::RendererSettings;
    use vela_scene::{lights::PointLight, material::Material, shapes::CubeShape};

    use super::*;
    use crate::passes::test_utils::headless_context_with;

    const FULL_HD: vk::Extent2D = vk::Extent2D {
        width: 1920,
        height: 1080,
    };
    const HALF_HD: vk::Extent2D = vk::Extent2D {
        width: 960,
        height: 540,
    };

    fn test_settings() -> RendererSettings {
        let mut settings = RendererSettings::default();
        settings.shadow.map_size = 512;
        settings.light_culling.max_lights_per_tile = 16;
        settings.max_instances = 64;
        settings
    }

    fn render_once(
        ctx: &mut RenderContext,
        renderer: &mut SceneRenderer,
        lights: &LightEnvironment,
        present_target: Option<PresentTarget>,
    ) -> GfxResult<()> {
        let cmd = ctx.cmd_allocator.alloc_command_buffer(ctx.frame_label(), "scene-test")?;
        let result = renderer.render(ctx, &cmd, &Camera::default(), lights, present_target);
        renderer.end_frame();
        result
    }

    fn cube_with_material(ctx: &mut RenderContext) -> (AssetHandle<StaticMesh>, AssetHandle<MaterialRegistry>) {
        let mesh = CubeShape::create_mesh(ctx.backend.clone()).unwrap();
        let mesh = ctx.assets.insert(mesh);
        let material = ctx.assets.insert(Material::default());
        let materials = ctx.assets.insert(MaterialRegistry::new(vec![material]));
        (mesh, materials)
    }

    #[test]
    fn test_dispatch_counts() {
        let (backend, mut ctx) = headless_context_with(test_settings());
        let (mesh, materials) = cube_with_material(&mut ctx);
        let mut renderer = SceneRenderer::new(&mut ctx, "main", FULL_HD).unwrap();

        // 同一个 DrawKey 的 3 个实例
        for (i, x) in [-2.0, 0.0, 2.0].into_iter().enumerate() {
            let transform = glam::Mat4::from_translation(glam::vec3(x, 0.0, 0.0));
            renderer.submit(&ctx, EntityId(i as u64), mesh, materials, &transform).unwrap();
        }
        let lights = LightEnvironment {
            point_lights: (0..4)
                .map(|i| PointLight {
                    position: glam::vec3(i as f32, 1.0, 0.0),
                    radius: 3.0,
                    color: glam::Vec3::ONE,
                    intensity: 2.0,
                    falloff: 1.0,
                })
                .collect(),
            ..Default::default()
        };
        backend.clear_journal();
        render_once(&mut ctx, &mut renderer, &lights, None).unwrap();

        let dispatches = backend.dispatches();
        // light culling，然后 bloom 的第一个 dispatch 写入 960x540 的 mip 0
        assert_eq!(dispatches[0], [120, 68, 1]);
        assert_eq!(dispatches[1], [60, 34, 1]);
        // 8 个 mip：prefilter + 14 次 downsample + first upsample + 7 次 upsample
        assert_eq!(dispatches.len(), 1 + 23);

        // 三个实例合并成一次 instanced draw
        let instance_counts = backend
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                GfxCommand::DrawIndexed { instance_count, .. } => Some(instance_count),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert!(!instance_counts.is_empty());
        assert!(instance_counts.iter().all(|&count| count == 3));

        let light_buffer = renderer.uniforms.get(ctx.frame_label()).lights.vk_buffer();
        let bytes = backend.buffer_contents(light_buffer).unwrap();
        let light_uniform = bytemuck::pod_read_unaligned::<GpuLightUniform>(&bytes[..size_of::<GpuLightUniform>()]);
        assert_eq!(light_uniform.point_light_count, 4);
        assert_eq!((light_uniform.tile_count_x, light_uniform.tile_count_y), (120, 68));
        assert_eq!(light_uniform.max_lights_per_tile, 16);

        let grid = renderer.targets().buffer(TargetId::LightGrid).unwrap();
        let grid_size = backend.buffer_contents(grid.vk_buffer()).unwrap().len();
        assert_eq!(grid_size, 120 * 68 * 16 * 4);
    }

    #[test]
    fn test_disabled_bloom_skips_dispatches() {
        let mut settings = test_settings();
        settings.bloom.enabled = false;
        let (backend, mut ctx) = headless_context_with(settings);
        let mut renderer = SceneRenderer::new(&mut ctx, "main", HALF_HD).unwrap();
        render_once(&mut ctx, &mut renderer, &LightEnvironment::default(), None).unwrap();

        assert_eq!(backend.dispatches(), vec![[60, 34, 1]]);
        let bloom_intensity = backend.commands().into_iter().find_map(|command| match command {
            GfxCommand::PushConstants { data, stages, .. } if stages == vk::ShaderStageFlags::FRAGMENT => {
                Some(bytemuck::pod_read_unaligned::<f32>(&data[4..8]))
            }
            _ => None,
        });
        assert_eq!(bloom_intensity, Some(0.0));
    }

    #[test]
    fn test_resize_rebuilds_size_dependent_targets() {
        let (backend, mut ctx) = headless_context_with(test_settings());
        let mut renderer = SceneRenderer::new(&mut ctx, "main", FULL_HD).unwrap();
        render_once(&mut ctx, &mut renderer, &LightEnvironment::default(), None).unwrap();

        let shadow_before = renderer.targets().image(TargetId::ShadowMap).unwrap().vk_image();
        let depth_before = renderer.targets().image(TargetId::Depth).unwrap().vk_image();

        // 尺寸不变不会重建
        renderer.set_viewport_size(FULL_HD);
        render_once(&mut ctx, &mut renderer, &LightEnvironment::default(), None).unwrap();
        assert_eq!(renderer.targets().image(TargetId::Depth).unwrap().vk_image(), depth_before);

        renderer.set_viewport_size(HALF_HD);
        backend.clear_journal();
        render_once(&mut ctx, &mut renderer, &LightEnvironment::default(), None).unwrap();

        let targets = renderer.targets();
        assert_eq!(targets.image(TargetId::ShadowMap).unwrap().vk_image(), shadow_before);
        let depth = targets.image(TargetId::Depth).unwrap().vk_image();
        assert_ne!(depth, depth_before);
        assert_eq!(backend.image_desc(depth).unwrap().extent, HALF_HD);
        assert_eq!(backend.image_desc(targets.image(TargetId::Composite).unwrap().vk_image()).unwrap().extent, HALF_HD);
        assert_eq!(backend.dispatches()[0], [60, 34, 1]);
    }

    #[test]
    fn test_instance_offsets_in_vertex_bindings() {
        let (backend, mut ctx) = headless_context_with(test_settings());
        let (mesh_a, materials) = cube_with_material(&mut ctx);
        let (mesh_b, _) = cube_with_material(&mut ctx);
        let mut renderer = SceneRenderer::new(&mut ctx, "main", HALF_HD).unwrap();

        renderer.submit(&ctx, EntityId(0), mesh_a, materials, &glam::Mat4::IDENTITY).unwrap();
        renderer.submit(&ctx, EntityId(1), mesh_b, materials, &glam::Mat4::IDENTITY).unwrap();
        renderer.submit(&ctx, EntityId(2), mesh_a, materials, &glam::Mat4::from_scale(glam::Vec3::splat(2.0))).unwrap();
        render_once(&mut ctx, &mut renderer, &LightEnvironment::default(), None).unwrap();
        assert!(renderer.draw_list().is_empty());

        let offsets = backend
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                GfxCommand::BindVertexBuffers { offsets, .. } => Some(offsets),
                _ => None,
            })
            .collect::<Vec<_>>();
        // mesh_a 的两个实例在前，mesh_b 从第 128 字节开始
        assert!(offsets.contains(&vec![0, 0]));
        assert!(offsets.contains(&vec![0, 128]));

        let instance_counts = backend
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                GfxCommand::DrawIndexed { instance_count, .. } => Some(instance_count),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert!(instance_counts.contains(&2));
        assert!(instance_counts.contains(&1));
    }

    #[test]
    fn test_submit_missing_mesh() {
        let (_backend, mut ctx) = headless_context_with(test_settings());
        let (mesh, materials) = cube_with_material(&mut ctx);
        let mut renderer = SceneRenderer::new(&mut ctx, "main", HALF_HD).unwrap();
        ctx.assets.remove(mesh);

        let err = renderer.submit(&ctx, EntityId(3), mesh, materials, &glam::Mat4::IDENTITY).unwrap_err();
        assert!(matches!(err, GfxError::InvalidHandle(_)));
        assert!(!err.is_fatal());
        assert!(renderer.draw_list().is_empty());
    }

    #[test]
    fn test_point_light_budget() {
        let mut settings = test_settings();
        settings.light_culling.max_point_lights = 2;
        let (_backend, mut ctx) = headless_context_with(settings);
        let mut renderer = SceneRenderer::new(&mut ctx, "main", HALF_HD).unwrap();

        let light = PointLight {
            position: glam::Vec3::ZERO,
            radius: 1.0,
            color: glam::Vec3::ONE,
            intensity: 1.0,
            falloff: 1.0,
        };
        let lights = LightEnvironment {
            point_lights: vec![light; 3],
            ..Default::default()
        };
        let err = render_once(&mut ctx, &mut renderer, &lights, None).unwrap_err();
        assert!(matches!(err, GfxError::BudgetExhausted { budget: "point-lights", requested: 3, capacity: 2 }));
    }

    #[test]
    fn test_present_blit_and_offscreen_output() {
        let (backend, mut ctx) = headless_context_with(test_settings());
        let mut main = SceneRenderer::new(&mut ctx, "main", HALF_HD).unwrap();
        let mut preview = SceneRenderer::new(&mut ctx, "preview", vk::Extent2D { width: 320, height: 240 }).unwrap();
        assert_ne!(main.id(), preview.id());

        let swapchain_image = vk::Image::from_raw(0xfeed);
        let present = PresentTarget {
            image: swapchain_image,
            extent: HALF_HD,
        };
        render_once(&mut ctx, &mut main, &LightEnvironment::default(), Some(present)).unwrap();
        render_once(&mut ctx, &mut preview, &LightEnvironment::default(), None).unwrap();

        let blits = backend
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                GfxCommand::BlitImage(blit) => Some(blit),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(blits.len(), 1);
        assert_eq!(blits[0].dst, swapchain_image);
        assert_eq!(blits[0].filter, vk::Filter::LINEAR);

        assert_ne!(main.output_view().unwrap(), preview.output_view().unwrap());

        main.destroy(&mut ctx);
        preview.destroy(&mut ctx);
    }
}
