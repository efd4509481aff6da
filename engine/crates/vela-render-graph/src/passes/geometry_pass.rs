use std::collections::HashMap;

use ash::vk;
use vela_gfx::{
    GfxError, GfxResult,
    basic::color::LabelColor,
    commands::{
        command::{AttachmentDesc, ClearValue, RenderingDesc},
        command_buffer::GfxCommandBuffer,
    },
    descriptors::write::DescriptorResource,
    pipelines::{graphics_pipeline::{BlendMode, GfxPipeline}, pipeline_layout::GfxPipelineLayout},
    resources::image::ImageDesc,
};
use vela_render_interface::{descriptor_set_manager::DescriptorSetKey, render_settings::DefaultRendererSettings};
use vela_scene::material::material_id;

use crate::{
    draw_list::DrawBatch,
    gpu_data::{GridPushConstants, push_constant_range},
    passes::{FrameData, ScenePass, create_graphics_pipeline, draw_batch, static_mesh_vertex_input},
    render_context::RenderContext,
    resource_state::RgImageState,
    scene_layouts::MaterialSetBindings,
    scene_targets::{SceneImage, SceneTargets, SubViews, TargetId},
};

/// batch 在本帧使用的材质
#[derive(Debug, Clone, Copy)]
struct BatchMaterial {
    pipeline: vk::Pipeline,
    set: vk::DescriptorSet,
}

/// 完整材质着色，复用 pre-depth 的深度（不清空），并绘制天空盒与网格
pub struct GeometryPass {
    pipeline_layout: GfxPipelineLayout,
    /// 按材质的 shader 名称缓存
    material_pipelines: HashMap<String, GfxPipeline>,
    skybox_pipeline: GfxPipeline,
    grid_pipeline: GfxPipeline,

    /// 与 `frame.draws.batches` 一一对应，材质缺失的 batch 为 None
    batch_materials: Vec<Option<BatchMaterial>>,
    rendering: Option<RenderingDesc>,
    show_grid: bool,
}
impl GeometryPass {
    const COLOR_FORMAT: vk::Format = DefaultRendererSettings::DEFAULT_COLOR_FORMAT;
    const DEPTH_FORMAT: vk::Format = DefaultRendererSettings::DEFAULT_DEPTH_FORMAT;

    pub fn new(ctx: &mut RenderContext) -> GfxResult<Self> {
        let pipeline_layout = GfxPipelineLayout::new(
            ctx.backend.clone(),
            &[ctx.layouts.frame.handle(), ctx.layouts.material.handle()],
            &[push_constant_range::<GridPushConstants>(
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
            "geometry",
        )?;

        let skybox_pipeline = create_graphics_pipeline(
            ctx,
            &pipeline_layout,
            &[(vk::ShaderStageFlags::VERTEX, "skybox.vert"), (vk::ShaderStageFlags::FRAGMENT, "skybox.frag")],
            |desc| {
                desc.attachments(&[Self::COLOR_FORMAT], Some(Self::DEPTH_FORMAT), BlendMode::Opaque)
                    .depth_test(Some(vk::CompareOp::LESS_OR_EQUAL), false)
                    .cull_mode(vk::CullModeFlags::NONE)
            },
            "skybox",
        )?;
        let grid_pipeline = create_graphics_pipeline(
            ctx,
            &pipeline_layout,
            &[(vk::ShaderStageFlags::VERTEX, "grid.vert"), (vk::ShaderStageFlags::FRAGMENT, "grid.frag")],
            |desc| {
                desc.attachments(&[Self::COLOR_FORMAT], Some(Self::DEPTH_FORMAT), BlendMode::AlphaBlend)
                    .depth_test(Some(vk::CompareOp::LESS_OR_EQUAL), false)
                    .cull_mode(vk::CullModeFlags::NONE)
            },
            "grid",
        )?;

        Ok(Self {
            pipeline_layout,
            material_pipelines: HashMap::new(),
            skybox_pipeline,
            grid_pipeline,
            batch_materials: Vec::new(),
            rendering: None,
            show_grid: ctx.settings.show_grid,
        })
    }

    fn material_pipeline(&mut self, ctx: &mut RenderContext, shader: &str) -> GfxResult<vk::Pipeline> {
        if let Some(pipeline) = self.material_pipelines.get(shader) {
            return Ok(pipeline.handle());
        }

        let vert = format!("{shader}.vert");
        let frag = format!("{shader}.frag");
        let pipeline = create_graphics_pipeline(
            ctx,
            &self.pipeline_layout,
            &[(vk::ShaderStageFlags::VERTEX, &vert), (vk::ShaderStageFlags::FRAGMENT, &frag)],
            |desc| {
                static_mesh_vertex_input(desc)
                    .attachments(&[Self::COLOR_FORMAT], Some(Self::DEPTH_FORMAT), BlendMode::Opaque)
                    .depth_test(Some(vk::CompareOp::LESS_OR_EQUAL), false)
            },
            &format!("material-{shader}"),
        )?;
        log::info!("create material pipeline: {shader}");
        let handle = pipeline.handle();
        self.material_pipelines.insert(shader.to_string(), pipeline);
        Ok(handle)
    }

    /// 写入 batch 的材质 set；mesh、registry 或材质缺失时返回 None
    fn prepare_batch(&mut self, ctx: &mut RenderContext, batch: &DrawBatch) -> GfxResult<Option<BatchMaterial>> {
        let Some(mesh) = ctx.assets.get(batch.key.mesh) else {
            return Ok(None);
        };
        let Some(material_index) = mesh.submesh(batch.key.submesh_index).map(|submesh| submesh.material_index) else {
            return Ok(None);
        };
        let Some(handle) = ctx.assets.get(batch.key.materials).and_then(|registry| registry.material(material_index))
        else {
            log::warn!("no material for {:?}", batch.key);
            return Ok(None);
        };
        let Some(material) = ctx.assets.get(handle) else {
            log::warn!("missing material {handle:?}");
            return Ok(None);
        };
        let shader = material.shader.clone();
        let uniform = material.uniform();
        let albedo = material.albedo_map;

        let frame_label = ctx.frame_label();
        let id = material_id(handle);
        let uniform_resource = ctx.material_uniforms.bind(frame_label, id, &uniform)?;
        let albedo_view = ctx.fallback_textures.resolve_2d(&ctx.gfx_resource_manager, albedo);
        let sampler = ctx.samplers.linear_repeat.handle();

        let set_handle = ctx
            .descriptor_set_manager
            .allocate_or_find(DescriptorSetKey::material(MaterialSetBindings::SET, frame_label, id), &ctx.layouts.material)?;
        ctx.descriptor_set_manager.write_descriptor(set_handle, MaterialSetBindings::UNIFORM, uniform_resource)?;
        ctx.descriptor_set_manager.write_descriptor(
            set_handle,
            MaterialSetBindings::ALBEDO,
            DescriptorResource::sampled(albedo_view, sampler),
        )?;

        Ok(Some(BatchMaterial {
            pipeline: self.material_pipeline(ctx, &shader)?,
            set: ctx.descriptor_set_manager.resolve(set_handle)?,
        }))
    }
}
impl ScenePass for GeometryPass {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn inputs(&self) -> &'static [TargetId] {
        &[TargetId::Depth, TargetId::ShadowMap, TargetId::LightGrid]
    }

    fn outputs(&self) -> &'static [TargetId] {
        &[TargetId::SceneColor]
    }

    fn size_dependent(&self) -> bool {
        true
    }

    fn rebuild(&mut self, ctx: &mut RenderContext, targets: &mut SceneTargets, extent: vk::Extent2D) -> GfxResult<()> {
        let desc = ImageDesc::new_2d(
            extent,
            Self::COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
        );
        let frame_id = ctx.frame_id();
        let color = SceneImage::create(&mut ctx.gfx_resource_manager, desc, SubViews::None, "scene-color")?;
        targets.insert_image(TargetId::SceneColor, color, &mut ctx.gfx_resource_manager, frame_id);

        let color = targets.image(TargetId::SceneColor)?;
        let depth = targets.image(TargetId::Depth)?;
        self.rendering = Some(
            RenderingDesc::new(extent)
                .color(AttachmentDesc::clear(
                    color.vk_view(),
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
                ))
                .depth(AttachmentDesc::load(depth.vk_view(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
        );
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut RenderContext, _targets: &SceneTargets, frame: &FrameData) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("GeometryPass::prepare");
        self.batch_materials.clear();
        for batch in &frame.draws.batches {
            let material = self.prepare_batch(ctx, batch)?;
            self.batch_materials.push(material);
        }
        Ok(())
    }

    fn record(
        &mut self,
        ctx: &RenderContext,
        targets: &mut SceneTargets,
        cmd: &GfxCommandBuffer,
        frame: &FrameData,
    ) -> GfxResult<()> {
        let rendering =
            self.rendering.as_ref().ok_or_else(|| GfxError::InvalidHandle("geometry pass is not built".to_string()))?;
        targets.image_mut(TargetId::SceneColor)?.transition(cmd, RgImageState::COLOR_ATTACHMENT_WRITE);
        targets.image_mut(TargetId::Depth)?.transition(cmd, RgImageState::DEPTH_ATTACHMENT_READ_WRITE);

        let bind_point = vk::PipelineBindPoint::GRAPHICS;
        let layout = self.pipeline_layout.handle();
        cmd.cmd_begin_rendering(rendering);
        cmd.cmd_set_viewport(rendering.extent);

        cmd.begin_label("skybox", LabelColor::COLOR_STAGE);
        cmd.cmd_bind_pipeline(bind_point, self.skybox_pipeline.handle());
        cmd.cmd_bind_descriptor_sets(bind_point, layout, 0, &[frame.frame_set]);
        cmd.cmd_draw(3, 1, 0, 0);
        cmd.end_label();

        cmd.begin_label("opaque", LabelColor::COLOR_STAGE);
        let mut bound_pipeline = vk::Pipeline::null();
        for (batch, material) in frame.draws.batches.iter().zip(&self.batch_materials) {
            let Some(material) = material else {
                continue;
            };
            if material.pipeline != bound_pipeline {
                cmd.cmd_bind_pipeline(bind_point, material.pipeline);
                cmd.cmd_bind_descriptor_sets(bind_point, layout, 0, &[frame.frame_set]);
                bound_pipeline = material.pipeline;
            }
            cmd.cmd_bind_descriptor_sets(bind_point, layout, MaterialSetBindings::SET, &[material.set]);
            draw_batch(ctx, cmd, frame, batch, |_| true);
        }
        cmd.end_label();

        if self.show_grid {
            cmd.begin_label("grid", LabelColor::COLOR_STAGE);
            cmd.cmd_bind_pipeline(bind_point, self.grid_pipeline.handle());
            cmd.cmd_bind_descriptor_sets(bind_point, layout, 0, &[frame.frame_set]);
            cmd.cmd_push_constants(
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&GridPushConstants::new()),
            );
            cmd.cmd_draw(6, 1, 0, 0);
            cmd.end_label();
        }

        cmd.cmd_end_rendering();

        // bloom (compute) 与 composite (fragment) 都会采样
        targets.image_mut(TargetId::SceneColor)?.transition(cmd, RgImageState::SHADER_READ_ANY);
        Ok(())
    }
}
