//! 方向光的级联阴影
//!
//! 按照 practical split scheme 划分相机视锥，每个 cascade 用包围球拟合一个正交投影，
//! 并把投影原点对齐到 shadow map 的 texel，避免相机移动时阴影边缘闪烁。

use glam::{Mat4, Vec3, Vec4};
use vela_render_interface::render_settings::ShadowSettings;
use vela_scene::camera::Camera;

pub const SHADOW_CASCADE_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowCascade {
    pub view_projection: Mat4,
    /// 该 cascade 覆盖的相机深度范围（正数，沿视线方向）
    pub near_depth: f32,
    pub split_depth: f32,
}
impl Default for ShadowCascade {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            near_depth: 0.0,
            split_depth: 0.0,
        }
    }
}
impl ShadowCascade {
    /// view space 中的 split 深度，相机看向 -Z，fragment 用 view space z 与它比较
    #[inline]
    pub fn signed_split_depth(&self) -> f32 {
        -self.split_depth
    }
}

/// 每个 cascade 远端占 [near, far] 的比例
pub fn cascade_split_ratios(near: f32, far: f32, lambda: f32) -> [f32; SHADOW_CASCADE_COUNT] {
    let range = far - near;
    let ratio = far / near;
    std::array::from_fn(|i| {
        let p = (i + 1) as f32 / SHADOW_CASCADE_COUNT as f32;
        let log = near * ratio.powf(p);
        let uniform = near + range * p;
        let d = lambda * (log - uniform) + uniform;
        (d - near) / range
    })
}

/// 从相机、方向光计算 4 个 cascade
///
/// `light_direction` 是光线传播方向，不要求归一化
pub fn compute_cascades(
    camera: &Camera,
    aspect: f32,
    light_direction: Vec3,
    settings: &ShadowSettings,
) -> [ShadowCascade; SHADOW_CASCADE_COUNT] {
    let _span = vela_crate_tools::profile_span!("compute_cascades");

    let light_dir = {
        let dir = light_direction.normalize_or_zero();
        if dir == Vec3::ZERO { Vec3::NEG_Y } else { dir }
    };
    let near = camera.near;
    let range = camera.far - camera.near;
    let splits = cascade_split_ratios(camera.near, camera.far, settings.split_lambda);

    // NDC 中的视锥角点，depth 范围为 [0, 1]
    let inv_view_proj = camera.view_projection(aspect).inverse();
    let frustum_corners: [Vec3; 8] = [
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(-1.0, -1.0, 1.0),
    ]
    .map(|ndc| inv_view_proj.project_point3(ndc));

    let up = if light_dir.dot(Vec3::Y).abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let half_map_size = settings.map_size.max(1) as f32 * 0.5;

    let mut last_split = 0.0;
    std::array::from_fn(|cascade_idx| {
        let split = splits[cascade_idx];

        let mut corners = frustum_corners;
        for j in 0..4 {
            let dist = frustum_corners[j + 4] - frustum_corners[j];
            corners[j + 4] = frustum_corners[j] + dist * split;
            corners[j] = frustum_corners[j] + dist * last_split;
        }

        let center = corners.iter().fold(Vec3::ZERO, |acc, corner| acc + *corner) / 8.0;
        let radius = corners.iter().map(|corner| corner.distance(center)).fold(0.0_f32, f32::max);
        let radius = (radius * 16.0).ceil() / 16.0;

        let eye = center - light_dir * radius;
        let view = Mat4::look_at_rh(eye, center, up);
        let mut projection = Mat4::orthographic_rh(
            -radius,
            radius,
            -radius,
            radius,
            settings.near_plane_offset,
            2.0 * radius + settings.far_plane_offset,
        );

        // 世界原点在 shadow map 上对齐到整数 texel
        let origin = (projection * view * Vec4::new(0.0, 0.0, 0.0, 1.0)) * half_map_size;
        let rounded = origin.round();
        let offset = (rounded - origin) / half_map_size;
        projection.w_axis.x += offset.x;
        projection.w_axis.y += offset.y;

        let cascade = ShadowCascade {
            view_projection: projection * view,
            near_depth: near + last_split * range,
            split_depth: near + split * range,
        };
        last_split = split;
        cascade
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ShadowSettings {
        ShadowSettings::default()
    }

    #[test]
    fn test_splits_are_monotonic() {
        let camera = Camera::default();
        let cascades = compute_cascades(&camera, 16.0 / 9.0, glam::vec3(-0.4, -1.0, -0.3), &settings());

        assert_eq!(cascades[0].near_depth, camera.near);
        for pair in cascades.windows(2) {
            assert!(pair[1].split_depth > pair[0].split_depth);
            assert!((pair[1].near_depth - pair[0].split_depth).abs() < 1e-3);
            assert!(pair[1].signed_split_depth() < pair[0].signed_split_depth());
        }
        assert!((cascades[3].split_depth - camera.far).abs() < 1e-2);
    }

    #[test]
    fn test_split_ratios_blend_log_and_uniform() {
        // lambda = 0 时是均匀划分
        let uniform = cascade_split_ratios(1.0, 101.0, 0.0);
        for (i, ratio) in uniform.iter().enumerate() {
            assert!((ratio - (i + 1) as f32 * 0.25).abs() < 1e-5);
        }
        // lambda = 1 时是对数划分，近处的 cascade 更小
        let log = cascade_split_ratios(1.0, 101.0, 1.0);
        assert!(log[0] < uniform[0]);
        assert!((log[3] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cascade_covers_its_slice() {
        let camera = Camera::default();
        let aspect = 1.5;
        let cascades = compute_cascades(&camera, aspect, glam::vec3(0.0, -1.0, -0.5), &settings());

        // 每个 cascade 覆盖的视锥中心点投影到 light clip space 之后在 [-1, 1] 之内
        for cascade in &cascades {
            let depth = (cascade.near_depth + cascade.split_depth) * 0.5;
            let point = camera.position + camera.camera_forward() * depth;
            let clip = cascade.view_projection.project_point3(point);
            assert!(clip.x.abs() <= 1.0 && clip.y.abs() <= 1.0, "{clip:?}");
            assert!((0.0..=1.0).contains(&clip.z), "{clip:?}");
        }
    }

    #[test]
    fn test_origin_snaps_to_texels() {
        let settings = settings();
        let half = settings.map_size as f32 * 0.5;
        let mut camera = Camera::default();
        for step in 0..3 {
            camera.position.x += 0.37 * step as f32;
            let cascades = compute_cascades(&camera, 1.0, glam::vec3(0.3, -1.0, 0.2), &settings);
            for cascade in &cascades {
                let origin = cascade.view_projection * Vec4::new(0.0, 0.0, 0.0, 1.0) * half;
                assert!((origin.x - origin.x.round()).abs() < 1e-2, "{origin:?}");
                assert!((origin.y - origin.y.round()).abs() < 1e-2, "{origin:?}");
            }
        }
    }

    #[test]
    fn test_vertical_light_uses_fallback_up() {
        let cascades = compute_cascades(&Camera::default(), 1.0, Vec3::NEG_Y, &settings());
        assert!(cascades.iter().all(|c| c.view_projection.is_finite()));
    }
}
