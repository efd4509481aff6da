/// 透视相机
///
/// 坐标系：RightHand, X-Right, Y-Up，没有旋转时看向 -Z
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: glam::Vec3,

    pub euler_yaw_deg: f32,
    pub euler_pitch_deg: f32,
    pub euler_roll_deg: f32,

    /// 竖直方向的视场角
    pub fov_y_deg: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// 相机的上参考向量
    const CAMERA_UP: glam::Vec3 = glam::Vec3::new(0.0, 1.0, 0.0);

    /// YXZ 表示 Y(yaw)-X(Pitch)-Z(Roll) 的旋转顺序
    const CAMERA_EULER: glam::EulerRot = glam::EulerRot::YXZ;

    const CAMERA_FORWARD: glam::Vec3 = glam::Vec3::new(0.0, 0.0, -1.0);

    const CAMERA_RIGHT: glam::Vec3 = glam::Vec3::new(1.0, 0.0, 0.0);

    const K_PITCH: f32 = 89.5;

    fn rotation(&self) -> glam::Mat4 {
        glam::Mat4::from_euler(
            Self::CAMERA_EULER,
            self.euler_yaw_deg.to_radians(),
            self.euler_pitch_deg.to_radians(),
            self.euler_roll_deg.to_radians(),
        )
    }

    pub fn view_matrix(&self) -> glam::Mat4 {
        glam::Mat4::look_to_rh(self.position, self.camera_forward(), Self::CAMERA_UP)
    }

    /// depth 范围为 [0, 1]，并且翻转 Y 以适配 Vulkan 的 NDC
    pub fn projection_matrix(&self, aspect: f32) -> glam::Mat4 {
        let mut proj = glam::Mat4::perspective_rh(self.fov_y_deg.to_radians(), aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn view_projection(&self, aspect: f32) -> glam::Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    pub fn camera_forward(&self) -> glam::Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_FORWARD)
    }

    pub fn camera_right(&self) -> glam::Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_RIGHT)
    }

    /// 朝相机看向的方向进行移动
    pub fn move_forward(&mut self, length: f32) {
        self.position += self.camera_forward() * length;
    }

    pub fn move_right(&mut self, length: f32) {
        self.position += self.camera_right() * length;
    }

    /// 朝世界的 Up 进行移动
    pub fn move_up(&mut self, length: f32) {
        self.position += Self::CAMERA_UP * length;
    }

    pub fn rotate_yaw(&mut self, angle: f32) {
        self.euler_yaw_deg = (self.euler_yaw_deg + angle).rem_euclid(360.0);
    }

    pub fn rotate_pitch(&mut self, angle: f32) {
        self.euler_pitch_deg = (self.euler_pitch_deg + angle).clamp(-Self::K_PITCH, Self::K_PITCH);
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: glam::Vec3::new(0.0, 2.0, 8.0),
            euler_yaw_deg: 0.0,
            euler_pitch_deg: 0.0,
            euler_roll_deg: 0.0,
            fov_y_deg: 45.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera_looks_down_negative_z() {
        let camera = Camera::default();
        assert!(camera.camera_forward().abs_diff_eq(glam::Vec3::NEG_Z, 1e-6));

        // 相机前方 near 平面上的点映射到 depth 0
        let clip = camera.view_projection(16.0 / 9.0)
            * (camera.position + camera.camera_forward() * camera.near).extend(1.0);
        assert!((clip.z / clip.w).abs() < 1e-4);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.rotate_pitch(120.0);
        assert_eq!(camera.euler_pitch_deg, 89.5);
        camera.rotate_yaw(-30.0);
        assert_eq!(camera.euler_yaw_deg, 330.0);
    }
}
