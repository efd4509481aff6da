use std::collections::HashSet;

use vela_scene::camera::Camera;
use winit::{
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
};

/// 把 winit 的窗口事件整理成相机控制需要的状态
///
/// - WASD / QE 平移
/// - 按住鼠标右键拖拽旋转
#[derive(Debug)]
pub struct CameraController {
    pressed_keys: HashSet<KeyCode>,
    rotating: bool,
    last_cursor: Option<[f64; 2]>,
    /// 自上次 update 以来累计的鼠标位移
    cursor_delta: [f64; 2],

    /// 每秒移动的距离
    pub move_speed: f32,
    /// 每个像素旋转的角度
    pub rotate_speed_deg: f32,
}
impl Default for CameraController {
    fn default() -> Self {
        Self {
            pressed_keys: HashSet::new(),
            rotating: false,
            last_cursor: None,
            cursor_delta: [0.0; 2],
            move_speed: 4.0,
            rotate_speed_deg: 0.15,
        }
    }
}
impl CameraController {
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state,
                        ..
                    },
                ..
            } => self.on_key(*key_code, *state),
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => self.on_rotate_button(*state),
            WindowEvent::CursorMoved { position, .. } => self.on_cursor_moved([position.x, position.y]),
            WindowEvent::Focused(false) => {
                self.pressed_keys.clear();
                self.rotating = false;
            }
            _ => {}
        }
    }

    fn on_key(&mut self, key_code: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.pressed_keys.insert(key_code);
            }
            ElementState::Released => {
                self.pressed_keys.remove(&key_code);
            }
        }
    }

    fn on_rotate_button(&mut self, state: ElementState) {
        self.rotating = state.is_pressed();
        self.last_cursor = None;
    }

    fn on_cursor_moved(&mut self, position: [f64; 2]) {
        if self.rotating
            && let Some(last) = self.last_cursor
        {
            self.cursor_delta[0] += position[0] - last[0];
            self.cursor_delta[1] += position[1] - last[1];
        }
        self.last_cursor = Some(position);
    }

    #[inline]
    pub fn is_pressed(&self, key_code: KeyCode) -> bool {
        self.pressed_keys.contains(&key_code)
    }

    fn axis(&self, positive: KeyCode, negative: KeyCode) -> f32 {
        self.is_pressed(positive) as i32 as f32 - self.is_pressed(negative) as i32 as f32
    }

    /// 根据按键状态移动相机，每帧调用一次
    pub fn update(&mut self, camera: &mut Camera, delta_time_s: f32) {
        let step = self.move_speed * delta_time_s;
        camera.move_forward(self.axis(KeyCode::KeyW, KeyCode::KeyS) * step);
        camera.move_right(self.axis(KeyCode::KeyD, KeyCode::KeyA) * step);
        camera.move_up(self.axis(KeyCode::KeyE, KeyCode::KeyQ) * step);

        let [dx, dy] = std::mem::take(&mut self.cursor_delta);
        if dx != 0.0 || dy != 0.0 {
            camera.rotate_yaw(-dx as f32 * self.rotate_speed_deg);
            camera.rotate_pitch(-dy as f32 * self.rotate_speed_deg);
        }
    }
}
