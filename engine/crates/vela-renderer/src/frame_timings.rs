use std::time::{Duration, Instant};

use vela_render_graph::scene_renderer::PassTimings;

#[derive(Debug)]
pub struct Timer {
    last_tick: Instant,

    delta_time: Duration,
    total_time: Duration,
}

impl Default for Timer {
    fn default() -> Self {
        Self {
            last_tick: Instant::now(),
            delta_time: Duration::ZERO,
            total_time: Duration::ZERO,
        }
    }
}

impl Timer {
    /// 每帧开始的时候调用
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta_time = now.duration_since(self.last_tick);
        self.last_tick = now;
        self.total_time += self.delta_time;
    }

    pub fn elapsed_since_tick(&self) -> Duration {
        self.last_tick.elapsed()
    }

    #[inline]
    pub fn delta_time(&self) -> Duration {
        self.delta_time
    }

    /// 上一帧的时间（秒）
    #[inline]
    pub fn delta_time_s(&self) -> f32 {
        self.delta_time.as_secs_f32()
    }

    /// 当前帧率，第一帧之前为 0
    #[inline]
    pub fn fps(&self) -> f32 {
        fps_of(self.delta_time)
    }

    #[inline]
    pub fn total_time_s(&self) -> f32 {
        self.total_time.as_secs_f32()
    }
}

fn fps_of(delta_time: Duration) -> f32 {
    if delta_time.is_zero() { 0.0 } else { 1.0 / delta_time.as_secs_f32() }
}

/// 一帧的 CPU 耗时快照
///
/// 每帧结束之后由 [`crate::renderer::Renderer`] 发布，可以自由拷贝到 UI 或者日志
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimings {
    pub frame_id: u64,
    pub begin_frame: Duration,
    pub shadow: Duration,
    pub geometry: Duration,
    pub bloom: Duration,
    pub end_frame: Duration,
    /// 与上一帧开始之间的间隔
    pub delta_time: Duration,
}
impl FrameTimings {
    pub fn new(frame_id: u64, delta_time: Duration) -> Self {
        Self {
            frame_id,
            delta_time,
            ..Default::default()
        }
    }

    /// 多个 SceneRenderer 的 pass 耗时累加在一起
    pub fn accumulate_passes(&mut self, passes: PassTimings) {
        self.shadow += passes.shadow;
        self.geometry += passes.geometry;
        self.bloom += passes.bloom;
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        fps_of(self.delta_time)
    }

    #[inline]
    pub fn delta_time_ms(&self) -> f32 {
        self.delta_time.as_secs_f32() * 1000.0
    }
}
impl std::fmt::Display for FrameTimings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        write!(
            f,
            "[F{}] {:.1} fps | begin {:.2}ms | shadow {:.2}ms | geometry {:.2}ms | bloom {:.2}ms | end {:.2}ms",
            self.frame_id,
            self.fps(),
            ms(self.begin_frame),
            ms(self.shadow),
            ms(self.geometry),
            ms(self.bloom),
            ms(self.end_frame)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_tick() {
        let mut timer = Timer::default();
        assert_eq!(timer.fps(), 0.0);
        std::thread::sleep(Duration::from_millis(2));
        timer.tick();
        assert!(timer.delta_time() >= Duration::from_millis(2));
        assert!(timer.fps() > 0.0);
        assert_eq!(timer.total_time_s(), timer.delta_time_s());
    }

    #[test]
    fn test_accumulate_passes() {
        let mut timings = FrameTimings::new(3, Duration::from_millis(20));
        let passes = PassTimings {
            shadow: Duration::from_millis(1),
            geometry: Duration::from_millis(2),
            bloom: Duration::from_millis(3),
        };
        timings.accumulate_passes(passes);
        timings.accumulate_passes(passes);
        assert_eq!(timings.shadow, Duration::from_millis(2));
        assert_eq!(timings.geometry, Duration::from_millis(4));
        assert_eq!(timings.bloom, Duration::from_millis(6));
        assert!((timings.fps() - 50.0).abs() < 1e-3);
        assert!(timings.to_string().starts_with("[F3] 50.0 fps"));
    }
}
