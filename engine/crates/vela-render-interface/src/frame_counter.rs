use std::fmt::Display;

/// 同时在 GPU 上执行的帧数
pub const FRAMES_IN_FLIGHT: usize = 3;

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64) -> Self {
        Self { frame_id: init_frame_id }
    }
}
impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(0)
    }
}
// update
impl FrameCounter {
    /// 每次提交之后调用一次，不论 present 是否成功
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub const fn fif_count() -> usize {
        FRAMES_IN_FLIGHT
    }
    #[inline]
    pub const fn frame_labels() -> [FrameLabel; FRAMES_IN_FLIGHT] {
        [FrameLabel::A, FrameLabel::B, FrameLabel::C]
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.frame_id as usize % Self::fif_count())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

/// 帧标签（A/B/C）
///
/// 表示当前处于 Frames in Flight 的哪一帧，通过 [`FrameLabel::index`] 转换为 0/1/2。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
    C,
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}
impl FrameLabel {
    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx % FRAMES_IN_FLIGHT {
            0 => Self::A,
            1 => Self::B,
            _ => Self::C,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label_cycles() {
        let mut counter = FrameCounter::default();
        let labels = (0..7)
            .map(|_| {
                let label = counter.frame_label();
                counter.next_frame();
                label
            })
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            [FrameLabel::A, FrameLabel::B, FrameLabel::C, FrameLabel::A, FrameLabel::B, FrameLabel::C, FrameLabel::A]
        );
        assert_eq!(counter.frame_id(), 7);
        assert_eq!(counter.frame_label().index(), 7 % FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_frame_name() {
        let counter = FrameCounter::new(4);
        assert_eq!(counter.frame_name(), "[F4B]");
    }
}
