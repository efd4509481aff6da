use crate::frame_counter::{FRAMES_IN_FLIGHT, FrameCounter, FrameLabel};
use vela_gfx::GfxResult;

/// 每个 frame slot 在复用之前需要执行的重置
///
/// 只允许在该 slot 的 fence 已经 signaled 之后调用
pub trait FrameSlotReset {
    fn reset_slot(&mut self) -> GfxResult<()>;
}

/// 逐帧资源：每个 frame in flight 持有一份 `T`
///
/// 只有当前帧对应的那一份可以被修改，其他的可能仍在被 GPU 使用
pub struct PerFrame<T> {
    slots: [T; FRAMES_IN_FLIGHT],
    /// 每个 slot 被 reset 的次数
    generations: [u64; FRAMES_IN_FLIGHT],
}
// new & init
impl<T> PerFrame<T> {
    pub fn new(mut create: impl FnMut(FrameLabel) -> T) -> Self {
        Self {
            slots: FrameCounter::frame_labels().map(&mut create),
            generations: [0; FRAMES_IN_FLIGHT],
        }
    }

    /// 创建过程可能失败，例如 GPU 资源的分配
    pub fn try_new(mut create: impl FnMut(FrameLabel) -> GfxResult<T>) -> GfxResult<Self> {
        let [a, b, c] = FrameCounter::frame_labels();
        Ok(Self {
            slots: [create(a)?, create(b)?, create(c)?],
            generations: [0; FRAMES_IN_FLIGHT],
        })
    }
}
// getters
impl<T> PerFrame<T> {
    #[inline]
    pub fn get(&self, frame_label: FrameLabel) -> &T {
        &self.slots[frame_label.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, frame_label: FrameLabel) -> &mut T {
        &mut self.slots[frame_label.index()]
    }

    #[inline]
    pub fn current(&self, frame_counter: &FrameCounter) -> &T {
        self.get(frame_counter.frame_label())
    }

    #[inline]
    pub fn current_mut(&mut self, frame_counter: &FrameCounter) -> &mut T {
        self.get_mut(frame_counter.frame_label())
    }

    #[inline]
    pub fn generation(&self, frame_label: FrameLabel) -> u64 {
        self.generations[frame_label.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameLabel, &T)> {
        FrameCounter::frame_labels().into_iter().zip(self.slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FrameLabel, &mut T)> {
        FrameCounter::frame_labels().into_iter().zip(self.slots.iter_mut())
    }
}
// update
impl<T: FrameSlotReset> PerFrame<T> {
    /// slot 内的 descriptor set、动态 buffer 的内容在 reset 之后都是未定义的，需要在本帧重新写入
    pub fn reset(&mut self, frame_label: FrameLabel) -> GfxResult<()> {
        self.slots[frame_label.index()].reset_slot()?;
        self.generations[frame_label.index()] += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        values: Vec<u32>,
    }
    impl FrameSlotReset for Scratch {
        fn reset_slot(&mut self) -> GfxResult<()> {
            self.values.clear();
            Ok(())
        }
    }

    #[test]
    fn test_slots_are_independent() {
        let mut per_frame = PerFrame::new(|_| Scratch::default());
        per_frame.get_mut(FrameLabel::A).values.push(1);
        per_frame.get_mut(FrameLabel::B).values.push(2);

        per_frame.reset(FrameLabel::A).unwrap();
        assert!(per_frame.get(FrameLabel::A).values.is_empty());
        assert_eq!(per_frame.get(FrameLabel::B).values, vec![2]);
        assert_eq!(per_frame.generation(FrameLabel::A), 1);
        assert_eq!(per_frame.generation(FrameLabel::B), 0);
    }

    #[test]
    fn test_current_follows_counter() {
        let per_frame = PerFrame::new(|label| label.index() * 10);
        let mut counter = FrameCounter::default();
        counter.next_frame();
        counter.next_frame();
        assert_eq!(*per_frame.current(&counter), 20);
    }
}
