use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    AcquireOutcome, GfxBackend, GfxError, GfxResult, PresentOutcome, SwapchainInfo,
    commands::semaphore::GfxSemaphore,
};
use vela_render_graph::passes::PresentTarget;
use vela_render_interface::{frame_counter::FrameLabel, frame_multiplexer::PerFrame};

/// 交换链以及呈现相关的 semaphore
///
/// out-of-date 在这里就地处理：重建交换链，acquire 重试一次
pub struct Presenter {
    backend: Rc<dyn GfxBackend>,
    swapchain: SwapchainInfo,

    /// 数量和 fif num 相同，acquire 时 signal
    image_available_semaphores: PerFrame<GfxSemaphore>,
    /// 数量和 swapchain image num 相同，submit 时 signal，present 时 wait
    render_complete_semaphores: Vec<GfxSemaphore>,

    /// 窗口期望的尺寸，下一次 acquire 之前生效
    desired_extent: vk::Extent2D,
    need_recreate: bool,
    recreate_count: u32,
}
// new & init
impl Presenter {
    pub fn new(backend: Rc<dyn GfxBackend>) -> GfxResult<Self> {
        let swapchain = backend
            .swapchain_info()
            .ok_or_else(|| GfxError::InvalidHandle("backend has no swapchain".to_string()))?;
        let image_available_semaphores = PerFrame::try_new(|frame_label| {
            GfxSemaphore::new(backend.clone(), &format!("window-image-available-{frame_label}"))
        })?;
        let render_complete_semaphores = Self::create_render_complete_semaphores(&backend, swapchain.images.len())?;
        log::info!(
            "presenter created: {}x{} {:?} {:?}, {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format,
            swapchain.present_mode,
            swapchain.images.len()
        );

        Ok(Self {
            desired_extent: swapchain.extent,
            backend,
            swapchain,
            image_available_semaphores,
            render_complete_semaphores,
            need_recreate: false,
            recreate_count: 0,
        })
    }

    fn create_render_complete_semaphores(
        backend: &Rc<dyn GfxBackend>,
        image_count: usize,
    ) -> GfxResult<Vec<GfxSemaphore>> {
        (0..image_count)
            .map(|i| GfxSemaphore::new(backend.clone(), &format!("window-render-complete-{i}")))
            .collect()
    }
}
// getters
impl Presenter {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    #[inline]
    pub fn swapchain(&self) -> &SwapchainInfo {
        &self.swapchain
    }

    /// 交换链被重建的次数
    #[inline]
    pub fn recreate_count(&self) -> u32 {
        self.recreate_count
    }

    #[inline]
    pub fn image_available_semaphore(&self, frame_label: FrameLabel) -> &GfxSemaphore {
        self.image_available_semaphores.get(frame_label)
    }

    #[inline]
    pub fn render_complete_semaphore(&self, image_index: u32) -> &GfxSemaphore {
        &self.render_complete_semaphores[image_index as usize]
    }

    pub fn present_target(&self, image_index: u32) -> PresentTarget {
        PresentTarget {
            image: self.swapchain.images[image_index as usize],
            extent: self.swapchain.extent,
        }
    }
}
// update
impl Presenter {
    /// 窗口尺寸变化，在下一次 acquire 之前重建交换链
    pub fn resize(&mut self, extent: vk::Extent2D) {
        if extent.width == 0 || extent.height == 0 {
            // 最小化时保持原来的交换链
            return;
        }
        if extent != self.desired_extent {
            self.desired_extent = extent;
            self.need_recreate = true;
        }
    }

    /// 下一次 acquire 之前重建交换链，尺寸不变
    ///
    /// 用于归还已经 acquire 但不会再 present 的 image
    pub fn request_recreate(&mut self) {
        self.need_recreate = true;
    }

    /// 获取下一张 swapchain image
    ///
    /// out-of-date 时重建交换链并重试一次，仍然失败返回 [`GfxError::SwapchainLost`]
    pub fn acquire(&mut self, frame_label: FrameLabel) -> GfxResult<u32> {
        let _span = vela_crate_tools::profile_span!("Presenter::acquire");
        if self.need_recreate {
            self.recreate()?;
        }

        for attempt in 0..2 {
            let semaphore = self.image_available_semaphores.get(frame_label).handle();
            match self.backend.acquire_next_image(semaphore)? {
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                } => {
                    if suboptimal {
                        // 仍然可以使用，present 之后再重建
                        self.need_recreate = true;
                    }
                    return Ok(image_index);
                }
                AcquireOutcome::OutOfDate if attempt == 0 => {
                    log::warn!("swapchain out of date at acquire, recreating");
                    self.recreate()?;
                }
                AcquireOutcome::OutOfDate => {}
            }
        }
        Err(GfxError::SwapchainLost { stage: "acquire" })
    }

    /// 呈现，out-of-date 或 suboptimal 时立即重建交换链
    ///
    /// 这一帧不会被重新呈现
    pub fn present(&mut self, image_index: u32) -> GfxResult<PresentOutcome> {
        let _span = vela_crate_tools::profile_span!("Presenter::present");
        let wait_semaphore = self.render_complete_semaphore(image_index).handle();
        let outcome = self.backend.present(image_index, &[wait_semaphore])?;
        match outcome {
            PresentOutcome::Presented => {
                if self.need_recreate {
                    self.recreate()?;
                }
            }
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                log::warn!("swapchain {outcome:?} at present, recreating");
                self.recreate()?;
            }
        }
        Ok(outcome)
    }

    fn recreate(&mut self) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("Presenter::recreate");
        let swapchain = self.backend.recreate_swapchain(self.desired_extent)?;
        if swapchain.images.len() != self.render_complete_semaphores.len() {
            self.render_complete_semaphores =
                Self::create_render_complete_semaphores(&self.backend, swapchain.images.len())?;
        }
        log::info!(
            "swapchain recreated: {}x{}, {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len()
        );
        self.swapchain = swapchain;
        self.desired_extent = self.swapchain.extent;
        self.need_recreate = false;
        self.recreate_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::{HeadlessBackend, JournalEvent};

    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    fn recreated_extents(backend: &HeadlessBackend) -> Vec<vk::Extent2D> {
        backend
            .journal()
            .into_iter()
            .filter_map(|event| match event {
                JournalEvent::RecreateSwapchain { extent } => Some(extent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_requires_swapchain() {
        let backend = Rc::new(HeadlessBackend::new());
        assert!(matches!(Presenter::new(backend), Err(GfxError::InvalidHandle(_))));
    }

    #[test]
    fn test_acquire_round_robin() {
        let backend = Rc::new(HeadlessBackend::with_swapchain(EXTENT));
        let mut presenter = Presenter::new(backend.clone()).unwrap();
        let indices = (0..4)
            .map(|i| presenter.acquire(FrameLabel::from_usize(i)).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(indices, [0, 1, 2, 0]);
        assert_eq!(presenter.present_target(1).image, presenter.swapchain().images[1]);
        assert_eq!(presenter.recreate_count(), 0);
    }

    #[test]
    fn test_acquire_out_of_date_retries_once() {
        let backend = Rc::new(HeadlessBackend::with_swapchain(EXTENT));
        let mut presenter = Presenter::new(backend.clone()).unwrap();
        backend.script_acquire(AcquireOutcome::OutOfDate);

        assert_eq!(presenter.acquire(FrameLabel::A).unwrap(), 0);
        assert_eq!(recreated_extents(&backend), [EXTENT]);
        assert_eq!(presenter.recreate_count(), 1);
    }

    #[test]
    fn test_acquire_out_of_date_twice_is_lost() {
        let backend = Rc::new(HeadlessBackend::with_swapchain(EXTENT));
        let mut presenter = Presenter::new(backend.clone()).unwrap();
        backend.script_acquire(AcquireOutcome::OutOfDate);
        backend.script_acquire(AcquireOutcome::OutOfDate);

        let err = presenter.acquire(FrameLabel::A).unwrap_err();
        assert!(matches!(err, GfxError::SwapchainLost { stage: "acquire" }));
        assert!(err.is_fatal());
        assert_eq!(recreated_extents(&backend).len(), 1);
    }

    #[test]
    fn test_resize_applies_before_next_acquire() {
        let backend = Rc::new(HeadlessBackend::with_swapchain(EXTENT));
        let mut presenter = Presenter::new(backend.clone()).unwrap();
        let new_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };

        presenter.resize(EXTENT);
        presenter.resize(vk::Extent2D { width: 0, height: 0 });
        presenter.acquire(FrameLabel::A).unwrap();
        assert!(recreated_extents(&backend).is_empty());

        presenter.resize(new_extent);
        presenter.acquire(FrameLabel::B).unwrap();
        assert_eq!(recreated_extents(&backend), [new_extent]);
        assert_eq!(presenter.extent(), new_extent);
        assert_eq!(presenter.present_target(0).extent, new_extent);
    }

    #[test]
    fn test_present_out_of_date_recreates() {
        let backend = Rc::new(HeadlessBackend::with_swapchain(EXTENT));
        let mut presenter = Presenter::new(backend.clone()).unwrap();
        backend.script_present(PresentOutcome::OutOfDate);

        let image_index = presenter.acquire(FrameLabel::A).unwrap();
        assert_eq!(presenter.present(image_index).unwrap(), PresentOutcome::OutOfDate);
        assert_eq!(presenter.recreate_count(), 1);

        let image_index = presenter.acquire(FrameLabel::B).unwrap();
        assert_eq!(presenter.present(image_index).unwrap(), PresentOutcome::Presented);
        assert_eq!(presenter.recreate_count(), 1);
    }
}
