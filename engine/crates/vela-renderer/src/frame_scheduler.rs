use std::rc::Rc;

use ash::vk;
use vela_gfx::{
    GfxBackend, GfxError, GfxResult,
    commands::{command_buffer::GfxCommandBuffer, fence::GfxFence, submit_info::GfxSubmitInfo},
};
use vela_render_graph::{passes::PresentTarget, render_context::RenderContext};
use vela_render_interface::{frame_counter::FrameLabel, frame_multiplexer::PerFrame};

use crate::presenter::Presenter;

/// 一帧在 CPU 端所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// `begin_frame` 交给调用方的录制目标
#[derive(Clone)]
pub struct FrameBegin {
    pub frame_label: FrameLabel,
    pub cmd: GfxCommandBuffer,
    /// 没有交换链时为 None
    pub present_target: Option<PresentTarget>,
}

struct ActiveFrame {
    frame_label: FrameLabel,
    cmd: GfxCommandBuffer,
    image_index: Option<u32>,
}

/// 帧调度：fence、swapchain image、提交与呈现
///
/// 状态流转：`Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle`。
/// CPU 只会在 `begin_frame` 的 fence 等待处阻塞，因此最多领先 GPU `FRAMES_IN_FLIGHT` 帧。
pub struct FrameScheduler {
    /// 每个 frame slot 一个，创建时就是 signaled，第一轮的等待直接通过
    fences: PerFrame<GfxFence>,
    /// fence 已经随提交交给 GPU、尚未被等待
    in_flight: PerFrame<bool>,
    presenter: Option<Presenter>,

    state: FrameState,
    active: Option<ActiveFrame>,
}
// new & init
impl FrameScheduler {
    /// backend 带有交换链时才会创建 [`Presenter`]
    pub fn new(backend: Rc<dyn GfxBackend>) -> GfxResult<Self> {
        let fences = PerFrame::try_new(|frame_label| {
            GfxFence::new(backend.clone(), true, &format!("frame-in-flight-{frame_label}"))
        })?;
        let presenter = match backend.swapchain_info() {
            Some(_) => Some(Presenter::new(backend.clone())?),
            None => None,
        };
        Ok(Self {
            fences,
            in_flight: PerFrame::new(|_| false),
            presenter,
            state: FrameState::Idle,
            active: None,
        })
    }

    /// 等待所有帧完成，销毁之前调用
    pub fn wait_all_frames(&self) -> GfxResult<()> {
        for (frame_label, fence) in self.fences.iter() {
            if *self.in_flight.get(frame_label) {
                fence.wait()?;
            }
        }
        Ok(())
    }
}
// getters
impl FrameScheduler {
    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn presenter(&self) -> Option<&Presenter> {
        self.presenter.as_ref()
    }

    #[inline]
    pub fn presenter_mut(&mut self) -> Option<&mut Presenter> {
        self.presenter.as_mut()
    }

    #[inline]
    pub fn fence(&self, frame_label: FrameLabel) -> vk::Fence {
        self.fences.get(frame_label).handle()
    }
}
// update
impl FrameScheduler {
    /// 开始一帧
    ///
    /// 1. 等待当前 slot 上一轮的 fence，然后 reset
    /// 2. 回收该 slot 的 descriptor pool、command pool 等
    /// 3. 分配并开始录制 command buffer
    /// 4. acquire swapchain image
    ///
    /// fence reset 之后的任何失败都会补一次空提交，状态回到 `Idle`
    pub fn begin_frame(&mut self, ctx: &mut RenderContext) -> GfxResult<FrameBegin> {
        let _span = vela_crate_tools::profile_span!("FrameScheduler::begin_frame");
        debug_assert_eq!(self.state, FrameState::Idle, "begin_frame called twice");

        let frame_label = ctx.frame_label();
        {
            let _span = vela_crate_tools::profile_span!("wait fence");
            let fence = self.fences.get(frame_label);
            fence.wait()?;
            fence.reset()?;
            *self.in_flight.get_mut(frame_label) = false;
        }

        let result = self.prepare_frame(ctx, frame_label);
        if result.is_err() {
            // 没有 acquire 到 image，空提交不需要等待 semaphore
            self.submit_empty(ctx, frame_label, None)?;
        }
        result
    }

    fn prepare_frame(&mut self, ctx: &mut RenderContext, frame_label: FrameLabel) -> GfxResult<FrameBegin> {
        // fence 已经 signaled，该 slot 的 GPU 工作全部完成
        ctx.reset_frame_slot()?;

        let frame_name = ctx.frame_counter.frame_name();
        let cmd = ctx.cmd_allocator.alloc_command_buffer(frame_label, &format!("{frame_name}-frame"))?;
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &frame_name)?;

        // acquire 放在最后：成功之后不会再失败，semaphore 一定会被提交消耗
        self.state = FrameState::Acquiring;
        let image_index = match self.presenter.as_mut() {
            Some(presenter) => Some(presenter.acquire(frame_label)?),
            None => None,
        };
        self.state = FrameState::Recording;

        let present_target = match (self.presenter.as_ref(), image_index) {
            (Some(presenter), Some(image_index)) => Some(presenter.present_target(image_index)),
            _ => None,
        };
        self.active = Some(ActiveFrame {
            frame_label,
            cmd: cmd.clone(),
            image_index,
        });
        Ok(FrameBegin {
            frame_label,
            cmd,
            present_target,
        })
    }

    /// 放弃正在录制的一帧
    ///
    /// command buffer 不会被提交，帧序号不推进。仍然做一次空提交，
    /// 让 fence 重新 signal 并消耗 acquire 的 semaphore；
    /// 已经 acquire 的 image 不会 present，交换链在下一次 acquire 之前重建
    pub fn abort_frame(&mut self, ctx: &mut RenderContext) -> GfxResult<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        self.abort_active(ctx, active)
    }

    fn abort_active(&mut self, ctx: &mut RenderContext, active: ActiveFrame) -> GfxResult<()> {
        log::warn!("frame {} aborted", ctx.frame_id());
        if let (Some(presenter), Some(_)) = (self.presenter.as_mut(), active.image_index) {
            presenter.request_recreate();
        }
        self.submit_empty(ctx, active.frame_label, active.image_index)
    }

    /// 不带 command buffer 的提交，只用来 signal 当前 slot 的 fence
    fn submit_empty(
        &mut self,
        ctx: &RenderContext,
        frame_label: FrameLabel,
        image_index: Option<u32>,
    ) -> GfxResult<()> {
        let mut submit_info = GfxSubmitInfo::default();
        if let (Some(presenter), Some(_)) = (self.presenter.as_ref(), image_index) {
            submit_info = submit_info.wait(
                presenter.image_available_semaphore(frame_label),
                vk::PipelineStageFlags2::ALL_COMMANDS,
            );
        }
        self.state = FrameState::Idle;
        ctx.backend.queue_submit(&[submit_info], Some(self.fences.get(frame_label).handle()))?;
        *self.in_flight.get_mut(frame_label) = true;
        Ok(())
    }

    /// 结束录制、提交、呈现，并推进帧序号
    ///
    /// 提交成功之后帧序号一定会推进，不论 present 的结果如何
    pub fn end_frame(&mut self, ctx: &mut RenderContext) -> GfxResult<()> {
        let _span = vela_crate_tools::profile_span!("FrameScheduler::end_frame");
        let active = self
            .active
            .take()
            .ok_or_else(|| GfxError::InvalidHandle("end_frame without begin_frame".to_string()))?;
        debug_assert_eq!(self.state, FrameState::Recording);
        debug_assert_eq!(active.frame_label, ctx.frame_label());

        if let Err(err) = active.cmd.end() {
            self.abort_active(ctx, active)?;
            return Err(err);
        }

        let mut submit_info = GfxSubmitInfo::new(std::slice::from_ref(&active.cmd));
        if let (Some(presenter), Some(image_index)) = (self.presenter.as_ref(), active.image_index) {
            submit_info = submit_info
                .wait(
                    presenter.image_available_semaphore(active.frame_label),
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags2::TRANSFER,
                )
                .signal(presenter.render_complete_semaphore(image_index), vk::PipelineStageFlags2::ALL_COMMANDS);
        }
        ctx.backend.queue_submit(&[submit_info], Some(self.fences.get(active.frame_label).handle()))?;
        *self.in_flight.get_mut(active.frame_label) = true;
        self.state = FrameState::Submitted;
        ctx.frame_counter.next_frame();

        if let (Some(presenter), Some(image_index)) = (self.presenter.as_mut(), active.image_index) {
            self.state = FrameState::Presenting;
            let result = presenter.present(image_index);
            self.state = FrameState::Idle;
            result?;
        } else {
            self.state = FrameState::Idle;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::{
        AcquireOutcome, PresentOutcome,
        headless::{FenceState, HeadlessBackend, JournalEvent},
    };
    use vela_render_interface::{
        frame_counter::FRAMES_IN_FLIGHT, render_settings::RendererSettings, shader_library::ShaderSource,
    };

    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 360,
    };

    fn setup(backend: HeadlessBackend) -> (Rc<HeadlessBackend>, RenderContext, FrameScheduler) {
        let backend = Rc::new(backend);
        let ctx = RenderContext::new(backend.clone(), RendererSettings::default(), ShaderSource::Placeholder).unwrap();
        let scheduler = FrameScheduler::new(backend.clone()).unwrap();
        (backend, ctx, scheduler)
    }

    fn run_frame(ctx: &mut RenderContext, scheduler: &mut FrameScheduler) -> GfxResult<FrameBegin> {
        let frame = scheduler.begin_frame(ctx)?;
        scheduler.end_frame(ctx)?;
        Ok(frame)
    }

    #[test]
    fn test_frame_index_after_k_frames() {
        let (_backend, mut ctx, mut scheduler) = setup(HeadlessBackend::with_swapchain(EXTENT));
        let labels = (0..7)
            .map(|_| run_frame(&mut ctx, &mut scheduler).unwrap().frame_label)
            .collect::<Vec<_>>();
        assert_eq!(labels[3], FrameLabel::A);
        assert_eq!(labels[5], FrameLabel::C);
        assert_eq!(ctx.frame_id(), 7);
        assert_eq!(ctx.frame_label().index(), 7 % FRAMES_IN_FLIGHT);
        assert_eq!(scheduler.state(), FrameState::Idle);
    }

    #[test]
    fn test_slot_reset_only_after_fence_wait() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::with_swapchain(EXTENT));
        for _ in 0..FRAMES_IN_FLIGHT {
            run_frame(&mut ctx, &mut scheduler).unwrap();
        }
        // slot A 的第一次提交仍在 GPU 上
        let fence_a = scheduler.fence(FrameLabel::A);
        assert_eq!(backend.fence_state(fence_a), Some(FenceState::Pending));

        backend.clear_journal();
        scheduler.begin_frame(&mut ctx).unwrap();
        let journal = backend.journal();

        let wait = journal
            .iter()
            .position(|event| matches!(event, JournalEvent::WaitFence { fence } if *fence == fence_a));
        let reset_fence = journal
            .iter()
            .position(|event| matches!(event, JournalEvent::ResetFence { fence } if *fence == fence_a));
        let reset_pool = journal
            .iter()
            .position(|event| matches!(event, JournalEvent::ResetCommandPool { .. }));
        let acquire = journal.iter().position(|event| matches!(event, JournalEvent::Acquire { .. }));
        assert!(wait.unwrap() < reset_fence.unwrap());
        assert!(reset_fence.unwrap() < reset_pool.unwrap());
        assert!(reset_pool.unwrap() < acquire.unwrap());
        assert_eq!(backend.fence_state(fence_a), Some(FenceState::Unsignaled));
        assert_eq!(scheduler.state(), FrameState::Recording);

        scheduler.end_frame(&mut ctx).unwrap();
        assert_eq!(backend.fence_state(fence_a), Some(FenceState::Pending));
    }

    #[test]
    fn test_submit_and_present_use_acquired_image() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::with_swapchain(EXTENT));
        backend.clear_journal();
        let first = run_frame(&mut ctx, &mut scheduler).unwrap();
        let second = run_frame(&mut ctx, &mut scheduler).unwrap();

        let swapchain = backend.swapchain_info().unwrap();
        assert_eq!(first.present_target.unwrap().image, swapchain.images[0]);
        assert_eq!(second.present_target.unwrap().image, swapchain.images[1]);

        let events = backend
            .journal()
            .into_iter()
            .filter_map(|event| match event {
                JournalEvent::Submit { command_buffers, fence } => {
                    Some(format!("submit {} {:?}", command_buffers.len(), fence.is_some()))
                }
                JournalEvent::Present { image_index, .. } => Some(format!("present {image_index}")),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(events, ["submit 1 true", "present 0", "submit 1 true", "present 1"]);
    }

    #[test]
    fn test_acquire_out_of_date_twice_is_fatal() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::with_swapchain(EXTENT));
        backend.script_acquire(AcquireOutcome::OutOfDate);
        backend.script_acquire(AcquireOutcome::OutOfDate);

        let err = scheduler.begin_frame(&mut ctx).err().unwrap();
        assert!(matches!(err, GfxError::SwapchainLost { stage: "acquire" }));
        assert_eq!(ctx.frame_id(), 0);

        // fence 已经 reset，空提交之后 slot 仍然可以使用
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(backend.fence_state(scheduler.fence(FrameLabel::A)), Some(FenceState::Pending));
        run_frame(&mut ctx, &mut scheduler).unwrap();
        assert_eq!(ctx.frame_id(), 1);
    }

    fn empty_submits(backend: &HeadlessBackend) -> usize {
        backend
            .journal()
            .iter()
            .filter(|event| matches!(event, JournalEvent::Submit { command_buffers, .. } if command_buffers.is_empty()))
            .count()
    }

    #[test]
    fn test_abort_frame_keeps_slots_usable() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::with_swapchain(EXTENT));
        backend.clear_journal();
        scheduler.begin_frame(&mut ctx).unwrap();
        scheduler.abort_frame(&mut ctx).unwrap();

        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(ctx.frame_id(), 0);
        assert_eq!(empty_submits(&backend), 1);
        assert!(!backend.journal().iter().any(|event| matches!(event, JournalEvent::Present { .. })));
        assert_eq!(backend.fence_state(scheduler.fence(FrameLabel::A)), Some(FenceState::Pending));

        // 转完一整圈，每个 slot 的 fence 都能等到
        for _ in 0..=FRAMES_IN_FLIGHT {
            run_frame(&mut ctx, &mut scheduler).unwrap();
        }
        assert_eq!(ctx.frame_id(), FRAMES_IN_FLIGHT as u64 + 1);
        assert_eq!(scheduler.state(), FrameState::Idle);
        // 没有 present 的 image 通过重建交换链归还
        assert_eq!(scheduler.presenter().unwrap().recreate_count(), 1);

        // 没有进行中的帧时什么都不做
        backend.clear_journal();
        scheduler.abort_frame(&mut ctx).unwrap();
        assert!(backend.journal().is_empty());
    }

    #[test]
    fn test_abort_offscreen_frame() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::new());
        scheduler.begin_frame(&mut ctx).unwrap();
        scheduler.abort_frame(&mut ctx).unwrap();
        assert_eq!(empty_submits(&backend), 1);

        scheduler.begin_frame(&mut ctx).unwrap();
        assert_eq!(scheduler.state(), FrameState::Recording);
        scheduler.end_frame(&mut ctx).unwrap();
        assert_eq!(ctx.frame_id(), 1);
    }

    #[test]
    fn test_acquire_out_of_date_once_recovers() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::with_swapchain(EXTENT));
        backend.script_acquire(AcquireOutcome::OutOfDate);

        run_frame(&mut ctx, &mut scheduler).unwrap();
        assert_eq!(scheduler.presenter().unwrap().recreate_count(), 1);
        assert_eq!(ctx.frame_id(), 1);
    }

    #[test]
    fn test_present_out_of_date_still_advances() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::with_swapchain(EXTENT));
        backend.script_present(PresentOutcome::OutOfDate);

        run_frame(&mut ctx, &mut scheduler).unwrap();
        assert_eq!(ctx.frame_id(), 1);
        assert_eq!(scheduler.presenter().unwrap().recreate_count(), 1);
        assert!(
            backend
                .journal()
                .iter()
                .any(|event| matches!(event, JournalEvent::RecreateSwapchain { extent } if *extent == EXTENT))
        );
    }

    #[test]
    fn test_offscreen_only() {
        let (backend, mut ctx, mut scheduler) = setup(HeadlessBackend::new());
        assert!(scheduler.presenter().is_none());

        let frame = run_frame(&mut ctx, &mut scheduler).unwrap();
        assert!(frame.present_target.is_none());
        let journal = backend.journal();
        assert!(journal.iter().any(|event| matches!(event, JournalEvent::Submit { .. })));
        assert!(
            !journal
                .iter()
                .any(|event| matches!(event, JournalEvent::Acquire { .. } | JournalEvent::Present { .. }))
        );

        scheduler.wait_all_frames().unwrap();
        assert_eq!(backend.fence_state(scheduler.fence(FrameLabel::A)), Some(FenceState::Signaled));
    }

    #[test]
    fn test_end_frame_without_begin() {
        let (_backend, mut ctx, mut scheduler) = setup(HeadlessBackend::new());
        assert!(matches!(scheduler.end_frame(&mut ctx), Err(GfxError::InvalidHandle(_))));
    }
}
