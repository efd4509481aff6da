use std::{
    sync::Mutex,
    thread::{self, JoinHandle, ThreadId},
};

use crossbeam_channel::Sender;
use crossbeam_utils::sync::WaitGroup;

/// 交给渲染线程执行的任务
pub type RenderJob = Box<dyn FnOnce() + Send + 'static>;

enum RenderThreadMsg {
    /// 按顺序执行；WaitGroup 随这一批任务一起 drop，等待方借此得知执行结束
    Execute(Vec<RenderJob>, WaitGroup),
}

/// 渲染线程
///
/// ## 架构设计
/// - `queue` 只是把任务放进待执行列表，不会唤醒渲染线程
/// - `execute_one` / `execute_all` 把待执行的任务通过 crossbeam channel 发送给渲染线程
/// - `wait_all` 发送所有待执行任务，并阻塞到渲染线程执行完毕
/// - drop 时关闭 channel，渲染线程执行完已经发送的任务后退出，仍在列表中的任务被丢弃
pub struct RenderThread {
    pending: Mutex<Vec<RenderJob>>,
    sender: Option<Sender<RenderThreadMsg>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

// new & init
impl RenderThread {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<RenderThreadMsg>();
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(msg) = receiver.recv() {
                let _span = vela_crate_tools::profile_span!("RenderThread::execute");
                match msg {
                    RenderThreadMsg::Execute(jobs, wait_group) => {
                        for job in jobs {
                            job();
                        }
                        drop(wait_group);
                    }
                }
            }
            log::info!("render thread exited");
        })?;

        Ok(Self {
            pending: Mutex::new(Vec::new()),
            sender: Some(sender),
            thread_id: thread.thread().id(),
            thread: Some(thread),
        })
    }
}
impl Drop for RenderThread {
    fn drop(&mut self) {
        // 必须先 drop sender，否则 recv 会一直阻塞，导致 join 死锁
        self.sender = None;

        let dropped = self.pending.get_mut().map(|pending| pending.len()).unwrap_or(0);
        if dropped > 0 {
            log::warn!("render thread dropped with {dropped} queued jobs");
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("render thread panicked");
        }
    }
}
// tools
impl RenderThread {
    /// 加入待执行列表
    pub fn queue(&self, job: impl FnOnce() + Send + 'static) {
        self.lock_pending().push(Box::new(job));
    }

    /// 执行最近加入的一个任务，不等待
    pub fn execute_one(&self) {
        let Some(job) = self.lock_pending().pop() else {
            return;
        };
        self.send(vec![job], WaitGroup::new());
    }

    /// 按加入顺序执行所有待执行任务，不等待
    pub fn execute_all(&self) {
        let jobs = std::mem::take(&mut *self.lock_pending());
        if !jobs.is_empty() {
            self.send(jobs, WaitGroup::new());
        }
    }

    /// 执行所有待执行任务，并等待渲染线程空闲
    ///
    /// 在渲染线程上调用会死锁，因此只在其他线程上等待
    pub fn wait_all(&self) {
        let _span = vela_crate_tools::profile_span!("RenderThread::wait_all");
        debug_assert!(!self.is_render_thread(), "wait_all called on the render thread");

        let jobs = std::mem::take(&mut *self.lock_pending());
        let wait_group = WaitGroup::new();
        // channel 按顺序处理，因此这一批结束时之前发送的也都结束了
        self.send(jobs, wait_group.clone());
        wait_group.wait();
    }

    #[inline]
    pub fn is_render_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn send(&self, jobs: Vec<RenderJob>, wait_group: WaitGroup) {
        if let Some(sender) = &self.sender
            && let Err(e) = sender.send(RenderThreadMsg::Execute(jobs, wait_group))
        {
            // 渲染线程已经退出，消息连同 WaitGroup 一起被 drop，等待方不会阻塞
            log::error!("failed to send jobs to render thread: {e}");
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<RenderJob>> {
        // 任务在渲染线程上执行，持锁期间不会 panic，中毒时直接取出数据
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn test_wait_all_runs_in_queue_order() {
        let render_thread = RenderThread::new("test-render-thread").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            render_thread.queue(move || order.lock().unwrap().push(i));
        }
        assert_eq!(render_thread.pending_count(), 4);

        render_thread.wait_all();
        assert_eq!(*order.lock().unwrap(), [0, 1, 2, 3]);
        assert_eq!(render_thread.pending_count(), 0);
    }

    #[test]
    fn test_execute_one_runs_most_recent() {
        let render_thread = RenderThread::new("test-render-thread").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            render_thread.queue(move || order.lock().unwrap().push(i));
        }

        render_thread.execute_one();
        assert_eq!(render_thread.pending_count(), 2);
        render_thread.wait_all();
        assert_eq!(*order.lock().unwrap(), [2, 0, 1]);
    }

    #[test]
    fn test_jobs_run_on_render_thread() {
        let render_thread = Arc::new(RenderThread::new("test-render-thread").unwrap());
        assert!(!render_thread.is_render_thread());

        let on_render_thread = Arc::new(AtomicUsize::new(0));
        {
            let render_thread_ref = Arc::downgrade(&render_thread);
            let on_render_thread = on_render_thread.clone();
            render_thread.queue(move || {
                if render_thread_ref.upgrade().is_some_and(|thread| thread.is_render_thread()) {
                    on_render_thread.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        render_thread.execute_all();
        render_thread.wait_all();
        assert_eq!(on_render_thread.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_finishes_sent_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let render_thread = RenderThread::new("test-render-thread").unwrap();
            for _ in 0..3 {
                let counter = counter.clone();
                render_thread.queue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            render_thread.execute_all();

            let counter = counter.clone();
            render_thread.queue(move || {
                counter.fetch_add(100, Ordering::SeqCst);
            });
        }
        // 已经发送的 3 个任务执行完毕，只在列表中的那一个被丢弃
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
