//! 不需要 GPU 的 backend
//!
//! 分配递增的假 handle，跟踪 fence 状态与对象存活，记录每一次调用，供测试断言。

mod backend;
mod journal;

pub use backend::{FenceState, HeadlessBackend};
pub use journal::JournalEvent;
