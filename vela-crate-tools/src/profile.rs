/// 打开一个 Tracy zone，返回 `Option<Span>`
///
/// 没有运行中的 Tracy client 时返回 `None`，因此单元测试里可以直接调用。
///
/// ```ignore
/// let _span = vela_crate_tools::profile_span!("SceneRenderer::render");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        $crate::__tracy::Client::running()
            .map(|client| client.span($crate::__tracy::span_location!($name), 0))
    };
}

/// 标记一帧结束，同样在 client 未启动时不做任何事
pub fn frame_mark() {
    if let Some(client) = tracy_client::Client::running() {
        client.frame_mark();
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_profile_span_without_client() {
        // 测试进程不会调用 Client::start
        assert!(!tracy_client::Client::is_running());
        let span = crate::profile_span!("test");
        assert!(span.is_none());
        super::frame_mark();
    }
}
