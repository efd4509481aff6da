use vela_winit_app::app::WinitApp;

fn main() -> anyhow::Result<()> {
    vela_crate_tools::init_log::init_log();
    std::panic::set_hook(Box::new(|info| {
        log::error!("{info}");
    }));
    // manual-lifetime：profiler 只在这里启动，测试进程中不会启动
    let _client = tracy_client::Client::start();

    WinitApp::run("Vela")
}
