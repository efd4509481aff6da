//! Shader 编译工具
//!
//! 将 `engine/shader/src` 下的所有 shader 文件编译为 SPIR-V 文件，输出到 `engine/shader/.build` 目录

mod common;
mod glsl;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{EnvPath, ShaderCompileTask, ShaderCompiler};
use glsl::GlslCompiler;
use rayon::prelude::*;
use vela_crate_tools::init_log::init_log;

fn main() -> anyhow::Result<()> {
    init_log();

    log::info!("Shader include path: {:?}", EnvPath::shader_include_path());
    log::info!("Shader source path: {:?}", EnvPath::shader_src_path());
    log::info!("Shader output path: {:?}", EnvPath::shader_build_path());

    let compiler = GlslCompiler::new();
    let compiled = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    // 编译 shader 目录下的所有 shader 文件
    walkdir::WalkDir::new(EnvPath::shader_src_path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| ShaderCompileTask::new(entry.path()))
        .par_bridge() // 并行化编译
        .for_each(|task| {
            log::info!("Compiling shader: {:?}", task.shader_path);

            let result = task.ensure_output_dir().and_then(|_| compiler.compile(&task));
            match result {
                Ok(()) => {
                    compiled.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log::error!("Failed to compile {:?}: {e:#}", task.shader_path);
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

    let (compiled, failed) = (compiled.into_inner(), failed.into_inner());
    log::info!("Shader compilation completed: {compiled} compiled, {failed} failed.");
    anyhow::ensure!(failed == 0, "{failed} shader(s) failed to compile");
    Ok(())
}
