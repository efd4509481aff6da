//! GLSL 着色器编译器
//!
//! 使用 glslc (来自 Vulkan SDK) 将 GLSL 着色器编译为 SPIR-V

use anyhow::Context;

use crate::common::{EnvPath, ShaderCompileTask, ShaderCompiler};

/// GLSL 编译器
///
/// 使用 glslc 编译 `.vert`, `.frag`, `.comp`
#[derive(Debug, Default)]
pub struct GlslCompiler;

impl GlslCompiler {
    pub const fn new() -> Self {
        Self
    }
}

impl ShaderCompiler for GlslCompiler {
    fn compile(&self, task: &ShaderCompileTask) -> anyhow::Result<()> {
        let output = std::process::Command::new("glslc")
            .arg(format!("-I{}", EnvPath::shader_include_path().display()))
            .arg(format!("-fshader-stage={}", task.shader_stage.glslc_name()))
            .args([
                "-g", // 生成调试信息
                "--target-env=vulkan1.3",
                "-o",
            ])
            .arg(&task.output_path)
            .arg(&task.shader_path)
            .output()
            .context("failed to execute glslc, is the Vulkan SDK installed?")?;

        self.process_cmd_output(output)
    }
}
