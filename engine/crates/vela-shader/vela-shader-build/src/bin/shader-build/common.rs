//! 着色器编译的共享类型和工具

use std::path::{Path, PathBuf};

use anyhow::Context;
use vela_crate_tools::resource::VelaPath;

/// Shader 的执行阶段，决定 glslc 的 `-fshader-stage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}
impl ShaderStage {
    pub fn glslc_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }
}

/// 当前项目的环境路径，基于 workspace 根目录
pub struct EnvPath;

impl EnvPath {
    /// Shader 源码路径
    pub fn shader_src_path() -> PathBuf {
        VelaPath::shader_src_path()
    }

    /// 编译 shader 的输出路径
    pub fn shader_build_path() -> PathBuf {
        VelaPath::shader_build_dir()
    }

    /// Shader 的 include 目录
    pub fn shader_include_path() -> PathBuf {
        VelaPath::shader_root_path().join("include")
    }
}

/// 着色器编译器 Trait
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, task: &ShaderCompileTask) -> anyhow::Result<()>;

    /// 根据 cmd 执行的结果，处理输出信息
    fn process_cmd_output(&self, output: std::process::Output) -> anyhow::Result<()> {
        if !output.stdout.is_empty() {
            log::info!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            log::error!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        anyhow::ensure!(output.status.success(), "compiler exited with {}", output.status);
        Ok(())
    }
}

/// 一个具体的编译任务
#[derive(Debug)]
pub struct ShaderCompileTask {
    pub shader_path: PathBuf,
    pub output_path: PathBuf,
    pub shader_stage: ShaderStage,
}

impl ShaderCompileTask {
    /// 从源码路径创建编译任务，输出为 `.build` 下同样的相对路径，后缀追加 `.spv`
    ///
    /// 扩展名不被支持或者不在源码目录下时返回 None
    pub fn new(shader_path: &Path) -> Option<Self> {
        Self::with_roots(shader_path, &EnvPath::shader_src_path(), &EnvPath::shader_build_path())
    }

    fn with_roots(shader_path: &Path, src_root: &Path, build_root: &Path) -> Option<Self> {
        let relative_path = shader_path.strip_prefix(src_root).ok()?;
        let shader_name = shader_path.file_name()?.to_str()?;
        let shader_stage = Self::parse_shader_stage(shader_name)?;

        // bloom.comp -> bloom.comp.spv
        let mut output_path = build_root.join(relative_path);
        let mut new_ext = output_path.extension()?.to_os_string();
        new_ext.push(".spv");
        output_path.set_extension(new_ext);

        Some(Self {
            shader_path: shader_path.to_path_buf(),
            output_path,
            shader_stage,
        })
    }

    /// 根据文件名解析 shader stage
    fn parse_shader_stage(shader_name: &str) -> Option<ShaderStage> {
        let stage = match () {
            _ if shader_name.ends_with(".vert") => ShaderStage::Vertex,
            _ if shader_name.ends_with(".frag") => ShaderStage::Fragment,
            _ if shader_name.ends_with(".comp") => ShaderStage::Compute,
            _ => return None,
        };
        Some(stage)
    }

    /// 确保输出目录存在
    pub fn ensure_output_dir(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("failed to create {parent:?}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shader_stage() {
        assert_eq!(ShaderCompileTask::parse_shader_stage("geometry.vert"), Some(ShaderStage::Vertex));
        assert_eq!(ShaderCompileTask::parse_shader_stage("composite.frag"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderCompileTask::parse_shader_stage("bloom.comp"), Some(ShaderStage::Compute));
        assert_eq!(ShaderCompileTask::parse_shader_stage("frame.glsl"), None);
    }

    #[test]
    fn test_output_path() {
        let src = Path::new("/ws/engine/shader/src");
        let build = Path::new("/ws/engine/shader/.build");
        let task = ShaderCompileTask::with_roots(&src.join("bloom.comp"), src, build).unwrap();
        assert_eq!(task.output_path, build.join("bloom.comp.spv"));
        assert_eq!(task.shader_stage.glslc_name(), "comp");

        let task = ShaderCompileTask::with_roots(&src.join("debug/overlay.frag"), src, build).unwrap();
        assert_eq!(task.output_path, build.join("debug/overlay.frag.spv"));

        assert!(ShaderCompileTask::with_roots(Path::new("/elsewhere/a.vert"), src, build).is_none());
        assert!(ShaderCompileTask::with_roots(&src.join("frame.glsl"), src, build).is_none());
    }
}
