use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// ```ignore
/// let spv = VelaPath::shader_build_path("bloom.comp"); // engine/shader/.build/bloom.comp.spv
/// let cfg = VelaPath::config_path("renderer.toml");     // config/renderer.toml
/// ```
pub struct VelaPath {}
// 核心路径
impl VelaPath {
    /// 工作区根目录，本 crate 位于根目录下一层
    pub fn workspace_path() -> PathBuf {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest.parent().unwrap_or(manifest).to_path_buf()
    }

    pub fn engine_path() -> PathBuf {
        Self::workspace_path().join("engine")
    }

    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join(filename)
    }
}
// engine 目录下
impl VelaPath {
    pub fn shader_root_path() -> PathBuf {
        Self::engine_path().join("shader")
    }

    /// GLSL 源码目录
    pub fn shader_src_path() -> PathBuf {
        Self::shader_root_path().join("src")
    }

    /// 编译产物目录
    pub fn shader_build_dir() -> PathBuf {
        Self::shader_root_path().join(".build")
    }

    /// `engine/shader/.build/{name}.spv`
    pub fn shader_build_path(name: &str) -> PathBuf {
        Self::shader_build_dir().join(format!("{name}.spv"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_build_path() {
        let path = VelaPath::shader_build_path("light_culling.comp");
        assert!(path.ends_with("engine/shader/.build/light_culling.comp.spv"));
        assert!(path.starts_with(VelaPath::workspace_path()));
    }
}
