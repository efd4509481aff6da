//! SPIR-V 的加载、缓存，以及 shader 反射信息与 Rust 端结构体的一致性校验

use std::{collections::HashMap, io::Cursor, path::PathBuf, rc::Rc};

use ash::vk;
use vela_crate_tools::resource::VelaPath;
use vela_gfx::{GfxBackend, GfxError, GfxResult, pipelines::shader::GfxShaderModule};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;
const SPIRV_HEADER_WORDS: usize = 5;

/// 一个只有 header 的 SPIR-V module，headless 环境下用来代替真实的字节码
pub const PLACEHOLDER_SPIRV: [u32; SPIRV_HEADER_WORDS] = [SPIRV_MAGIC, 0x0001_0300, 0, 1, 0];

/// 字节码的来源
#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// 离线编译产物所在目录，文件名为 `{name}.spv`
    Directory(PathBuf),
    /// 不读取文件，所有 shader 都使用 [`PLACEHOLDER_SPIRV`]
    Placeholder,
}
impl Default for ShaderSource {
    fn default() -> Self {
        Self::Directory(VelaPath::shader_build_dir())
    }
}

/// shader 中一个 uniform/storage block 的反射信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    /// block 的字节大小；对于 runtime array 为单个元素的大小
    pub size: u32,
    pub stages: vk::ShaderStageFlags,
}

/// 一个 shader 的反射表，和 shader 源码一同维护
#[derive(Debug, Clone, Copy)]
pub struct ShaderReflection {
    pub shader: &'static str,
    pub bindings: &'static [ReflectedBinding],
}
impl ShaderReflection {
    pub fn binding(&self, set: u32, binding: u32) -> Option<&ReflectedBinding> {
        self.bindings.iter().find(|b| b.set == set && b.binding == binding)
    }

    /// 校验 Rust 端结构体 `T` 的大小与 shader 中的 block 一致
    pub fn validate_block<T>(&self, set: u32, binding: u32) -> GfxResult<()> {
        let reflected = self.binding(set, binding).ok_or_else(|| GfxError::ReflectionMismatch {
            shader: self.shader.to_string(),
            detail: format!("binding (set={set}, binding={binding}) not found"),
        })?;
        let rust_size = size_of::<T>() as u32;
        if reflected.size != rust_size {
            return Err(GfxError::ReflectionMismatch {
                shader: self.shader.to_string(),
                detail: format!(
                    "(set={set}, binding={binding}) shader size {} != {} size {rust_size}",
                    reflected.size,
                    std::any::type_name::<T>()
                ),
            });
        }
        Ok(())
    }
}

/// 把字节流转换为 SPIR-V words，并检查 header
///
/// 字节序由 magic number 决定，大端的字节码会被翻转
pub fn parse_spirv(name: &str, bytes: &[u8]) -> GfxResult<Vec<u32>> {
    let load_err = |reason: String| GfxError::ShaderLoad {
        name: name.to_string(),
        reason,
    };
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| load_err(format!("invalid spir-v: {e}")))?;
    // magic, version, generator, bound, schema
    if words.len() < SPIRV_HEADER_WORDS {
        return Err(load_err(format!("spir-v header truncated: {} words", words.len())));
    }
    Ok(words)
}

/// shader module 的缓存，按名字（例如 `bloom.comp`）索引
pub struct ShaderLibrary {
    backend: Rc<dyn GfxBackend>,
    source: ShaderSource,
    modules: HashMap<String, Rc<GfxShaderModule>>,
    reflections: HashMap<&'static str, ShaderReflection>,
}
// new & init
impl ShaderLibrary {
    pub fn new(backend: Rc<dyn GfxBackend>, source: ShaderSource) -> Self {
        Self {
            backend,
            source,
            modules: HashMap::new(),
            reflections: HashMap::new(),
        }
    }
}
// tools
impl ShaderLibrary {
    /// 加载 shader module，同名 shader 只会创建一次
    pub fn load(&mut self, name: &str) -> GfxResult<Rc<GfxShaderModule>> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }

        let code = match &self.source {
            ShaderSource::Directory(dir) => {
                let path = dir.join(format!("{name}.spv"));
                let bytes = std::fs::read(&path).map_err(|e| GfxError::ShaderLoad {
                    name: name.to_string(),
                    reason: format!("{}: {e}", path.display()),
                })?;
                parse_spirv(name, &bytes)?
            }
            ShaderSource::Placeholder => PLACEHOLDER_SPIRV.to_vec(),
        };

        log::debug!("load shader: {name}");
        let module = Rc::new(GfxShaderModule::new(self.backend.clone(), &code, name)?);
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    pub fn register_reflection(&mut self, reflection: ShaderReflection) {
        self.reflections.insert(reflection.shader, reflection);
    }

    pub fn reflection(&self, shader: &str) -> Option<&ShaderReflection> {
        self.reflections.get(shader)
    }

    /// 校验已注册的反射信息，未注册反射表的 shader 视为错误
    pub fn validate_block<T>(&self, shader: &str, set: u32, binding: u32) -> GfxResult<()> {
        self.reflection(shader)
            .ok_or_else(|| GfxError::ReflectionMismatch {
                shader: shader.to_string(),
                detail: "no reflection registered".to_string(),
            })?
            .validate_block::<T>(set, binding)
    }

    #[inline]
    pub fn loaded_count(&self) -> usize {
        self.modules.len()
    }
}

#[cfg(test)]
mod tests {
    use vela_gfx::headless::HeadlessBackend;

    use super::*;

    const TEST_REFLECTION: ShaderReflection = ShaderReflection {
        shader: "test.comp",
        bindings: &[ReflectedBinding {
            set: 0,
            binding: 1,
            size: 16,
            stages: vk::ShaderStageFlags::COMPUTE,
        }],
    };

    #[test]
    fn test_parse_spirv_header() {
        let bytes = PLACEHOLDER_SPIRV.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<_>>();
        assert_eq!(parse_spirv("ok", &bytes).unwrap(), PLACEHOLDER_SPIRV.to_vec());

        let mut bad_magic = bytes.clone();
        bad_magic[0] = 0;
        assert!(matches!(parse_spirv("bad", &bad_magic), Err(GfxError::ShaderLoad { .. })));
        assert!(parse_spirv("short", &bytes[..6]).is_err());
        // magic 正确但 header 不完整
        assert!(matches!(parse_spirv("truncated", &bytes[..8]), Err(GfxError::ShaderLoad { .. })));
        assert!(parse_spirv("empty", &[]).is_err());
    }

    #[test]
    fn test_parse_spirv_big_endian() {
        let bytes = PLACEHOLDER_SPIRV.iter().flat_map(|w| w.to_be_bytes()).collect::<Vec<_>>();
        let words = parse_spirv("be", &bytes).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words, PLACEHOLDER_SPIRV.to_vec());
    }

    #[test]
    fn test_modules_are_cached() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut library = ShaderLibrary::new(backend.clone(), ShaderSource::Placeholder);
        let a = library.load("bloom.comp").unwrap();
        let b = library.load("bloom.comp").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(library.loaded_count(), 1);
        assert_eq!(backend.live_object_count(), 1);
    }

    #[test]
    fn test_missing_file_is_shader_load_error() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut library = ShaderLibrary::new(backend, ShaderSource::Directory(PathBuf::from("no/such/dir")));
        assert!(matches!(library.load("missing.vert"), Err(GfxError::ShaderLoad { .. })));
    }

    #[test]
    fn test_reflection_size_check() {
        let backend = Rc::new(HeadlessBackend::new());
        let mut library = ShaderLibrary::new(backend, ShaderSource::Placeholder);
        library.register_reflection(TEST_REFLECTION);

        assert!(library.validate_block::<[f32; 4]>("test.comp", 0, 1).is_ok());
        assert!(matches!(
            library.validate_block::<[f32; 3]>("test.comp", 0, 1),
            Err(GfxError::ReflectionMismatch { .. })
        ));
        assert!(library.validate_block::<[f32; 4]>("test.comp", 0, 2).is_err());
        assert!(library.validate_block::<[f32; 4]>("other.comp", 0, 1).is_err());
    }
}
