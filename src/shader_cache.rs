//! Persisted shader cache.
//!
//! Translated shaders are stored one file per source shader under
//! `<root>/<backend name>/`, with path separators in the source name
//! flattened so the layout stays a single directory per backend. The file
//! format is little-endian and length-prefixed throughout; any malformed or
//! truncated file is treated as a cache miss, never an error.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::backend::BackendKind;

const MAGIC: &[u8; 4] = b"CSC1";
const VERSION: u32 = 1;

/// Pipeline stages a compiled shader can carry bytecode for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ShaderStage {
    Vertex = 0,
    TessControl = 1,
    TessEval = 2,
    Geometry = 3,
    Fragment = 4,
    Compute = 5,
}

/// Number of [`ShaderStage`] variants.
pub const SHADER_STAGE_COUNT: usize = 6;

/// Scalar or aggregate type of a reflected shader parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParameterType {
    Float = 0,
    Float2 = 1,
    Float3 = 2,
    Float4 = 3,
    Int = 4,
    Int2 = 5,
    Int3 = 6,
    Int4 = 7,
    UInt = 8,
    Bool = 9,
    Matrix3 = 10,
    Matrix4 = 11,
}

impl ParameterType {
    fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => Self::Float,
            1 => Self::Float2,
            2 => Self::Float3,
            3 => Self::Float4,
            4 => Self::Int,
            5 => Self::Int2,
            6 => Self::Int3,
            7 => Self::Int4,
            8 => Self::UInt,
            9 => Self::Bool,
            10 => Self::Matrix3,
            11 => Self::Matrix4,
            _ => return None,
        })
    }
}

/// One reflected uniform parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderParameter {
    pub name: String,
    pub ty: ParameterType,
    pub size: u32,
    pub offset: u32,
    pub binding: u32,
}

/// A uniform block the shader expects bound at a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterBlockBinding {
    pub binding: u32,
    pub size: u32,
}

/// A translated shader plus its reflection data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledShader {
    pub parameters: Vec<ShaderParameter>,
    pub stages: [Vec<u8>; SHADER_STAGE_COUNT],
    pub globals: Vec<ParameterBlockBinding>,
    pub locals: Vec<ParameterBlockBinding>,
}

impl CompiledShader {
    /// Bytecode for one stage, empty when the stage is absent.
    pub fn stage(&self, stage: ShaderStage) -> &[u8] {
        &self.stages[stage as usize]
    }

    /// Set the bytecode for one stage.
    pub fn set_stage(&mut self, stage: ShaderStage, bytes: Vec<u8>) {
        self.stages[stage as usize] = bytes;
    }
}

/// On-disk shader cache for one backend.
#[derive(Debug, Clone)]
pub struct ShaderCache {
    root: PathBuf,
    backend: BackendKind,
}

impl ShaderCache {
    pub fn new(root: impl Into<PathBuf>, backend: BackendKind) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    /// Cache file for a source shader name.
    ///
    /// `/`, `\` and `:` in the name are flattened to `_` so every cached
    /// shader lands directly in the backend's directory.
    pub fn path_for(&self, shader_name: &str) -> PathBuf {
        let flattened: String = shader_name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        self.root
            .join(self.backend.name())
            .join(format!("{}.shadercache", flattened))
    }

    /// Persist a compiled shader.
    pub fn store(&self, shader_name: &str, shader: &CompiledShader) -> io::Result<()> {
        let path = self.path_for(shader_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        write_shader(&mut file, shader)?;
        log::trace!("Stored shader cache entry {:?}", path);
        Ok(())
    }

    /// Load a compiled shader. Any missing, truncated or corrupt file is a
    /// miss.
    pub fn load(&self, shader_name: &str) -> Option<CompiledShader> {
        let path = self.path_for(shader_name);
        match read_shader_file(&path) {
            Ok(shader) => Some(shader),
            Err(e) => {
                log::trace!("Shader cache miss for {:?}: {}", path, e);
                None
            }
        }
    }
}

fn write_u32(w: &mut impl Write, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    write_u32(w, bytes.len() as u32)?;
    w.write_all(bytes)
}

fn write_shader(w: &mut impl Write, shader: &CompiledShader) -> io::Result<()> {
    w.write_all(MAGIC)?;
    write_u32(w, VERSION)?;

    write_u32(w, shader.parameters.len() as u32)?;
    for parameter in &shader.parameters {
        write_bytes(w, parameter.name.as_bytes())?;
        write_u32(w, parameter.ty as u32)?;
        write_u32(w, parameter.size)?;
        write_u32(w, parameter.offset)?;
        write_u32(w, parameter.binding)?;
    }

    for stage in &shader.stages {
        write_bytes(w, stage)?;
    }

    for blocks in [&shader.globals, &shader.locals] {
        write_u32(w, blocks.len() as u32)?;
        for block in blocks {
            write_u32(w, block.binding)?;
            write_u32(w, block.size)?;
        }
    }
    Ok(())
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_bytes(r: &mut impl Read, limit: u32) -> io::Result<Vec<u8>> {
    let len = read_u32(r)?;
    if len > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("length {} exceeds limit {}", len, limit),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

const MAX_NAME_LEN: u32 = 4096;
const MAX_STAGE_LEN: u32 = 64 * 1024 * 1024;

fn read_shader_file(path: &Path) -> io::Result<CompiledShader> {
    let mut file = fs::File::open(path)?;
    read_shader(&mut file)
}

fn read_shader(r: &mut impl Read) -> io::Result<CompiledShader> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }
    let version = read_u32(r)?;
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {}", version),
        ));
    }

    let mut shader = CompiledShader::default();

    let parameter_count = read_u32(r)?;
    for _ in 0..parameter_count {
        let name_bytes = read_bytes(r, MAX_NAME_LEN)?;
        let name = String::from_utf8(name_bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "parameter name not utf-8"))?;
        let tag = read_u32(r)?;
        let ty = ParameterType::from_tag(tag).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown parameter type {}", tag),
            )
        })?;
        shader.parameters.push(ShaderParameter {
            name,
            ty,
            size: read_u32(r)?,
            offset: read_u32(r)?,
            binding: read_u32(r)?,
        });
    }

    for stage in shader.stages.iter_mut() {
        *stage = read_bytes(r, MAX_STAGE_LEN)?;
    }

    for blocks in [&mut shader.globals, &mut shader.locals] {
        let count = read_u32(r)?;
        for _ in 0..count {
            blocks.push(ParameterBlockBinding {
                binding: read_u32(r)?,
                size: read_u32(r)?,
            });
        }
    }

    Ok(shader)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_shader() -> CompiledShader {
        let mut shader = CompiledShader {
            parameters: vec![ShaderParameter {
                name: "model_view_projection".to_string(),
                ty: ParameterType::Matrix4,
                size: 64,
                offset: 0,
                binding: 0,
            }],
            globals: vec![ParameterBlockBinding {
                binding: 0,
                size: 256,
            }],
            locals: vec![ParameterBlockBinding {
                binding: 1,
                size: 64,
            }],
            ..Default::default()
        };
        shader.set_stage(ShaderStage::Vertex, vec![1, 2, 3, 4]);
        shader.set_stage(ShaderStage::Fragment, vec![5, 6, 7]);
        shader
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path(), BackendKind::Vulkan);
        let shader = sample_shader();
        cache.store("materials/lit.shader", &shader).unwrap();
        let loaded = cache.load("materials/lit.shader").unwrap();
        assert_eq!(loaded, shader);
        assert!(loaded.stage(ShaderStage::Compute).is_empty());
    }

    #[test]
    fn test_path_flattens_separators_per_backend() {
        let cache = ShaderCache::new("/cache", BackendKind::Vulkan);
        let path = cache.path_for("fx\\post:bloom/comp");
        assert_eq!(
            path,
            PathBuf::from("/cache/Vulkan/fx_post_bloom_comp.shadercache")
        );
    }

    #[test]
    fn test_missing_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path(), BackendKind::None);
        assert!(cache.load("never_stored").is_none());
    }

    #[test]
    fn test_truncated_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path(), BackendKind::None);
        cache.store("shader", &sample_shader()).unwrap();

        let path = cache.path_for("shader");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(cache.load("shader").is_none());
    }

    #[test]
    fn test_bad_magic_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path(), BackendKind::None);
        let path = cache.path_for("shader");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"NOPE0000").unwrap();
        assert!(cache.load("shader").is_none());
    }

    #[test]
    fn test_backends_do_not_share_entries() {
        let dir = tempfile::tempdir().unwrap();
        let vulkan = ShaderCache::new(dir.path(), BackendKind::Vulkan);
        let null = ShaderCache::new(dir.path(), BackendKind::None);
        vulkan.store("shader", &sample_shader()).unwrap();
        assert!(vulkan.load("shader").is_some());
        assert!(null.load("shader").is_none());
    }
}
