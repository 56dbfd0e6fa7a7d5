//! Model file validation.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::engine::LoadError;

/// Leading bytes of every GGUF file.
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// A model path that exists, is a regular file and carries the GGUF magic.
#[derive(Debug, Clone)]
pub struct ModelPath {
    path: PathBuf,
    metadata: ModelMetadata,
}

impl ModelPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// Basic model metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMetadata {
    pub name: String,
    pub size_bytes: u64,
}

/// Check that `path` names a loadable model file before handing it to the
/// native loader.
pub fn validate_model_path(path: impl AsRef<Path>) -> Result<ModelPath, LoadError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() || !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }

    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(LoadError::InvalidFormat(format!("{} is not a regular file", path.display())));
    }

    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    if file.read_exact(&mut magic).is_err() || &magic != GGUF_MAGIC {
        return Err(LoadError::InvalidFormat(format!("{} is not a GGUF file", path.display())));
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ModelPath {
        path: path.to_path_buf(),
        metadata: ModelMetadata { name, size_bytes: meta.len() },
    })
}
