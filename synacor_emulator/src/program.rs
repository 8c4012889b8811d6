use std::path::{Path, PathBuf};

/// A program image together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub data: Vec<u8>,
    /// Fully resolved path, reported to debuggers as the executable.
    pub path: PathBuf,
}

impl Program {
    pub fn new(data: Vec<u8>, path: impl Into<PathBuf>) -> Self {
        Self {
            data,
            path: path.into(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = std::fs::canonicalize(path)?;
        let data = std::fs::read(&path)?;
        log::info!("read {} bytes from {}", data.len(), path.display());
        Ok(Self { data, path })
    }

    /// Size of the image in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
