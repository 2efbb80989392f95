use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use tempfile::NamedTempFile;

#[derive(Debug)]
pub enum ExportError {
    EmptyDocument,
    DestinationNotFound(PathBuf),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::EmptyDocument => write!(f, "Refusing to write an empty file"),
            ExportError::DestinationNotFound(dir) => {
                write!(f, "Output directory not found: {}", dir.display())
            }
        }
    }
}

impl std::error::Error for ExportError {}

/// Write `bytes` to `path` through a temporary file in the same directory, so
/// readers never observe a half-written document.
pub fn write_document(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if bytes.is_empty() {
        return Err(ExportError::EmptyDocument.into());
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        return Err(ExportError::DestinationNotFound(dir).into());
    }

    let mut file = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.as_file().sync_all())
        .with_context(|| format!("Failed to write to {}", file.path().display()))?;
    file.persist(path)
        .with_context(|| format!("Failed to write to {}", path.display()))?;

    let written = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    info!("Wrote {} bytes to {}", bytes.len(), written.display());
    Ok(written)
}
