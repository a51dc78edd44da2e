//! On-disk bytes of ephemeral uploads.
//!
//! Each file is stored under a fresh UUID name inside one directory; the
//! metadata (original name, mime type, expiry) lives in the database.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Resolve `name` inside `base`, refusing anything that would escape it.
fn ensure_within(base: &Path, name: &str) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            _ => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
        }
    }
    if resolved == base || !resolved.starts_with(base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    base_path: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "Upload store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Write `data` under a new name and return that name.
    pub async fn store(&self, data: &[u8]) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let name = Uuid::new_v4().to_string();
        let path = ensure_within(&self.base_path, &name)?;

        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to write upload {}: {}", name, e)))?;

        debug!(name = %name, size = data.len(), "Stored upload");
        Ok(name)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, ServerError> {
        let path = ensure_within(&self.base_path, name)?;

        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::NotFound("File".into()))
            }
            Err(e) => Err(ServerError::Storage(format!(
                "Failed to read upload {}: {}",
                name, e
            ))),
        }
    }

    /// Remove a stored file. A file that is already gone is not an error.
    pub async fn remove(&self, name: &str) -> Result<(), ServerError> {
        let path = ensure_within(&self.base_path, name)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name = %name, "Removed upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::Storage(format!(
                "Failed to remove upload {}: {}",
                name, e
            ))),
        }
    }
}
