//! Filesystem object storage for uploaded materials.
//!
//! Objects live under `{base_path}/uploads/{owner_id}/{material_id}/{filename}`.
//! Writes are atomic (temp file + rename) and stored files are not executable.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use folio_core::{sanitize_filename, Error, ObjectStorage, Result};

/// Build the storage key for a material upload.
pub fn storage_key(owner_id: Uuid, material_id: Uuid, filename: &str) -> String {
    format!(
        "uploads/{}/{}/{}",
        owner_id,
        material_id,
        sanitize_filename(filename)
    )
}

/// Filesystem storage backend.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at the given directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a reference to a path under the base directory.
    ///
    /// References are relative keys; absolute paths and `..` segments are
    /// rejected so a stored key can never escape the storage root.
    fn full_path(&self, reference: &str) -> Result<PathBuf> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if reference.is_empty() || escapes {
            return Err(Error::Storage(format!(
                "invalid storage reference: {reference}"
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FilesystemBackend {
    async fn issue_write_location(
        &self,
        owner_id: Uuid,
        material_id: Uuid,
        filename: &str,
    ) -> Result<String> {
        let key = storage_key(owner_id, material_id, filename);
        let full_path = self.full_path(&key)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        debug!(
            subsystem = "storage",
            component = "filesystem",
            op = "issue_write_location",
            material_id = %material_id,
            storage_key = %key,
            "Issued write location"
        );
        Ok(key)
    }

    async fn write(&self, reference: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(reference)?;
        debug!(
            subsystem = "storage",
            component = "filesystem",
            op = "write",
            storage_key = %reference,
            size = data.len(),
            "Writing object"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "create_dir_all failed");
                e
            })?;
        }

        // Atomic write: temp file + rename
        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(reference)?;
        fs::read(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("failed to read {reference}: {e}")))
    }

    async fn delete(&self, reference: &str) -> Result<()> {
        let full_path = self.full_path(reference)?;
        if fs::try_exists(&full_path).await? {
            fs::remove_file(&full_path).await?;
        }
        Ok(())
    }
}
