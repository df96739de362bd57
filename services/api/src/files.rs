//! services/api/src/files.rs
//!
//! On-disk blob storage for uploaded files. Each blob is addressed by its
//! upload id plus the original file extension (`{uploadId}{ext}`), so the
//! metadata record is all that is needed to locate it again.

use std::io;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct FileVault {
    root: PathBuf,
}

impl FileVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the storage directory if it does not exist yet.
    pub async fn ensure_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    fn blob_path(&self, upload_id: Uuid, file_name: &str) -> PathBuf {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        self.root.join(format!("{}{}", upload_id, extension))
    }

    pub async fn store(&self, upload_id: Uuid, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.blob_path(upload_id, file_name);
        tokio::fs::write(&path, bytes).await?;
        info!("Saved file to disk: {}", path.display());
        Ok(path)
    }

    pub async fn read(&self, upload_id: Uuid, file_name: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.blob_path(upload_id, file_name)).await
    }

    /// Removes the blob. An already-missing blob is not an error.
    pub async fn remove(&self, upload_id: Uuid, file_name: &str) -> io::Result<bool> {
        let path = self.blob_path(upload_id, file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted file from disk: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_vault() -> FileVault {
        let dir = std::env::temp_dir().join(format!("tutor-vault-{}", Uuid::new_v4()));
        FileVault::new(dir)
    }

    #[tokio::test]
    async fn store_then_read_round_trips() {
        let vault = scratch_vault();
        vault.ensure_root().await.unwrap();

        let id = Uuid::new_v4();
        let payload = b"%PDF-1.4 fake content";
        vault.store(id, "notes.pdf", payload).await.unwrap();

        let read_back = vault.read(id, "notes.pdf").await.unwrap();
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let vault = scratch_vault();
        vault.ensure_root().await.unwrap();

        let id = Uuid::new_v4();
        vault.store(id, "scan.png", b"png bytes").await.unwrap();

        assert!(vault.remove(id, "scan.png").await.unwrap());
        // Second removal reports the blob as already gone, without erroring.
        assert!(!vault.remove(id, "scan.png").await.unwrap());
    }

    #[tokio::test]
    async fn missing_blob_reads_as_not_found() {
        let vault = scratch_vault();
        vault.ensure_root().await.unwrap();

        let err = vault.read(Uuid::new_v4(), "ghost.pdf").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
