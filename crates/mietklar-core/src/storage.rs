//! Filesystem implementation of the blob storage collaborator.
//!
//! Stores page bytes in a directory hierarchy sharded by the file id's hex
//! prefix. Path format: `{base_path}/blobs/{first-2-hex}/{next-2-hex}/{uuid}.bin`.
//! Bytes are stored as received; encryption is the upstream collaborator's
//! concern and the pipeline never inspects blob content beyond decoding
//! images.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::traits::StorageBackend;

/// Filesystem storage backend.
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

    fn blob_path(&self, file_id: Uuid) -> PathBuf {
        let hex = file_id.simple().to_string();
        self.base_path
            .join("blobs")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.bin", file_id))
    }

    /// Validate that the backend can write, read, and delete files.
    ///
    /// Performs a full round-trip at startup to catch filesystem issues
    /// (permissions, missing mount, overlayfs quirks) early.
    pub async fn validate(&self) -> Result<()> {
        let test_dir = self.base_path.join("blobs/.health-check");
        let test_file = test_dir.join("test.bin");

        fs::create_dir_all(&test_dir).await?;

        let data = b"storage-health-check";
        fs::write(&test_file, data).await?;

        let read_back = fs::read(&test_file).await?;
        if read_back != data {
            return Err(Error::Storage("read-back mismatch".to_string()));
        }

        fs::remove_file(&test_file).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn get(&self, file_id: Uuid) -> Result<Vec<u8>> {
        let path = self.blob_path(file_id);
        fs::read(&path)
            .await
            .map_err(|e| Error::Storage(format!("read {}: {}", file_id, e)))
    }

    async fn put(
        &self,
        contract_id: Uuid,
        file_name: &str,
        _content_type: &str,
        data: &[u8],
    ) -> Result<Uuid> {
        let file_id = Uuid::now_v7();
        let path = self.blob_path(file_id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        debug!(
            contract_id = %contract_id,
            file_name = file_name,
            file_id = %file_id,
            size = data.len(),
            "Stored contract page blob"
        );
        Ok(file_id)
    }

    async fn delete(&self, file_id: Uuid) -> Result<()> {
        let path = self.blob_path(file_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone is fine for delete.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("delete {}: {}", file_id, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());

        let contract_id = Uuid::new_v4();
        let data = b"page bytes".to_vec();
        let file_id = backend
            .put(contract_id, "page-1.png", "image/png", &data)
            .await
            .unwrap();

        let read_back = backend.get(file_id).await.unwrap();
        assert_eq!(read_back, data);

        backend.delete(file_id).await.unwrap();
        assert!(backend.get(file_id).await.is_err());
    }

    #[tokio::test]
    async fn delete_of_missing_blob_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        backend.delete(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn validate_roundtrips_on_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        backend.validate().await.unwrap();
    }

    #[test]
    fn blob_paths_are_sharded_by_hex_prefix() {
        let backend = FilesystemBackend::new("/data");
        let file_id = Uuid::parse_str("0195aabb-0000-7000-8000-000000000001").unwrap();
        let path = backend.blob_path(file_id);
        let s = path.to_string_lossy();
        assert!(s.starts_with("/data/blobs/01/95/"));
        assert!(s.ends_with(".bin"));
    }
}
