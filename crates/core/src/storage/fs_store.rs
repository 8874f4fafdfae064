//! Filesystem blob store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use super::{check_key, BlobStore, StorageError, StoredObject, COPY_BUFFER_SIZE};
use crate::config::FsStorageConfig;

/// Stores objects as files under a root directory.
///
/// Writes go to a hidden temp file next to the destination and are renamed
/// into place, so a partially written object is never visible under its key.
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsBlobStore {
    pub fn new(config: &FsStorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    fn location(&self, key: &str, destination: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key),
            None => destination.display().to_string(),
        }
    }

    /// Copies `source` to `destination`, returning size and sha256.
    async fn copy_with_checksum(
        source: &Path,
        destination: &Path,
    ) -> Result<(u64, String), StorageError> {
        let source_file = File::open(source).await.map_err(StorageError::Source)?;
        let dest_file = File::create(destination)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", destination.display(), e)))?;

        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source_file);
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, dest_file);
        let mut hasher = Sha256::new();
        let mut total_bytes = 0u64;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer).await.map_err(StorageError::Source)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            writer
                .write_all(&buffer[..bytes_read])
                .await
                .map_err(|e| StorageError::Write(e.to_string()))?;
            total_bytes += bytes_read as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| StorageError::Write(e.to_string()))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| StorageError::Write(e.to_string()))?;

        Ok((total_bytes, format!("{:x}", hasher.finalize())))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn put(&self, key: &str, source: &Path) -> Result<StoredObject, StorageError> {
        check_key(key)?;
        let destination = self.root.join(key);
        let parent = destination
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;

        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", parent.display(), e)))?;

        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.{}.partial", file_name, uuid::Uuid::new_v4()));

        let copied = Self::copy_with_checksum(source, &temp).await;
        let (size_bytes, sha256) = match copied {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp, &destination).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::Write(format!(
                "{}: {}",
                destination.display(),
                e
            )));
        }

        debug!(key, size_bytes, "Stored artifact on filesystem");
        Ok(StoredObject {
            location: self.location(key, &destination),
            size_bytes,
            sha256,
        })
    }
}
