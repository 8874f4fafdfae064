//! Blob storage for validated artifacts.

mod fs_store;
mod http_store;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

pub use fs_store::FsBlobStore;
pub use http_store::HttpBlobStore;

/// Read buffer used when hashing and copying artifacts.
pub(crate) const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Errors from a blob store. None of these are retried by the pipeline.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("cannot read artifact: {0}")]
    Source(#[source] std::io::Error),

    #[error("write failed: {0}")]
    Write(String),

    #[error("store rejected upload with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("store unreachable: {0}")]
    Connection(String),
}

/// A stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Where downstream consumers fetch the artifact.
    pub location: String,
    pub size_bytes: u64,
    /// Lowercase hex sha256 of the stored bytes.
    pub sha256: String,
}

/// Durable object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Store the file at `source` under `key`.
    ///
    /// The source file is only read. An object is either fully stored or
    /// not visible at all.
    async fn put(&self, key: &str, source: &Path) -> Result<StoredObject, StorageError>;
}

/// Object key for a job's artifact: `<prefix>/<job id>/<stem>.mp4`.
///
/// The stem is the `v` query parameter of the reference when present,
/// otherwise its last path segment, reduced to `[A-Za-z0-9._-]`.
pub fn artifact_key(prefix: &str, job_id: &str, reference: &str) -> String {
    let stem = sanitize_stem(&reference_stem(reference));
    let stem = if stem.is_empty() { "artifact" } else { stem.as_str() };
    let prefix = prefix.trim_matches('/');

    if prefix.is_empty() {
        format!("{}/{}.mp4", job_id, stem)
    } else {
        format!("{}/{}/{}.mp4", prefix, job_id, stem)
    }
}

fn reference_stem(reference: &str) -> String {
    let (path, query) = match reference.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (reference, None),
    };
    let query = query.map(|q| q.split('#').next().unwrap_or(q));

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(("v", value)) = pair.split_once('=') {
                if !value.is_empty() {
                    return urlencoding::decode(value)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.to_string());
                }
            }
        }
    }

    let path = path.split('#').next().unwrap_or(path);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    // Drop the host when there is a path after it.
    let segment = match path.split_once('/') {
        Some((_, rest)) => rest.rsplit('/').find(|s| !s.is_empty()).unwrap_or(""),
        None => path,
    };
    // Strip an extension so we don't get "clip.webm.mp4".
    match segment.rsplit_once('.') {
        Some((base, _)) if !base.is_empty() => base.to_string(),
        _ => segment.to_string(),
    }
}

fn sanitize_stem(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(128)
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Rejects keys that could escape a store root.
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// Size and sha256 of a file.
pub(crate) async fn hash_file(path: &Path) -> Result<(u64, String), StorageError> {
    let file = File::open(path).await.map_err(StorageError::Source)?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, file);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut hasher = Sha256::new();
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await.map_err(StorageError::Source)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    Ok((total, format!("{:x}", hasher.finalize())))
}
