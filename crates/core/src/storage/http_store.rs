//! Object store reachable over HTTP PUT.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::{Body, Client};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{check_key, hash_file, BlobStore, StorageError, StoredObject, COPY_BUFFER_SIZE};
use crate::config::HttpStorageConfig;

/// Header carrying the hex sha256 of the uploaded body.
pub const CONTENT_SHA256_HEADER: &str = "x-content-sha256";

/// Uploads artifacts with `PUT <url>/<key>`.
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(config: &HttpStorageConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn object_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|part| urlencoding::encode(part).into_owned())
            .collect();
        format!("{}/{}", self.base_url, encoded.join("/"))
    }
}

fn file_body(file: File) -> Body {
    let chunks = stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });
    Body::wrap_stream(chunks)
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn put(&self, key: &str, source: &Path) -> Result<StoredObject, StorageError> {
        check_key(key)?;
        let (size_bytes, sha256) = hash_file(source).await?;
        let file = File::open(source).await.map_err(StorageError::Source)?;
        let url = self.object_url(key);

        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .header(reqwest::header::CONTENT_LENGTH, size_bytes)
            .header(CONTENT_SHA256_HEADER, &sha256)
            .body(file_body(file));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            let e = e.without_url();
            if e.is_timeout() {
                StorageError::Connection(format!("upload timed out: {}", e))
            } else {
                StorageError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(key, size_bytes, status = status.as_u16(), "Uploaded artifact");
        Ok(StoredObject {
            location: url,
            size_bytes,
            sha256,
        })
    }
}
