//! Acquisition agent abstraction.
//!
//! An agent turns a content reference into a readable byte stream. How it
//! gets there (extractor CLI, direct HTTP, a browser session) is its own
//! business; the orchestrator only sees the stream and a classified error.
//!
//! Cancellation is by drop: abandoning the `fetch` future or the returned
//! [`ByteSource`] must release whatever the agent holds (child processes,
//! sessions, scratch files).

mod command;
mod http;

use std::fmt;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

pub use command::CommandAgent;
pub use http::HttpAgent;

/// Read size used when streaming local files.
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Failure modes an agent reports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// The reference does not resolve to content. Not retried.
    #[error("content not found: {0}")]
    NotFound(String),

    /// The origin is rate limiting us.
    #[error("throttled by origin: {0}")]
    Throttled(String),

    /// The origin refused automated access.
    #[error("blocked by origin: {0}")]
    Blocked(String),

    /// Resolution or transfer took too long.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Anything else.
    #[error("{0}")]
    Unknown(String),
}

impl AgentError {
    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AgentError::NotFound(_))
    }
}

/// Stream of byte chunks produced by an agent.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, AgentError>>;

/// Readable bytes for one resolved reference.
pub struct ByteSource {
    /// Total size, when the agent knows it up front.
    pub content_length: Option<u64>,
    pub chunks: ChunkStream,
}

impl ByteSource {
    pub fn new(content_length: Option<u64>, chunks: ChunkStream) -> Self {
        Self {
            content_length,
            chunks,
        }
    }

    /// A source over bytes already in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self::new(Some(len), stream::iter([Ok(bytes)]).boxed())
    }

    /// Streams a local file. `guard` lives until the stream is dropped, so
    /// a scratch directory handed in here is removed when the consumer is done.
    pub fn from_file<G>(file: File, content_length: Option<u64>, guard: G) -> Self
    where
        G: Send + 'static,
    {
        let chunks = stream::unfold(Some((file, guard)), |state| async move {
            let (mut file, guard) = state?;
            let mut buf = vec![0u8; FILE_CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some((file, guard))))
                }
                Err(e) => Some((Err(AgentError::Unknown(format!("read failed: {}", e))), None)),
            }
        })
        .boxed();

        Self::new(content_length, chunks)
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Resolves content references into byte streams.
#[async_trait]
pub trait AcquisitionAgent: Send + Sync {
    /// Returns the name of this agent implementation.
    fn name(&self) -> &str;

    /// Resolve `reference` and open its bytes.
    ///
    /// May take an open-ended amount of time; callers bound it with their own
    /// timeout and cancel by dropping the future.
    async fn fetch(&self, reference: &str) -> Result<ByteSource, AgentError>;
}

/// Keeps the last non-empty line of tool output, bounded in length.
pub(crate) fn last_line(output: &str, max_chars: usize) -> String {
    let line = output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output");
    line.chars().take(max_chars).collect()
}
