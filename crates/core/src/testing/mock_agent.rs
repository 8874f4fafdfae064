//! Scripted acquisition agent for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::agent::{AcquisitionAgent, AgentError, ByteSource};

/// Chunk size used when replaying scripted bytes.
const SCRIPT_CHUNK_SIZE: usize = 64 * 1024;

/// One scripted response to a fetch.
#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    /// Return these bytes, optionally after a delay.
    Bytes { data: Vec<u8>, delay: Duration },
    /// Fail the fetch.
    Fail(AgentError),
    /// Yield `data` and then fail mid-stream.
    Truncated { data: Vec<u8>, error: AgentError },
    /// Never return.
    Hang,
    /// Panic inside the fetch.
    Panic(String),
}

impl ScriptedFetch {
    pub fn bytes(data: Vec<u8>) -> Self {
        ScriptedFetch::Bytes {
            data,
            delay: Duration::ZERO,
        }
    }

    pub fn bytes_after(data: Vec<u8>, delay: Duration) -> Self {
        ScriptedFetch::Bytes { data, delay }
    }

    pub fn not_found() -> Self {
        ScriptedFetch::Fail(AgentError::NotFound("no such content".to_string()))
    }

    pub fn blocked() -> Self {
        ScriptedFetch::Fail(AgentError::Blocked("sign in to confirm".to_string()))
    }

    pub fn throttled() -> Self {
        ScriptedFetch::Fail(AgentError::Throttled("HTTP 429".to_string()))
    }

    pub fn unknown(message: &str) -> Self {
        ScriptedFetch::Fail(AgentError::Unknown(message.to_string()))
    }

    pub fn truncated(data: Vec<u8>) -> Self {
        ScriptedFetch::Truncated {
            data,
            error: AgentError::Unknown("connection reset".to_string()),
        }
    }

    pub fn hang() -> Self {
        ScriptedFetch::Hang
    }

    pub fn panics(message: &str) -> Self {
        ScriptedFetch::Panic(message.to_string())
    }
}

/// Decrements the in-flight counter even if the fetch is abandoned.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock implementation of the AcquisitionAgent trait.
///
/// Each reference has a queue of scripted responses consumed in order. The
/// last response repeats once the queue is down to one entry, so a single
/// scripted step describes an agent that always behaves the same way.
/// References without a script fail with `NotFound`.
///
/// # Example
///
/// ```rust,ignore
/// use ferry_core::testing::{fixtures, ScriptedAgent, ScriptedFetch};
///
/// let agent = ScriptedAgent::new();
/// agent.script("video-A", vec![
///     ScriptedFetch::bytes(vec![0; 10]),
///     ScriptedFetch::bytes(fixtures::large_mp4()),
/// ]);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedFetch>>>,
    calls: Mutex<HashMap<String, u32>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script for `reference`.
    pub fn script(&self, reference: &str, steps: Vec<ScriptedFetch>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.to_string(), steps.into());
    }

    /// Number of fetches made for `reference`.
    pub fn calls(&self, reference: &str) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of fetches observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, reference: &str) -> Option<ScriptedFetch> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(reference.to_string())
            .or_insert(0) += 1;

        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        let queue = scripts.get_mut(reference)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn chunked(data: Vec<u8>) -> Vec<Result<Vec<u8>, AgentError>> {
    data.chunks(SCRIPT_CHUNK_SIZE)
        .map(|c| Ok(c.to_vec()))
        .collect()
}

#[async_trait]
impl AcquisitionAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, reference: &str) -> Result<ByteSource, AgentError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let step = self
            .next_step(reference)
            .ok_or_else(|| AgentError::NotFound(format!("no script for {}", reference)))?;

        match step {
            ScriptedFetch::Bytes { data, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let len = data.len() as u64;
                Ok(ByteSource::new(Some(len), stream::iter(chunked(data)).boxed()))
            }
            ScriptedFetch::Fail(error) => Err(error),
            ScriptedFetch::Truncated { data, error } => {
                // Advertise more than we deliver.
                let len = data.len() as u64 * 2;
                let mut chunks = chunked(data);
                chunks.push(Err(error));
                Ok(ByteSource::new(Some(len), stream::iter(chunks).boxed()))
            }
            ScriptedFetch::Hang => futures::future::pending().await,
            ScriptedFetch::Panic(message) => panic!("{}", message),
        }
    }
}
