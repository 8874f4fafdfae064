//! Testing utilities and mock implementations.
//!
//! Scripted stand-ins for the external collaborators of the pipeline, so
//! orchestration can be exercised end to end without an extractor or a
//! real object store.
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry_core::testing::{fixtures, MockBlobStore, ScriptedAgent, ScriptedFetch};
//!
//! let agent = ScriptedAgent::new();
//! agent.script("video-A", vec![ScriptedFetch::bytes(fixtures::large_mp4())]);
//! let blobs = MockBlobStore::new();
//! ```

pub mod fixtures;
mod mock_agent;
mod mock_blob_store;

pub use mock_agent::{ScriptedAgent, ScriptedFetch};
pub use mock_blob_store::MockBlobStore;
