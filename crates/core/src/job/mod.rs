//! Job records: the unit of work tracked from submission to a terminal state.

mod memory_store;
mod sqlite_store;
mod store;
mod types;

pub use memory_store::InMemoryJobStore;
pub use sqlite_store::SqliteJobStore;
pub use store::{CreateJobRequest, JobError, JobFilter, JobStore};
pub use types::{validate_reference, Job, JobState, JobUpdate, MAX_REFERENCE_LEN};
