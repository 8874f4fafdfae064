//! Media acquisition job orchestration.
//!
//! Jobs are submitted through the [`dispatcher`], persisted in a [`job`]
//! store and driven by the [`orchestrator`] through acquisition
//! ([`agent`]), verification ([`validator`]) and upload ([`storage`]).

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod reporter;
pub mod storage;
pub mod testing;
pub mod validator;

pub use agent::{AcquisitionAgent, AgentError, ByteSource, CommandAgent, HttpAgent};
pub use config::{
    load_config, load_config_from_str, validate_config, AgentBackend, Config, ConfigError,
    DatabaseBackend, SanitizedConfig, StorageBackend,
};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, DispatcherStatus};
pub use job::{
    CreateJobRequest, InMemoryJobStore, Job, JobError, JobFilter, JobState, JobStore, JobUpdate,
    SqliteJobStore,
};
pub use orchestrator::{FailureKind, Orchestrator, OrchestratorConfig, PipelineFailure};
pub use reporter::StageReporter;
pub use storage::{artifact_key, BlobStore, FsBlobStore, HttpBlobStore, StorageError, StoredObject};
pub use validator::{ArtifactValidator, ContainerValidator, ValidationResult};
