use super::{types::Config, ConfigError, StorageBackend};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let jobs = &config.jobs;
    if jobs.max_attempts == 0 {
        return Err(invalid("jobs.max_attempts must be at least 1"));
    }
    if jobs.per_job_timeout_ms == 0 {
        return Err(invalid("jobs.per_job_timeout_ms must be positive"));
    }
    if jobs.fetch_timeout_ms == 0 {
        return Err(invalid("jobs.fetch_timeout_ms must be positive"));
    }
    if jobs.worker_pool_size == 0 {
        return Err(invalid("jobs.worker_pool_size must be at least 1"));
    }
    if jobs.queue_capacity == 0 {
        return Err(invalid("jobs.queue_capacity must be at least 1"));
    }
    if jobs.max_backoff_ms < jobs.initial_backoff_ms {
        return Err(invalid(
            "jobs.max_backoff_ms must not be below jobs.initial_backoff_ms",
        ));
    }
    if !jobs.backoff_multiplier.is_finite() || jobs.backoff_multiplier < 1.0 {
        return Err(invalid("jobs.backoff_multiplier must be >= 1.0"));
    }

    if config.agent.command.program.trim().is_empty() {
        return Err(invalid("agent.command.program cannot be empty"));
    }

    if config.storage.backend == StorageBackend::Http {
        match &config.storage.http {
            None => {
                return Err(invalid(
                    "storage.http section is required when storage.backend = \"http\"",
                ))
            }
            Some(http) if !http.url.starts_with("http://") && !http.url.starts_with("https://") => {
                return Err(invalid("storage.http.url must be an http(s) URL"));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
