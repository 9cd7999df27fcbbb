use super::{
    types::{Config, StorageBackend},
    ConfigError,
};

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - An s3 section with a bucket exists when backend = "s3"
/// - Retry policies allow at least one attempt
/// - Pools and concurrency limits are non-zero
/// - Pipeline defaults are in range
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    if config.storage.backend == StorageBackend::S3 {
        match &config.storage.s3 {
            None => return invalid("storage.s3 section is required when storage.backend = \"s3\""),
            Some(s3) if s3.bucket.trim().is_empty() => {
                return invalid("storage.s3.bucket cannot be empty")
            }
            Some(_) => {}
        }
    }
    if config.storage.retry.max_attempts == 0 {
        return invalid("storage.retry.max_attempts must be at least 1");
    }

    if config.models.max_concurrent_per_model == 0 {
        return invalid("models.max_concurrent_per_model must be at least 1");
    }
    if let Some(inference) = &config.models.inference {
        if inference.url.trim().is_empty() {
            return invalid("models.inference.url cannot be empty");
        }
    }

    let orchestrator = &config.orchestrator;
    for (name, value) in [
        ("orchestrator.worker_slots", orchestrator.worker_slots),
        ("orchestrator.max_in_flight_jobs", orchestrator.max_in_flight_jobs),
        ("orchestrator.max_queue_depth", orchestrator.max_queue_depth),
        ("orchestrator.upload_concurrency", orchestrator.upload_concurrency),
    ] {
        if value == 0 {
            return invalid(format!("{} must be at least 1", name));
        }
    }
    if orchestrator.stage_retry.max_attempts == 0 {
        return invalid("orchestrator.stage_retry.max_attempts must be at least 1");
    }

    config
        .pipeline
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("pipeline: {}", e)))
}
