use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Worker pool sizing and retry parameters are usable
/// - Admission windows are non-zero
/// - Tool paths are non-empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Worker validation
    if config.workers.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "workers.concurrency must be at least 1".to_string(),
        ));
    }
    if config.workers.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "workers.max_attempts must be at least 1".to_string(),
        ));
    }
    if config.workers.attempt_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "workers.attempt_timeout_secs must be at least 1".to_string(),
        ));
    }
    if config.workers.backoff_base_secs > config.workers.backoff_max_secs {
        return Err(ConfigError::ValidationError(
            "workers.backoff_base_secs cannot exceed workers.backoff_max_secs".to_string(),
        ));
    }
    if config.workers.starts_per_minute == 0 {
        return Err(ConfigError::ValidationError(
            "workers.starts_per_minute must be at least 1".to_string(),
        ));
    }

    // Admission validation
    if config.admission.window_secs == 0 {
        return Err(ConfigError::ValidationError(
            "admission.window_secs must be at least 1".to_string(),
        ));
    }
    if config.admission.global_per_minute == 0 {
        return Err(ConfigError::ValidationError(
            "admission.global_per_minute must be at least 1".to_string(),
        ));
    }

    // Tool validation
    if config.tools.soffice_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "tools.soffice_path cannot be empty".to_string(),
        ));
    }
    if config.tools.ffmpeg_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "tools.ffmpeg_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
