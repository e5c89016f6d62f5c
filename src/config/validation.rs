//! Configuration validation
//!
//! Validates TaskMirror configuration for correctness:
//! - JIRA URL has an http(s) scheme
//! - Page size, timeouts and interval are non-zero
//! - Scheduled project keys are well-formed and unique
//! - The token environment variable is set (warning only)

use super::mirror_config::MirrorConfig;
use crate::mirror::is_valid_project_key;
use crate::MirrorError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a TaskMirror configuration, collecting every problem
pub fn validate_config(config: &MirrorConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let jira = &config.jira;
    if !jira.url.starts_with("http://") && !jira.url.starts_with("https://") {
        errors.push(ValidationError::new(
            "jira.url",
            format!("Invalid JIRA URL: {}", jira.url),
        ));
    }

    if jira.page_size == 0 {
        errors.push(ValidationError::new(
            "jira.page_size",
            "Page size must be greater than 0",
        ));
    }

    if jira.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "jira.request_timeout_secs",
            "Request timeout must be greater than 0",
        ));
    }

    if jira.api_version.is_empty() || !jira.api_version.chars().all(|c| c.is_ascii_digit()) {
        errors.push(ValidationError::new(
            "jira.api_version",
            format!("Invalid REST API version '{}'", jira.api_version),
        ));
    }

    if jira.token().is_none() {
        tracing::warn!(
            env_var = %jira.token_env,
            "JIRA token environment variable not set (this may be intentional if set at runtime)"
        );
    }

    if config.sync.interval_secs == 0 {
        errors.push(ValidationError::new(
            "sync.interval_secs",
            "Interval must be greater than 0",
        ));
    }

    if config.sync.fetch_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "sync.fetch_timeout_secs",
            "Fetch timeout must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for key in &config.sync.projects {
        if !is_valid_project_key(key) {
            errors.push(ValidationError::new(
                "sync.projects",
                format!("Invalid project key '{}'", key),
            ));
        }
        if !seen.insert(key.as_str()) {
            errors.push(ValidationError::new(
                "sync.projects",
                format!("Duplicate project key: {}", key),
            ));
        }
    }

    if config.server.address.is_empty() {
        errors.push(ValidationError::new(
            "server.address",
            "Listen address cannot be empty",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &MirrorConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        MirrorError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
