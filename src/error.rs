//! Error types for TaskMirror
//!
//! Defines a single error enum covering the remote tracker, the mirror store
//! and the reconciliation transaction. Uses thiserror for ergonomic error handling.

use thiserror::Error;

/// Result type alias for TaskMirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Comprehensive error type for TaskMirror operations
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Network/transport failure reaching the tracker (includes fetch deadline expiry)
    #[error("Remote tracker unreachable: {0}")]
    RemoteUnreachable(String),

    /// Credentials rejected by the tracker
    #[error("Remote authentication failed: {0}")]
    RemoteAuthFailed(String),

    /// Non-success status from a well-formed request
    #[error("Remote request failed: HTTP {status}: {body}")]
    RemoteRequestFailed { status: u16, body: String },

    /// An issue timestamp matched none of the known encodings
    #[error("Failed to parse remote timestamp '{value}'")]
    TimeParseFailed { value: String },

    /// Store-level uniqueness conflict on external_id
    #[error("Duplicate external id: {0}")]
    DuplicateKeyViolation(String),

    /// Any other store write/read error
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// Fetch-phase error, wrapped with the project it was fetching
    #[error("Fetch failed for project {project_key}: {source}")]
    FetchFailed {
        project_key: String,
        #[source]
        source: Box<MirrorError>,
    },

    /// First error raised inside the reconciliation transaction (rolled back)
    #[error("Sync transaction for project {project_key} aborted: {source}")]
    TransactionAborted {
        project_key: String,
        #[source]
        source: Box<MirrorError>,
    },

    /// Project key is empty or not safe to interpolate into JQL
    #[error("Invalid project key: '{0}'")]
    InvalidProjectKey(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Unwrap the `FetchFailed` / `TransactionAborted` envelopes down to the
    /// error that actually happened.
    pub fn root(&self) -> &MirrorError {
        match self {
            MirrorError::FetchFailed { source, .. }
            | MirrorError::TransactionAborted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short machine-readable kind, used for metrics labels and HTTP bodies
    pub fn kind(&self) -> &'static str {
        match self.root() {
            MirrorError::RemoteUnreachable(_) => "remote_unreachable",
            MirrorError::RemoteAuthFailed(_) => "remote_auth_failed",
            MirrorError::RemoteRequestFailed { .. } => "remote_request_failed",
            MirrorError::TimeParseFailed { .. } => "time_parse_failed",
            MirrorError::DuplicateKeyViolation(_) => "duplicate_key",
            MirrorError::PersistenceFailed(_) => "persistence_failed",
            MirrorError::InvalidProjectKey(_) => "invalid_project_key",
            MirrorError::Config(_) => "config",
            MirrorError::Io(_) => "io",
            MirrorError::Json(_) => "json",
            MirrorError::Yaml(_) => "yaml",
            MirrorError::FetchFailed { .. } => "fetch_failed",
            MirrorError::TransactionAborted { .. } => "transaction_aborted",
            MirrorError::Other(_) => "other",
        }
    }

    /// True when the error happened talking to the remote tracker
    pub fn is_remote(&self) -> bool {
        matches!(
            self.root(),
            MirrorError::RemoteUnreachable(_)
                | MirrorError::RemoteAuthFailed(_)
                | MirrorError::RemoteRequestFailed { .. }
        )
    }
}

impl From<rusqlite::Error> for MirrorError {
    fn from(e: rusqlite::Error) -> Self {
        MirrorError::PersistenceFailed(e.to_string())
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(e: reqwest::Error) -> Self {
        // Decode failures come back from a reachable server
        if e.is_decode() {
            MirrorError::RemoteRequestFailed {
                status: e.status().map(|s| s.as_u16()).unwrap_or(200),
                body: format!("unreadable response body: {}", e),
            }
        } else {
            MirrorError::RemoteUnreachable(e.to_string())
        }
    }
}
