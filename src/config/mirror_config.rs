//! TaskMirror configuration file handling
//!
//! Loads and manages the ~/.config/taskmirror/config.yaml file.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// JIRA connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    /// JIRA instance URL (e.g. https://example.atlassian.net)
    pub url: String,

    /// Username for basic auth. When absent the token is sent as a bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// REST API version segment (`/rest/api/{version}`)
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Issues requested per search page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_token_env() -> String {
    "JIRA_TOKEN".to_string()
}

fn default_api_version() -> String {
    "2".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

impl JiraConfig {
    /// Create a JIRA config for the given instance URL with defaults
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            token_env: default_token_env(),
            api_version: default_api_version(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// Set the basic-auth username
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Read the API token from the configured environment variable
    pub fn token(&self) -> Option<String> {
        std::env::var(self.token_env.trim_start_matches('$')).ok()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self::new("https://jira.example.com")
    }
}

/// Mirror database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Enable WAL mode so readers don't block the sync writer
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

fn default_db_path() -> PathBuf {
    config_dir().join("mirror.db")
}

fn default_wal_mode() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

/// HTTP trigger server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_address")]
    pub address: String,
}

fn default_address() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

/// Scheduled sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Project keys synced on every daemon tick
    #[serde(default)]
    pub projects: Vec<String>,

    /// Seconds between daemon ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Deadline for the whole fetch phase of one sync run
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    120
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            interval_secs: default_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

/// TaskMirror configuration
///
/// Represents the complete ~/.config/taskmirror/config.yaml file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Remote tracker connection
    #[serde(default)]
    pub jira: JiraConfig,

    /// Local mirror database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP trigger server
    #[serde(default)]
    pub server: ServerConfig,

    /// Scheduled sync
    #[serde(default)]
    pub sync: SyncConfig,
}

fn config_dir() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("taskmirror");
    path
}

impl MirrorConfig {
    /// Load configuration from the default path (~/.config/taskmirror/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::MirrorError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading TaskMirror configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            jira_url = %config.jira.url,
            projects = config.sync.projects.len(),
            db = %config.database.path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving TaskMirror configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/taskmirror/config.yaml)
    pub fn default_path() -> PathBuf {
        config_dir().join("config.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.jira.api_version, "2");
        assert_eq!(config.jira.page_size, 100);
        assert_eq!(config.jira.token_env, "JIRA_TOKEN");
        assert!(config.database.wal_mode);
        assert_eq!(config.server.address, "127.0.0.1:8000");
        assert_eq!(config.sync.interval(), Duration::from_secs(300));
        assert!(config.sync.projects.is_empty());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
jira:
  url: https://acme.atlassian.net
  username: bot@acme.io
sync:
  projects: [TKP, OPS]
"#;
        let config: MirrorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.jira.url, "https://acme.atlassian.net");
        assert_eq!(config.jira.username.as_deref(), Some("bot@acme.io"));
        assert_eq!(config.jira.request_timeout_secs, 30);
        assert_eq!(config.sync.projects, vec!["TKP", "OPS"]);
        assert_eq!(config.sync.fetch_timeout_secs, 120);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        let mut config = MirrorConfig::default();
        config.jira = JiraConfig::new("https://jira.internal").with_username("sync");
        config.sync.projects.push("TKP".to_string());
        config.save(&path).unwrap();

        let loaded = MirrorConfig::load(&path).unwrap();
        assert_eq!(loaded.jira.url, "https://jira.internal");
        assert_eq!(loaded.sync.projects, vec!["TKP"]);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = MirrorConfig::load(temp_dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, crate::MirrorError::Config(msg) if msg.contains("not found")));
    }
}
