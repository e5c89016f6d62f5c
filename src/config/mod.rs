//! Configuration system
//!
//! Loads ~/.config/taskmirror/config.yaml (or the file named by `CONFIG_PATH`)
//! with sections for:
//! - JIRA connection and paging
//! - Mirror database location
//! - HTTP trigger server
//! - Scheduled sync projects and deadlines

mod mirror_config;
pub mod validation;

pub use mirror_config::{DatabaseConfig, JiraConfig, MirrorConfig, ServerConfig, SyncConfig};
pub use validation::{validate_config, validate_config_result, ValidationError};
