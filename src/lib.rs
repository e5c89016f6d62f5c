//! TaskMirror - keeps a local table of JIRA issues in step with the tracker
//!
//! Each sync fetches the authoritative issue list of a project, upserts every
//! issue into a SQLite mirror and soft-deletes rows that disappeared
//! remotely, all in one transaction.
//!
//! # Architecture
//!
//! - **integrations**: JIRA REST client and the [`IssueSource`](integrations::IssueSource) seam
//! - **mirror**: SQLite mirror table and sync-run ledger
//! - **reconcile**: The reconciler and per-project locks
//! - **daemon**: Scheduled sync loop
//! - **server**: HTTP trigger and read API (axum)
//! - **config**: YAML configuration

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod mirror;

// Components
pub mod daemon;
pub mod integrations;
pub mod metrics;
pub mod reconcile;
pub mod server;

// Re-exports
pub use error::{MirrorError, Result};
