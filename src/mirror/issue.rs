//! Mirror row types
//!
//! `CandidateIssue` is what the fetcher produces from a remote issue;
//! `MirrorIssue` is the persisted row including store-owned bookkeeping.

use crate::{MirrorError, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Assignee value used when the remote issue has nobody assigned
pub const UNASSIGNED: &str = "Unassigned";

/// Check that a project key is non-empty and safe to quote inside JQL.
///
/// Accepts `[A-Za-z][A-Za-z0-9_]*`, which covers every key format JIRA allows.
pub fn is_valid_project_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// `is_valid_project_key` as a `Result`
pub fn validate_project_key(key: &str) -> Result<()> {
    if is_valid_project_key(key) {
        Ok(())
    } else {
        Err(MirrorError::InvalidProjectKey(key.to_string()))
    }
}

/// Current time at the precision the store persists (microseconds).
///
/// Timestamps that are compared against stored values must come from here,
/// otherwise a round-trip through the database can shift them.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// An issue observed remotely, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateIssue {
    pub external_id: String,
    pub project_key: String,
    pub summary: String,
    pub status: String,
    pub assignee: String,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
}

impl CandidateIssue {
    /// Create a candidate seen now, unassigned, with no remote timestamp
    pub fn new(
        external_id: impl Into<String>,
        project_key: impl Into<String>,
        summary: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            project_key: project_key.into(),
            summary: summary.into(),
            status: status.into(),
            assignee: UNASSIGNED.to_string(),
            remote_updated_at: None,
            last_seen_at: now_utc(),
        }
    }

    /// Set the assignee; `None` or a blank name maps to [`UNASSIGNED`]
    pub fn with_assignee(mut self, assignee: Option<impl Into<String>>) -> Self {
        self.assignee = assignee
            .map(Into::into)
            .filter(|name: &String| !name.trim().is_empty())
            .unwrap_or_else(|| UNASSIGNED.to_string());
        self
    }

    pub fn with_remote_updated_at(mut self, updated: Option<DateTime<Utc>>) -> Self {
        self.remote_updated_at = updated;
        self
    }

    pub fn with_last_seen_at(mut self, seen: DateTime<Utc>) -> Self {
        self.last_seen_at = seen;
        self
    }
}

/// A persisted mirror row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorIssue {
    pub id: i64,
    pub external_id: String,
    pub project_key: String,
    pub summary: String,
    pub status: String,
    pub assignee: String,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub internal_updated_at: DateTime<Utc>,
}

/// Filter for reader queries over a project's rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueFilter {
    /// Exact status name (e.g. "In Progress")
    #[serde(default)]
    pub status: Option<String>,

    /// Include soft-deleted rows
    #[serde(default)]
    pub include_inactive: bool,
}

impl IssueFilter {
    /// Active rows only, any status
    pub fn active() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }
}

/// Fixed-width UTC text so that SQL string comparison orders by instant
pub(crate) fn to_db_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
