//! Issue source abstraction
//!
//! The reconciler only needs "give me every issue of project X"; the JIRA
//! client implements it, and tests substitute scripted sources.

use crate::mirror::CandidateIssue;
use crate::{MirrorError, Result};
use async_trait::async_trait;

/// An issue that was returned remotely but could not be mapped to a row
#[derive(Debug)]
pub struct RejectedIssue {
    pub external_id: String,
    pub error: MirrorError,
}

/// Result of fetching one project
#[derive(Debug, Default)]
pub struct FetchedIssues {
    /// Mapped rows in issue-key order
    pub candidates: Vec<CandidateIssue>,

    /// Issues present remotely whose fields failed to map (e.g. bad timestamp)
    pub rejected: Vec<RejectedIssue>,
}

impl FetchedIssues {
    pub fn new(candidates: Vec<CandidateIssue>) -> Self {
        Self {
            candidates,
            rejected: Vec::new(),
        }
    }

    /// Total issues observed remotely
    pub fn len(&self) -> usize {
        self.candidates.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Authoritative remote issue list for a project
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Fetch every issue currently in `project_key`.
    ///
    /// Transport, auth and status failures are errors; per-issue mapping
    /// failures are reported in [`FetchedIssues::rejected`].
    async fn fetch_project_issues(&self, project_key: &str) -> Result<FetchedIssues>;
}
