//! External Integrations
//!
//! The remote side of the mirror: the JIRA REST client, the timestamp
//! decoder for its date fields, and the [`IssueSource`] seam the reconciler
//! consumes.
//!
//! # Fetch Flow
//!
//! 1. **Auth**: `GET /myself` confirms the credentials
//! 2. **Search**: `project = "KEY" ORDER BY key ASC`, paged by `startAt`
//! 3. **Map**: each issue becomes a [`CandidateIssue`](crate::mirror::CandidateIssue)

pub mod jira;
mod source;
pub mod timestamp;

pub use jira::{
    issue_to_candidate, JiraClient, JiraFields, JiraIssue, JiraProject, JiraSearchResponse,
    JiraStatus, JiraUser,
};
pub use source::{FetchedIssues, IssueSource, RejectedIssue};
pub use timestamp::parse_jira_time;
