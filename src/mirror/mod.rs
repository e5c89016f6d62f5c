//! Mirror store
//!
//! Local SQLite reflection of remote tracker state. Rows are keyed by the
//! remote issue key (`external_id`, unique) and are never physically deleted:
//! an issue that disappears remotely is marked `is_active = false`.
//!
//! All writes to `mirror_issues` go through [`MirrorTx`], the transaction the
//! reconciler opens for its upsert + deactivate phase.

mod issue;
mod sqlite;

pub use issue::{
    is_valid_project_key, now_utc, validate_project_key, CandidateIssue, IssueFilter,
    MirrorIssue, UNASSIGNED,
};
pub use sqlite::{MirrorStats, MirrorStore, MirrorTx, RunStatus, SyncCounts, SyncRun};
