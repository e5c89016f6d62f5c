//! Reconciliation of remote issues into the mirror
//!
//! [`Reconciler::sync_project`] is the only write path into the mirror
//! table. [`ProjectLocks`] serializes runs per project key.

mod locks;
mod reconciler;

pub use locks::{ProjectGuard, ProjectLocks};
pub use reconciler::{Reconciler, SyncPhase, SyncReport, DEFAULT_FETCH_TIMEOUT};
