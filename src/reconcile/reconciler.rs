//! Project reconciliation
//!
//! One `sync_project` call fetches the authoritative issue list for a
//! project, upserts every issue into the mirror and soft-deletes rows that
//! were not seen, all inside a single store transaction.

use super::locks::ProjectLocks;
use crate::integrations::{FetchedIssues, IssueSource};
use crate::metrics;
use crate::mirror::{
    now_utc, validate_project_key, MirrorStore, MirrorTx, RunStatus, SyncCounts, SyncRun,
};
use crate::{MirrorError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default deadline for the fetch phase
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Stage of a single reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Fetching,
    Upserting,
    Deactivating,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Fetching => "fetching",
            SyncPhase::Upserting => "upserting",
            SyncPhase::Deactivating => "deactivating",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful project sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub project_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: SyncCounts,
}

/// Keeps the mirror table in step with an [`IssueSource`]
pub struct Reconciler {
    source: Arc<dyn IssueSource>,
    store: Arc<Mutex<MirrorStore>>,
    locks: ProjectLocks,
    /// Deadline applied to the whole fetch phase
    fetch_timeout: Duration,
}

impl Reconciler {
    pub fn new(source: Arc<dyn IssueSource>, store: Arc<Mutex<MirrorStore>>) -> Self {
        Self {
            source,
            store,
            locks: ProjectLocks::new(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Shared handle to the mirror store, for readers
    pub fn store(&self) -> &Arc<Mutex<MirrorStore>> {
        &self.store
    }

    /// Bring the mirror rows of `project_key` in line with the remote.
    ///
    /// Either every upsert and deactivation of the run is committed or none
    /// is. Runs for the same project are serialized.
    pub async fn sync_project(&self, project_key: &str) -> Result<SyncReport> {
        validate_project_key(project_key)?;

        let _guard = self.locks.acquire(project_key).await;
        let started_at = now_utc();
        let timer = Instant::now();

        tracing::info!(project = %project_key, started_at = %started_at, "Starting sync");
        let result = self.run(project_key, started_at).await;
        metrics::record_sync_duration(project_key, timer.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                metrics::record_sync_run(project_key, RunStatus::Succeeded.as_str());
                metrics::record_deactivated(project_key, report.counts.deactivated);
                tracing::info!(
                    project = %project_key,
                    fetched = report.counts.fetched,
                    inserted = report.counts.inserted,
                    updated = report.counts.updated,
                    touched = report.counts.touched,
                    skipped = report.counts.skipped,
                    deactivated = report.counts.deactivated,
                    "Sync complete"
                );
            }
            Err(e) => {
                metrics::record_sync_run(project_key, RunStatus::Failed.as_str());
                metrics::record_sync_error(e.kind(), project_key);
                tracing::debug!(project = %project_key, phase = %SyncPhase::Failed, "Phase change");
                tracing::error!(project = %project_key, error = %e, "Sync failed");
                self.record_failure(project_key, started_at, e).await;
            }
        }

        result
    }

    /// Sync several projects concurrently, returning one result per key in input order
    pub async fn sync_projects(&self, project_keys: &[String]) -> Vec<(String, Result<SyncReport>)> {
        let runs = project_keys.iter().map(|key| async move {
            let result = self.sync_project(key).await;
            (key.clone(), result)
        });
        join_all(runs).await
    }

    async fn run(&self, project_key: &str, started_at: DateTime<Utc>) -> Result<SyncReport> {
        tracing::debug!(project = %project_key, phase = %SyncPhase::Fetching, "Phase change");
        let fetched = self.fetch(project_key).await?;

        let mut store = self.store.lock().await;
        apply(&mut store, project_key, started_at, fetched)
    }

    /// Fetch phase. No store access happens here.
    async fn fetch(&self, project_key: &str) -> Result<FetchedIssues> {
        let deadline = self.fetch_timeout;
        let fetch_failed = |source: MirrorError| MirrorError::FetchFailed {
            project_key: project_key.to_string(),
            source: Box::new(source),
        };

        match tokio::time::timeout(deadline, self.source.fetch_project_issues(project_key)).await {
            Ok(Ok(fetched)) => Ok(fetched),
            Ok(Err(e)) => Err(fetch_failed(e)),
            Err(_) => Err(fetch_failed(MirrorError::RemoteUnreachable(format!(
                "fetch did not finish within {}s",
                deadline.as_secs_f64()
            )))),
        }
    }

    /// Best-effort failure entry in the run ledger, written after rollback
    async fn record_failure(&self, project_key: &str, started_at: DateTime<Utc>, error: &MirrorError) {
        let run = SyncRun {
            project_key: project_key.to_string(),
            started_at,
            finished_at: now_utc(),
            status: RunStatus::Failed,
            counts: SyncCounts::default(),
            error: Some(error.to_string()),
        };

        let store = self.store.lock().await;
        if let Err(e) = store.record_run(&run) {
            tracing::warn!(project = %project_key, error = %e, "Failed to record failed sync run");
        }
    }
}

/// Transactional phase: upsert, deactivate, record, commit
fn apply(
    store: &mut MirrorStore,
    project_key: &str,
    started_at: DateTime<Utc>,
    fetched: FetchedIssues,
) -> Result<SyncReport> {
    let aborted = |source: MirrorError| MirrorError::TransactionAborted {
        project_key: project_key.to_string(),
        source: Box::new(source),
    };

    let tx = store.transaction().map_err(aborted)?;
    let report = match write_batch(&tx, project_key, started_at, fetched) {
        Ok(report) => report,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::warn!(project = %project_key, error = %rollback_err, "Rollback failed");
            }
            return Err(aborted(e));
        }
    };

    tx.commit().map_err(aborted)?;
    tracing::debug!(project = %project_key, phase = %SyncPhase::Done, "Phase change");
    Ok(report)
}

fn write_batch(
    tx: &MirrorTx<'_>,
    project_key: &str,
    started_at: DateTime<Utc>,
    fetched: FetchedIssues,
) -> Result<SyncReport> {
    let mut counts = SyncCounts {
        fetched: fetched.len(),
        ..SyncCounts::default()
    };

    tracing::debug!(project = %project_key, phase = %SyncPhase::Upserting, "Phase change");
    for candidate in fetched.candidates {
        let candidate = candidate.with_last_seen_at(started_at);
        if tx.find_by_external_id(&candidate.external_id)?.is_some() {
            tx.update(&candidate)?;
            counts.updated += 1;
        } else {
            tx.insert(&candidate)?;
            counts.inserted += 1;
        }
    }

    // Still present remotely, so never soft-delete them; content stays as last synced
    for rejected in fetched.rejected {
        if tx.touch(project_key, &rejected.external_id, &started_at)? {
            counts.touched += 1;
            tracing::warn!(
                project = %project_key,
                issue = %rejected.external_id,
                error = %rejected.error,
                "Kept existing row for unparseable issue"
            );
        } else {
            counts.skipped += 1;
            tracing::warn!(
                project = %project_key,
                issue = %rejected.external_id,
                error = %rejected.error,
                "Skipped unparseable issue"
            );
        }
    }

    tracing::debug!(project = %project_key, phase = %SyncPhase::Deactivating, "Phase change");
    counts.deactivated = tx.deactivate_stale_before(project_key, &started_at)?;

    let finished_at = now_utc();
    tx.record_run(&SyncRun {
        project_key: project_key.to_string(),
        started_at,
        finished_at,
        status: RunStatus::Succeeded,
        counts,
        error: None,
    })?;

    Ok(SyncReport {
        project_key: project_key.to_string(),
        started_at,
        finished_at,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::RejectedIssue;
    use crate::mirror::{CandidateIssue, IssueFilter};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Returns whatever was last scripted for a project
    #[derive(Default)]
    struct ScriptedSource {
        responses: StdMutex<HashMap<String, Vec<(&'static str, &'static str)>>>,
        fail_with_auth: StdMutex<bool>,
        rejected: StdMutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn set(&self, project: &str, issues: Vec<(&'static str, &'static str)>) {
            self.responses
                .lock()
                .unwrap()
                .insert(project.to_string(), issues);
        }
    }

    #[async_trait]
    impl IssueSource for ScriptedSource {
        async fn fetch_project_issues(&self, project_key: &str) -> Result<FetchedIssues> {
            if *self.fail_with_auth.lock().unwrap() {
                return Err(MirrorError::RemoteAuthFailed("HTTP 401".to_string()));
            }
            let issues = self
                .responses
                .lock()
                .unwrap()
                .get(project_key)
                .cloned()
                .unwrap_or_default();
            let candidates = issues
                .into_iter()
                .map(|(key, status)| {
                    CandidateIssue::new(key, project_key, format!("Summary of {}", key), status)
                })
                .collect();
            let rejected = self
                .rejected
                .lock()
                .unwrap()
                .iter()
                .map(|key| RejectedIssue {
                    external_id: key.clone(),
                    error: MirrorError::TimeParseFailed {
                        value: "garbage".to_string(),
                    },
                })
                .collect();
            Ok(FetchedIssues {
                candidates,
                rejected,
            })
        }
    }

    struct HangingSource;

    #[async_trait]
    impl IssueSource for HangingSource {
        async fn fetch_project_issues(&self, _project_key: &str) -> Result<FetchedIssues> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(FetchedIssues::default())
        }
    }

    fn reconciler(source: Arc<dyn IssueSource>) -> Reconciler {
        let store = MirrorStore::open_in_memory().unwrap();
        Reconciler::new(source, Arc::new(Mutex::new(store)))
    }

    #[tokio::test]
    async fn test_first_sync_inserts_rows() {
        let source = Arc::new(ScriptedSource::default());
        source.set("TKP", vec![("TKP-1", "To Do"), ("TKP-2", "Done")]);
        let reconciler = reconciler(source);

        let report = reconciler.sync_project("TKP").await.unwrap();
        assert_eq!(report.counts.fetched, 2);
        assert_eq!(report.counts.inserted, 2);
        assert_eq!(report.counts.updated, 0);
        assert_eq!(report.counts.deactivated, 0);

        let store = reconciler.store().lock().await;
        let rows = store.list_issues("TKP", &IssueFilter::active()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.last_seen_at == report.started_at));
    }

    #[tokio::test]
    async fn test_missing_issue_is_deactivated() {
        let source = Arc::new(ScriptedSource::default());
        source.set("TKP", vec![("TKP-1", "To Do"), ("TKP-2", "To Do")]);
        let reconciler = reconciler(source.clone());
        reconciler.sync_project("TKP").await.unwrap();

        source.set("TKP", vec![("TKP-1", "In Progress")]);
        let report = reconciler.sync_project("TKP").await.unwrap();
        assert_eq!(report.counts.updated, 1);
        assert_eq!(report.counts.deactivated, 1);

        let store = reconciler.store().lock().await;
        let gone = store.find_by_external_id("TKP-2").unwrap().unwrap();
        assert!(!gone.is_active);
        let kept = store.find_by_external_id("TKP-1").unwrap().unwrap();
        assert!(kept.is_active);
        assert_eq!(kept.status, "In Progress");
    }

    #[tokio::test]
    async fn test_reappearing_issue_is_reactivated() {
        let source = Arc::new(ScriptedSource::default());
        source.set("TKP", vec![("TKP-1", "To Do")]);
        let reconciler = reconciler(source.clone());
        reconciler.sync_project("TKP").await.unwrap();

        source.set("TKP", vec![]);
        reconciler.sync_project("TKP").await.unwrap();

        source.set("TKP", vec![("TKP-1", "To Do")]);
        let report = reconciler.sync_project("TKP").await.unwrap();
        assert_eq!(report.counts.updated, 1);

        let store = reconciler.store().lock().await;
        assert!(store.find_by_external_id("TKP-1").unwrap().unwrap().is_active);
        assert_eq!(store.stats().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_store_untouched() {
        let source = Arc::new(ScriptedSource::default());
        source.set("TKP", vec![("TKP-1", "To Do")]);
        let reconciler = reconciler(source.clone());
        reconciler.sync_project("TKP").await.unwrap();

        *source.fail_with_auth.lock().unwrap() = true;
        let err = reconciler.sync_project("TKP").await.unwrap_err();
        assert!(matches!(err, MirrorError::FetchFailed { .. }));
        assert_eq!(err.kind(), "remote_auth_failed");

        let store = reconciler.store().lock().await;
        assert!(store.find_by_external_id("TKP-1").unwrap().unwrap().is_active);

        let runs = store.recent_runs("TKP", 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().any(|r| r.status == RunStatus::Failed));
        assert_eq!(
            store.last_successful_sync("TKP").unwrap().unwrap().counts.inserted,
            1
        );
    }

    #[tokio::test]
    async fn test_fetch_deadline_is_unreachable() {
        let reconciler =
            reconciler(Arc::new(HangingSource)).with_fetch_timeout(Duration::from_millis(50));

        let err = reconciler.sync_project("TKP").await.unwrap_err();
        assert!(matches!(err.root(), MirrorError::RemoteUnreachable(_)));
    }

    #[tokio::test]
    async fn test_rejected_issue_keeps_existing_row_alive() {
        let source = Arc::new(ScriptedSource::default());
        source.set("TKP", vec![("TKP-1", "To Do"), ("TKP-2", "To Do")]);
        let reconciler = reconciler(source.clone());
        reconciler.sync_project("TKP").await.unwrap();

        source.set("TKP", vec![("TKP-1", "Done")]);
        *source.rejected.lock().unwrap() = vec!["TKP-2".to_string(), "TKP-9".to_string()];
        let report = reconciler.sync_project("TKP").await.unwrap();
        assert_eq!(report.counts.fetched, 3);
        assert_eq!(report.counts.touched, 1);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(report.counts.deactivated, 0);

        let store = reconciler.store().lock().await;
        let kept = store.find_by_external_id("TKP-2").unwrap().unwrap();
        assert!(kept.is_active);
        assert_eq!(kept.status, "To Do");
        assert!(store.find_by_external_id("TKP-9").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_project_key_rejected() {
        let reconciler = reconciler(Arc::new(ScriptedSource::default()));
        let err = reconciler.sync_project("TKP\" OR 1=1").await.unwrap_err();
        assert!(matches!(err, MirrorError::InvalidProjectKey(_)));
    }

    #[tokio::test]
    async fn test_other_projects_untouched() {
        let source = Arc::new(ScriptedSource::default());
        source.set("TKP", vec![("TKP-1", "To Do")]);
        source.set("OPS", vec![("OPS-1", "To Do")]);
        let reconciler = reconciler(source.clone());
        reconciler.sync_project("TKP").await.unwrap();
        reconciler.sync_project("OPS").await.unwrap();

        source.set("TKP", vec![]);
        reconciler.sync_project("TKP").await.unwrap();

        let store = reconciler.store().lock().await;
        assert!(!store.find_by_external_id("TKP-1").unwrap().unwrap().is_active);
        assert!(store.find_by_external_id("OPS-1").unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_sync_projects_returns_in_order() {
        let source = Arc::new(ScriptedSource::default());
        source.set("TKP", vec![("TKP-1", "To Do")]);
        let reconciler = reconciler(source);

        let results = reconciler
            .sync_projects(&["TKP".to_string(), "bad key".to_string()])
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "TKP");
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SyncPhase::Fetching.to_string(), "fetching");
        assert_eq!(SyncPhase::Deactivating.to_string(), "deactivating");
    }
}
