//! SQLite mirror store

use super::issue::{from_db_time, now_utc, to_db_time, CandidateIssue, IssueFilter, MirrorIssue};
use crate::config::DatabaseConfig;
use crate::{MirrorError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ISSUE_COLUMNS: &str = "id, external_id, project_key, summary, status, assignee, \
     remote_updated_at, is_active, last_seen_at, created_at, internal_updated_at";

/// Per-run counters, shared by the reconciler report and the run ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Issues returned by the fetcher (candidates + rejected)
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Existing rows kept alive for issues whose fields could not be parsed
    pub touched: usize,
    /// Unparseable issues with no existing row
    pub skipped: usize,
    pub deactivated: usize,
}

/// Outcome recorded for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "succeeded" => RunStatus::Succeeded,
            _ => RunStatus::Failed,
        }
    }
}

/// One row of the `sync_runs` ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub project_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counts: SyncCounts,
    pub error: Option<String>,
}

/// Row counts across the mirror
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

/// SQLite-backed mirror of remote issues
pub struct MirrorStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl MirrorStore {
    /// Open or create the mirror database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %config.path.display(), "Opening mirror database");

        let conn = Connection::open(&config.path)?;

        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self {
            conn,
            path: Some(config.path.clone()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mirror_issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                project_key TEXT NOT NULL,
                summary TEXT NOT NULL,
                status TEXT NOT NULL,
                assignee TEXT NOT NULL,
                remote_updated_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_seen_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                internal_updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_key TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                status TEXT NOT NULL,
                fetched INTEGER NOT NULL,
                inserted INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                touched INTEGER NOT NULL,
                skipped INTEGER NOT NULL,
                deactivated INTEGER NOT NULL,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_mirror_issues_project_active
                ON mirror_issues(project_key, is_active);
            CREATE INDEX IF NOT EXISTS idx_mirror_issues_status ON mirror_issues(status);
            CREATE INDEX IF NOT EXISTS idx_sync_runs_project
                ON sync_runs(project_key, status, started_at);
            "#,
        )?;

        Ok(())
    }

    /// Begin a write transaction.
    ///
    /// Takes the SQLite write lock immediately so that the find-then-insert
    /// sequence cannot interleave with another writer. Dropping the returned
    /// transaction without calling [`MirrorTx::commit`] rolls it back.
    pub fn transaction(&mut self) -> Result<MirrorTx<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(MirrorTx { tx })
    }

    /// Look up a row outside any write transaction (readers)
    pub fn find_by_external_id(&self, external_id: &str) -> Result<Option<MirrorIssue>> {
        find_by_external_id(&self.conn, external_id)
    }

    /// Rows for a project ordered by external id
    pub fn list_issues(&self, project_key: &str, filter: &IssueFilter) -> Result<Vec<MirrorIssue>> {
        let mut sql = format!(
            "SELECT {} FROM mirror_issues WHERE project_key = ?1",
            ISSUE_COLUMNS
        );
        if !filter.include_inactive {
            sql.push_str(" AND is_active = 1");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(" ORDER BY external_id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match filter.status {
            Some(ref status) => stmt.query_map(params![project_key, status], issue_from_row)?,
            None => stmt.query_map(params![project_key], issue_from_row)?,
        };

        let issues = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        tracing::debug!(project = %project_key, count = issues.len(), "Listed mirror rows");
        Ok(issues)
    }

    /// Every row in the mirror, ordered by external id
    pub fn all_issues(&self) -> Result<Vec<MirrorIssue>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM mirror_issues ORDER BY external_id",
            ISSUE_COLUMNS
        ))?;
        let rows = stmt.query_map([], issue_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recent successful run for a project; its `started_at` is the
    /// staleness cutoff every active row satisfies.
    pub fn last_successful_sync(&self, project_key: &str) -> Result<Option<SyncRun>> {
        Ok(self
            .conn
            .query_row(
                "SELECT project_key, started_at, finished_at, status, fetched, inserted, updated,
                        touched, skipped, deactivated, error
                 FROM sync_runs
                 WHERE project_key = ?1 AND status = 'succeeded'
                 ORDER BY started_at DESC, id DESC
                 LIMIT 1",
                params![project_key],
                run_from_row,
            )
            .optional()?)
    }

    /// Latest runs for a project, newest first
    pub fn recent_runs(&self, project_key: &str, limit: usize) -> Result<Vec<SyncRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT project_key, started_at, finished_at, status, fetched, inserted, updated,
                    touched, skipped, deactivated, error
             FROM sync_runs
             WHERE project_key = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project_key, limit as i64], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record a run outside the reconciliation transaction (failed runs)
    pub fn record_run(&self, run: &SyncRun) -> Result<()> {
        insert_run(&self.conn, run)
    }

    /// Get row statistics
    pub fn stats(&self) -> Result<MirrorStats> {
        let (total, active): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM mirror_issues",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(MirrorStats {
            total: total as usize,
            active: active as usize,
            inactive: (total - active) as usize,
        })
    }

    /// Get the database path (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// An open reconciliation transaction
pub struct MirrorTx<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl MirrorTx<'_> {
    /// Look up a row inside this transaction
    pub fn find_by_external_id(&self, external_id: &str) -> Result<Option<MirrorIssue>> {
        find_by_external_id(&self.tx, external_id)
    }

    /// Insert a new active row.
    ///
    /// Fails with [`MirrorError::DuplicateKeyViolation`] if the external id
    /// already exists.
    pub fn insert(&self, candidate: &CandidateIssue) -> Result<i64> {
        let now = to_db_time(&now_utc());

        self.tx
            .execute(
                r#"
                INSERT INTO mirror_issues (
                    external_id, project_key, summary, status, assignee,
                    remote_updated_at, is_active, last_seen_at, created_at, internal_updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)
                "#,
                params![
                    &candidate.external_id,
                    &candidate.project_key,
                    &candidate.summary,
                    &candidate.status,
                    &candidate.assignee,
                    candidate.remote_updated_at.as_ref().map(to_db_time),
                    to_db_time(&candidate.last_seen_at),
                    now,
                ],
            )
            .map_err(|e| insert_error(e, &candidate.external_id))?;

        Ok(self.tx.last_insert_rowid())
    }

    /// Overwrite the mutable fields of the row matching `candidate.external_id`
    /// and mark it active. `external_id`, `project_key` and `created_at` are
    /// never touched.
    pub fn update(&self, candidate: &CandidateIssue) -> Result<()> {
        let changed = self.tx.execute(
            r#"
            UPDATE mirror_issues
            SET summary = ?2, status = ?3, assignee = ?4, remote_updated_at = ?5,
                last_seen_at = ?6, is_active = 1, internal_updated_at = ?7
            WHERE external_id = ?1
            "#,
            params![
                &candidate.external_id,
                &candidate.summary,
                &candidate.status,
                &candidate.assignee,
                candidate.remote_updated_at.as_ref().map(to_db_time),
                to_db_time(&candidate.last_seen_at),
                to_db_time(&now_utc()),
            ],
        )?;

        if changed == 0 {
            return Err(MirrorError::PersistenceFailed(format!(
                "no mirror row for {}",
                candidate.external_id
            )));
        }
        Ok(())
    }

    /// Confirm a row is still present remotely without changing its content.
    /// Returns false if the project has no row for the id.
    pub fn touch(
        &self,
        project_key: &str,
        external_id: &str,
        seen_at: &DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.tx.execute(
            "UPDATE mirror_issues
             SET last_seen_at = ?3, is_active = 1, internal_updated_at = ?4
             WHERE project_key = ?1 AND external_id = ?2",
            params![
                project_key,
                external_id,
                to_db_time(seen_at),
                to_db_time(&now_utc())
            ],
        )?;
        Ok(changed > 0)
    }

    /// Soft-delete every active row of the project last seen before `cutoff`
    pub fn deactivate_stale_before(&self, project_key: &str, cutoff: &DateTime<Utc>) -> Result<usize> {
        let changed = self.tx.execute(
            "UPDATE mirror_issues
             SET is_active = 0, internal_updated_at = ?3
             WHERE project_key = ?1 AND is_active = 1 AND last_seen_at < ?2",
            params![project_key, to_db_time(cutoff), to_db_time(&now_utc())],
        )?;
        Ok(changed)
    }

    /// Append to the run ledger as part of this transaction
    pub fn record_run(&self, run: &SyncRun) -> Result<()> {
        insert_run(&self.tx, run)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn find_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<MirrorIssue>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM mirror_issues WHERE external_id = ?1",
                ISSUE_COLUMNS
            ),
            params![external_id],
            issue_from_row,
        )
        .optional()?)
}

fn insert_run(conn: &Connection, run: &SyncRun) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sync_runs (
            project_key, started_at, finished_at, status, fetched, inserted,
            updated, touched, skipped, deactivated, error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            &run.project_key,
            to_db_time(&run.started_at),
            to_db_time(&run.finished_at),
            run.status.as_str(),
            run.counts.fetched as i64,
            run.counts.inserted as i64,
            run.counts.updated as i64,
            run.counts.touched as i64,
            run.counts.skipped as i64,
            run.counts.deactivated as i64,
            run.error.as_deref(),
        ],
    )?;
    Ok(())
}

fn insert_error(e: rusqlite::Error, external_id: &str) -> MirrorError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY) =>
        {
            MirrorError::DuplicateKeyViolation(external_id.to_string())
        }
        other => other.into(),
    }
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    from_db_time(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        from_db_time(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<MirrorIssue> {
    Ok(MirrorIssue {
        id: row.get(0)?,
        external_id: row.get(1)?,
        project_key: row.get(2)?,
        summary: row.get(3)?,
        status: row.get(4)?,
        assignee: row.get(5)?,
        remote_updated_at: optional_time_column(row, 6)?,
        is_active: row.get(7)?,
        last_seen_at: time_column(row, 8)?,
        created_at: time_column(row, 9)?,
        internal_updated_at: time_column(row, 10)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    let count = |idx: usize| -> rusqlite::Result<usize> { Ok(row.get::<_, i64>(idx)? as usize) };

    Ok(SyncRun {
        project_key: row.get(0)?,
        started_at: time_column(row, 1)?,
        finished_at: time_column(row, 2)?,
        status: RunStatus::parse(&row.get::<_, String>(3)?),
        counts: SyncCounts {
            fetched: count(4)?,
            inserted: count(5)?,
            updated: count(6)?,
            touched: count(7)?,
            skipped: count(8)?,
            deactivated: count(9)?,
        },
        error: row.get(10)?,
    })
}
