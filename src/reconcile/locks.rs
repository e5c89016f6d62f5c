//! Per-project mutual exclusion
//!
//! At most one reconciliation may be in flight for a given project key;
//! runs for different keys proceed independently. A key's entry is dropped
//! from the registry once its last holder and waiter are gone.
//!
//! # Example
//!
//! ```no_run
//! use taskmirror::reconcile::ProjectLocks;
//!
//! # async fn demo() {
//! let locks = ProjectLocks::new();
//! let guard = locks.acquire("TKP").await;
//! assert!(locks.try_acquire("TKP").is_none());
//! assert!(locks.try_acquire("OPS").is_some());
//! drop(guard);
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

fn lock_map(map: &LockMap) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    // Entries are inserted and removed whole, so a poisoned map is still consistent
    map.lock().unwrap_or_else(|p| p.into_inner())
}

/// Registry of per-project async locks
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    locks: LockMap,
}

/// Held while a project is being reconciled
#[derive(Debug)]
pub struct ProjectGuard {
    project_key: String,
    locks: LockMap,
    guard: OwnedMutexGuard<()>,
}

impl ProjectGuard {
    pub fn project_key(&self) -> &str {
        &self.project_key
    }
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        // Clones are only taken under the map lock, so a count at the floor
        // (map entry, plus this guard for our own key) means nobody is waiting
        let own = OwnedMutexGuard::mutex(&self.guard);
        lock_map(&self.locks).retain(|_, lock| {
            let floor = if Arc::ptr_eq(lock, own) { 2 } else { 1 };
            Arc::strong_count(lock) > floor
        });
    }
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, project_key: &str) -> Arc<AsyncMutex<()>> {
        lock_map(&self.locks)
            .entry(project_key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait until the project is free, then hold it
    pub async fn acquire(&self, project_key: &str) -> ProjectGuard {
        let lock = self.lock_for(project_key);
        if lock.try_lock().is_err() {
            tracing::debug!(project = %project_key, "Waiting for in-flight sync to finish");
        }
        ProjectGuard {
            project_key: project_key.to_string(),
            locks: self.locks.clone(),
            guard: lock.lock_owned().await,
        }
    }

    /// Hold the project only if nobody else does
    pub fn try_acquire(&self, project_key: &str) -> Option<ProjectGuard> {
        self.lock_for(project_key)
            .try_lock_owned()
            .ok()
            .map(|guard| ProjectGuard {
                project_key: project_key.to_string(),
                locks: self.locks.clone(),
                guard,
            })
    }

    /// True while a sync for the project is in flight
    pub fn is_locked(&self, project_key: &str) -> bool {
        lock_map(&self.locks)
            .get(project_key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
