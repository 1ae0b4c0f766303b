//! Per-project mutual exclusion inside one process.
//!
//! Every allocation and reassignment entry point holds its project's lock
//! for the whole pass, so two passes over the same project never interleave.
//! Cross-process exclusion comes from the job queue, which never runs two
//! jobs of the same project at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use quorum_core::types::DbId;
use tokio::sync::OwnedMutexGuard;

/// Registry of one async mutex per project.
#[derive(Default)]
pub struct ProjectLocks {
    inner: Mutex<HashMap<DbId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of `project_id`.
    pub async fn acquire(&self, project_id: DbId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(map.entry(project_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(&self, project_id: DbId) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(map.entry(project_id).or_default())
        };
        lock.try_lock_owned().ok()
    }
}
