//! Periodic maintenance scheduler.
//!
//! On every tick: requeue jobs whose runner died mid-claim, then enqueue the
//! maintenance passes for every active project. The passes themselves run on
//! the job runners, so the per-project claim rule keeps them from racing
//! request-triggered allocation.

use std::sync::Arc;
use std::time::Duration;

use quorum_core::jobs::JobName;
use quorum_core::types::DbId;
use quorum_db::repositories::{JobRepo, ProjectRepo};
use quorum_db::DbPool;
use quorum_engine::{JobQueue, JobRequest};
use tokio_util::sync::CancellationToken;

pub struct MaintenanceScheduler {
    pool: DbPool,
    queue: Arc<dyn JobQueue>,
    interval: Duration,
    stale_claim_secs: u64,
    stale_assignment_hours: Option<i64>,
}

impl MaintenanceScheduler {
    pub fn new(
        pool: DbPool,
        queue: Arc<dyn JobQueue>,
        interval: Duration,
        stale_claim_secs: u64,
        stale_assignment_hours: Option<i64>,
    ) -> Self {
        Self {
            pool,
            queue,
            interval,
            stale_claim_secs,
            stale_assignment_hours,
        }
    }

    /// Run until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_claim_secs = self.stale_claim_secs,
            "Maintenance scheduler started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Maintenance scheduler stopping");
                    break;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        match JobRepo::requeue_stale(&self.pool, self.stale_claim_secs as f64).await {
            Ok(0) => {}
            Ok(requeued) => tracing::warn!(requeued, "Requeued jobs from unresponsive runners"),
            Err(e) => tracing::error!(error = %e, "Failed to requeue stale jobs"),
        }

        let projects = match ProjectRepo::list_active_ids(&self.pool).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list active projects");
                return;
            }
        };

        let mut enqueued = 0;
        for request in maintenance_jobs(&projects, self.stale_assignment_hours) {
            match self.queue.enqueue(request).await {
                Ok(true) => enqueued += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Failed to enqueue maintenance job"),
            }
        }
        tracing::debug!(projects = projects.len(), enqueued, "Maintenance jobs scheduled");
    }
}

/// One request per maintenance job per project.
pub fn maintenance_jobs(project_ids: &[DbId], stale_assignment_hours: Option<i64>) -> Vec<JobRequest> {
    project_ids
        .iter()
        .flat_map(|&project_id| {
            JobName::MAINTENANCE.iter().map(move |&name| {
                let request = JobRequest::new(name).for_project(project_id);
                match (name, stale_assignment_hours) {
                    (JobName::ReassignStale, Some(hours)) => {
                        request.with_args(serde_json::json!({ "hours": hours }))
                    }
                    _ => request,
                }
            })
        })
        .collect()
}
