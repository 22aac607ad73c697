use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{Grant, GrantAuditAction, JobKind};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::grant_ports::{GrantAuditEvent, GrantRepository};
use crate::lifecycle_jobs::{ItemOutcome, LifecycleJob};
use crate::scheduler_ports::{Clock, JobRunReport};

/// Generic loop running one lifecycle job over its candidate set.
///
/// Items run strictly one after another. A failing item is logged, audited and
/// counted; it never stops the rest of the run.
#[derive(Clone)]
pub struct JobRunner {
    grants: Arc<dyn GrantRepository>,
    clock: Arc<dyn Clock>,
}

impl JobRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(grants: Arc<dyn GrantRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { grants, clock }
    }

    /// Runs `job` once.
    ///
    /// Fails only when the candidate set cannot be loaded. Stops after the
    /// in-flight item once `shutdown` turns true.
    pub async fn run(
        &self,
        job: &dyn LifecycleJob,
        shutdown: &watch::Receiver<bool>,
    ) -> AppResult<JobRunReport> {
        let job_kind = job.kind();
        let as_of = self.clock.now();
        let candidates = job.candidates(as_of).await?;

        let mut report = JobRunReport::started(job_kind, as_of);
        report.candidates = u32::try_from(candidates.len()).unwrap_or(u32::MAX);

        info!(
            job = %job_kind,
            candidates = report.candidates,
            "lifecycle job started"
        );

        for grant in &candidates {
            if *shutdown.borrow() {
                report.interrupted = true;
                break;
            }

            match job.process(grant, as_of).await {
                Ok(ItemOutcome::Changed) => report.changed = report.changed.saturating_add(1),
                Ok(ItemOutcome::Unchanged) => {
                    report.unchanged = report.unchanged.saturating_add(1);
                }
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    warn!(
                        job = %job_kind,
                        grant_id = %grant.id(),
                        error_kind = error.kind(),
                        transient = error.is_transient(),
                        error = %error,
                        "lifecycle job item failed"
                    );
                    self.record_item_failure(job_kind, grant, &error, as_of)
                        .await;
                }
            }
        }

        report.finished_at = self.clock.now();

        info!(
            job = %job_kind,
            changed = report.changed,
            unchanged = report.unchanged,
            failed = report.failed,
            interrupted = report.interrupted,
            "lifecycle job finished"
        );

        Ok(report)
    }

    async fn record_item_failure(
        &self,
        job_kind: JobKind,
        grant: &Grant,
        error: &AppError,
        as_of: DateTime<Utc>,
    ) {
        let event = GrantAuditEvent {
            grant_id: grant.id(),
            actor: Actor::scheduler(job_kind.as_str()),
            action: GrantAuditAction::JobItemFailed,
            from_status: None,
            to_status: None,
            detail: Some(format!("{}: {error}", error.kind())),
            occurred_at: as_of,
        };

        if let Err(audit_error) = self.grants.append_audit_event(event).await {
            warn!(
                job = %job_kind,
                grant_id = %grant.id(),
                error = %audit_error,
                "failed to record job item failure"
            );
        }
    }
}
