use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_core::AppResult;
use grantwarden_domain::JobKind;

/// Summary of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunReport {
    /// Job that ran.
    pub job_kind: JobKind,
    /// Evaluation time shared by every item of the run.
    pub started_at: DateTime<Utc>,
    /// Completion time.
    pub finished_at: DateTime<Utc>,
    /// Size of the candidate set.
    pub candidates: u32,
    /// Items whose state or notifications changed.
    pub changed: u32,
    /// Items that needed nothing.
    pub unchanged: u32,
    /// Items that failed and were skipped.
    pub failed: u32,
    /// Whether shutdown stopped the run before the end of the candidate set.
    pub interrupted: bool,
}

impl JobRunReport {
    /// Creates an empty report for a run starting at `started_at`.
    #[must_use]
    pub fn started(job_kind: JobKind, started_at: DateTime<Utc>) -> Self {
        Self {
            job_kind,
            started_at,
            finished_at: started_at,
            candidates: 0,
            changed: 0,
            unchanged: 0,
            failed: 0,
            interrupted: false,
        }
    }

    /// Returns whether the run reached the end of its candidate set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.interrupted
    }
}

/// Durable history of job runs.
#[async_trait]
pub trait JobRunRepository: Send + Sync {
    /// Stores one finished or interrupted run.
    async fn record_run(&self, report: JobRunReport) -> AppResult<()>;

    /// Returns the latest run that reached the end of its candidate set.
    async fn last_completed_run(&self, job_kind: JobKind) -> AppResult<Option<JobRunReport>>;
}
