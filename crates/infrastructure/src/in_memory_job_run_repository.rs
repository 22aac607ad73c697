use async_trait::async_trait;
use grantwarden_application::{JobRunReport, JobRunRepository};
use grantwarden_core::AppResult;
use grantwarden_domain::JobKind;
use tokio::sync::RwLock;

/// In-memory job run history.
#[derive(Debug, Default)]
pub struct InMemoryJobRunRepository {
    runs: RwLock<Vec<JobRunReport>>,
}

impl InMemoryJobRunRepository {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRunRepository for InMemoryJobRunRepository {
    async fn record_run(&self, report: JobRunReport) -> AppResult<()> {
        self.runs.write().await.push(report);
        Ok(())
    }

    async fn last_completed_run(&self, job_kind: JobKind) -> AppResult<Option<JobRunReport>> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .filter(|run| run.job_kind == job_kind && run.is_complete())
            .max_by_key(|run| run.started_at)
            .cloned())
    }
}
