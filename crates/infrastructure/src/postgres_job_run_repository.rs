use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_application::{JobRunReport, JobRunRepository};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::JobKind;
use sqlx::{FromRow, PgPool};


/// PostgreSQL-backed job run history.
#[derive(Clone)]
pub struct PostgresJobRunRepository {
    pool: PgPool,
}

impl PostgresJobRunRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct JobRunRow {
    job_kind: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    candidates: i32,
    changed: i32,
    unchanged: i32,
    failed: i32,
    interrupted: bool,
}

#[async_trait]
impl JobRunRepository for PostgresJobRunRepository {
    async fn record_run(&self, report: JobRunReport) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lifecycle_job_runs (
                job_kind,
                started_at,
                finished_at,
                candidates,
                changed,
                unchanged,
                failed,
                interrupted
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(report.job_kind.as_str())
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(count_value(report.candidates, "candidates")?)
        .bind(count_value(report.changed, "changed")?)
        .bind(count_value(report.unchanged, "unchanged")?)
        .bind(count_value(report.failed, "failed")?)
        .bind(report.interrupted)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record '{}' job run: {error}",
                report.job_kind
            ))
        })?;

        Ok(())
    }

    async fn last_completed_run(&self, job_kind: JobKind) -> AppResult<Option<JobRunReport>> {
        let row = sqlx::query_as::<_, JobRunRow>(
            r#"
            SELECT job_kind, started_at, finished_at, candidates, changed, unchanged, failed, interrupted
            FROM lifecycle_job_runs
            WHERE job_kind = $1 AND interrupted = FALSE
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(job_kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load last '{job_kind}' job run: {error}"
            ))
        })?;

        row.map(report_from_row).transpose()
    }
}

fn report_from_row(row: JobRunRow) -> AppResult<JobRunReport> {
    Ok(JobRunReport {
        job_kind: JobKind::from_str(row.job_kind.as_str())?,
        started_at: row.started_at,
        finished_at: row.finished_at,
        candidates: count_from_row(row.candidates, "candidates")?,
        changed: count_from_row(row.changed, "changed")?,
        unchanged: count_from_row(row.unchanged, "unchanged")?,
        failed: count_from_row(row.failed, "failed")?,
        interrupted: row.interrupted,
    })
}

fn count_value(value: u32, field: &str) -> AppResult<i32> {
    i32::try_from(value)
        .map_err(|error| AppError::Validation(format!("invalid job run {field} count: {error}")))
}

fn count_from_row(value: i32, field: &str) -> AppResult<u32> {
    u32::try_from(value)
        .map_err(|error| AppError::Internal(format!("invalid stored {field} count: {error}")))
}
