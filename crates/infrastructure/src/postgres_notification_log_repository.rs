use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use grantwarden_application::{NotificationLogEntry, NotificationLogRepository};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{GrantId, NotificationStatus, NotificationType, Subject};
use sqlx::{FromRow, PgPool};

#[cfg(test)]
mod tests;

/// PostgreSQL-backed notification ledger.
///
/// The partial unique index on `(subject, notification_type, sent_day)`
/// guards the once-per-day rule for day-scoped types.
#[derive(Clone)]
pub struct PostgresNotificationLogRepository {
    pool: PgPool,
}

impl PostgresNotificationLogRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct NotificationLogRow {
    subject: String,
    notification_type: String,
    grant_id: Option<uuid::Uuid>,
    sent_at: DateTime<Utc>,
    status: String,
    detail: Option<String>,
}

#[async_trait]
impl NotificationLogRepository for PostgresNotificationLogRepository {
    async fn has_sent_on(
        &self,
        subject: &Subject,
        notification_type: NotificationType,
        day: NaiveDate,
    ) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM notification_log
                WHERE subject = $1
                  AND notification_type = $2
                  AND sent_day = $3
                  AND status = 'sent'
            )
            "#,
        )
        .bind(subject.as_str())
        .bind(notification_type.as_str())
        .bind(day)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to check notification log for '{subject}': {error}"
            ))
        })
    }

    async fn append_entry(&self, entry: NotificationLogEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_log (
                subject,
                notification_type,
                grant_id,
                sent_at,
                sent_day,
                day_scoped,
                status,
                detail
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.subject.as_str())
        .bind(entry.notification_type.as_str())
        .bind(entry.grant_id.map(|grant_id| grant_id.as_uuid()))
        .bind(entry.sent_at)
        .bind(entry.sent_at.date_naive())
        .bind(entry.notification_type.is_day_scoped())
        .bind(entry.status.as_str())
        .bind(entry.detail.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if let sqlx::Error::Database(database_error) = &error
                && database_error.code().as_deref() == Some("23505")
            {
                return AppError::Conflict(format!(
                    "'{}' was already sent to '{}' on {}",
                    entry.notification_type.as_str(),
                    entry.subject,
                    entry.sent_at.date_naive()
                ));
            }

            AppError::Internal(format!(
                "failed to append notification log entry for '{}': {error}",
                entry.subject
            ))
        })?;

        Ok(())
    }

    async fn list_entries_for_subject(
        &self,
        subject: &Subject,
    ) -> AppResult<Vec<NotificationLogEntry>> {
        let rows = sqlx::query_as::<_, NotificationLogRow>(
            r#"
            SELECT subject, notification_type, grant_id, sent_at, status, detail
            FROM notification_log
            WHERE subject = $1
            ORDER BY sent_at DESC, id DESC
            "#,
        )
        .bind(subject.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list notification log for '{subject}': {error}"
            ))
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(NotificationLogEntry {
                    subject: Subject::new(row.subject)?,
                    notification_type: NotificationType::from_str(row.notification_type.as_str())?,
                    grant_id: row.grant_id.map(GrantId::from_uuid),
                    sent_at: row.sent_at,
                    status: NotificationStatus::parse(row.status.as_str())?,
                    detail: row.detail,
                })
            })
            .collect()
    }
}
