use std::str::FromStr;

use chrono::{DateTime, Utc};
use grantwarden_application::GrantAuditEvent;
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{GrantAuditAction, GrantId, GrantStatus};
use sqlx::{FromRow, Postgres};

use super::PostgresGrantRepository;

#[derive(Debug, FromRow)]
struct GrantAuditEventRow {
    grant_id: uuid::Uuid,
    actor: String,
    action: String,
    from_status: Option<String>,
    to_status: Option<String>,
    detail: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl PostgresGrantRepository {
    pub(super) async fn list_audit_trail_impl(
        &self,
        grant_id: GrantId,
    ) -> AppResult<Vec<GrantAuditEvent>> {
        let rows = sqlx::query_as::<_, GrantAuditEventRow>(
            r#"
            SELECT grant_id, actor, action, from_status, to_status, detail, occurred_at
            FROM grant_audit_events
            WHERE grant_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(grant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list audit trail for grant '{grant_id}': {error}"
            ))
        })?;

        rows.into_iter()
            .map(|row| {
                Ok(GrantAuditEvent {
                    grant_id: GrantId::from_uuid(row.grant_id),
                    actor: Actor::from_storage_value(row.actor.as_str()),
                    action: GrantAuditAction::from_str(row.action.as_str())?,
                    from_status: parse_status(row.from_status)?,
                    to_status: parse_status(row.to_status)?,
                    detail: row.detail,
                    occurred_at: row.occurred_at,
                })
            })
            .collect()
    }
}

pub(super) async fn insert_audit_event<'e, E>(
    executor: E,
    event: &GrantAuditEvent,
) -> AppResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO grant_audit_events (
            grant_id,
            actor,
            action,
            from_status,
            to_status,
            detail,
            occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.grant_id.as_uuid())
    .bind(event.actor.as_storage_value())
    .bind(event.action.as_str())
    .bind(event.from_status.map(|status| status.as_str()))
    .bind(event.to_status.map(|status| status.as_str()))
    .bind(event.detail.as_deref())
    .bind(event.occurred_at)
    .execute(executor)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to append audit event for grant '{}': {error}",
            event.grant_id
        ))
    })?;

    Ok(())
}

fn parse_status(value: Option<String>) -> AppResult<Option<GrantStatus>> {
    value
        .map(|status| GrantStatus::from_str(status.as_str()))
        .transpose()
}
