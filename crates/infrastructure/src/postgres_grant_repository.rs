use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_application::{
    ExtendGrantInput, GrantAuditEvent, GrantRepository, GrantTransition, ReviewFlagInput,
};
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{
    Grant, GrantAuditAction, GrantId, GrantRecord, GrantStatus, JobKind, Role,
};
use sqlx::{FromRow, PgPool};

mod audit;
mod candidates;
mod transitions;


const GRANT_COLUMNS: &str = r#"
    id,
    subject,
    resource_id,
    role,
    status,
    requested_at,
    granted_at,
    expires_at,
    externally_registered,
    external_binding_ref,
    extension_count,
    last_notification_sent,
    needs_reregistration,
    needs_manual_review
"#;

/// PostgreSQL-backed grant store.
///
/// Status changes lock the row with `SELECT ... FOR UPDATE` and compare the
/// stored status before writing; the audit entry is written in the same
/// transaction.
#[derive(Clone)]
pub struct PostgresGrantRepository {
    pool: PgPool,
}

impl PostgresGrantRepository {
    /// Creates a grant repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct GrantRow {
    id: uuid::Uuid,
    subject: String,
    resource_id: String,
    role: String,
    status: String,
    requested_at: DateTime<Utc>,
    granted_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    externally_registered: bool,
    external_binding_ref: Option<String>,
    extension_count: i32,
    last_notification_sent: Option<DateTime<Utc>>,
    needs_reregistration: bool,
    needs_manual_review: bool,
}

#[async_trait]
impl GrantRepository for PostgresGrantRepository {
    async fn create(&self, grant: Grant, actor: &Actor) -> AppResult<Grant> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start grant create transaction: {error}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO grants (
                id,
                subject,
                resource_id,
                role,
                status,
                requested_at,
                granted_at,
                expires_at,
                externally_registered,
                external_binding_ref,
                extension_count,
                last_notification_sent,
                needs_reregistration,
                needs_manual_review
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(grant.id().as_uuid())
        .bind(grant.subject().as_str())
        .bind(grant.resource_id().as_str())
        .bind(grant.role().as_str())
        .bind(grant.status().as_str())
        .bind(grant.requested_at())
        .bind(grant.granted_at())
        .bind(grant.expires_at())
        .bind(grant.externally_registered())
        .bind(grant.external_binding_ref().map(|binding_ref| binding_ref.as_str()))
        .bind(extension_count_value(grant.extension_count())?)
        .bind(grant.last_notification_sent())
        .bind(grant.needs_reregistration())
        .bind(grant.needs_manual_review())
        .execute(&mut *transaction)
        .await
        .map_err(|error| grant_write_error(error, &grant, "create"))?;

        audit::insert_audit_event(
            &mut *transaction,
            &GrantAuditEvent {
                grant_id: grant.id(),
                actor: actor.clone(),
                action: GrantAuditAction::Requested,
                from_status: None,
                to_status: Some(grant.status()),
                detail: None,
                occurred_at: grant.requested_at(),
            },
        )
        .await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit grant create transaction: {error}"))
        })?;

        Ok(grant)
    }

    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>> {
        let query = format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = $1");
        let row = sqlx::query_as::<_, GrantRow>(query.as_str())
            .bind(grant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to load grant '{grant_id}': {error}"))
            })?;

        row.map(grant_from_row).transpose()
    }

    async fn transition(&self, transition: GrantTransition) -> AppResult<Grant> {
        self.transition_impl(transition).await
    }

    async fn find_candidates(
        &self,
        job_kind: JobKind,
        as_of: DateTime<Utc>,
    ) -> AppResult<Vec<Grant>> {
        self.find_candidates_impl(job_kind, as_of).await
    }

    async fn extend(&self, input: ExtendGrantInput) -> AppResult<Grant> {
        self.extend_impl(input).await
    }

    async fn record_notification_sent(
        &self,
        grant_id: GrantId,
        sent_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE grants
            SET last_notification_sent = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(grant_id.as_uuid())
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record notification time for grant '{grant_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "grant '{grant_id}' does not exist"
            )));
        }

        Ok(())
    }

    async fn set_review_flag(&self, input: ReviewFlagInput) -> AppResult<Grant> {
        self.set_review_flag_impl(input).await
    }

    async fn append_audit_event(&self, event: GrantAuditEvent) -> AppResult<()> {
        audit::insert_audit_event(&self.pool, &event).await
    }

    async fn list_audit_trail(&self, grant_id: GrantId) -> AppResult<Vec<GrantAuditEvent>> {
        self.list_audit_trail_impl(grant_id).await
    }
}

fn grant_from_row(row: GrantRow) -> AppResult<Grant> {
    Grant::from_record(GrantRecord {
        id: GrantId::from_uuid(row.id),
        subject: row.subject,
        resource_id: row.resource_id,
        role: Role::from_str(row.role.as_str())?,
        status: GrantStatus::from_str(row.status.as_str())?,
        requested_at: row.requested_at,
        granted_at: row.granted_at,
        expires_at: row.expires_at,
        externally_registered: row.externally_registered,
        external_binding_ref: row.external_binding_ref,
        extension_count: u32::try_from(row.extension_count).map_err(|error| {
            AppError::Internal(format!(
                "invalid extension_count for grant '{}': {error}",
                row.id
            ))
        })?,
        last_notification_sent: row.last_notification_sent,
        needs_reregistration: row.needs_reregistration,
        needs_manual_review: row.needs_manual_review,
    })
}

fn extension_count_value(extension_count: u32) -> AppResult<i32> {
    i32::try_from(extension_count)
        .map_err(|error| AppError::Validation(format!("invalid extension_count: {error}")))
}

fn grant_write_error(error: sqlx::Error, grant: &Grant, operation: &str) -> AppError {
    if let sqlx::Error::Database(database_error) = &error
        && database_error.code().as_deref() == Some("23505")
    {
        return AppError::Conflict(format!(
            "active grant already exists for '{}' on '{}'",
            grant.subject(),
            grant.resource_id()
        ));
    }

    AppError::Internal(format!(
        "failed to {operation} grant '{}': {error}",
        grant.id()
    ))
}
