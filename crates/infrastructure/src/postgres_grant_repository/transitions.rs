use grantwarden_application::{
    ExtendGrantInput, GrantAuditEvent, GrantTransition, ReviewFlagInput,
};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{Grant, GrantAuditAction, GrantId};
use sqlx::{PgConnection, Postgres, Transaction};

use super::{
    GRANT_COLUMNS, GrantRow, PostgresGrantRepository, audit, extension_count_value,
    grant_from_row, grant_write_error,
};

impl PostgresGrantRepository {
    pub(super) async fn transition_impl(&self, transition: GrantTransition) -> AppResult<Grant> {
        let mut transaction = self.begin("transition").await?;
        let current = lock_grant(&mut transaction, transition.grant_id).await?;

        if current.status() != transition.from_status {
            return Err(AppError::Conflict(format!(
                "grant '{}' is '{}', expected '{}'",
                current.id(),
                current.status().as_str(),
                transition.from_status.as_str()
            )));
        }

        let next = current.transitioned(transition.to_status, &transition.mutation)?;
        write_grant(&mut transaction, &next, "transition").await?;
        audit::insert_audit_event(
            &mut *transaction,
            &GrantAuditEvent {
                grant_id: next.id(),
                actor: transition.actor,
                action: transition.action,
                from_status: Some(transition.from_status),
                to_status: Some(transition.to_status),
                detail: transition.detail,
                occurred_at: transition.occurred_at,
            },
        )
        .await?;

        commit(transaction, "transition").await?;
        Ok(next)
    }

    pub(super) async fn extend_impl(&self, input: ExtendGrantInput) -> AppResult<Grant> {
        let mut transaction = self.begin("extend").await?;
        let current = lock_grant(&mut transaction, input.grant_id).await?;
        let next = current.extended(input.new_expires_at, input.max_extensions)?;

        write_grant(&mut transaction, &next, "extend").await?;
        audit::insert_audit_event(&mut *transaction, &input.audit_event(&current, &next)).await?;

        commit(transaction, "extend").await?;
        Ok(next)
    }

    pub(super) async fn set_review_flag_impl(&self, input: ReviewFlagInput) -> AppResult<Grant> {
        let mut transaction = self.begin("review flag").await?;
        let current = lock_grant(&mut transaction, input.grant_id).await?;
        let next = current.with_manual_review(input.needs_manual_review);

        write_grant(&mut transaction, &next, "flag").await?;
        audit::insert_audit_event(
            &mut *transaction,
            &GrantAuditEvent {
                grant_id: next.id(),
                actor: input.actor,
                action: if input.needs_manual_review {
                    GrantAuditAction::FlaggedForReview
                } else {
                    GrantAuditAction::ReviewResolved
                },
                from_status: None,
                to_status: None,
                detail: Some(input.detail),
                occurred_at: input.occurred_at,
            },
        )
        .await?;

        commit(transaction, "review flag").await?;
        Ok(next)
    }

    async fn begin(&self, operation: &str) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to start grant {operation} transaction: {error}"
            ))
        })
    }
}

async fn lock_grant(connection: &mut PgConnection, grant_id: GrantId) -> AppResult<Grant> {
    let query = format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = $1 FOR UPDATE");
    let row = sqlx::query_as::<_, GrantRow>(query.as_str())
        .bind(grant_id.as_uuid())
        .fetch_optional(&mut *connection)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to lock grant '{grant_id}': {error}"))
        })?
        .ok_or_else(|| AppError::NotFound(format!("grant '{grant_id}' does not exist")))?;

    grant_from_row(row)
}

async fn write_grant(connection: &mut PgConnection, grant: &Grant, operation: &str) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE grants
        SET
            role = $2,
            status = $3,
            granted_at = $4,
            expires_at = $5,
            externally_registered = $6,
            external_binding_ref = $7,
            extension_count = $8,
            last_notification_sent = $9,
            needs_reregistration = $10,
            needs_manual_review = $11,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(grant.id().as_uuid())
    .bind(grant.role().as_str())
    .bind(grant.status().as_str())
    .bind(grant.granted_at())
    .bind(grant.expires_at())
    .bind(grant.externally_registered())
    .bind(grant.external_binding_ref().map(|binding_ref| binding_ref.as_str()))
    .bind(extension_count_value(grant.extension_count())?)
    .bind(grant.last_notification_sent())
    .bind(grant.needs_reregistration())
    .bind(grant.needs_manual_review())
    .execute(&mut *connection)
    .await
    .map_err(|error| grant_write_error(error, grant, operation))?;

    Ok(())
}

async fn commit(transaction: Transaction<'static, Postgres>, operation: &str) -> AppResult<()> {
    transaction.commit().await.map_err(|error| {
        AppError::Internal(format!(
            "failed to commit grant {operation} transaction: {error}"
        ))
    })
}
