use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{
    DailyCadence, ExternalBindingUpdate, Grant, GrantAuditAction, GrantMutation, GrantStatus,
    JobKind, NotificationType,
};
use tracing::info;

use crate::external_binding_ports::ExternalErrorClass;
use crate::grant_ports::GrantTransition;
use crate::notification_dispatcher::grant_context;
use crate::notification_ports::NotificationEvent;

use super::{
    ItemOutcome, LifecycleDependencies, LifecycleJob, flag_for_review, remove_external_binding,
};

/// Expires grants past their expiry and revokes the external binding.
///
/// A grant moves `active -> expired` first and reaches `deleted` only after
/// the binding is confirmed gone. Transient failures leave it `expired` so the
/// next run retries the removal.
pub struct ExpiryCleanupJob {
    dependencies: LifecycleDependencies,
    cadence: DailyCadence,
}

impl ExpiryCleanupJob {
    /// Creates the job.
    #[must_use]
    pub fn new(dependencies: LifecycleDependencies, cadence: DailyCadence) -> Self {
        Self {
            dependencies,
            cadence,
        }
    }

    fn actor(&self) -> Actor {
        Actor::scheduler(self.kind().as_str())
    }
}

#[async_trait]
impl LifecycleJob for ExpiryCleanupJob {
    fn kind(&self) -> JobKind {
        JobKind::ExpiryCleanup
    }

    fn cadence(&self) -> DailyCadence {
        self.cadence
    }

    async fn candidates(&self, as_of: DateTime<Utc>) -> AppResult<Vec<Grant>> {
        self.dependencies
            .grants
            .find_candidates(self.kind(), as_of)
            .await
    }

    async fn process(&self, grant: &Grant, as_of: DateTime<Utc>) -> AppResult<ItemOutcome> {
        let mut notification_error: Option<AppError> = None;

        let expired = match grant.status() {
            GrantStatus::Active if grant.is_past_expiry(as_of) => {
                let expired = self
                    .dependencies
                    .grants
                    .transition(GrantTransition {
                        grant_id: grant.id(),
                        from_status: GrantStatus::Active,
                        to_status: GrantStatus::Expired,
                        mutation: GrantMutation::default(),
                        actor: self.actor(),
                        action: GrantAuditAction::Expired,
                        detail: None,
                        occurred_at: as_of,
                    })
                    .await?;

                if let Err(error) = self
                    .dependencies
                    .dispatcher
                    .dispatch(
                        NotificationEvent {
                            subject: expired.subject().clone(),
                            notification_type: NotificationType::Expired,
                            grant_id: Some(expired.id()),
                            context: grant_context(&expired),
                        },
                        as_of,
                    )
                    .await
                {
                    notification_error = Some(error);
                }

                expired
            }
            GrantStatus::Expired if !grant.needs_manual_review() => grant.clone(),
            _ => return Ok(ItemOutcome::Unchanged),
        };

        if let Err(error) =
            remove_external_binding(self.dependencies.external_bindings.as_ref(), &expired).await
        {
            if ExternalErrorClass::classify(&error) == ExternalErrorClass::Permanent {
                flag_for_review(
                    &self.dependencies,
                    self.kind(),
                    &expired,
                    format!("external binding removal failed permanently: {error}"),
                    as_of,
                )
                .await?;
            }
            return Err(error.into_app_error());
        }

        self.dependencies
            .grants
            .transition(GrantTransition {
                grant_id: expired.id(),
                from_status: GrantStatus::Expired,
                to_status: GrantStatus::Deleted,
                mutation: GrantMutation {
                    external_binding: Some(ExternalBindingUpdate::Cleared),
                    needs_reregistration: Some(false),
                    ..GrantMutation::default()
                },
                actor: self.actor(),
                action: GrantAuditAction::Deleted,
                detail: expired
                    .external_binding_ref()
                    .map(|binding_ref| format!("binding '{binding_ref}' removed")),
                occurred_at: as_of,
            })
            .await?;

        info!(grant_id = %expired.id(), "expired grant revoked");

        match notification_error {
            Some(error) => Err(error),
            None => Ok(ItemOutcome::Changed),
        }
    }
}
