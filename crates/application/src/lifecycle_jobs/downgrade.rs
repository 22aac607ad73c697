use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_core::{Actor, AppResult};
use grantwarden_domain::{
    DailyCadence, ExternalBindingUpdate, Grant, GrantAuditAction, GrantMutation, GrantStatus,
    JobKind, NotificationType,
};
use tracing::{info, warn};

use crate::external_binding_ports::ExternalErrorClass;
use crate::grant_ports::GrantTransition;
use crate::notification_dispatcher::grant_context;
use crate::notification_ports::NotificationEvent;

use super::{
    ItemOutcome, LifecycleDependencies, LifecycleJob, flag_for_review, remove_external_binding,
};

/// Lowers editor grants one rung once the grace period has passed.
///
/// The grant keeps its id and status; only the role and the external binding change.
/// Grants flagged for manual review are left alone until an operator resolves them.
pub struct DowngradeJob {
    dependencies: LifecycleDependencies,
    cadence: DailyCadence,
}

impl DowngradeJob {
    /// Creates the job.
    #[must_use]
    pub fn new(dependencies: LifecycleDependencies, cadence: DailyCadence) -> Self {
        Self {
            dependencies,
            cadence,
        }
    }
}

#[async_trait]
impl LifecycleJob for DowngradeJob {
    fn kind(&self) -> JobKind {
        JobKind::Downgrade
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
        if !grant.is_downgrade_eligible(as_of) || grant.needs_manual_review() {
            return Ok(ItemOutcome::Unchanged);
        }
        let Some(lowered_role) = grant.role().next_lower() else {
            return Ok(ItemOutcome::Unchanged);
        };

        let external_bindings = self.dependencies.external_bindings.as_ref();
        let mut mutation = GrantMutation {
            role: Some(lowered_role),
            ..GrantMutation::default()
        };

        let mut rebind_failure = None;

        if grant.externally_registered() {
            // The old binding must be gone before the lower one is created.
            if let Err(error) = remove_external_binding(external_bindings, grant).await {
                if ExternalErrorClass::classify(&error) == ExternalErrorClass::Permanent {
                    flag_for_review(
                        &self.dependencies,
                        self.kind(),
                        grant,
                        format!("editor binding removal failed permanently: {error}"),
                        as_of,
                    )
                    .await?;
                }
                return Err(error.into_app_error());
            }

            match external_bindings
                .create(
                    grant.resource_id(),
                    grant.subject(),
                    self.dependencies.role_policy.external_role_id(lowered_role),
                )
                .await
            {
                Ok(binding_ref) => {
                    mutation.external_binding =
                        Some(ExternalBindingUpdate::Registered(binding_ref));
                }
                Err(error) => {
                    warn!(
                        grant_id = %grant.id(),
                        error = %error,
                        "failed to re-bind downgraded grant; queued for re-registration"
                    );
                    mutation.external_binding = Some(ExternalBindingUpdate::Cleared);
                    mutation.needs_reregistration = Some(true);
                    if ExternalErrorClass::classify(&error) == ExternalErrorClass::Permanent {
                        rebind_failure = Some(format!(
                            "binding at role '{}' failed permanently: {error}",
                            lowered_role.as_str()
                        ));
                    }
                }
            }
        }

        let downgraded = self
            .dependencies
            .grants
            .transition(GrantTransition {
                grant_id: grant.id(),
                from_status: GrantStatus::Active,
                to_status: GrantStatus::Active,
                mutation,
                actor: Actor::scheduler(self.kind().as_str()),
                action: GrantAuditAction::Downgraded,
                detail: Some(format!(
                    "role lowered from '{}' to '{}'",
                    grant.role().as_str(),
                    lowered_role.as_str()
                )),
                occurred_at: as_of,
            })
            .await?;

        info!(
            grant_id = %grant.id(),
            from_role = grant.role().as_str(),
            to_role = lowered_role.as_str(),
            "grant downgraded"
        );

        if let Some(detail) = rebind_failure {
            flag_for_review(&self.dependencies, self.kind(), &downgraded, detail, as_of).await?;
        }

        self.dependencies
            .dispatcher
            .dispatch(
                NotificationEvent {
                    subject: downgraded.subject().clone(),
                    notification_type: NotificationType::Downgraded,
                    grant_id: Some(downgraded.id()),
                    context: grant_context(&downgraded),
                },
                as_of,
            )
            .await?;

        Ok(ItemOutcome::Changed)
    }
}
