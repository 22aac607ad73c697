use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantwarden_core::{Actor, AppResult};
use grantwarden_domain::{
    ExternalBindingUpdate, Grant, GrantAuditAction, GrantMutation, GrantStatus, JobKind,
    RolePolicy,
};
use tracing::info;

use crate::external_binding_ports::ExternalBindingClient;
use crate::grant_ports::{GrantRepository, GrantTransition};

/// What reconciliation did for one grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// Local belief matched the external system; nothing was written.
    InSync,
    /// A binding existed externally that the store did not track.
    MarkedRegistered,
    /// The stored binding reference pointed at a binding that no longer exists.
    ReferenceCorrected,
    /// A tracked binding was missing externally and is queued for re-registration.
    MarkedUnregistered,
    /// A missing binding was re-created.
    Reregistered,
}

impl ReconciliationOutcome {
    /// Returns whether the grant was written.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::InSync)
    }
}

/// Heals drift between stored registration state and the external system.
///
/// Never deletes a grant or an external binding.
#[derive(Clone)]
pub struct ReconciliationService {
    grants: Arc<dyn GrantRepository>,
    external_bindings: Arc<dyn ExternalBindingClient>,
    role_policy: Arc<RolePolicy>,
}

impl ReconciliationService {
    /// Creates a reconciliation service.
    #[must_use]
    pub fn new(
        grants: Arc<dyn GrantRepository>,
        external_bindings: Arc<dyn ExternalBindingClient>,
        role_policy: Arc<RolePolicy>,
    ) -> Self {
        Self {
            grants,
            external_bindings,
            role_policy,
        }
    }

    /// Compares one active grant with a live lookup and corrects the stored state.
    pub async fn reconcile_grant(
        &self,
        grant: &Grant,
        as_of: DateTime<Utc>,
    ) -> AppResult<ReconciliationOutcome> {
        if grant.status() != GrantStatus::Active {
            return Ok(ReconciliationOutcome::InSync);
        }

        let found = self
            .external_bindings
            .find(grant.subject(), grant.resource_id())
            .await
            .map_err(|error| error.into_app_error())?;

        match (found, grant.externally_registered()) {
            (Some(binding_ref), false) => {
                let detail = format!("binding '{binding_ref}' found externally");
                self.correct(
                    grant,
                    GrantMutation {
                        external_binding: Some(ExternalBindingUpdate::Registered(binding_ref)),
                        needs_reregistration: grant.needs_reregistration().then_some(false),
                        ..GrantMutation::default()
                    },
                    GrantAuditAction::ExternalRegistrationCorrected,
                    detail,
                    as_of,
                )
                .await?;

                Ok(ReconciliationOutcome::MarkedRegistered)
            }
            (None, true) => {
                let detail = match grant.external_binding_ref() {
                    Some(binding_ref) => format!("binding '{binding_ref}' missing externally"),
                    None => "binding missing externally".to_owned(),
                };
                self.correct(
                    grant,
                    GrantMutation {
                        external_binding: Some(ExternalBindingUpdate::Cleared),
                        needs_reregistration: Some(true),
                        ..GrantMutation::default()
                    },
                    GrantAuditAction::ExternalRegistrationCleared,
                    detail,
                    as_of,
                )
                .await?;

                Ok(ReconciliationOutcome::MarkedUnregistered)
            }
            (None, false) if grant.needs_reregistration() => {
                let binding_ref = self
                    .external_bindings
                    .create(
                        grant.resource_id(),
                        grant.subject(),
                        self.role_policy.external_role_id(grant.role()),
                    )
                    .await
                    .map_err(|error| error.into_app_error())?;

                let detail = format!("binding '{binding_ref}' re-created");
                self.correct(
                    grant,
                    GrantMutation {
                        external_binding: Some(ExternalBindingUpdate::Registered(binding_ref)),
                        needs_reregistration: Some(false),
                        ..GrantMutation::default()
                    },
                    GrantAuditAction::Reregistered,
                    detail,
                    as_of,
                )
                .await?;

                Ok(ReconciliationOutcome::Reregistered)
            }
            (Some(binding_ref), true) if grant.external_binding_ref() != Some(&binding_ref) => {
                let detail = match grant.external_binding_ref() {
                    Some(stored) => {
                        format!("binding reference moved from '{stored}' to '{binding_ref}'")
                    }
                    None => format!("binding '{binding_ref}' found externally"),
                };
                self.correct(
                    grant,
                    GrantMutation {
                        external_binding: Some(ExternalBindingUpdate::Registered(binding_ref)),
                        ..GrantMutation::default()
                    },
                    GrantAuditAction::ExternalRegistrationCorrected,
                    detail,
                    as_of,
                )
                .await?;

                Ok(ReconciliationOutcome::ReferenceCorrected)
            }
            (Some(_), true) | (None, false) => Ok(ReconciliationOutcome::InSync),
        }
    }

    async fn correct(
        &self,
        grant: &Grant,
        mutation: GrantMutation,
        action: GrantAuditAction,
        detail: String,
        as_of: DateTime<Utc>,
    ) -> AppResult<()> {
        self.grants
            .transition(GrantTransition {
                grant_id: grant.id(),
                from_status: GrantStatus::Active,
                to_status: GrantStatus::Active,
                mutation,
                actor: Actor::scheduler(JobKind::Reconciliation.as_str()),
                action,
                detail: Some(detail),
                occurred_at: as_of,
            })
            .await?;

        info!(
            grant_id = %grant.id(),
            action = action.as_str(),
            "external registration corrected"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use grantwarden_domain::{BindingRef, GrantAuditAction, Role, RolePolicy};

    use super::{ReconciliationOutcome, ReconciliationService};
    use crate::test_support::{
        FakeExternalBindings, FakeGrantRepository, active_grant, at, registered,
    };

    fn service(
        grants: &Arc<FakeGrantRepository>,
        bindings: &Arc<FakeExternalBindings>,
    ) -> ReconciliationService {
        ReconciliationService::new(
            grants.clone(),
            bindings.clone(),
            Arc::new(RolePolicy::default()),
        )
    }

    #[tokio::test]
    async fn untracked_external_binding_is_recorded() {
        let grants = Arc::new(FakeGrantRepository::default());
        let bindings = Arc::new(FakeExternalBindings::default());
        let grant = active_grant("bob@example.com", "properties/1", Role::Viewer, at(2026, 5, 1, 0));
        grants.insert(grant.clone()).await;
        bindings
            .seed("bob@example.com", "properties/1", "properties/1/accessBindings/b1")
            .await;

        let outcome = service(&grants, &bindings)
            .reconcile_grant(&grant, at(2026, 5, 4, 3))
            .await;
        assert!(matches!(outcome, Ok(ReconciliationOutcome::MarkedRegistered)));

        let stored = grants.get(grant.id()).await;
        assert!(stored.externally_registered());
        assert_eq!(
            stored.external_binding_ref().map(BindingRef::as_str),
            Some("properties/1/accessBindings/b1")
        );
    }

    #[tokio::test]
    async fn missing_binding_is_cleared_and_queued_for_reregistration() {
        let grants = Arc::new(FakeGrantRepository::default());
        let bindings = Arc::new(FakeExternalBindings::default());
        let grant = registered(
            active_grant("bob@example.com", "properties/1", Role::Viewer, at(2026, 5, 1, 0)),
            "properties/1/accessBindings/gone",
        );
        grants.insert(grant.clone()).await;

        let outcome = service(&grants, &bindings)
            .reconcile_grant(&grant, at(2026, 5, 4, 3))
            .await;
        assert!(matches!(outcome, Ok(ReconciliationOutcome::MarkedUnregistered)));

        let stored = grants.get(grant.id()).await;
        assert!(!stored.externally_registered());
        assert!(stored.needs_reregistration());
        assert_eq!(bindings.create_count().await, 0);
        assert_eq!(
            grants.audit_actions(grant.id()).await,
            vec![GrantAuditAction::ExternalRegistrationCleared]
        );
    }

    #[tokio::test]
    async fn flagged_grant_is_reregistered_on_next_pass() {
        let grants = Arc::new(FakeGrantRepository::default());
        let bindings = Arc::new(FakeExternalBindings::default());
        let grant = registered(
            active_grant("bob@example.com", "properties/1", Role::Analyst, at(2026, 5, 1, 0)),
            "properties/1/accessBindings/gone",
        );
        grants.insert(grant.clone()).await;
        let reconciliation = service(&grants, &bindings);

        let _ = reconciliation
            .reconcile_grant(&grant, at(2026, 5, 4, 3))
            .await;
        let cleared = grants.get(grant.id()).await;
        let outcome = reconciliation
            .reconcile_grant(&cleared, at(2026, 5, 5, 3))
            .await;

        assert!(matches!(outcome, Ok(ReconciliationOutcome::Reregistered)));
        let stored = grants.get(grant.id()).await;
        assert!(stored.externally_registered());
        assert!(!stored.needs_reregistration());
        let binding = bindings.binding("bob@example.com", "properties/1").await;
        assert_eq!(
            binding.map(|(_, role_id)| role_id),
            Some("predefinedRoles/analyst".to_owned())
        );
    }

    #[tokio::test]
    async fn stale_binding_reference_is_replaced_with_the_live_one() {
        let grants = Arc::new(FakeGrantRepository::default());
        let bindings = Arc::new(FakeExternalBindings::default());
        let grant = registered(
            active_grant("bob@example.com", "properties/1", Role::Viewer, at(2026, 5, 1, 0)),
            "properties/1/accessBindings/old",
        );
        grants.insert(grant.clone()).await;
        bindings
            .seed("bob@example.com", "properties/1", "properties/1/accessBindings/new")
            .await;
        let reconciliation = service(&grants, &bindings);

        let outcome = reconciliation
            .reconcile_grant(&grant, at(2026, 5, 4, 3))
            .await;
        assert!(matches!(outcome, Ok(ReconciliationOutcome::ReferenceCorrected)));

        let stored = grants.get(grant.id()).await;
        assert_eq!(
            stored.external_binding_ref().map(BindingRef::as_str),
            Some("properties/1/accessBindings/new")
        );
        assert_eq!(
            grants.audit_actions(grant.id()).await,
            vec![GrantAuditAction::ExternalRegistrationCorrected]
        );

        let second = reconciliation
            .reconcile_grant(&stored, at(2026, 5, 5, 3))
            .await;
        assert!(matches!(second, Ok(ReconciliationOutcome::InSync)));
    }

    #[tokio::test]
    async fn matching_state_writes_nothing() {
        let grants = Arc::new(FakeGrantRepository::default());
        let bindings = Arc::new(FakeExternalBindings::default());
        let grant = registered(
            active_grant("bob@example.com", "properties/1", Role::Viewer, at(2026, 5, 1, 0)),
            "properties/1/accessBindings/b1",
        );
        grants.insert(grant.clone()).await;
        bindings
            .seed("bob@example.com", "properties/1", "properties/1/accessBindings/b1")
            .await;
        let writes_before = grants.write_count().await;

        let outcome = service(&grants, &bindings)
            .reconcile_grant(&grant, at(2026, 5, 4, 3))
            .await;

        assert!(matches!(outcome, Ok(ReconciliationOutcome::InSync)));
        assert_eq!(grants.write_count().await, writes_before);
    }
}
