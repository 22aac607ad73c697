use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{
    ExternalBindingUpdate, Grant, GrantAuditAction, GrantId, GrantMutation, GrantStatus,
    NotificationType, ResourceId, Role, RolePolicy, Subject,
};
use tracing::{info, warn};

use crate::external_binding_ports::ExternalBindingClient;
use crate::grant_ports::{
    ExtendGrantInput, GrantAuditEvent, GrantRepository, GrantTransition, ReviewFlagInput,
};
use crate::notification_dispatcher::{NotificationDispatcher, grant_context};
use crate::notification_ports::NotificationEvent;
use crate::scheduler_ports::Clock;

/// Default cap on expiry extensions per grant.
pub const DEFAULT_MAX_EXTENSIONS: u32 = 3;

/// Request, approval and operator actions on individual grants.
#[derive(Clone)]
pub struct GrantService {
    grants: Arc<dyn GrantRepository>,
    external_bindings: Arc<dyn ExternalBindingClient>,
    dispatcher: NotificationDispatcher,
    role_policy: Arc<RolePolicy>,
    clock: Arc<dyn Clock>,
    max_extensions: u32,
}

impl GrantService {
    /// Creates a grant service.
    #[must_use]
    pub fn new(
        grants: Arc<dyn GrantRepository>,
        external_bindings: Arc<dyn ExternalBindingClient>,
        dispatcher: NotificationDispatcher,
        role_policy: Arc<RolePolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            grants,
            external_bindings,
            dispatcher,
            role_policy,
            clock,
            max_extensions: DEFAULT_MAX_EXTENSIONS,
        }
    }

    /// Overrides the extension cap.
    #[must_use]
    pub fn with_max_extensions(mut self, max_extensions: u32) -> Self {
        self.max_extensions = max_extensions;
        self
    }

    /// Records a new grant request waiting for approval.
    pub async fn request_grant(
        &self,
        actor: &Actor,
        subject: &str,
        resource_id: &str,
        role: Role,
    ) -> AppResult<Grant> {
        let grant = Grant::request(
            Subject::new(subject)?,
            ResourceId::new(resource_id)?,
            role,
            self.clock.now(),
        );

        let grant = self.grants.create(grant, actor).await?;
        info!(
            grant_id = %grant.id(),
            subject = %grant.subject(),
            resource_id = %grant.resource_id(),
            role = grant.role().as_str(),
            "grant requested"
        );

        Ok(grant)
    }

    /// Activates a pending grant, registers it externally and sends the welcome notice.
    ///
    /// A failed external registration does not undo the approval; the grant
    /// is queued for re-registration by reconciliation instead.
    pub async fn approve(&self, actor: &Actor, grant_id: GrantId) -> AppResult<Grant> {
        let grant = self.load(grant_id).await?;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.role_policy.validity_period(grant.role()))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "validity period of role '{}' is out of range",
                    grant.role().as_str()
                ))
            })?;

        let active = self
            .grants
            .transition(GrantTransition {
                grant_id,
                from_status: GrantStatus::PendingApproval,
                to_status: GrantStatus::Active,
                mutation: GrantMutation {
                    granted_at: Some(now),
                    expires_at: Some(expires_at),
                    ..GrantMutation::default()
                },
                actor: actor.clone(),
                action: GrantAuditAction::Approved,
                detail: None,
                occurred_at: now,
            })
            .await?;

        let registration = match self
            .external_bindings
            .create(
                active.resource_id(),
                active.subject(),
                self.role_policy.external_role_id(active.role()),
            )
            .await
        {
            Ok(binding_ref) => GrantTransition {
                grant_id,
                from_status: GrantStatus::Active,
                to_status: GrantStatus::Active,
                detail: Some(format!("binding '{binding_ref}' created")),
                mutation: GrantMutation {
                    external_binding: Some(ExternalBindingUpdate::Registered(binding_ref)),
                    ..GrantMutation::default()
                },
                actor: Actor::System,
                action: GrantAuditAction::RegisteredExternally,
                occurred_at: now,
            },
            Err(error) => {
                warn!(
                    grant_id = %grant_id,
                    error = %error,
                    "external registration failed; queued for re-registration"
                );
                GrantTransition {
                    grant_id,
                    from_status: GrantStatus::Active,
                    to_status: GrantStatus::Active,
                    mutation: GrantMutation {
                        needs_reregistration: Some(true),
                        ..GrantMutation::default()
                    },
                    actor: Actor::System,
                    action: GrantAuditAction::ExternalRegistrationCleared,
                    detail: Some(format!("initial registration failed: {error}")),
                    occurred_at: now,
                }
            }
        };
        let active = self.grants.transition(registration).await?;

        if let Err(error) = self
            .dispatcher
            .dispatch(
                NotificationEvent {
                    subject: active.subject().clone(),
                    notification_type: NotificationType::Welcome,
                    grant_id: Some(active.id()),
                    context: grant_context(&active),
                },
                now,
            )
            .await
        {
            warn!(grant_id = %grant_id, error = %error, "failed to send welcome notification");
        }

        info!(
            grant_id = %grant_id,
            registered = active.externally_registered(),
            "grant approved"
        );

        Ok(active)
    }

    /// Declines a pending grant.
    pub async fn reject(
        &self,
        actor: &Actor,
        grant_id: GrantId,
        reason: Option<String>,
    ) -> AppResult<Grant> {
        let grant = self
            .grants
            .transition(GrantTransition {
                grant_id,
                from_status: GrantStatus::PendingApproval,
                to_status: GrantStatus::Rejected,
                mutation: GrantMutation::default(),
                actor: actor.clone(),
                action: GrantAuditAction::Rejected,
                detail: reason,
                occurred_at: self.clock.now(),
            })
            .await?;

        info!(grant_id = %grant_id, "grant rejected");
        Ok(grant)
    }

    /// Pushes out the expiry of an active grant, up to the extension cap.
    pub async fn extend(
        &self,
        actor: &Actor,
        grant_id: GrantId,
        new_expires_at: DateTime<Utc>,
    ) -> AppResult<Grant> {
        self.grants
            .extend(ExtendGrantInput {
                grant_id,
                new_expires_at,
                max_extensions: self.max_extensions,
                actor: actor.clone(),
                occurred_at: self.clock.now(),
            })
            .await
    }

    /// Clears the manual review flag so cleanup retries the grant.
    pub async fn resolve_review(
        &self,
        actor: &Actor,
        grant_id: GrantId,
        note: &str,
    ) -> AppResult<Grant> {
        let grant = self.load(grant_id).await?;
        if !grant.needs_manual_review() {
            return Err(AppError::Validation(format!(
                "grant '{grant_id}' is not flagged for manual review"
            )));
        }

        self.grants
            .set_review_flag(ReviewFlagInput {
                grant_id,
                needs_manual_review: false,
                actor: actor.clone(),
                detail: note.to_owned(),
                occurred_at: self.clock.now(),
            })
            .await
    }

    /// Loads one grant.
    pub async fn get_grant(&self, grant_id: GrantId) -> AppResult<Grant> {
        self.load(grant_id).await
    }

    /// Returns the audit trail of one grant, oldest first.
    pub async fn audit_trail(&self, grant_id: GrantId) -> AppResult<Vec<GrantAuditEvent>> {
        self.grants.list_audit_trail(grant_id).await
    }

    async fn load(&self, grant_id: GrantId) -> AppResult<Grant> {
        self.grants
            .find_by_id(grant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("grant '{grant_id}' does not exist")))
    }
}
