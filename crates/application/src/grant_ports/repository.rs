use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_core::{Actor, AppResult};
use grantwarden_domain::{
    Grant, GrantAuditAction, GrantId, GrantMutation, GrantStatus, JobKind,
};

use super::GrantAuditEvent;

/// Compare-and-swap status change with its field mutation and audit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantTransition {
    /// Grant to change.
    pub grant_id: GrantId,
    /// Status the caller expects the stored grant to have.
    pub from_status: GrantStatus,
    /// Status after the change.
    pub to_status: GrantStatus,
    /// Field changes applied together with the status change.
    pub mutation: GrantMutation,
    /// Who triggered the change.
    pub actor: Actor,
    /// Audit action written with the change.
    pub action: GrantAuditAction,
    /// Optional audit detail.
    pub detail: Option<String>,
    /// Change timestamp.
    pub occurred_at: DateTime<Utc>,
}

/// Input for pushing out a grant's expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendGrantInput {
    /// Grant to extend.
    pub grant_id: GrantId,
    /// New expiry, later than the current one.
    pub new_expires_at: DateTime<Utc>,
    /// Configured cap on `extension_count`.
    pub max_extensions: u32,
    /// Who requested the extension.
    pub actor: Actor,
    /// Change timestamp.
    pub occurred_at: DateTime<Utc>,
}

impl ExtendGrantInput {
    /// Builds the `Extended` audit entry every store writes for this extension.
    #[must_use]
    pub fn audit_event(&self, current: &Grant, next: &Grant) -> GrantAuditEvent {
        GrantAuditEvent {
            grant_id: next.id(),
            actor: self.actor.clone(),
            action: GrantAuditAction::Extended,
            from_status: Some(current.status()),
            to_status: Some(next.status()),
            detail: current.expires_at().map(|previous| {
                format!(
                    "expiry moved from {} to {}",
                    previous.to_rfc3339(),
                    self.new_expires_at.to_rfc3339()
                )
            }),
            occurred_at: self.occurred_at,
        }
    }
}

/// Input for setting or clearing the manual review flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewFlagInput {
    /// Grant to flag.
    pub grant_id: GrantId,
    /// New flag value.
    pub needs_manual_review: bool,
    /// Who changed the flag.
    pub actor: Actor,
    /// Reason recorded on the audit trail.
    pub detail: String,
    /// Change timestamp.
    pub occurred_at: DateTime<Utc>,
}

/// Durable grant store with invariant enforcement.
#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Inserts a new grant.
    ///
    /// Fails with `Conflict` when the grant is active and another active grant
    /// exists for the same subject and resource.
    async fn create(&self, grant: Grant, actor: &Actor) -> AppResult<Grant>;

    /// Loads one grant.
    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>>;

    /// Applies a transition when the stored status still equals `from_status`.
    ///
    /// Fails with `Conflict` on a status mismatch or a uniqueness violation and
    /// with `Validation` when the state machine rejects the change. Writes one
    /// audit entry atomically with the change.
    async fn transition(&self, transition: GrantTransition) -> AppResult<Grant>;

    /// Returns the candidate set for one job, computed from durable fields.
    async fn find_candidates(&self, job_kind: JobKind, as_of: DateTime<Utc>)
    -> AppResult<Vec<Grant>>;

    /// Pushes out the expiry and increments `extension_count`.
    async fn extend(&self, input: ExtendGrantInput) -> AppResult<Grant>;

    /// Stores the timestamp of the last staged notification.
    async fn record_notification_sent(
        &self,
        grant_id: GrantId,
        sent_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Sets or clears the manual review flag without a status change.
    async fn set_review_flag(&self, input: ReviewFlagInput) -> AppResult<Grant>;

    /// Appends an audit entry not tied to a transition, such as a job failure.
    async fn append_audit_event(&self, event: GrantAuditEvent) -> AppResult<()>;

    /// Lists the audit trail of one grant, oldest first.
    async fn list_audit_trail(&self, grant_id: GrantId) -> AppResult<Vec<GrantAuditEvent>>;
}
