use chrono::{DateTime, Utc};
use grantwarden_core::Actor;
use grantwarden_domain::{GrantAuditAction, GrantId, GrantStatus};

/// One entry of a grant's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantAuditEvent {
    /// Grant the entry belongs to.
    pub grant_id: GrantId,
    /// Who or what triggered the change.
    pub actor: Actor,
    /// Stable action identifier.
    pub action: GrantAuditAction,
    /// Status before the change, when a transition happened.
    pub from_status: Option<GrantStatus>,
    /// Status after the change, when a transition happened.
    pub to_status: Option<GrantStatus>,
    /// Optional human-readable detail.
    pub detail: Option<String>,
    /// Event timestamp.
    pub occurred_at: DateTime<Utc>,
}
