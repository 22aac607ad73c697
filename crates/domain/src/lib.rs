//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod audit;
mod grant;
mod notification;
mod role_policy;
mod schedule;

pub use audit::GrantAuditAction;
pub use grant::{
    BindingRef, EDITOR_DOWNGRADE_GRACE_DAYS, ExternalBindingUpdate, Grant, GrantId,
    GrantMutation, GrantRecord, GrantStatus, ResourceId, Role, Subject,
};
pub use notification::{
    ExpiryThreshold, NotificationStatus, NotificationTemplate, NotificationType,
};
pub use role_policy::{MAX_VALIDITY_DAYS, RolePolicy, RolePolicyEntry};
pub use schedule::{DailyCadence, JobKind};
