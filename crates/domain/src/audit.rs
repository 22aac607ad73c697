use std::str::FromStr;

use grantwarden_core::AppError;
use serde::{Deserialize, Serialize};

/// Stable audit actions recorded on a grant's trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantAuditAction {
    /// Grant was requested.
    Requested,
    /// Grant was approved and became active.
    Approved,
    /// Grant was rejected.
    Rejected,
    /// Binding was created in the external system.
    RegisteredExternally,
    /// Expiry was pushed out.
    Extended,
    /// Editor role was lowered after the grace period.
    Downgraded,
    /// Grant passed its expiry.
    Expired,
    /// External binding was removed and the grant closed.
    Deleted,
    /// Reconciliation found a binding the store did not track.
    ExternalRegistrationCorrected,
    /// Reconciliation found a tracked binding missing externally.
    ExternalRegistrationCleared,
    /// Reconciliation re-created a missing binding.
    Reregistered,
    /// A permanent external failure needs an operator.
    FlaggedForReview,
    /// An operator cleared the manual review flag.
    ReviewResolved,
    /// A scheduler job failed to process the grant.
    JobItemFailed,
}

impl GrantAuditAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "grant.requested",
            Self::Approved => "grant.approved",
            Self::Rejected => "grant.rejected",
            Self::RegisteredExternally => "grant.registered_externally",
            Self::Extended => "grant.extended",
            Self::Downgraded => "grant.downgraded",
            Self::Expired => "grant.expired",
            Self::Deleted => "grant.deleted",
            Self::ExternalRegistrationCorrected => "grant.external_registration_corrected",
            Self::ExternalRegistrationCleared => "grant.external_registration_cleared",
            Self::Reregistered => "grant.reregistered",
            Self::FlaggedForReview => "grant.flagged_for_review",
            Self::ReviewResolved => "grant.review_resolved",
            Self::JobItemFailed => "grant.job_item_failed",
        }
    }
}

impl FromStr for GrantAuditAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "grant.requested" => Ok(Self::Requested),
            "grant.approved" => Ok(Self::Approved),
            "grant.rejected" => Ok(Self::Rejected),
            "grant.registered_externally" => Ok(Self::RegisteredExternally),
            "grant.extended" => Ok(Self::Extended),
            "grant.downgraded" => Ok(Self::Downgraded),
            "grant.expired" => Ok(Self::Expired),
            "grant.deleted" => Ok(Self::Deleted),
            "grant.external_registration_corrected" => Ok(Self::ExternalRegistrationCorrected),
            "grant.external_registration_cleared" => Ok(Self::ExternalRegistrationCleared),
            "grant.reregistered" => Ok(Self::Reregistered),
            "grant.flagged_for_review" => Ok(Self::FlaggedForReview),
            "grant.review_resolved" => Ok(Self::ReviewResolved),
            "grant.job_item_failed" => Ok(Self::JobItemFailed),
            _ => Err(AppError::Validation(format!(
                "unknown grant audit action '{value}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::GrantAuditAction;

    #[test]
    fn audit_action_storage_value_parses_back() {
        let action = GrantAuditAction::ExternalRegistrationCleared;
        let restored = GrantAuditAction::from_str(action.as_str());
        assert!(matches!(restored, Ok(value) if value == action));
    }

    #[test]
    fn unknown_audit_action_is_rejected() {
        assert!(GrantAuditAction::from_str("grant.teleported").is_err());
    }
}
