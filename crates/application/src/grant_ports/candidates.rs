use chrono::{DateTime, Duration, NaiveTime, Utc};
use grantwarden_domain::{EDITOR_DOWNGRADE_GRACE_DAYS, Grant, GrantStatus, JobKind, Role};

/// Days ahead of `as_of` covered by the expiry-warning candidate window.
const EXPIRY_WARNING_WINDOW_DAYS: i64 = 31;

/// Exclusive upper bound for expiry-warning candidates: midnight UTC after the
/// furthest staged threshold.
#[must_use]
pub fn expiry_warning_window_end(as_of: DateTime<Utc>) -> DateTime<Utc> {
    let start_of_day = as_of.date_naive().and_time(NaiveTime::MIN).and_utc();
    start_of_day + Duration::days(EXPIRY_WARNING_WINDOW_DAYS)
}

/// Returns whether `grant` belongs to the candidate set of `job_kind` at `as_of`.
///
/// Every store computes candidates from durable fields with exactly these rules.
#[must_use]
pub fn matches_candidate(grant: &Grant, job_kind: JobKind, as_of: DateTime<Utc>) -> bool {
    match job_kind {
        JobKind::ExpiryWarning => {
            grant.status() == GrantStatus::Active
                && grant.expires_at().is_some_and(|expires_at| {
                    expires_at >= as_of && expires_at < expiry_warning_window_end(as_of)
                })
        }
        JobKind::Downgrade => {
            grant.status() == GrantStatus::Active
                && !grant.needs_manual_review()
                && grant.role() == Role::Editor
                && grant.granted_at().is_some_and(|granted_at| {
                    granted_at <= as_of - Duration::days(EDITOR_DOWNGRADE_GRACE_DAYS)
                })
        }
        JobKind::ExpiryCleanup => match grant.status() {
            GrantStatus::Active => grant
                .expires_at()
                .is_some_and(|expires_at| expires_at < as_of),
            GrantStatus::Expired => !grant.needs_manual_review(),
            _ => false,
        },
        JobKind::Reconciliation => {
            grant.status() == GrantStatus::Active && !grant.needs_manual_review()
        }
    }
}
