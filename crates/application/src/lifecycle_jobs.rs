use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use grantwarden_core::{Actor, AppResult};
use grantwarden_domain::{DailyCadence, Grant, JobKind, NotificationType, RolePolicy, Subject};
use serde_json::Value;
use tracing::warn;

use crate::external_binding_ports::{ExternalApiError, ExternalBindingClient, ExternalErrorClass};
use crate::grant_ports::{GrantRepository, ReviewFlagInput};
use crate::notification_dispatcher::{NotificationDispatcher, grant_context};
use crate::notification_ports::NotificationEvent;

mod downgrade;
mod expiry_cleanup;
mod expiry_warning;
mod reconciliation;

pub use downgrade::DowngradeJob;
pub use expiry_cleanup::ExpiryCleanupJob;
pub use expiry_warning::ExpiryWarningJob;
pub use reconciliation::ReconciliationJob;

/// Result of processing one candidate grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// State or notifications changed.
    Changed,
    /// The grant needed nothing on this run.
    Unchanged,
}

/// One scheduled job over the grant population.
///
/// `process` must re-check its own precondition: the candidate set can be
/// stale by the time an item is handled.
#[async_trait]
pub trait LifecycleJob: Send + Sync {
    /// Returns the job kind.
    fn kind(&self) -> JobKind;

    /// Returns the daily cadence.
    fn cadence(&self) -> DailyCadence;

    /// Loads the candidate set for `as_of`.
    async fn candidates(&self, as_of: DateTime<Utc>) -> AppResult<Vec<Grant>>;

    /// Handles one candidate.
    async fn process(&self, grant: &Grant, as_of: DateTime<Utc>) -> AppResult<ItemOutcome>;
}

/// Collaborators shared by the lifecycle jobs.
#[derive(Clone)]
pub struct LifecycleDependencies {
    /// Grant store.
    pub grants: Arc<dyn GrantRepository>,
    /// External system of record.
    pub external_bindings: Arc<dyn ExternalBindingClient>,
    /// Notification dispatcher.
    pub dispatcher: NotificationDispatcher,
    /// Role policy table.
    pub role_policy: Arc<RolePolicy>,
    /// Operator receiving manual review alerts.
    pub admin_alert_recipient: Option<Subject>,
}

/// Daily run times for the four jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCadences {
    /// Expiry warning cadence.
    pub expiry_warning: DailyCadence,
    /// Downgrade cadence.
    pub downgrade: DailyCadence,
    /// Expiry cleanup cadence.
    pub expiry_cleanup: DailyCadence,
    /// Reconciliation cadence.
    pub reconciliation: DailyCadence,
}

impl Default for JobCadences {
    fn default() -> Self {
        Self {
            expiry_warning: daily_at(2, 0),
            downgrade: daily_at(2, 15),
            expiry_cleanup: daily_at(2, 30),
            reconciliation: daily_at(3, 30),
        }
    }
}

fn daily_at(hour: u32, minute: u32) -> DailyCadence {
    DailyCadence::new(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
}

/// Builds the four jobs in their default execution order.
#[must_use]
pub fn build_lifecycle_jobs(
    dependencies: LifecycleDependencies,
    cadences: JobCadences,
) -> Vec<Arc<dyn LifecycleJob>> {
    vec![
        Arc::new(ExpiryWarningJob::new(
            dependencies.clone(),
            cadences.expiry_warning,
        )),
        Arc::new(DowngradeJob::new(dependencies.clone(), cadences.downgrade)),
        Arc::new(ExpiryCleanupJob::new(
            dependencies.clone(),
            cadences.expiry_cleanup,
        )),
        Arc::new(ReconciliationJob::new(dependencies, cadences.reconciliation)),
    ]
}

/// Flags `grant` for manual review after a permanent external failure.
///
/// Sends an admin alert when a recipient is configured. A failed alert is
/// logged only; the flag is what keeps the grant out of later runs.
pub(crate) async fn flag_for_review(
    dependencies: &LifecycleDependencies,
    job_kind: JobKind,
    grant: &Grant,
    detail: String,
    as_of: DateTime<Utc>,
) -> AppResult<()> {
    dependencies
        .grants
        .set_review_flag(ReviewFlagInput {
            grant_id: grant.id(),
            needs_manual_review: true,
            actor: Actor::scheduler(job_kind.as_str()),
            detail: detail.clone(),
            occurred_at: as_of,
        })
        .await?;

    warn!(
        job = %job_kind,
        grant_id = %grant.id(),
        detail = %detail,
        "grant flagged for manual review"
    );

    let Some(recipient) = dependencies.admin_alert_recipient.clone() else {
        return Ok(());
    };

    let mut context = grant_context(grant);
    context.insert("job".to_owned(), Value::String(job_kind.as_str().to_owned()));
    context.insert("error".to_owned(), Value::String(detail));

    if let Err(alert_error) = dependencies
        .dispatcher
        .dispatch(
            NotificationEvent {
                subject: recipient,
                notification_type: NotificationType::AdminAlert,
                grant_id: Some(grant.id()),
                context,
            },
            as_of,
        )
        .await
    {
        warn!(
            grant_id = %grant.id(),
            error = %alert_error,
            "failed to send admin alert"
        );
    }

    Ok(())
}

/// Removes the external binding for `grant`.
///
/// Deletes by the stored reference, or looks the binding up first when no
/// reference is stored. A permanent delete failure is checked with a lookup:
/// a binding that is already gone counts as removed, and when the stored
/// reference is unknown but another binding exists, that binding is removed.
pub(crate) async fn remove_external_binding(
    client: &dyn ExternalBindingClient,
    grant: &Grant,
) -> Result<(), ExternalApiError> {
    let binding_ref = match grant.external_binding_ref() {
        Some(binding_ref) => binding_ref.clone(),
        None => match client.find(grant.subject(), grant.resource_id()).await? {
            Some(binding_ref) => binding_ref,
            None => return Ok(()),
        },
    };

    match client.delete(&binding_ref).await {
        Ok(()) => Ok(()),
        Err(error) if ExternalErrorClass::classify(&error) == ExternalErrorClass::Permanent => {
            match client.find(grant.subject(), grant.resource_id()).await {
                Ok(None) => Ok(()),
                Ok(Some(current)) if error.is_not_found() && current != binding_ref => {
                    client.delete(&current).await
                }
                _ => Err(error),
            }
        }
        Err(error) => Err(error),
    }
}
