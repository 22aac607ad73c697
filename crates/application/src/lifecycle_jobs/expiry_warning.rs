use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_core::AppResult;
use grantwarden_domain::{
    DailyCadence, ExpiryThreshold, Grant, GrantStatus, JobKind, NotificationType,
};
use serde_json::Value;

use crate::notification_dispatcher::{DispatchOutcome, grant_context};
use crate::notification_ports::NotificationEvent;

use super::{ItemOutcome, LifecycleDependencies, LifecycleJob};

/// Sends staged reminders 30, 7 and 1 days before expiry and on the day itself.
pub struct ExpiryWarningJob {
    dependencies: LifecycleDependencies,
    cadence: DailyCadence,
}

impl ExpiryWarningJob {
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
impl LifecycleJob for ExpiryWarningJob {
    fn kind(&self) -> JobKind {
        JobKind::ExpiryWarning
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
        if grant.status() != GrantStatus::Active || grant.is_past_expiry(as_of) {
            return Ok(ItemOutcome::Unchanged);
        }

        let Some(threshold) = grant
            .days_until_expiry(as_of)
            .and_then(ExpiryThreshold::from_days_remaining)
        else {
            return Ok(ItemOutcome::Unchanged);
        };

        let mut context = grant_context(grant);
        context.insert(
            "days_remaining".to_owned(),
            Value::from(threshold.days()),
        );

        let outcome = self
            .dependencies
            .dispatcher
            .dispatch(
                NotificationEvent {
                    subject: grant.subject().clone(),
                    notification_type: NotificationType::ExpiryWarning(threshold),
                    grant_id: Some(grant.id()),
                    context,
                },
                as_of,
            )
            .await?;

        match outcome {
            DispatchOutcome::Sent => {
                self.dependencies
                    .grants
                    .record_notification_sent(grant.id(), as_of)
                    .await?;
                Ok(ItemOutcome::Changed)
            }
            DispatchOutcome::AlreadySent => Ok(ItemOutcome::Unchanged),
        }
    }
}
