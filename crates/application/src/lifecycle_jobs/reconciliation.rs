use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{DailyCadence, Grant, JobKind};

use crate::reconciliation_service::ReconciliationService;

use super::{ItemOutcome, LifecycleDependencies, LifecycleJob, flag_for_review};

/// Runs reconciliation over every active grant not waiting on manual review.
///
/// A permanent external failure flags the grant so later passes skip it.
pub struct ReconciliationJob {
    dependencies: LifecycleDependencies,
    service: ReconciliationService,
    cadence: DailyCadence,
}

impl ReconciliationJob {
    /// Creates the job.
    #[must_use]
    pub fn new(dependencies: LifecycleDependencies, cadence: DailyCadence) -> Self {
        let service = ReconciliationService::new(
            dependencies.grants.clone(),
            dependencies.external_bindings.clone(),
            dependencies.role_policy.clone(),
        );

        Self {
            dependencies,
            service,
            cadence,
        }
    }
}

#[async_trait]
impl LifecycleJob for ReconciliationJob {
    fn kind(&self) -> JobKind {
        JobKind::Reconciliation
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
        if grant.needs_manual_review() {
            return Ok(ItemOutcome::Unchanged);
        }

        let outcome = match self.service.reconcile_grant(grant, as_of).await {
            Ok(outcome) => outcome,
            Err(error @ AppError::ExternalPermanent(_)) => {
                flag_for_review(
                    &self.dependencies,
                    self.kind(),
                    grant,
                    format!("reconciliation failed permanently: {error}"),
                    as_of,
                )
                .await?;
                return Err(error);
            }
            Err(error) => return Err(error),
        };

        Ok(if outcome.is_change() {
            ItemOutcome::Changed
        } else {
            ItemOutcome::Unchanged
        })
    }
}
