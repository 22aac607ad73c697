use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantwarden_application::{
    ExtendGrantInput, GrantAuditEvent, GrantRepository, GrantTransition, ReviewFlagInput,
    matches_candidate,
};
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{Grant, GrantAuditAction, GrantId, GrantStatus, JobKind};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct GrantState {
    grants: HashMap<GrantId, Grant>,
    audit_events: Vec<GrantAuditEvent>,
}

impl GrantState {
    fn ensure_single_active(&self, candidate: &Grant) -> AppResult<()> {
        if candidate.status() != GrantStatus::Active {
            return Ok(());
        }

        let duplicate = self.grants.values().any(|stored| {
            stored.id() != candidate.id()
                && stored.status() == GrantStatus::Active
                && stored.subject() == candidate.subject()
                && stored.resource_id() == candidate.resource_id()
        });

        if duplicate {
            return Err(AppError::Conflict(format!(
                "active grant already exists for '{}' on '{}'",
                candidate.subject(),
                candidate.resource_id()
            )));
        }

        Ok(())
    }

    fn grant(&self, grant_id: GrantId) -> AppResult<&Grant> {
        self.grants
            .get(&grant_id)
            .ok_or_else(|| AppError::NotFound(format!("grant '{grant_id}' does not exist")))
    }
}

/// In-memory grant store.
///
/// A single write lock covers the status check, the update and the audit
/// append, so every change is atomic.
#[derive(Debug, Default)]
pub struct InMemoryGrantRepository {
    state: RwLock<GrantState>,
}

impl InMemoryGrantRepository {
    /// Creates an empty in-memory grant store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantRepository for InMemoryGrantRepository {
    async fn create(&self, grant: Grant, actor: &Actor) -> AppResult<Grant> {
        let mut state = self.state.write().await;

        if state.grants.contains_key(&grant.id()) {
            return Err(AppError::Conflict(format!(
                "grant '{}' already exists",
                grant.id()
            )));
        }
        state.ensure_single_active(&grant)?;

        state.audit_events.push(GrantAuditEvent {
            grant_id: grant.id(),
            actor: actor.clone(),
            action: GrantAuditAction::Requested,
            from_status: None,
            to_status: Some(grant.status()),
            detail: None,
            occurred_at: grant.requested_at(),
        });
        state.grants.insert(grant.id(), grant.clone());

        Ok(grant)
    }

    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>> {
        Ok(self.state.read().await.grants.get(&grant_id).cloned())
    }

    async fn transition(&self, transition: GrantTransition) -> AppResult<Grant> {
        let mut state = self.state.write().await;
        let current = state.grant(transition.grant_id)?;

        if current.status() != transition.from_status {
            return Err(AppError::Conflict(format!(
                "grant '{}' is '{}', expected '{}'",
                current.id(),
                current.status().as_str(),
                transition.from_status.as_str()
            )));
        }

        let next = current.transitioned(transition.to_status, &transition.mutation)?;
        state.ensure_single_active(&next)?;

        state.audit_events.push(GrantAuditEvent {
            grant_id: next.id(),
            actor: transition.actor,
            action: transition.action,
            from_status: Some(transition.from_status),
            to_status: Some(transition.to_status),
            detail: transition.detail,
            occurred_at: transition.occurred_at,
        });
        state.grants.insert(next.id(), next.clone());

        Ok(next)
    }

    async fn find_candidates(
        &self,
        job_kind: JobKind,
        as_of: DateTime<Utc>,
    ) -> AppResult<Vec<Grant>> {
        let state = self.state.read().await;
        let mut candidates: Vec<Grant> = state
            .grants
            .values()
            .filter(|grant| matches_candidate(grant, job_kind, as_of))
            .cloned()
            .collect();
        candidates.sort_by(|left, right| {
            left.requested_at()
                .cmp(&right.requested_at())
                .then_with(|| left.id().cmp(&right.id()))
        });

        Ok(candidates)
    }

    async fn extend(&self, input: ExtendGrantInput) -> AppResult<Grant> {
        let mut state = self.state.write().await;
        let current = state.grant(input.grant_id)?.clone();
        let next = current.extended(input.new_expires_at, input.max_extensions)?;

        state.audit_events.push(input.audit_event(&current, &next));
        state.grants.insert(next.id(), next.clone());

        Ok(next)
    }

    async fn record_notification_sent(
        &self,
        grant_id: GrantId,
        sent_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let next = state.grant(grant_id)?.with_notification_sent(sent_at);
        state.grants.insert(grant_id, next);

        Ok(())
    }

    async fn set_review_flag(&self, input: ReviewFlagInput) -> AppResult<Grant> {
        let mut state = self.state.write().await;
        let next = state
            .grant(input.grant_id)?
            .with_manual_review(input.needs_manual_review);

        state.audit_events.push(GrantAuditEvent {
            grant_id: next.id(),
            actor: input.actor,
            action: if input.needs_manual_review {
                GrantAuditAction::FlaggedForReview
            } else {
                GrantAuditAction::ReviewResolved
            },
            from_status: None,
            to_status: None,
            detail: Some(input.detail),
            occurred_at: input.occurred_at,
        });
        state.grants.insert(next.id(), next.clone());

        Ok(next)
    }

    async fn append_audit_event(&self, event: GrantAuditEvent) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.grant(event.grant_id)?;
        state.audit_events.push(event);

        Ok(())
    }

    async fn list_audit_trail(&self, grant_id: GrantId) -> AppResult<Vec<GrantAuditEvent>> {
        Ok(self
            .state
            .read()
            .await
            .audit_events
            .iter()
            .filter(|event| event.grant_id == grant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use grantwarden_application::{ExtendGrantInput, GrantRepository, GrantTransition};
    use grantwarden_core::{Actor, AppError};
    use grantwarden_domain::{
        Grant, GrantAuditAction, GrantMutation, GrantStatus, JobKind, ResourceId, Role, Subject,
    };

    use super::InMemoryGrantRepository;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"))
    }

    fn pending(role: Role) -> Grant {
        Grant::request(
            Subject::new("analyst@example.com")
                .unwrap_or_else(|error| panic!("valid subject: {error}")),
            ResourceId::new("properties/1001")
                .unwrap_or_else(|error| panic!("valid resource: {error}")),
            role,
            at(1, 8),
        )
    }

    fn approval(grant: &Grant, granted_at: DateTime<Utc>) -> GrantTransition {
        GrantTransition {
            grant_id: grant.id(),
            from_status: GrantStatus::PendingApproval,
            to_status: GrantStatus::Active,
            mutation: GrantMutation {
                granted_at: Some(granted_at),
                expires_at: Some(granted_at + Duration::days(30)),
                ..GrantMutation::default()
            },
            actor: Actor::user("approver@example.com"),
            action: GrantAuditAction::Approved,
            detail: None,
            occurred_at: granted_at,
        }
    }

    #[tokio::test]
    async fn only_one_grant_per_pair_can_be_active() {
        let repository = InMemoryGrantRepository::new();
        let actor = Actor::user("analyst@example.com");
        let first = repository
            .create(pending(Role::Viewer), &actor)
            .await
            .unwrap_or_else(|error| panic!("create should succeed: {error}"));
        let second = repository
            .create(pending(Role::Editor), &actor)
            .await
            .unwrap_or_else(|error| panic!("create should succeed: {error}"));

        let approved = repository.transition(approval(&first, at(1, 9))).await;
        assert!(approved.is_ok());

        let conflicting = repository.transition(approval(&second, at(1, 10))).await;
        assert!(matches!(conflicting, Err(AppError::Conflict(_))));

        let trail = repository
            .list_audit_trail(second.id())
            .await
            .unwrap_or_else(|error| panic!("audit trail should load: {error}"));
        assert_eq!(trail.len(), 1);
    }

    #[tokio::test]
    async fn stale_status_loses_the_race() {
        let repository = InMemoryGrantRepository::new();
        let grant = repository
            .create(pending(Role::Viewer), &Actor::System)
            .await
            .unwrap_or_else(|error| panic!("create should succeed: {error}"));

        let first = repository.transition(approval(&grant, at(1, 9))).await;
        let second = repository.transition(approval(&grant, at(1, 9))).await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn candidates_are_ordered_by_request_time() {
        let repository = InMemoryGrantRepository::new();
        let mut ids = Vec::new();
        for (offset, resource) in ["properties/3", "properties/1", "properties/2"]
            .into_iter()
            .enumerate()
        {
            let grant = Grant::request(
                Subject::new("analyst@example.com")
                    .unwrap_or_else(|error| panic!("valid subject: {error}")),
                ResourceId::new(resource).unwrap_or_else(|error| panic!("valid resource: {error}")),
                Role::Viewer,
                at(1, 8) + Duration::minutes(i64::try_from(offset).unwrap_or_default()),
            );
            let grant = repository
                .create(grant, &Actor::System)
                .await
                .unwrap_or_else(|error| panic!("create should succeed: {error}"));
            repository
                .transition(approval(&grant, at(1, 9)))
                .await
                .unwrap_or_else(|error| panic!("approval should succeed: {error}"));
            ids.push(grant.id());
        }

        let candidates = repository
            .find_candidates(JobKind::Reconciliation, at(2, 3))
            .await
            .unwrap_or_else(|error| panic!("candidates should load: {error}"));
        let candidate_ids: Vec<_> = candidates.iter().map(Grant::id).collect();
        assert_eq!(candidate_ids, ids);
    }

    #[tokio::test]
    async fn extension_records_previous_and_new_expiry() {
        let repository = InMemoryGrantRepository::new();
        let grant = repository
            .create(pending(Role::Viewer), &Actor::System)
            .await
            .unwrap_or_else(|error| panic!("create should succeed: {error}"));
        repository
            .transition(approval(&grant, at(1, 9)))
            .await
            .unwrap_or_else(|error| panic!("approval should succeed: {error}"));

        let extended = repository
            .extend(ExtendGrantInput {
                grant_id: grant.id(),
                new_expires_at: at(31, 9) + Duration::days(10),
                max_extensions: 3,
                actor: Actor::user("approver@example.com"),
                occurred_at: at(20, 9),
            })
            .await
            .unwrap_or_else(|error| panic!("extension should succeed: {error}"));
        assert_eq!(extended.extension_count(), 1);

        let trail = repository
            .list_audit_trail(grant.id())
            .await
            .unwrap_or_else(|error| panic!("audit trail should load: {error}"));
        let last = trail
            .last()
            .unwrap_or_else(|| panic!("extension should be audited"));
        assert_eq!(last.action, GrantAuditAction::Extended);
        assert_eq!(
            last.detail.as_deref(),
            Some("expiry moved from 2026-05-31T09:00:00+00:00 to 2026-06-10T09:00:00+00:00")
        );
    }
}
