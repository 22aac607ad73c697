//! In-memory fakes shared by service tests.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{
    BindingRef, ExternalBindingUpdate, Grant, GrantAuditAction, GrantId, GrantMutation,
    GrantStatus, JobKind, NotificationStatus, NotificationType, ResourceId, Role, Subject,
};
use tokio::sync::Mutex;

use crate::external_binding_ports::{ExternalApiError, ExternalBindingClient};
use crate::grant_ports::{
    ExtendGrantInput, GrantAuditEvent, GrantRepository, GrantTransition, ReviewFlagInput,
    matches_candidate,
};
use crate::notification_ports::{
    MessageTransport, NotificationLogEntry, NotificationLogRepository, NotificationPayload,
};
use crate::scheduler_ports::{Clock, JobRunReport, JobRunRepository};

pub(crate) fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("valid timestamp"))
}

pub(crate) fn active_grant(
    subject: &str,
    resource_id: &str,
    role: Role,
    granted_at: DateTime<Utc>,
) -> Grant {
    active_grant_expiring(subject, resource_id, role, granted_at, granted_at + Duration::days(30))
}

pub(crate) fn active_grant_expiring(
    subject: &str,
    resource_id: &str,
    role: Role,
    granted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Grant {
    let subject = Subject::new(subject).unwrap_or_else(|_| panic!("subject should be valid"));
    let resource_id =
        ResourceId::new(resource_id).unwrap_or_else(|_| panic!("resource id should be valid"));

    Grant::request(subject, resource_id, role, granted_at)
        .transitioned(
            GrantStatus::Active,
            &GrantMutation {
                granted_at: Some(granted_at),
                expires_at: Some(expires_at),
                ..GrantMutation::default()
            },
        )
        .unwrap_or_else(|error| panic!("grant should activate: {error}"))
}

pub(crate) fn registered(grant: Grant, binding_ref: &str) -> Grant {
    let binding_ref =
        BindingRef::new(binding_ref).unwrap_or_else(|_| panic!("binding ref should be valid"));

    grant
        .transitioned(
            GrantStatus::Active,
            &GrantMutation {
                external_binding: Some(ExternalBindingUpdate::Registered(binding_ref)),
                ..GrantMutation::default()
            },
        )
        .unwrap_or_else(|error| panic!("grant should register: {error}"))
}

#[derive(Default)]
pub(crate) struct FakeGrantRepository {
    grants: Mutex<Vec<Grant>>,
    audit: Mutex<Vec<GrantAuditEvent>>,
    writes: Mutex<usize>,
    failing_transitions: Mutex<Vec<GrantId>>,
}

impl FakeGrantRepository {
    pub(crate) async fn insert(&self, grant: Grant) {
        self.grants.lock().await.push(grant);
    }

    pub(crate) async fn get(&self, grant_id: GrantId) -> Grant {
        self.grants
            .lock()
            .await
            .iter()
            .find(|grant| grant.id() == grant_id)
            .cloned()
            .unwrap_or_else(|| panic!("grant '{grant_id}' should exist"))
    }

    pub(crate) async fn write_count(&self) -> usize {
        *self.writes.lock().await
    }

    pub(crate) async fn audit_actions(&self, grant_id: GrantId) -> Vec<GrantAuditAction> {
        self.audit
            .lock()
            .await
            .iter()
            .filter(|event| event.grant_id == grant_id)
            .map(|event| event.action)
            .collect()
    }

    pub(crate) async fn fail_transitions_for(&self, grant_id: GrantId) {
        self.failing_transitions.lock().await.push(grant_id);
    }

    pub(crate) async fn allow_transitions_for(&self, grant_id: GrantId) {
        self.failing_transitions
            .lock()
            .await
            .retain(|failing| *failing != grant_id);
    }

    async fn store(&self, grant: Grant) {
        let mut grants = self.grants.lock().await;
        if let Some(slot) = grants.iter_mut().find(|stored| stored.id() == grant.id()) {
            *slot = grant;
        }
        *self.writes.lock().await += 1;
    }
}

#[async_trait]
impl GrantRepository for FakeGrantRepository {
    async fn create(&self, grant: Grant, actor: &Actor) -> AppResult<Grant> {
        let mut grants = self.grants.lock().await;
        if grant.status() == GrantStatus::Active
            && grants.iter().any(|stored| {
                stored.status() == GrantStatus::Active
                    && stored.subject() == grant.subject()
                    && stored.resource_id() == grant.resource_id()
            })
        {
            return Err(AppError::Conflict(format!(
                "active grant already exists for '{}' on '{}'",
                grant.subject(),
                grant.resource_id()
            )));
        }

        grants.push(grant.clone());
        *self.writes.lock().await += 1;
        self.audit.lock().await.push(GrantAuditEvent {
            grant_id: grant.id(),
            actor: actor.clone(),
            action: GrantAuditAction::Requested,
            from_status: None,
            to_status: Some(grant.status()),
            detail: None,
            occurred_at: grant.requested_at(),
        });

        Ok(grant)
    }

    async fn find_by_id(&self, grant_id: GrantId) -> AppResult<Option<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .find(|grant| grant.id() == grant_id)
            .cloned())
    }

    async fn transition(&self, transition: GrantTransition) -> AppResult<Grant> {
        if self
            .failing_transitions
            .lock()
            .await
            .contains(&transition.grant_id)
        {
            return Err(AppError::Internal("simulated store outage".to_owned()));
        }

        let current = self
            .find_by_id(transition.grant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("grant '{}'", transition.grant_id)))?;

        if current.status() != transition.from_status {
            return Err(AppError::Conflict(format!(
                "grant '{}' is '{}', expected '{}'",
                current.id(),
                current.status().as_str(),
                transition.from_status.as_str()
            )));
        }

        let next = current.transitioned(transition.to_status, &transition.mutation)?;
        if next.status() == GrantStatus::Active
            && current.status() != GrantStatus::Active
            && self.grants.lock().await.iter().any(|stored| {
                stored.id() != next.id()
                    && stored.status() == GrantStatus::Active
                    && stored.subject() == next.subject()
                    && stored.resource_id() == next.resource_id()
            })
        {
            return Err(AppError::Conflict(format!(
                "active grant already exists for '{}' on '{}'",
                next.subject(),
                next.resource_id()
            )));
        }

        self.store(next.clone()).await;
        self.audit.lock().await.push(GrantAuditEvent {
            grant_id: next.id(),
            actor: transition.actor,
            action: transition.action,
            from_status: Some(transition.from_status),
            to_status: Some(transition.to_status),
            detail: transition.detail,
            occurred_at: transition.occurred_at,
        });

        Ok(next)
    }

    async fn find_candidates(
        &self,
        job_kind: JobKind,
        as_of: DateTime<Utc>,
    ) -> AppResult<Vec<Grant>> {
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|grant| matches_candidate(grant, job_kind, as_of))
            .cloned()
            .collect())
    }

    async fn extend(&self, input: ExtendGrantInput) -> AppResult<Grant> {
        let current = self
            .find_by_id(input.grant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("grant '{}'", input.grant_id)))?;
        let next = current.extended(input.new_expires_at, input.max_extensions)?;
        self.store(next.clone()).await;
        self.audit.lock().await.push(input.audit_event(&current, &next));

        Ok(next)
    }

    async fn record_notification_sent(
        &self,
        grant_id: GrantId,
        sent_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let current = self
            .find_by_id(grant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("grant '{grant_id}'")))?;
        self.store(current.with_notification_sent(sent_at)).await;
        Ok(())
    }

    async fn set_review_flag(&self, input: ReviewFlagInput) -> AppResult<Grant> {
        let current = self
            .find_by_id(input.grant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("grant '{}'", input.grant_id)))?;
        let next = current.with_manual_review(input.needs_manual_review);
        self.store(next.clone()).await;
        self.audit.lock().await.push(GrantAuditEvent {
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

        Ok(next)
    }

    async fn append_audit_event(&self, event: GrantAuditEvent) -> AppResult<()> {
        self.audit.lock().await.push(event);
        Ok(())
    }

    async fn list_audit_trail(&self, grant_id: GrantId) -> AppResult<Vec<GrantAuditEvent>> {
        Ok(self
            .audit
            .lock()
            .await
            .iter()
            .filter(|event| event.grant_id == grant_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeNotificationLog {
    entries: Mutex<Vec<NotificationLogEntry>>,
}

impl FakeNotificationLog {
    pub(crate) async fn sent_count(&self, notification_type: NotificationType) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| {
                entry.status == NotificationStatus::Sent
                    && entry.notification_type == notification_type
            })
            .count()
    }
}

#[async_trait]
impl NotificationLogRepository for FakeNotificationLog {
    async fn has_sent_on(
        &self,
        subject: &Subject,
        notification_type: NotificationType,
        day: chrono::NaiveDate,
    ) -> AppResult<bool> {
        Ok(self.entries.lock().await.iter().any(|entry| {
            entry.status == NotificationStatus::Sent
                && &entry.subject == subject
                && entry.notification_type == notification_type
                && entry.sent_at.date_naive() == day
        }))
    }

    async fn append_entry(&self, entry: NotificationLogEntry) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        if entry.status == NotificationStatus::Sent
            && entry.notification_type.is_day_scoped()
            && entries.iter().any(|stored| {
                stored.status == NotificationStatus::Sent
                    && stored.subject == entry.subject
                    && stored.notification_type == entry.notification_type
                    && stored.sent_at.date_naive() == entry.sent_at.date_naive()
            })
        {
            return Err(AppError::Conflict("notification already sent today".to_owned()));
        }

        entries.push(entry);
        Ok(())
    }

    async fn list_entries_for_subject(
        &self,
        subject: &Subject,
    ) -> AppResult<Vec<NotificationLogEntry>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .rev()
            .filter(|entry| &entry.subject == subject)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<(Subject, NotificationPayload)>>,
    failing: bool,
}

impl RecordingTransport {
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub(crate) async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub(crate) async fn payloads(&self) -> Vec<(Subject, NotificationPayload)> {
        self.sent.lock().await.clone()
    }

    pub(crate) async fn sent_types(&self) -> Vec<NotificationType> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(_, payload)| payload.notification_type)
            .collect()
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send(&self, recipient: &Subject, payload: &NotificationPayload) -> AppResult<()> {
        if self.failing {
            return Err(AppError::Transport("smtp relay refused message".to_owned()));
        }

        self.sent
            .lock()
            .await
            .push((recipient.clone(), payload.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeExternalBindings {
    bindings: Mutex<HashMap<(String, String), (BindingRef, String)>>,
    failures: Mutex<HashMap<String, ExternalApiError>>,
    create_failures: Mutex<HashMap<String, ExternalApiError>>,
    calls: Mutex<Vec<&'static str>>,
    next_id: Mutex<u32>,
}

impl FakeExternalBindings {
    pub(crate) async fn seed(&self, subject: &str, resource_id: &str, binding_ref: &str) {
        let binding_ref =
            BindingRef::new(binding_ref).unwrap_or_else(|_| panic!("binding ref should be valid"));
        self.bindings.lock().await.insert(
            (subject.to_owned(), resource_id.to_owned()),
            (binding_ref, "seeded".to_owned()),
        );
    }

    pub(crate) async fn binding(
        &self,
        subject: &str,
        resource_id: &str,
    ) -> Option<(BindingRef, String)> {
        self.bindings
            .lock()
            .await
            .get(&(subject.to_owned(), resource_id.to_owned()))
            .cloned()
    }

    /// Makes every call for `subject` fail with `error`.
    pub(crate) async fn fail_for(&self, subject: &str, error: ExternalApiError) {
        self.failures.lock().await.insert(subject.to_owned(), error);
    }

    /// Makes only `create` calls for `subject` fail with `error`.
    pub(crate) async fn fail_create_for(&self, subject: &str, error: ExternalApiError) {
        self.create_failures
            .lock()
            .await
            .insert(subject.to_owned(), error);
    }

    pub(crate) async fn clear_failures(&self) {
        self.failures.lock().await.clear();
        self.create_failures.lock().await.clear();
    }

    pub(crate) async fn create_count(&self) -> usize {
        self.count("create").await
    }

    pub(crate) async fn delete_count(&self) -> usize {
        self.count("delete").await
    }

    async fn count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|recorded| **recorded == call)
            .count()
    }

    async fn check_failure(&self, subject: &str) -> Result<(), ExternalApiError> {
        match self.failures.lock().await.get(subject) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExternalBindingClient for FakeExternalBindings {
    async fn create(
        &self,
        resource_id: &ResourceId,
        subject: &Subject,
        external_role_id: &str,
    ) -> Result<BindingRef, ExternalApiError> {
        self.calls.lock().await.push("create");
        self.check_failure(subject.as_str()).await?;
        if let Some(error) = self.create_failures.lock().await.get(subject.as_str()) {
            return Err(error.clone());
        }

        let binding_id = {
            let mut next_id = self.next_id.lock().await;
            *next_id += 1;
            *next_id
        };
        let binding_ref = BindingRef::new(format!("{resource_id}/accessBindings/{binding_id}"))
            .map_err(|error| ExternalApiError::with_status(400, error.to_string()))?;
        self.bindings.lock().await.insert(
            (subject.as_str().to_owned(), resource_id.as_str().to_owned()),
            (binding_ref.clone(), external_role_id.to_owned()),
        );

        Ok(binding_ref)
    }

    async fn find(
        &self,
        subject: &Subject,
        resource_id: &ResourceId,
    ) -> Result<Option<BindingRef>, ExternalApiError> {
        self.calls.lock().await.push("find");
        self.check_failure(subject.as_str()).await?;

        Ok(self
            .binding(subject.as_str(), resource_id.as_str())
            .await
            .map(|(binding_ref, _)| binding_ref))
    }

    async fn delete(&self, binding_ref: &BindingRef) -> Result<(), ExternalApiError> {
        self.calls.lock().await.push("delete");

        let owner = self
            .bindings
            .lock()
            .await
            .iter()
            .find(|(_, (stored, _))| stored == binding_ref)
            .map(|(key, _)| key.clone());
        let Some(key) = owner else {
            return Err(ExternalApiError::with_status(404, "binding not found"));
        };

        self.check_failure(key.0.as_str()).await?;
        self.bindings.lock().await.remove(&key);

        Ok(())
    }
}

pub(crate) struct FixedClock {
    now: StdMutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub(crate) fn set(&self, now: DateTime<Utc>) {
        *self
            .now
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .now
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
pub(crate) struct FakeJobRuns {
    runs: Mutex<Vec<JobRunReport>>,
}

impl FakeJobRuns {
    pub(crate) async fn runs(&self) -> Vec<JobRunReport> {
        self.runs.lock().await.clone()
    }
}

#[async_trait]
impl JobRunRepository for FakeJobRuns {
    async fn record_run(&self, report: JobRunReport) -> AppResult<()> {
        self.runs.lock().await.push(report);
        Ok(())
    }

    async fn last_completed_run(&self, job_kind: JobKind) -> AppResult<Option<JobRunReport>> {
        Ok(self
            .runs
            .lock()
            .await
            .iter()
            .rev()
            .find(|report| report.job_kind == job_kind && report.is_complete())
            .cloned())
    }
}
