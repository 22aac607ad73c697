use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use grantwarden_core::AppResult;
use grantwarden_domain::{GrantId, NotificationStatus, NotificationType, Subject};
use serde_json::{Map, Value};

/// Request to notify one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    /// Recipient.
    pub subject: Subject,
    /// Notification to send.
    pub notification_type: NotificationType,
    /// Grant the notification is about, when grant-scoped.
    pub grant_id: Option<GrantId>,
    /// Merge data for the template.
    pub context: Map<String, Value>,
}

/// Template selection plus merge data handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    /// Notification being sent.
    pub notification_type: NotificationType,
    /// Stable template key.
    pub template_key: String,
    /// Message subject line.
    pub subject_line: String,
    /// Merge fields for the template.
    pub fields: Map<String, Value>,
}

/// One row of the append-only notification ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationLogEntry {
    /// Recipient.
    pub subject: Subject,
    /// Notification that was attempted.
    pub notification_type: NotificationType,
    /// Related grant, if any.
    pub grant_id: Option<GrantId>,
    /// Attempt timestamp.
    pub sent_at: DateTime<Utc>,
    /// Attempt outcome.
    pub status: NotificationStatus,
    /// Failure message for failed attempts.
    pub detail: Option<String>,
}

/// Append-only idempotency ledger for notifications.
#[async_trait]
pub trait NotificationLogRepository: Send + Sync {
    /// Returns whether a `sent` entry exists for the subject, type and UTC day.
    async fn has_sent_on(
        &self,
        subject: &Subject,
        notification_type: NotificationType,
        day: NaiveDate,
    ) -> AppResult<bool>;

    /// Inserts one entry.
    ///
    /// Fails with `Conflict` when a second `sent` entry would be written for a
    /// day-scoped type on the same day.
    async fn append_entry(&self, entry: NotificationLogEntry) -> AppResult<()>;

    /// Lists entries for one subject, newest first.
    async fn list_entries_for_subject(
        &self,
        subject: &Subject,
    ) -> AppResult<Vec<NotificationLogEntry>>;
}

/// Delivery channel for notifications.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Sends one message to `recipient`.
    async fn send(&self, recipient: &Subject, payload: &NotificationPayload) -> AppResult<()>;
}
