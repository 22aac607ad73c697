use std::sync::Arc;

use chrono::{DateTime, Utc};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{Grant, NotificationStatus, NotificationType, Subject};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::notification_ports::{
    MessageTransport, NotificationEvent, NotificationLogEntry, NotificationLogRepository,
    NotificationPayload,
};

/// Result of one dispatch request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The transport accepted the message and a `sent` entry was recorded.
    Sent,
    /// A `sent` entry already existed for the subject, type and day.
    AlreadySent,
}

/// Idempotent notification sender backed by the notification ledger.
#[derive(Clone)]
pub struct NotificationDispatcher {
    log: Arc<dyn NotificationLogRepository>,
    transport: Arc<dyn MessageTransport>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        log: Arc<dyn NotificationLogRepository>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self { log, transport }
    }

    /// Sends one notification unless an equivalent one was already sent today.
    pub async fn dispatch(
        &self,
        event: NotificationEvent,
        now: DateTime<Utc>,
    ) -> AppResult<DispatchOutcome> {
        let notification_type = event.notification_type;

        if notification_type.is_day_scoped()
            && self
                .log
                .has_sent_on(&event.subject, notification_type, now.date_naive())
                .await?
        {
            return Ok(DispatchOutcome::AlreadySent);
        }

        let payload = build_payload(notification_type, event.context);

        match self.transport.send(&event.subject, &payload).await {
            Ok(()) => {
                let entry = NotificationLogEntry {
                    subject: event.subject.clone(),
                    notification_type,
                    grant_id: event.grant_id,
                    sent_at: now,
                    status: NotificationStatus::Sent,
                    detail: None,
                };

                match self.log.append_entry(entry).await {
                    Ok(()) => {
                        info!(
                            subject = %event.subject,
                            notification_type = notification_type.as_str(),
                            "notification sent"
                        );
                        Ok(DispatchOutcome::Sent)
                    }
                    Err(AppError::Conflict(_)) => Ok(DispatchOutcome::AlreadySent),
                    Err(error) => Err(error),
                }
            }
            Err(send_error) => {
                let message = send_error.to_string();
                let entry = NotificationLogEntry {
                    subject: event.subject.clone(),
                    notification_type,
                    grant_id: event.grant_id,
                    sent_at: now,
                    status: NotificationStatus::Failed,
                    detail: Some(message.clone()),
                };

                if let Err(log_error) = self.log.append_entry(entry).await {
                    warn!(
                        subject = %event.subject,
                        notification_type = notification_type.as_str(),
                        error = %log_error,
                        "failed to record failed notification"
                    );
                }

                Err(AppError::Transport(format!(
                    "failed to send '{}' to '{}': {message}",
                    notification_type.as_str(),
                    event.subject
                )))
            }
        }
    }

    /// Sends a test message to check the transport configuration.
    pub async fn send_test(
        &self,
        subject: Subject,
        now: DateTime<Utc>,
    ) -> AppResult<DispatchOutcome> {
        let mut context = Map::new();
        context.insert("sent_at".to_owned(), Value::String(now.to_rfc3339()));

        self.dispatch(
            NotificationEvent {
                subject,
                notification_type: NotificationType::Test,
                grant_id: None,
                context,
            },
            now,
        )
        .await
    }
}

/// Builds the template merge fields describing one grant.
#[must_use]
pub fn grant_context(grant: &Grant) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert(
        "grant_id".to_owned(),
        Value::String(grant.id().to_string()),
    );
    context.insert(
        "subject".to_owned(),
        Value::String(grant.subject().as_str().to_owned()),
    );
    context.insert(
        "resource_id".to_owned(),
        Value::String(grant.resource_id().as_str().to_owned()),
    );
    context.insert(
        "role".to_owned(),
        Value::String(grant.role().as_str().to_owned()),
    );
    if let Some(expires_at) = grant.expires_at() {
        context.insert(
            "expires_at".to_owned(),
            Value::String(expires_at.to_rfc3339()),
        );
    }
    context
}

fn build_payload(
    notification_type: NotificationType,
    context: Map<String, Value>,
) -> NotificationPayload {
    let template = notification_type.template();
    NotificationPayload {
        notification_type,
        template_key: template.template_key.to_owned(),
        subject_line: template.subject_line.to_owned(),
        fields: context,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use grantwarden_core::AppError;
    use grantwarden_domain::{ExpiryThreshold, NotificationStatus, NotificationType, Subject};
    use serde_json::Map;

    use super::{DispatchOutcome, NotificationDispatcher};
    use crate::notification_ports::{NotificationEvent, NotificationLogRepository};
    use crate::test_support::{FakeNotificationLog, RecordingTransport, at};

    fn subject() -> Subject {
        Subject::new("alice@example.com").unwrap_or_else(|_| panic!("subject should be valid"))
    }

    fn warning_event() -> NotificationEvent {
        NotificationEvent {
            subject: subject(),
            notification_type: NotificationType::ExpiryWarning(ExpiryThreshold::Days7),
            grant_id: None,
            context: Map::new(),
        }
    }

    #[tokio::test]
    async fn day_scoped_notification_is_sent_once_per_day() {
        let log = Arc::new(FakeNotificationLog::default());
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(log.clone(), transport.clone());

        let first = dispatcher.dispatch(warning_event(), at(2026, 5, 4, 2)).await;
        let second = dispatcher.dispatch(warning_event(), at(2026, 5, 4, 9)).await;
        let next_day = dispatcher.dispatch(warning_event(), at(2026, 5, 5, 2)).await;

        assert!(matches!(first, Ok(DispatchOutcome::Sent)));
        assert!(matches!(second, Ok(DispatchOutcome::AlreadySent)));
        assert!(matches!(next_day, Ok(DispatchOutcome::Sent)));
        assert_eq!(transport.sent_count().await, 2);
    }

    #[tokio::test]
    async fn transport_failure_is_logged_and_reported() {
        let log = Arc::new(FakeNotificationLog::default());
        let transport = Arc::new(RecordingTransport::failing());
        let dispatcher = NotificationDispatcher::new(log.clone(), transport);

        let result = dispatcher.dispatch(warning_event(), at(2026, 5, 4, 2)).await;
        assert!(matches!(result, Err(AppError::Transport(_))));

        let entries = log
            .list_entries_for_subject(&subject())
            .await
            .unwrap_or_else(|_| panic!("entries should load"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, NotificationStatus::Failed);
        assert!(entries[0].detail.is_some());
    }

    #[tokio::test]
    async fn test_notifications_are_not_deduplicated() {
        let log = Arc::new(FakeNotificationLog::default());
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(log, transport.clone());

        for hour in [1, 2] {
            let result = dispatcher.send_test(subject(), at(2026, 5, 4, hour)).await;
            assert!(matches!(result, Ok(DispatchOutcome::Sent)));
        }
        assert_eq!(transport.sent_count().await, 2);
    }

    #[tokio::test]
    async fn payload_uses_fixed_template() {
        let log = Arc::new(FakeNotificationLog::default());
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(log, transport.clone());

        let _ = dispatcher.dispatch(warning_event(), at(2026, 5, 4, 2)).await;

        let payloads = transport.payloads().await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].1.template_key, "expiry_warning");
        assert_eq!(payloads[0].1.subject_line, "Your access expires in 7 days");
    }
}
