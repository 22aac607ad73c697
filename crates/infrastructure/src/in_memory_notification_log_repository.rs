use async_trait::async_trait;
use chrono::NaiveDate;
use grantwarden_application::{NotificationLogEntry, NotificationLogRepository};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{NotificationStatus, NotificationType, Subject};
use tokio::sync::RwLock;

/// In-memory notification ledger with the same day-scoped uniqueness rule as
/// the PostgreSQL table.
#[derive(Debug, Default)]
pub struct InMemoryNotificationLogRepository {
    entries: RwLock<Vec<NotificationLogEntry>>,
}

impl InMemoryNotificationLogRepository {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_sent_on(
    entry: &NotificationLogEntry,
    subject: &Subject,
    notification_type: NotificationType,
    day: NaiveDate,
) -> bool {
    entry.status == NotificationStatus::Sent
        && &entry.subject == subject
        && entry.notification_type == notification_type
        && entry.sent_at.date_naive() == day
}

#[async_trait]
impl NotificationLogRepository for InMemoryNotificationLogRepository {
    async fn has_sent_on(
        &self,
        subject: &Subject,
        notification_type: NotificationType,
        day: NaiveDate,
    ) -> AppResult<bool> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .any(|entry| is_sent_on(entry, subject, notification_type, day)))
    }

    async fn append_entry(&self, entry: NotificationLogEntry) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        let day = entry.sent_at.date_naive();

        if entry.status == NotificationStatus::Sent
            && entry.notification_type.is_day_scoped()
            && entries
                .iter()
                .any(|stored| is_sent_on(stored, &entry.subject, entry.notification_type, day))
        {
            return Err(AppError::Conflict(format!(
                "'{}' was already sent to '{}' on {day}",
                entry.notification_type.as_str(),
                entry.subject
            )));
        }

        entries.push(entry);
        Ok(())
    }

    async fn list_entries_for_subject(
        &self,
        subject: &Subject,
    ) -> AppResult<Vec<NotificationLogEntry>> {
        let entries = self.entries.read().await;
        // Insertion order breaks ties, so walk backwards before the stable sort.
        let mut values: Vec<NotificationLogEntry> = entries
            .iter()
            .rev()
            .filter(|entry| &entry.subject == subject)
            .cloned()
            .collect();
        values.sort_by(|left, right| right.sent_at.cmp(&left.sent_at));

        Ok(values)
    }
}
