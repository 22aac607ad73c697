use chrono::{DateTime, TimeZone, Utc};
use grantwarden_application::{NotificationLogEntry, NotificationLogRepository};
use grantwarden_core::AppError;
use grantwarden_domain::{ExpiryThreshold, NotificationStatus, NotificationType, Subject};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresNotificationLogRepository;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres notification log tests: {error}");
    }

    Some(pool)
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("valid timestamp"))
}

fn unique_subject() -> Subject {
    Subject::new(format!("{}@example.com", uuid::Uuid::new_v4()))
        .unwrap_or_else(|error| panic!("valid subject: {error}"))
}

fn entry(
    subject: &Subject,
    notification_type: NotificationType,
    sent_at: DateTime<Utc>,
    status: NotificationStatus,
) -> NotificationLogEntry {
    NotificationLogEntry {
        subject: subject.clone(),
        notification_type,
        grant_id: None,
        sent_at,
        status,
        detail: (status == NotificationStatus::Failed).then(|| "smtp unavailable".to_owned()),
    }
}

#[tokio::test]
async fn day_scoped_type_is_sent_once_per_day() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresNotificationLogRepository::new(pool);
    let subject = unique_subject();
    let warning = NotificationType::ExpiryWarning(ExpiryThreshold::Days7);

    let first = repository
        .append_entry(entry(&subject, warning, at(4, 2), NotificationStatus::Sent))
        .await;
    assert!(first.is_ok());

    let second = repository
        .append_entry(entry(&subject, warning, at(4, 20), NotificationStatus::Sent))
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let next_day = repository
        .append_entry(entry(&subject, warning, at(5, 2), NotificationStatus::Sent))
        .await;
    assert!(next_day.is_ok());

    let sent_today = repository
        .has_sent_on(&subject, warning, at(4, 0).date_naive())
        .await
        .unwrap_or_else(|error| panic!("lookup should succeed: {error}"));
    assert!(sent_today);
}

#[tokio::test]
async fn failed_attempts_do_not_block_a_later_send() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresNotificationLogRepository::new(pool);
    let subject = unique_subject();

    for hour in [2, 3] {
        let failed = repository
            .append_entry(entry(
                &subject,
                NotificationType::Expired,
                at(6, hour),
                NotificationStatus::Failed,
            ))
            .await;
        assert!(failed.is_ok());
    }

    let sent = repository
        .has_sent_on(&subject, NotificationType::Expired, at(6, 0).date_naive())
        .await
        .unwrap_or_else(|error| panic!("lookup should succeed: {error}"));
    assert!(!sent);

    let retry = repository
        .append_entry(entry(
            &subject,
            NotificationType::Expired,
            at(6, 4),
            NotificationStatus::Sent,
        ))
        .await;
    assert!(retry.is_ok());

    let entries = repository
        .list_entries_for_subject(&subject)
        .await
        .unwrap_or_else(|error| panic!("entries should load: {error}"));
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].status, NotificationStatus::Sent);
    assert_eq!(entries[2].detail.as_deref(), Some("smtp unavailable"));
}

#[tokio::test]
async fn admin_alerts_are_not_deduplicated() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresNotificationLogRepository::new(pool);
    let subject = unique_subject();

    for hour in [2, 3] {
        let result = repository
            .append_entry(entry(
                &subject,
                NotificationType::AdminAlert,
                at(7, hour),
                NotificationStatus::Sent,
            ))
            .await;
        assert!(result.is_ok());
    }
}
