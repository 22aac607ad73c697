//! Notification vocabulary shared by the dispatcher and its ledger.

use std::str::FromStr;

use grantwarden_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Staged reminder point before a grant expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryThreshold {
    /// Thirty calendar days remaining.
    Days30,
    /// Seven calendar days remaining.
    Days7,
    /// One calendar day remaining.
    Days1,
    /// Expires today.
    Today,
}

impl ExpiryThreshold {
    /// Maps a calendar-day count to the threshold it lands on exactly.
    ///
    /// Any other count, including negative ones, maps to `None`: a day that
    /// was missed by the scheduler is not caught up later.
    #[must_use]
    pub fn from_days_remaining(days: i64) -> Option<Self> {
        match days {
            30 => Some(Self::Days30),
            7 => Some(Self::Days7),
            1 => Some(Self::Days1),
            0 => Some(Self::Today),
            _ => None,
        }
    }

    /// Returns the day count this threshold represents.
    #[must_use]
    pub fn days(&self) -> i64 {
        match self {
            Self::Days30 => 30,
            Self::Days7 => 7,
            Self::Days1 => 1,
            Self::Today => 0,
        }
    }

    /// Returns all thresholds from farthest to nearest.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[ExpiryThreshold] = &[
            ExpiryThreshold::Days30,
            ExpiryThreshold::Days7,
            ExpiryThreshold::Days1,
            ExpiryThreshold::Today,
        ];

        ALL
    }
}

/// Closed set of notifications the lifecycle engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "threshold", rename_all = "snake_case")]
pub enum NotificationType {
    /// Sent when a grant becomes active.
    Welcome,
    /// Staged reminder before expiry.
    ExpiryWarning(ExpiryThreshold),
    /// Sent after an editor grant was lowered.
    Downgraded,
    /// Sent when a grant expired and access is being removed.
    Expired,
    /// Operator alert for grants needing manual review.
    AdminAlert,
    /// Operator-triggered transport check.
    Test,
}

/// Fixed template selection for one notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTemplate {
    /// Stable template key understood by transports.
    pub template_key: &'static str,
    /// Subject line for the message.
    pub subject_line: &'static str,
}

impl NotificationType {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::ExpiryWarning(ExpiryThreshold::Days30) => "expiry_30",
            Self::ExpiryWarning(ExpiryThreshold::Days7) => "expiry_7",
            Self::ExpiryWarning(ExpiryThreshold::Days1) => "expiry_1",
            Self::ExpiryWarning(ExpiryThreshold::Today) => "expiry_today",
            Self::Downgraded => "downgraded",
            Self::Expired => "expired",
            Self::AdminAlert => "admin_alert",
            Self::Test => "test",
        }
    }

    /// Returns whether at most one `sent` entry per subject and calendar day is allowed.
    #[must_use]
    pub fn is_day_scoped(&self) -> bool {
        !matches!(self, Self::AdminAlert | Self::Test)
    }

    /// Selects the fixed template for this notification type.
    #[must_use]
    pub fn template(&self) -> NotificationTemplate {
        match self {
            Self::Welcome => NotificationTemplate {
                template_key: "welcome",
                subject_line: "Your access has been granted",
            },
            Self::ExpiryWarning(ExpiryThreshold::Days30) => NotificationTemplate {
                template_key: "expiry_warning",
                subject_line: "Your access expires in 30 days",
            },
            Self::ExpiryWarning(ExpiryThreshold::Days7) => NotificationTemplate {
                template_key: "expiry_warning",
                subject_line: "Your access expires in 7 days",
            },
            Self::ExpiryWarning(ExpiryThreshold::Days1) => NotificationTemplate {
                template_key: "expiry_warning",
                subject_line: "Your access expires tomorrow",
            },
            Self::ExpiryWarning(ExpiryThreshold::Today) => NotificationTemplate {
                template_key: "expiry_warning",
                subject_line: "Your access expires today",
            },
            Self::Downgraded => NotificationTemplate {
                template_key: "downgraded",
                subject_line: "Your access level has been reduced",
            },
            Self::Expired => NotificationTemplate {
                template_key: "expired",
                subject_line: "Your access has expired",
            },
            Self::AdminAlert => NotificationTemplate {
                template_key: "admin_alert",
                subject_line: "Access grant requires manual review",
            },
            Self::Test => NotificationTemplate {
                template_key: "test",
                subject_line: "Test notification",
            },
        }
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "welcome" => Ok(Self::Welcome),
            "expiry_30" => Ok(Self::ExpiryWarning(ExpiryThreshold::Days30)),
            "expiry_7" => Ok(Self::ExpiryWarning(ExpiryThreshold::Days7)),
            "expiry_1" => Ok(Self::ExpiryWarning(ExpiryThreshold::Days1)),
            "expiry_today" => Ok(Self::ExpiryWarning(ExpiryThreshold::Today)),
            "downgraded" => Ok(Self::Downgraded),
            "expired" => Ok(Self::Expired),
            "admin_alert" => Ok(Self::AdminAlert),
            "test" => Ok(Self::Test),
            _ => Err(AppError::Validation(format!(
                "unknown notification type '{value}'"
            ))),
        }
    }
}

/// Outcome recorded for one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Transport accepted the message.
    Sent,
    /// Transport rejected the message.
    Failed,
}

impl NotificationStatus {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parses a storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown notification status '{value}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use proptest::prelude::*;

    use super::{ExpiryThreshold, NotificationType};

    #[test]
    fn thresholds_map_only_exact_days() {
        assert_eq!(
            ExpiryThreshold::from_days_remaining(30),
            Some(ExpiryThreshold::Days30)
        );
        assert_eq!(
            ExpiryThreshold::from_days_remaining(0),
            Some(ExpiryThreshold::Today)
        );
        assert_eq!(ExpiryThreshold::from_days_remaining(6), None);
        assert_eq!(ExpiryThreshold::from_days_remaining(-1), None);
    }

    #[test]
    fn storage_values_parse_back() {
        let mut types = vec![
            NotificationType::Welcome,
            NotificationType::Downgraded,
            NotificationType::Expired,
            NotificationType::AdminAlert,
            NotificationType::Test,
        ];
        types.extend(
            ExpiryThreshold::all()
                .iter()
                .copied()
                .map(NotificationType::ExpiryWarning),
        );

        for notification_type in types {
            let parsed = NotificationType::from_str(notification_type.as_str());
            assert!(matches!(parsed, Ok(value) if value == notification_type));
        }
    }

    #[test]
    fn operator_notifications_are_not_day_scoped() {
        assert!(!NotificationType::AdminAlert.is_day_scoped());
        assert!(!NotificationType::Test.is_day_scoped());
        assert!(NotificationType::ExpiryWarning(ExpiryThreshold::Days7).is_day_scoped());
    }

    proptest! {
        #[test]
        fn threshold_mapping_is_consistent_with_days(days in -400_i64..400) {
            match ExpiryThreshold::from_days_remaining(days) {
                Some(threshold) => prop_assert_eq!(threshold.days(), days),
                None => prop_assert!(![30, 7, 1, 0].contains(&days)),
            }
        }
    }
}
