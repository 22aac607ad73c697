use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use grantwarden_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// The four lifecycle jobs run by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Staged reminders before expiry.
    ExpiryWarning,
    /// Lowers editor grants past the grace period.
    Downgrade,
    /// Expires grants and removes external bindings.
    ExpiryCleanup,
    /// Corrects drift in external registration state.
    Reconciliation,
}

impl JobKind {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpiryWarning => "expiry_warning",
            Self::Downgrade => "downgrade",
            Self::ExpiryCleanup => "expiry_cleanup",
            Self::Reconciliation => "reconciliation",
        }
    }

    /// Returns all job kinds in default execution order.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[JobKind] = &[
            JobKind::ExpiryWarning,
            JobKind::Downgrade,
            JobKind::ExpiryCleanup,
            JobKind::Reconciliation,
        ];

        ALL
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "expiry_warning" => Ok(Self::ExpiryWarning),
            "downgrade" => Ok(Self::Downgrade),
            "expiry_cleanup" => Ok(Self::ExpiryCleanup),
            "reconciliation" => Ok(Self::Reconciliation),
            _ => Err(AppError::Validation(format!("unknown job kind '{value}'"))),
        }
    }
}

/// Once-a-day cadence anchored at a UTC wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCadence {
    run_at: NaiveTime,
}

impl DailyCadence {
    /// Creates a cadence firing daily at `run_at` (UTC).
    #[must_use]
    pub fn new(run_at: NaiveTime) -> Self {
        Self { run_at }
    }

    /// Parses an `HH:MM` value.
    pub fn parse(value: &str) -> AppResult<Self> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map(Self::new)
            .map_err(|error| {
                AppError::Validation(format!("invalid daily run time '{value}': {error}"))
            })
    }

    /// Returns the configured wall-clock time.
    #[must_use]
    pub fn run_at(&self) -> NaiveTime {
        self.run_at
    }

    /// Returns the most recent slot at or before `now`.
    #[must_use]
    pub fn latest_slot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.run_at).and_utc();
        if today <= now {
            today
        } else {
            today - Duration::days(1)
        }
    }

    /// Returns the first slot strictly after `now`.
    #[must_use]
    pub fn next_slot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.latest_slot(now) + Duration::days(1)
    }

    /// Returns true when the last completed run started before the latest slot.
    ///
    /// Only one catch-up run happens after downtime; missed days are not replayed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>, last_started_at: Option<DateTime<Utc>>) -> bool {
        last_started_at.is_none_or(|started_at| started_at < self.latest_slot(now))
    }
}
