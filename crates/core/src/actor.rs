use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Origin of a grant mutation as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Actor {
    /// A lifecycle scheduler job, identified by its stable job name.
    Scheduler(String),
    /// A human operator or approver, identified by subject.
    User(String),
    /// Internal system process outside the scheduler.
    System,
}

impl Actor {
    /// Creates an actor for a scheduler job.
    #[must_use]
    pub fn scheduler(job_name: impl Into<String>) -> Self {
        Self::Scheduler(job_name.into())
    }

    /// Creates an actor for a human user.
    #[must_use]
    pub fn user(subject: impl Into<String>) -> Self {
        Self::User(subject.into())
    }

    /// Returns the stable storage value, e.g. `scheduler:downgrade`.
    #[must_use]
    pub fn as_storage_value(&self) -> String {
        match self {
            Self::Scheduler(job_name) => format!("scheduler:{job_name}"),
            Self::User(subject) => format!("user:{subject}"),
            Self::System => "system".to_owned(),
        }
    }

    /// Parses a stored actor value. Unknown prefixes fall back to a user actor.
    #[must_use]
    pub fn from_storage_value(value: &str) -> Self {
        if value == "system" {
            return Self::System;
        }

        match value.split_once(':') {
            Some(("scheduler", job_name)) => Self::Scheduler(job_name.to_owned()),
            Some(("user", subject)) => Self::User(subject.to_owned()),
            _ => Self::User(value.to_owned()),
        }
    }
}

impl Display for Actor {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_storage_value().as_str())
    }
}
