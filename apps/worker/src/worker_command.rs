use std::str::FromStr;

use chrono::{DateTime, Utc};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{GrantId, JobKind, Role};

const USAGE: &str = "usage: grantwarden-worker [serve | run-once [job] | migrate | status \
| send-test <subject> | request <subject> <resource_id> <role> | approve <grant_id> \
| reject <grant_id> [reason] | extend <grant_id> <rfc3339> \
| resolve-review <grant_id> <note> | audit <grant_id>]";

/// Mode selected by the first command-line argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    Serve,
    RunOnce(Option<JobKind>),
    Migrate,
    Status,
    SendTest(String),
    Request {
        subject: String,
        resource_id: String,
        role: Role,
    },
    Approve(GrantId),
    Reject {
        grant_id: GrantId,
        reason: Option<String>,
    },
    Extend {
        grant_id: GrantId,
        new_expires_at: DateTime<Utc>,
    },
    ResolveReview {
        grant_id: GrantId,
        note: String,
    },
    Audit(GrantId),
}

impl WorkerCommand {
    pub fn parse(args: impl IntoIterator<Item = String>) -> AppResult<Self> {
        let args: Vec<String> = args.into_iter().collect();
        let argument = |index: usize, name: &str| argument_at(&args, index, name);

        let command = match args.first().map(String::as_str) {
            None | Some("serve") => Self::Serve,
            Some("run-once") => Self::RunOnce(
                args.get(1)
                    .map(|value| JobKind::from_str(value.as_str()))
                    .transpose()?,
            ),
            Some("migrate") => Self::Migrate,
            Some("status") => Self::Status,
            Some("send-test") => Self::SendTest(argument(1, "subject")?.to_owned()),
            Some("request") => Self::Request {
                subject: argument(1, "subject")?.to_owned(),
                resource_id: argument(2, "resource_id")?.to_owned(),
                role: Role::from_str(argument(3, "role")?)?,
            },
            Some("approve") => Self::Approve(GrantId::parse(argument(1, "grant_id")?)?),
            Some("reject") => Self::Reject {
                grant_id: GrantId::parse(argument(1, "grant_id")?)?,
                reason: joined_tail(&args, 2),
            },
            Some("extend") => {
                let value = argument(2, "rfc3339")?;
                let new_expires_at = DateTime::parse_from_rfc3339(value)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|error| {
                        AppError::Validation(format!("invalid expiry '{value}': {error}"))
                    })?;

                Self::Extend {
                    grant_id: GrantId::parse(argument(1, "grant_id")?)?,
                    new_expires_at,
                }
            }
            Some("resolve-review") => Self::ResolveReview {
                grant_id: GrantId::parse(argument(1, "grant_id")?)?,
                note: joined_tail(&args, 2)
                    .ok_or_else(|| AppError::Validation(format!("missing <note>; {USAGE}")))?,
            },
            Some("audit") => Self::Audit(GrantId::parse(argument(1, "grant_id")?)?),
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "unknown command '{other}'; {USAGE}"
                )));
            }
        };

        Ok(command)
    }
}

fn argument_at<'a>(args: &'a [String], index: usize, name: &str) -> AppResult<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| AppError::Validation(format!("missing <{name}>; {USAGE}")))
}

fn joined_tail(args: &[String], from: usize) -> Option<String> {
    let tail = args.get(from..)?.join(" ");
    (!tail.trim().is_empty()).then_some(tail)
}
