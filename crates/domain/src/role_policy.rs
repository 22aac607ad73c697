use chrono::Duration;
use grantwarden_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::Role;

/// Longest validity a role may be configured with, about ten years.
pub const MAX_VALIDITY_DAYS: u32 = 3650;

/// Policy row for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicyEntry {
    /// Days a grant stays valid from approval.
    pub validity_days: u32,
    /// Role identifier understood by the external system.
    pub external_role_id: String,
}

/// Validated role mapping table, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    entries: [RolePolicyEntry; 4],
}

impl RolePolicy {
    /// Builds a policy, requiring exactly one usable entry per role.
    pub fn new(entries: impl IntoIterator<Item = (Role, RolePolicyEntry)>) -> AppResult<Self> {
        let mut table: [Option<RolePolicyEntry>; 4] = Default::default();

        for (role, entry) in entries {
            if entry.validity_days == 0 || entry.validity_days > MAX_VALIDITY_DAYS {
                return Err(AppError::Validation(format!(
                    "role '{}' validity_days must be between 1 and {MAX_VALIDITY_DAYS}, found {}",
                    role.as_str(),
                    entry.validity_days
                )));
            }

            if entry.external_role_id.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "role '{}' external_role_id must not be empty",
                    role.as_str()
                )));
            }

            if table[slot(role)].replace(entry).is_some() {
                return Err(AppError::Validation(format!(
                    "role '{}' is configured more than once",
                    role.as_str()
                )));
            }
        }

        if let Some(missing) = Role::all()
            .iter()
            .find(|role| table[slot(**role)].is_none())
        {
            return Err(AppError::Validation(format!(
                "role '{}' has no policy entry",
                missing.as_str()
            )));
        }

        let [Some(viewer), Some(analyst), Some(editor), Some(admin)] = table else {
            return Err(AppError::Validation(
                "role policy is incomplete".to_owned(),
            ));
        };

        Ok(Self {
            entries: [viewer, analyst, editor, admin],
        })
    }

    /// Returns how long a grant for `role` stays valid.
    #[must_use]
    pub fn validity_period(&self, role: Role) -> Duration {
        Duration::days(i64::from(self.entry(role).validity_days))
    }

    /// Returns the external role identifier for `role`.
    #[must_use]
    pub fn external_role_id(&self, role: Role) -> &str {
        self.entry(role).external_role_id.as_str()
    }

    fn entry(&self, role: Role) -> &RolePolicyEntry {
        &self.entries[slot(role)]
    }
}

fn slot(role: Role) -> usize {
    match role {
        Role::Viewer => 0,
        Role::Analyst => 1,
        Role::Editor => 2,
        Role::Admin => 3,
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        let entry = |validity_days: u32, external_role_id: &str| RolePolicyEntry {
            validity_days,
            external_role_id: external_role_id.to_owned(),
        };

        Self {
            entries: [
                entry(90, "predefinedRoles/viewer"),
                entry(60, "predefinedRoles/analyst"),
                entry(30, "predefinedRoles/editor"),
                entry(14, "predefinedRoles/admin"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_VALIDITY_DAYS, RolePolicy, RolePolicyEntry};
    use crate::Role;

    fn entry(days: u32, id: &str) -> RolePolicyEntry {
        RolePolicyEntry {
            validity_days: days,
            external_role_id: id.to_owned(),
        }
    }

    #[test]
    fn default_policy_covers_every_role() {
        let policy = RolePolicy::default();
        for role in Role::all() {
            assert!(policy.validity_period(*role).num_days() > 0);
            assert!(!policy.external_role_id(*role).is_empty());
        }
    }

    #[test]
    fn missing_role_is_rejected() {
        let result = RolePolicy::new([
            (Role::Viewer, entry(90, "viewer")),
            (Role::Analyst, entry(60, "analyst")),
            (Role::Editor, entry(30, "editor")),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn zero_validity_is_rejected() {
        let result = RolePolicy::new([
            (Role::Viewer, entry(0, "viewer")),
            (Role::Analyst, entry(60, "analyst")),
            (Role::Editor, entry(30, "editor")),
            (Role::Admin, entry(14, "admin")),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn validity_beyond_cap_is_rejected() {
        let result = RolePolicy::new([
            (Role::Viewer, entry(u32::MAX, "viewer")),
            (Role::Analyst, entry(60, "analyst")),
            (Role::Editor, entry(30, "editor")),
            (Role::Admin, entry(14, "admin")),
        ]);
        assert!(result.is_err());

        let at_cap = RolePolicy::new([
            (Role::Viewer, entry(MAX_VALIDITY_DAYS, "viewer")),
            (Role::Analyst, entry(60, "analyst")),
            (Role::Editor, entry(30, "editor")),
            (Role::Admin, entry(14, "admin")),
        ]);
        assert!(at_cap.is_ok());
    }

    #[test]
    fn lookups_follow_configured_table() {
        let policy = RolePolicy::new([
            (Role::Viewer, entry(365, "roles/v")),
            (Role::Analyst, entry(60, "roles/a")),
            (Role::Editor, entry(7, "roles/e")),
            (Role::Admin, entry(1, "roles/x")),
        ])
        .unwrap_or_else(|error| panic!("policy should validate: {error}"));

        assert_eq!(policy.validity_period(Role::Viewer).num_days(), 365);
        assert_eq!(policy.external_role_id(Role::Editor), "roles/e");
    }
}
