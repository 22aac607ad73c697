//! Grant entity, role ladder and status state machine.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use grantwarden_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days an editor grant keeps its role before the downgrade job lowers it.
pub const EDITOR_DOWNGRADE_GRACE_DAYS: i64 = 7;

/// Unique identifier for a grant record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantId(Uuid);

impl GrantId {
    /// Creates a new random grant identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a grant identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Parses a textual grant identifier.
    pub fn parse(value: &str) -> AppResult<Self> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|_| AppError::Validation(format!("invalid grant id '{value}'")))
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GrantId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identity a grant is issued to, normalized to lowercase.
///
/// Normalization happens at construction so every comparison, including the
/// active-grant uniqueness check, is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject(String);

impl Subject {
    /// Creates a validated, normalized subject.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let normalized = value.trim().to_lowercase();

        if normalized.is_empty() {
            return Err(AppError::Validation(
                "subject must not be empty".to_owned(),
            ));
        }

        if normalized.chars().any(char::is_whitespace) {
            return Err(AppError::Validation(format!(
                "subject '{normalized}' must not contain whitespace"
            )));
        }

        if normalized.len() > 254 {
            return Err(AppError::Validation(
                "subject must not exceed 254 characters".to_owned(),
            ));
        }

        Ok(Self(normalized))
    }

    /// Returns the normalized subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Identifier of the external resource (analytics property) a grant targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(NonEmptyString);

impl ResourceId {
    /// Creates a validated resource identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value).map(Self)
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Opaque reference returned by the external system for one role binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingRef(NonEmptyString);

impl BindingRef {
    /// Creates a validated binding reference.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value).map(Self)
    }

    /// Returns the reference string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for BindingRef {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Role ladder. Declaration order is privilege order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Read access with analysis features.
    Analyst,
    /// Configuration write access.
    Editor,
    /// Full administrative access.
    Admin,
}

impl Role {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Analyst => "analyst",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }

    /// Returns all roles from least to most privileged.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Role] = &[Role::Viewer, Role::Analyst, Role::Editor, Role::Admin];

        ALL
    }

    /// Returns the next rung below this role, if any.
    #[must_use]
    pub fn next_lower(&self) -> Option<Self> {
        match self {
            Self::Viewer => None,
            Self::Analyst => Some(Self::Viewer),
            Self::Editor => Some(Self::Analyst),
            Self::Admin => Some(Self::Editor),
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "viewer" => Ok(Self::Viewer),
            "analyst" => Ok(Self::Analyst),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            _ => Err(AppError::Validation(format!("unknown role '{value}'"))),
        }
    }
}

/// Lifecycle status of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Requested and waiting for the approval collaborator.
    PendingApproval,
    /// Approved and in effect.
    Active,
    /// Declined by the approval collaborator.
    Rejected,
    /// Past its expiry; external binding removal may still be outstanding.
    Expired,
    /// Expired and external binding removed.
    Deleted,
}

impl GrantStatus {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        }
    }

    /// Returns true when no job or collaborator may move the grant further.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Deleted)
    }

    /// Returns whether the state machine allows moving from `self` to `next`.
    ///
    /// `active -> active` is the in-place transition used by downgrade and
    /// registration corrections.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::PendingApproval, Self::Active)
                | (Self::PendingApproval, Self::Rejected)
                | (Self::Active, Self::Active)
                | (Self::Active, Self::Expired)
                | (Self::Expired, Self::Deleted)
        )
    }
}

impl FromStr for GrantStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending_approval" => Ok(Self::PendingApproval),
            "active" => Ok(Self::Active),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "deleted" => Ok(Self::Deleted),
            _ => Err(AppError::Validation(format!(
                "unknown grant status '{value}'"
            ))),
        }
    }
}

/// Change to the external registration fields applied with a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalBindingUpdate {
    /// A binding exists externally under the given reference.
    Registered(BindingRef),
    /// No binding is believed to exist.
    Cleared,
}

/// Field changes applied together with a status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantMutation {
    /// Lowered role (downgrade only).
    pub role: Option<Role>,
    /// Grant timestamp set on approval.
    pub granted_at: Option<DateTime<Utc>>,
    /// Expiry timestamp set on approval.
    pub expires_at: Option<DateTime<Utc>>,
    /// External registration change.
    pub external_binding: Option<ExternalBindingUpdate>,
    /// Re-registration flag change.
    pub needs_reregistration: Option<bool>,
    /// Manual review flag change.
    pub needs_manual_review: Option<bool>,
}

impl GrantMutation {
    /// Returns true when the mutation changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Raw persisted grant fields used to hydrate a [`Grant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRecord {
    /// Stable id.
    pub id: GrantId,
    /// Subject identity.
    pub subject: String,
    /// External resource identifier.
    pub resource_id: String,
    /// Stored role value.
    pub role: Role,
    /// Stored status value.
    pub status: GrantStatus,
    /// Request timestamp.
    pub requested_at: DateTime<Utc>,
    /// Approval timestamp.
    pub granted_at: Option<DateTime<Utc>>,
    /// Expiry timestamp.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether a binding is believed to exist externally.
    pub externally_registered: bool,
    /// External binding reference.
    pub external_binding_ref: Option<String>,
    /// Number of expiry extensions applied.
    pub extension_count: u32,
    /// Last staged notification timestamp.
    pub last_notification_sent: Option<DateTime<Utc>>,
    /// Re-registration flag.
    pub needs_reregistration: bool,
    /// Manual review flag.
    pub needs_manual_review: bool,
}

/// One subject's time-bound role on one external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    id: GrantId,
    subject: Subject,
    resource_id: ResourceId,
    role: Role,
    status: GrantStatus,
    requested_at: DateTime<Utc>,
    granted_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    externally_registered: bool,
    external_binding_ref: Option<BindingRef>,
    extension_count: u32,
    last_notification_sent: Option<DateTime<Utc>>,
    needs_reregistration: bool,
    needs_manual_review: bool,
}

impl Grant {
    /// Creates a new grant waiting for approval.
    #[must_use]
    pub fn request(
        subject: Subject,
        resource_id: ResourceId,
        role: Role,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GrantId::new(),
            subject,
            resource_id,
            role,
            status: GrantStatus::PendingApproval,
            requested_at,
            granted_at: None,
            expires_at: None,
            externally_registered: false,
            external_binding_ref: None,
            extension_count: 0,
            last_notification_sent: None,
            needs_reregistration: false,
            needs_manual_review: false,
        }
    }

    /// Hydrates a grant from persisted fields and checks structural invariants.
    pub fn from_record(record: GrantRecord) -> AppResult<Self> {
        let grant = Self {
            id: record.id,
            subject: Subject::new(record.subject)?,
            resource_id: ResourceId::new(record.resource_id)?,
            role: record.role,
            status: record.status,
            requested_at: record.requested_at,
            granted_at: record.granted_at,
            expires_at: record.expires_at,
            externally_registered: record.externally_registered,
            external_binding_ref: record
                .external_binding_ref
                .map(BindingRef::new)
                .transpose()?,
            extension_count: record.extension_count,
            last_notification_sent: record.last_notification_sent,
            needs_reregistration: record.needs_reregistration,
            needs_manual_review: record.needs_manual_review,
        };
        grant.check_invariants()?;

        Ok(grant)
    }

    /// Returns the stable id.
    #[must_use]
    pub fn id(&self) -> GrantId {
        self.id
    }

    /// Returns the subject.
    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Returns the external resource identifier.
    #[must_use]
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    /// Returns the current role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> GrantStatus {
        self.status
    }

    /// Returns the request timestamp.
    #[must_use]
    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    /// Returns the approval timestamp.
    #[must_use]
    pub fn granted_at(&self) -> Option<DateTime<Utc>> {
        self.granted_at
    }

    /// Returns the expiry timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns whether a binding is believed to exist externally.
    #[must_use]
    pub fn externally_registered(&self) -> bool {
        self.externally_registered
    }

    /// Returns the external binding reference.
    #[must_use]
    pub fn external_binding_ref(&self) -> Option<&BindingRef> {
        self.external_binding_ref.as_ref()
    }

    /// Returns the number of applied extensions.
    #[must_use]
    pub fn extension_count(&self) -> u32 {
        self.extension_count
    }

    /// Returns the last staged notification timestamp.
    #[must_use]
    pub fn last_notification_sent(&self) -> Option<DateTime<Utc>> {
        self.last_notification_sent
    }

    /// Returns whether reconciliation should re-create the external binding.
    #[must_use]
    pub fn needs_reregistration(&self) -> bool {
        self.needs_reregistration
    }

    /// Returns whether an operator must look at this grant.
    #[must_use]
    pub fn needs_manual_review(&self) -> bool {
        self.needs_manual_review
    }

    /// Returns true for an active editor grant at least the grace period old.
    #[must_use]
    pub fn is_downgrade_eligible(&self, as_of: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active
            && self.role == Role::Editor
            && self.granted_at.is_some_and(|granted_at| {
                as_of - granted_at >= Duration::days(EDITOR_DOWNGRADE_GRACE_DAYS)
            })
    }

    /// Returns true for an active grant whose expiry lies before `as_of`.
    #[must_use]
    pub fn is_past_expiry(&self, as_of: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active
            && self.expires_at.is_some_and(|expires_at| expires_at < as_of)
    }

    /// Calendar days (UTC) between `as_of` and the expiry date.
    #[must_use]
    pub fn days_until_expiry(&self, as_of: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|expires_at| (expires_at.date_naive() - as_of.date_naive()).num_days())
    }

    /// Returns the grant after applying one state-machine transition.
    pub fn transitioned(&self, to_status: GrantStatus, mutation: &GrantMutation) -> AppResult<Self> {
        if !self.status.can_transition_to(to_status) {
            return Err(AppError::Validation(format!(
                "grant '{}' cannot transition from '{}' to '{}'",
                self.id,
                self.status.as_str(),
                to_status.as_str()
            )));
        }

        let mut next = self.clone();

        if let Some(role) = mutation.role {
            if !(self.status == GrantStatus::Active && to_status == GrantStatus::Active) {
                return Err(AppError::Validation(format!(
                    "grant '{}' role can only change while active",
                    self.id
                )));
            }
            if role >= self.role {
                return Err(AppError::Validation(format!(
                    "grant '{}' role change from '{}' to '{}' is not a downgrade",
                    self.id,
                    self.role.as_str(),
                    role.as_str()
                )));
            }
            next.role = role;
        }

        if let Some(granted_at) = mutation.granted_at {
            next.granted_at = Some(granted_at);
        }
        if let Some(expires_at) = mutation.expires_at {
            next.expires_at = Some(expires_at);
        }

        match &mutation.external_binding {
            Some(ExternalBindingUpdate::Registered(binding_ref)) => {
                next.externally_registered = true;
                next.external_binding_ref = Some(binding_ref.clone());
            }
            Some(ExternalBindingUpdate::Cleared) => {
                next.externally_registered = false;
                next.external_binding_ref = None;
            }
            None => {}
        }

        if let Some(flag) = mutation.needs_reregistration {
            next.needs_reregistration = flag;
        }
        if let Some(flag) = mutation.needs_manual_review {
            next.needs_manual_review = flag;
        }

        next.status = to_status;
        next.check_invariants()?;

        Ok(next)
    }

    /// Returns the grant with its expiry pushed out by one extension.
    pub fn extended(&self, new_expires_at: DateTime<Utc>, max_extensions: u32) -> AppResult<Self> {
        if self.status != GrantStatus::Active {
            return Err(AppError::Validation(format!(
                "grant '{}' must be active to extend, found '{}'",
                self.id,
                self.status.as_str()
            )));
        }

        if self
            .expires_at
            .is_some_and(|current| new_expires_at <= current)
        {
            return Err(AppError::Validation(format!(
                "grant '{}' new expiry must be later than the current expiry",
                self.id
            )));
        }

        let extension_count = self.extension_count.saturating_add(1);
        if extension_count > max_extensions {
            return Err(AppError::Validation(format!(
                "grant '{}' reached the extension cap of {max_extensions}",
                self.id
            )));
        }

        let mut next = self.clone();
        next.expires_at = Some(new_expires_at);
        next.extension_count = extension_count;

        Ok(next)
    }

    /// Returns the grant with the staged notification timestamp updated.
    #[must_use]
    pub fn with_notification_sent(&self, sent_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.last_notification_sent = Some(sent_at);
        next
    }

    /// Returns the grant with the manual review flag set to `flag`.
    #[must_use]
    pub fn with_manual_review(&self, flag: bool) -> Self {
        let mut next = self.clone();
        next.needs_manual_review = flag;
        next
    }

    fn check_invariants(&self) -> AppResult<()> {
        if self.status == GrantStatus::Active
            && (self.granted_at.is_none() || self.expires_at.is_none())
        {
            return Err(AppError::Validation(format!(
                "active grant '{}' requires granted_at and expires_at",
                self.id
            )));
        }

        if self.status == GrantStatus::Deleted && self.externally_registered {
            return Err(AppError::Validation(format!(
                "grant '{}' cannot be deleted while externally registered",
                self.id
            )));
        }

        if !self.externally_registered && self.external_binding_ref.is_some() {
            return Err(AppError::Validation(format!(
                "grant '{}' has a binding reference but is not externally registered",
                self.id
            )));
        }

        Ok(())
    }
}
