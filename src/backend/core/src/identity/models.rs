//! Identity data models: users, organizations and request payloads.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::rbac::RoleType;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Store-assigned user identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Store-assigned organization identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub i64);

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrganizationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// User
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of account. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    #[default]
    Internal,
    Demo,
    ApiKey,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL",
            Self::Demo => "DEMO",
            Self::ApiKey => "API_KEY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INTERNAL" => Some(Self::Internal),
            "DEMO" => Some(Self::Demo),
            "API_KEY" => Some(Self::ApiKey),
            _ => None,
        }
    }

    /// Human accounts must carry a name and a contact address.
    pub fn requires_contact_details(&self) -> bool {
        !matches!(self, Self::ApiKey)
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user as held by the store.
///
/// Memberships live in the membership index, not on the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub user_type: UserType,
    pub enabled: bool,
    pub valid_to: Option<DateTime<Utc>>,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
    pub description: Option<String>,
    pub roles: BTreeSet<RoleType>,
    /// SHA-256 hex digest of the API-key or demo-login secret.
    pub secret_hash: Option<String>,
}

impl UserRecord {
    /// Enabled and not past `valid_to`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.valid_to.map_or(true, |valid_to| valid_to > now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_api_key(&self) -> bool {
        self.user_type == UserType::ApiKey
    }
}

/// Wire view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub enabled: bool,
    pub valid_to: Option<DateTime<Utc>>,
    pub valid_to_epoch_second: Option<i64>,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
    pub description: Option<String>,
    pub roles: Vec<RoleType>,
    pub member_of: Vec<Organization>,
}

impl User {
    /// Project a stored record plus its organizations onto the wire shape.
    pub fn from_record(record: UserRecord, member_of: Vec<Organization>) -> Self {
        Self {
            id: record.id,
            user_type: record.user_type,
            enabled: record.enabled,
            valid_to_epoch_second: record.valid_to.map(|t| t.timestamp()),
            valid_to: record.valid_to,
            username: record.username,
            first_name: record.first_name,
            last_name: record.last_name,
            email_address: record.email_address,
            description: record.description,
            roles: record.roles.into_iter().collect(),
            member_of,
        }
    }
}

/// Identity of the calling principal, as shown by the console header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: UserId,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
    pub description: Option<String>,
    /// Highest-ranked assigned role.
    pub role: RoleType,
}

impl UserInfo {
    /// `None` only for records that violate the non-empty roles invariant.
    pub fn from_record(record: &UserRecord) -> Option<Self> {
        let role = record.roles.iter().next().copied()?;
        Some(Self {
            id: record.id,
            user_type: record.user_type,
            username: record.username.clone(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            email_address: record.email_address.clone(),
            description: record.description.clone(),
            role,
        })
    }
}

/// Selection applied by `list_users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter {
    All,
    ExcludeApiKeys,
    OnlyApiKeys,
    MemberOf(OrganizationId),
}

impl UserFilter {
    /// Type-based part of the filter. Membership is resolved by the store.
    pub fn matches_type(&self, user_type: UserType) -> bool {
        match self {
            Self::All | Self::MemberOf(_) => true,
            Self::ExcludeApiKeys => user_type != UserType::ApiKey,
            Self::OnlyApiKeys => user_type == UserType::ApiKey,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Reference to an organization by id; other fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRef {
    pub id: OrganizationId,
}

/// Payload for creating a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(rename = "type", default)]
    pub user_type: UserType,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleType>,
    #[serde(default)]
    pub member_of: Vec<OrganizationRef>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to_epoch_second: Option<i64>,
}

/// Resolved, validated user ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDraft {
    pub user_type: UserType,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
    pub description: Option<String>,
    pub roles: BTreeSet<RoleType>,
    pub valid_to: Option<DateTime<Utc>>,
    pub secret_hash: Option<String>,
    pub member_of: Vec<OrganizationId>,
}

/// Payload for updating a user.
///
/// Absent fields are left unchanged. For nullable fields an explicit
/// `null` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub id: UserId,
    #[serde(rename = "type", default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub first_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub last_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub email_address: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub roles: Option<Vec<RoleType>>,
    #[serde(default)]
    pub member_of: Option<Vec<OrganizationRef>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub valid_to: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub valid_to_epoch_second: Option<Option<i64>>,
}

/// Distinguishes an explicit `null` from an absent field.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Convert epoch seconds to a UTC instant.
pub fn epoch_to_datetime(epoch_second: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch_second, 0).single()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organization
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub email: String,
    pub description: String,
    pub slug: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrganization {
    pub name: String,
    pub email: String,
    pub description: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUpdate {
    pub id: OrganizationId,
    pub name: String,
    pub email: String,
    pub description: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Validated organization fields ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationDraft {
    pub name: String,
    pub email: String,
    pub description: String,
    pub slug: String,
    pub external_id: Option<String>,
}
