//! Field rules for users and organizations.
//!
//! Everything here is pure: the store calls these before touching its
//! state, so a rejected request never reaches a transaction.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::models::{
    epoch_to_datetime, NewOrganization, NewUser, OrganizationDraft, OrganizationId,
    OrganizationUpdate, UserDraft, UserRecord, UserType, UserUpdate,
};
use crate::error::{CastellanError, Result};
use crate::rbac::RoleType;

/// Longest accepted username, in characters.
pub const MAX_USERNAME_LEN: usize = 255;

// ═══════════════════════════════════════════════════════════════════════════════
// Pre-compiled Regex Patterns
// ═══════════════════════════════════════════════════════════════════════════════

/// Email validation regex (RFC 5322 simplified).
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("Invalid email regex")
});

static SLUG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("Invalid slug regex")
});

// ═══════════════════════════════════════════════════════════════════════════════
// Scalars
// ═══════════════════════════════════════════════════════════════════════════════

/// Usernames are compared byte-for-byte, so they are never normalised.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(CastellanError::invalid_field("username", "must not be empty"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(CastellanError::invalid_field(
            "username",
            format!("must be at most {} characters", MAX_USERNAME_LEN),
        ));
    }
    if username.trim() != username {
        return Err(CastellanError::invalid_field(
            "username",
            "must not start or end with whitespace",
        ));
    }
    Ok(())
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value)
}

pub fn is_valid_slug(value: &str) -> bool {
    SLUG_REGEX.is_match(value)
}

/// Lowercase ASCII alphanumerics, every other run collapsed to one dash.
pub fn derive_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Reconcile the two wire representations of `validTo`.
pub fn resolve_valid_to(
    valid_to: Option<DateTime<Utc>>,
    valid_to_epoch_second: Option<i64>,
) -> Result<Option<DateTime<Utc>>> {
    match (valid_to, valid_to_epoch_second) {
        (None, None) => Ok(None),
        (Some(at), None) => Ok(Some(at)),
        (None, Some(epoch)) => epoch_to_datetime(epoch).map(Some).ok_or_else(|| {
            CastellanError::invalid_field("validToEpochSecond", "is out of range")
        }),
        (Some(at), Some(epoch)) if at.timestamp() == epoch => Ok(Some(at)),
        (Some(_), Some(_)) => Err(CastellanError::invalid_field(
            "validToEpochSecond",
            "does not match validTo",
        )),
    }
}

/// Trim, and treat blank as absent.
fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CastellanError::invalid_field(field, "is required"));
    }
    Ok(trimmed.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════════════════════════

pub fn validate_roles(user_type: UserType, roles: &[RoleType]) -> Result<BTreeSet<RoleType>> {
    let set: BTreeSet<RoleType> = roles.iter().copied().collect();
    if set.is_empty() {
        return Err(CastellanError::invalid_field("roles", "at least one role is required"));
    }
    if user_type == UserType::ApiKey && set.len() != 1 {
        return Err(CastellanError::invalid_field(
            "roles",
            "API keys carry exactly one role",
        ));
    }
    Ok(set)
}

fn validate_contact_details(
    user_type: UserType,
    first_name: &Option<String>,
    last_name: &Option<String>,
    email_address: &Option<String>,
) -> Result<()> {
    if let Some(email) = email_address {
        if !is_valid_email(email) {
            return Err(CastellanError::invalid_field(
                "emailAddress",
                "is not a valid email address",
            ));
        }
    }
    if !user_type.requires_contact_details() {
        return Ok(());
    }
    if first_name.is_none() {
        return Err(CastellanError::invalid_field("firstName", "is required"));
    }
    if last_name.is_none() {
        return Err(CastellanError::invalid_field("lastName", "is required"));
    }
    if email_address.is_none() {
        return Err(CastellanError::invalid_field("emailAddress", "is required"));
    }
    Ok(())
}

/// Validate a create payload into a draft the store can insert.
pub fn validate_new_user(new_user: NewUser) -> Result<UserDraft> {
    validate_username(&new_user.username)?;

    let first_name = normalize(new_user.first_name);
    let last_name = normalize(new_user.last_name);
    let email_address = normalize(new_user.email_address);
    validate_contact_details(new_user.user_type, &first_name, &last_name, &email_address)?;

    let roles = validate_roles(new_user.user_type, &new_user.roles)?;
    let valid_to = resolve_valid_to(new_user.valid_to, new_user.valid_to_epoch_second)?;

    let mut member_of: Vec<OrganizationId> = Vec::with_capacity(new_user.member_of.len());
    for org in new_user.member_of {
        if !member_of.contains(&org.id) {
            member_of.push(org.id);
        }
    }

    Ok(UserDraft {
        user_type: new_user.user_type,
        username: new_user.username,
        first_name,
        last_name,
        email_address,
        description: normalize(new_user.description),
        roles,
        valid_to,
        secret_hash: None,
        member_of,
    })
}

/// Outcome of applying an update payload to a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub record: UserRecord,
    /// Replacement membership set, when the payload carried one.
    pub member_of: Option<Vec<OrganizationId>>,
}

/// Apply an update payload to the current record.
///
/// Rejects any attempt to change the type, or to toggle `enabled`
/// outside the lifecycle operations.
pub fn apply_user_update(current: &UserRecord, update: UserUpdate) -> Result<AppliedUpdate> {
    if update.id != current.id {
        return Err(CastellanError::invalid_field("id", "cannot be changed"));
    }
    if let Some(user_type) = update.user_type {
        if user_type != current.user_type {
            return Err(CastellanError::invalid_field("type", "cannot be changed"));
        }
    }
    if let Some(enabled) = update.enabled {
        if enabled != current.enabled {
            return Err(CastellanError::invalid_field(
                "enabled",
                "use the enable/disable operation to change it",
            ));
        }
    }

    let mut record = current.clone();

    if let Some(username) = update.username {
        validate_username(&username)?;
        record.username = username;
    }
    if let Some(first_name) = update.first_name {
        record.first_name = normalize(first_name);
    }
    if let Some(last_name) = update.last_name {
        record.last_name = normalize(last_name);
    }
    if let Some(email_address) = update.email_address {
        record.email_address = normalize(email_address);
    }
    if let Some(description) = update.description {
        record.description = normalize(description);
    }
    validate_contact_details(
        record.user_type,
        &record.first_name,
        &record.last_name,
        &record.email_address,
    )?;

    if let Some(roles) = update.roles {
        record.roles = validate_roles(record.user_type, &roles)?;
    }

    match (update.valid_to, update.valid_to_epoch_second) {
        (None, None) => {}
        (valid_to, epoch) => {
            record.valid_to = resolve_valid_to(valid_to.flatten(), epoch.flatten())?;
        }
    }

    let member_of = update.member_of.map(|refs| {
        let mut ids: Vec<OrganizationId> = Vec::with_capacity(refs.len());
        for org in refs {
            if !ids.contains(&org.id) {
                ids.push(org.id);
            }
        }
        ids
    });

    Ok(AppliedUpdate { record, member_of })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organizations
// ═══════════════════════════════════════════════════════════════════════════════

fn organization_draft(
    name: &str,
    email: &str,
    description: &str,
    slug: Option<String>,
    external_id: Option<String>,
) -> Result<OrganizationDraft> {
    let name = require_text("name", name)?;
    let email = require_text("email", email)?;
    if !is_valid_email(&email) {
        return Err(CastellanError::invalid_field("email", "is not a valid email address"));
    }
    let description = require_text("description", description)?;

    let slug = match normalize(slug) {
        Some(slug) => slug,
        None => derive_slug(&name),
    };
    if !is_valid_slug(&slug) {
        return Err(CastellanError::invalid_field(
            "slug",
            "must be lowercase letters and digits separated by single dashes",
        ));
    }

    Ok(OrganizationDraft {
        name,
        email,
        description,
        slug,
        external_id: normalize(external_id),
    })
}

pub fn validate_new_organization(org: NewOrganization) -> Result<OrganizationDraft> {
    organization_draft(&org.name, &org.email, &org.description, org.slug, org.external_id)
}

pub fn validate_organization_update(
    org: OrganizationUpdate,
) -> Result<(OrganizationId, OrganizationDraft)> {
    let draft =
        organization_draft(&org.name, &org.email, &org.description, org.slug, org.external_id)?;
    Ok((org.id, draft))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::models::{OrganizationRef, UserId};

    fn internal_user(username: &str) -> NewUser {
        NewUser {
            user_type: UserType::Internal,
            username: username.to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email_address: Some("ada@example.org".to_string()),
            roles: vec![RoleType::Owner],
            ..NewUser::default()
        }
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("Alice").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username(" alice").is_err());
        assert!(validate_username("alice\n").is_err());
        assert!(validate_username(&"x".repeat(MAX_USERNAME_LEN)).is_ok());
        assert!(validate_username(&"x".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_internal_user_requires_contact_details() {
        let mut user = internal_user("ada");
        user.email_address = None;
        let err = validate_new_user(user).unwrap_err();
        assert_eq!(err.details().field.as_deref(), Some("emailAddress"));

        let mut user = internal_user("ada");
        user.first_name = Some("   ".to_string());
        let err = validate_new_user(user).unwrap_err();
        assert_eq!(err.details().field.as_deref(), Some("firstName"));

        let mut user = internal_user("ada");
        user.email_address = Some("not-an-address".to_string());
        assert!(validate_new_user(user).is_err());
    }

    #[test]
    fn test_api_key_needs_no_contact_details() {
        let user = NewUser {
            user_type: UserType::ApiKey,
            username: "key-1".to_string(),
            roles: vec![RoleType::ApiConsumer],
            ..NewUser::default()
        };
        let draft = validate_new_user(user).unwrap();
        assert_eq!(draft.first_name, None);
        assert_eq!(draft.roles.len(), 1);
    }

    #[test]
    fn test_roles_rules() {
        assert!(validate_roles(UserType::Internal, &[]).is_err());
        assert!(validate_roles(UserType::ApiKey, &[RoleType::ApiConsumer, RoleType::Sponsor]).is_err());
        let set = validate_roles(UserType::Internal, &[RoleType::Owner, RoleType::Owner]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_membership_refs_deduplicated() {
        let mut user = internal_user("ada");
        user.member_of = vec![
            OrganizationRef { id: OrganizationId(2) },
            OrganizationRef { id: OrganizationId(1) },
            OrganizationRef { id: OrganizationId(2) },
        ];
        let draft = validate_new_user(user).unwrap();
        assert_eq!(draft.member_of, vec![OrganizationId(2), OrganizationId(1)]);
    }

    #[test]
    fn test_valid_to_agreement() {
        let at = epoch_to_datetime(1_800_000_000).unwrap();
        assert_eq!(resolve_valid_to(Some(at), Some(1_800_000_000)).unwrap(), Some(at));
        assert_eq!(resolve_valid_to(None, Some(1_800_000_000)).unwrap(), Some(at));
        assert!(resolve_valid_to(Some(at), Some(1_800_000_001)).is_err());
        assert_eq!(resolve_valid_to(None, None).unwrap(), None);
    }

    #[test]
    fn test_slug_derivation() {
        assert_eq!(derive_slug("Acme Events"), "acme-events");
        assert_eq!(derive_slug("  Rock & Roll -- 2024 "), "rock-roll-2024");
        assert_eq!(derive_slug("!!!"), "");
        assert!(is_valid_slug("acme-events"));
        assert!(!is_valid_slug("Acme"));
        assert!(!is_valid_slug("acme--events"));
        assert!(!is_valid_slug("-acme"));
    }

    #[test]
    fn test_organization_rules() {
        let org = NewOrganization {
            name: "Acme Events".to_string(),
            email: "info@acme.test".to_string(),
            description: "Organizer".to_string(),
            ..NewOrganization::default()
        };
        let draft = validate_new_organization(org.clone()).unwrap();
        assert_eq!(draft.slug, "acme-events");

        let bad_slug = NewOrganization {
            slug: Some("Not A Slug".to_string()),
            ..org.clone()
        };
        let err = validate_new_organization(bad_slug).unwrap_err();
        assert_eq!(err.details().field.as_deref(), Some("slug"));

        let no_name = NewOrganization {
            name: "  ".to_string(),
            ..org
        };
        assert!(validate_new_organization(no_name).is_err());
    }

    fn stored() -> UserRecord {
        let draft = validate_new_user(internal_user("ada")).unwrap();
        UserRecord {
            id: UserId(9),
            user_type: draft.user_type,
            enabled: true,
            valid_to: None,
            username: draft.username,
            first_name: draft.first_name,
            last_name: draft.last_name,
            email_address: draft.email_address,
            description: None,
            roles: draft.roles,
            secret_hash: None,
        }
    }

    #[test]
    fn test_update_rejects_type_change() {
        let update = UserUpdate {
            id: UserId(9),
            user_type: Some(UserType::ApiKey),
            ..UserUpdate::default()
        };
        let err = apply_user_update(&stored(), update).unwrap_err();
        assert_eq!(err.details().field.as_deref(), Some("type"));
    }

    #[test]
    fn test_update_rejects_enabled_change() {
        let update = UserUpdate {
            id: UserId(9),
            enabled: Some(false),
            ..UserUpdate::default()
        };
        assert!(apply_user_update(&stored(), update).is_err());

        let unchanged = UserUpdate {
            id: UserId(9),
            enabled: Some(true),
            ..UserUpdate::default()
        };
        assert!(apply_user_update(&stored(), unchanged).is_ok());
    }

    #[test]
    fn test_update_patch_semantics() {
        let update = UserUpdate {
            id: UserId(9),
            description: Some(Some("Box office".to_string())),
            valid_to_epoch_second: Some(Some(1_900_000_000)),
            ..UserUpdate::default()
        };
        let applied = apply_user_update(&stored(), update).unwrap();
        assert_eq!(applied.record.description.as_deref(), Some("Box office"));
        assert_eq!(applied.record.valid_to.map(|t| t.timestamp()), Some(1_900_000_000));
        assert_eq!(applied.record.first_name.as_deref(), Some("Ada"));
        assert!(applied.member_of.is_none());

        let clear = UserUpdate {
            id: UserId(9),
            valid_to: Some(None),
            ..UserUpdate::default()
        };
        let applied = apply_user_update(&applied.record, clear).unwrap();
        assert_eq!(applied.record.valid_to, None);
    }

    #[test]
    fn test_update_cannot_strip_required_fields() {
        let update = UserUpdate {
            id: UserId(9),
            last_name: Some(None),
            ..UserUpdate::default()
        };
        assert!(apply_user_update(&stored(), update).is_err());
    }
}
