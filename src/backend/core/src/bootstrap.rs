//! First-start provisioning of the administrator account, and offline
//! session minting for operators.

use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::config::BootstrapConfig;
use crate::error::{CastellanError, Result};
use crate::identity::{User, UserDraft, UserType};
use crate::middleware::Authenticator;
use crate::rbac::RoleType;
use crate::store::SharedStore;

/// Create the administrator unless some ADMIN user already exists.
///
/// Returns the new account, or `None` when nothing was created.
pub async fn ensure_admin(store: &SharedStore, config: &BootstrapConfig) -> Result<Option<User>> {
    if !config.enabled || store.has_user_with_role(RoleType::Admin).await? {
        return Ok(None);
    }

    let admin = store
        .create_user(UserDraft {
            user_type: UserType::Internal,
            username: config.admin_username.clone(),
            first_name: Some("Castellan".to_string()),
            last_name: Some("Administrator".to_string()),
            email_address: Some(config.admin_email.clone()),
            description: None,
            roles: BTreeSet::from([RoleType::Admin]),
            valid_to: None,
            secret_hash: None,
            member_of: vec![],
        })
        .await?;

    info!(user_id = %admin.id, username = %admin.username, "Administrator account created");
    Ok(Some(admin))
}

/// Mint a session for an existing interactive account, straight from the
/// store. Used by the `issue-session` command once the bootstrap token
/// has expired.
pub async fn issue_operator_session(
    store: &SharedStore,
    authenticator: &Authenticator,
    username: &str,
) -> Result<(User, String)> {
    let record = store
        .find_user_by_username(username)
        .await?
        .ok_or_else(|| CastellanError::user_not_found(username))?;

    if record.user_type != UserType::Internal {
        return Err(CastellanError::validation(format!(
            "Sessions can only be issued for INTERNAL accounts, not {}",
            record.user_type
        )));
    }
    if !record.is_active() {
        return Err(CastellanError::validation("Account is disabled or expired"));
    }

    let user = store.get_user(record.id).await?;
    let token = authenticator.issue_session(user.id)?;
    warn!(user_id = %user.id, username = %user.username, "Operator session issued from the command line");
    Ok((user, token))
}
