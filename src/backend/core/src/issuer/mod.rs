//! Bulk API-key issuer.
//!
//! Creates `count` API-key users in one atomic batch. Usernames are random
//! UUIDs; each key gets a fresh secret whose plaintext is returned exactly
//! once and never stored or logged.

pub mod secret;

pub use secret::{generate_secret, hash_secret, verify_secret, GeneratedSecret};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::IssuerConfig;
use crate::error::{CastellanError, Result};
use crate::identity::{OrganizationId, User, UserDraft, UserId, UserType};
use crate::rbac::{AccessPolicy, Action, RoleType};
use crate::store::SharedStore;
use crate::telemetry::metrics::record_api_keys_issued;

/// Shape shared by every key in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyTemplate {
    #[serde(default = "default_role")]
    pub role: RoleType,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for KeyTemplate {
    fn default() -> Self {
        Self {
            role: default_role(),
            organization_id: None,
            description: None,
        }
    }
}

fn default_role() -> RoleType {
    RoleType::ApiConsumer
}

/// A created key user plus its one-time plaintext secret.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub user: User,
    pub secret: String,
}

impl std::fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedKey")
            .field("user", &self.user.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct BulkApiKeyIssuer {
    store: SharedStore,
    policy: AccessPolicy,
    max_batch_size: u32,
    key_prefix: String,
}

impl BulkApiKeyIssuer {
    pub fn new(store: SharedStore, config: &IssuerConfig) -> Self {
        Self {
            policy: AccessPolicy::new(store.clone()),
            store,
            max_batch_size: config.max_batch_size,
            key_prefix: config.key_prefix.clone(),
        }
    }

    pub fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    /// Issue `count` keys or none. Not idempotent: every call creates
    /// new keys.
    #[instrument(skip(self, template), fields(role = %template.role))]
    pub async fn issue_bulk(
        &self,
        actor: UserId,
        count: i64,
        template: KeyTemplate,
    ) -> Result<Vec<IssuedKey>> {
        self.policy.require(actor, Action::IssueApiKeys).await?;
        self.policy.require_grant(actor, [&template.role]).await?;

        if count <= 0 || count > i64::from(self.max_batch_size) {
            return Err(CastellanError::invalid_field(
                "count",
                format!("must be between 1 and {}", self.max_batch_size),
            ));
        }

        let description = template
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let member_of: Vec<OrganizationId> = template.organization_id.into_iter().collect();

        let mut secrets = Vec::with_capacity(count as usize);
        let mut drafts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let secret = generate_secret(&self.key_prefix);
            drafts.push(UserDraft {
                user_type: UserType::ApiKey,
                username: Uuid::new_v4().to_string(),
                first_name: None,
                last_name: None,
                email_address: None,
                description: description.clone(),
                roles: BTreeSet::from([template.role]),
                valid_to: None,
                secret_hash: Some(secret.hash),
                member_of: member_of.clone(),
            });
            secrets.push(secret.plaintext);
        }

        let users = self.store.create_users_batch(drafts).await?;
        if users.len() != secrets.len() {
            return Err(CastellanError::internal(format!(
                "batch returned {} users for {} drafts",
                users.len(),
                secrets.len()
            )));
        }

        record_api_keys_issued(users.len() as u64);
        info!(
            count = users.len(),
            organization_id = ?template.organization_id,
            "API keys issued"
        );

        Ok(users
            .into_iter()
            .zip(secrets)
            .map(|(user, secret)| IssuedKey { user, secret })
            .collect())
    }
}
