//! Wire types returned by the Castellan admin API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub description: String,
    pub slug: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    #[serde(rename = "type")]
    pub user_type: String,
    pub enabled: bool,
    #[serde(default)]
    pub valid_to: Option<String>,
    #[serde(default)]
    pub valid_to_epoch_second: Option<i64>,
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
    pub roles: Vec<String>,
    #[serde(default)]
    pub member_of: Vec<Organization>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(name), None) | (None, Some(name)) => name.clone(),
            (None, None) => "-".to_string(),
        }
    }

    pub fn organization_slugs(&self) -> String {
        if self.member_of.is_empty() {
            return "-".to_string();
        }
        self.member_of
            .iter()
            .map(|o| o.slug.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    #[serde(rename = "type")]
    pub user_type: String,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Role {
    pub role: String,
    pub description: String,
}

/// One freshly issued API key. The secret is shown exactly once.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IssuedKey {
    pub user: User,
    pub secret: String,
}
