//! API-key commands.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;

use super::users::user_rows;
use crate::client::ApiClient;
use crate::models::{IssuedKey, User};
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum KeyCommands {
    /// List API-key accounts
    List,

    /// Issue a batch of API keys in one transaction
    Issue {
        /// Number of keys to issue
        #[arg(short, long, default_value = "1")]
        count: i64,

        /// Role for every issued key
        #[arg(short, long, default_value = "API_CONSUMER")]
        role: String,

        /// Organization ID the keys belong to
        #[arg(long)]
        org: Option<i64>,

        #[arg(short, long)]
        description: Option<String>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct IssuedRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Username")]
    username: String,
    #[tabled(rename = "Secret")]
    secret: String,
}

fn issued_rows(keys: &[IssuedKey]) -> Vec<IssuedRow> {
    keys.iter()
        .map(|k| IssuedRow {
            id: k.user.id,
            username: k.user.username.clone(),
            secret: k.secret.clone(),
        })
        .collect()
}

pub async fn execute(cmd: KeyCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        KeyCommands::List => {
            let keys: Vec<User> = client.get("/admin/api/api-keys").await?;
            output::print_list(&keys, user_rows, format)?;
        }

        KeyCommands::Issue {
            count,
            role,
            org,
            description,
        } => {
            let body = json!({
                "count": count,
                "role": role.to_uppercase().replace('-', "_"),
                "organizationId": org,
                "description": description,
            });
            let keys: Vec<IssuedKey> = client.post("/admin/api/api-keys/bulk", &body).await?;

            output::print_list(&keys, issued_rows, format)?;
            output::print_warning("Secrets are shown only once. Store them now.");
        }
    }

    Ok(())
}
