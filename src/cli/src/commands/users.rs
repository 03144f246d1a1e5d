//! User management commands.
//!
//! Provides list, get, create, enable, disable and delete operations for
//! non-API-key accounts.

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::models::User;
use crate::output::{self, OutputFormat};

const USERS: &str = "/admin/api/users";

#[derive(Subcommand)]
pub enum UserCommands {
    /// List all users except API keys
    List,

    /// Show a single user
    Get {
        /// User ID
        id: i64,
    },

    /// Create a user
    Create {
        /// Login name (case-sensitive, unique)
        username: String,

        /// Account type
        #[arg(short = 't', long = "type", value_enum, default_value = "internal")]
        user_type: CliUserType,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// Role to assign (repeatable), e.g. OPERATOR
        #[arg(short, long = "role")]
        roles: Vec<String>,

        /// Organization ID to join (repeatable)
        #[arg(long = "org")]
        orgs: Vec<i64>,

        /// Expiry as Unix epoch seconds
        #[arg(long)]
        valid_to: Option<i64>,
    },

    /// Enable a user
    Enable {
        /// User ID
        id: i64,
    },

    /// Disable a user
    Disable {
        /// User ID
        id: i64,
    },

    /// Permanently delete a user
    Delete {
        /// User ID
        id: i64,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Account types an administrator can create.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliUserType {
    Internal,
    Demo,
}

impl CliUserType {
    fn as_wire(&self) -> &'static str {
        match self {
            CliUserType::Internal => "INTERNAL",
            CliUserType::Demo => "DEMO",
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub(crate) struct UserRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Username")]
    username: String,
    #[tabled(rename = "Type")]
    user_type: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Roles")]
    roles: String,
    #[tabled(rename = "Organizations")]
    organizations: String,
}

pub(crate) fn user_rows(users: &[User]) -> Vec<UserRow> {
    users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            username: u.username.clone(),
            user_type: u.user_type.clone(),
            name: u.display_name(),
            enabled: if u.enabled { "yes" } else { "no" }.to_string(),
            roles: u.roles.join(", "),
            organizations: u.organization_slugs(),
        })
        .collect()
}

fn print_user(user: &User, format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Table {
        return output::print_item(user, format);
    }

    output::print_header(&format!("User: {}", user.username));
    output::print_detail("ID", &user.id.to_string());
    output::print_detail("Type", &user.user_type);
    output::print_detail("Enabled", &user.enabled.to_string());
    output::print_detail("Name", &user.display_name());
    output::print_detail("Email", &output::or_dash(user.email_address.as_deref()));
    output::print_detail("Description", &output::or_dash(user.description.as_deref()));
    output::print_detail("Roles", &user.roles.join(", "));
    output::print_detail("Organizations", &user.organization_slugs());
    output::print_detail("Valid To", &output::or_dash(user.valid_to.as_deref()));
    Ok(())
}

async fn set_enabled(client: &ApiClient, id: i64, enabled: bool) -> Result<()> {
    let _: String = client
        .post_empty(&format!("{}/{}/enable/{}", USERS, id, enabled))
        .await?;
    Ok(())
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: UserCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        UserCommands::List => {
            let users: Vec<User> = client.get(USERS).await?;
            output::print_list(&users, user_rows, format)?;
        }

        UserCommands::Get { id } => {
            let user: User = client.get(&format!("{}/{}", USERS, id)).await?;
            print_user(&user, format)?;
        }

        UserCommands::Create {
            username,
            user_type,
            first_name,
            last_name,
            email,
            description,
            roles,
            orgs,
            valid_to,
        } => {
            let body = json!({
                "type": user_type.as_wire(),
                "username": username,
                "firstName": first_name,
                "lastName": last_name,
                "emailAddress": email,
                "description": description,
                "roles": roles.iter().map(|r| r.to_uppercase().replace('-', "_")).collect::<Vec<_>>(),
                "memberOf": orgs.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
                "validToEpochSecond": valid_to,
            });
            let user: User = client.post(&format!("{}/new", USERS), &body).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "User '{}' created with ID {}",
                        user.username, user.id
                    ));
                }
                _ => output::print_item(&user, format)?,
            }
        }

        UserCommands::Enable { id } => {
            set_enabled(client, id, true).await?;
            output::print_success(&format!("User {} enabled", id));
        }

        UserCommands::Disable { id } => {
            set_enabled(client, id, false).await?;
            output::print_success(&format!("User {} disabled", id));
        }

        UserCommands::Delete { id, force } => {
            if !force {
                output::print_info("This will permanently delete the user. Use --force to confirm.");
                return Ok(());
            }

            let _: String = client.delete(&format!("{}/{}", USERS, id)).await?;
            output::print_success(&format!("User {} deleted", id));
        }
    }

    Ok(())
}
