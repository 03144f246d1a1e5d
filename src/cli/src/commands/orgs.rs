//! Organization management commands.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;

use super::users::user_rows;
use crate::client::ApiClient;
use crate::models::{Organization, User};
use crate::output::{self, OutputFormat};

const ORGS: &str = "/admin/api/organizations";

#[derive(Subcommand)]
pub enum OrgCommands {
    /// List organizations
    List,

    /// Show a single organization
    Get {
        /// Organization ID
        id: i64,
    },

    /// Create an organization
    Create {
        name: String,

        /// Contact email
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        description: String,

        /// URL-safe identifier; derived from the name when omitted
        #[arg(short, long)]
        slug: Option<String>,

        #[arg(long)]
        external_id: Option<String>,
    },

    /// Delete an organization and drop its memberships
    Delete {
        /// Organization ID
        id: i64,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// List members, or add/remove one
    Members {
        /// Organization ID
        id: i64,

        /// Add this user ID to the organization
        #[arg(long, conflicts_with = "remove")]
        add: Option<i64>,

        /// Remove this user ID from the organization
        #[arg(long)]
        remove: Option<i64>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct OrgRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "External ID")]
    external_id: String,
}

fn org_rows(orgs: &[Organization]) -> Vec<OrgRow> {
    orgs.iter()
        .map(|o| OrgRow {
            id: o.id,
            slug: o.slug.clone(),
            name: o.name.clone(),
            email: o.email.clone(),
            external_id: output::or_dash(o.external_id.as_deref()),
        })
        .collect()
}

pub async fn execute(cmd: OrgCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        OrgCommands::List => {
            let orgs: Vec<Organization> = client.get(ORGS).await?;
            output::print_list(&orgs, org_rows, format)?;
        }

        OrgCommands::Get { id } => {
            let org: Organization = client.get(&format!("{}/{}", ORGS, id)).await?;
            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Organization: {}", org.name));
                    output::print_detail("ID", &org.id.to_string());
                    output::print_detail("Slug", &org.slug);
                    output::print_detail("Email", &org.email);
                    output::print_detail("Description", &org.description);
                    output::print_detail("External ID", &output::or_dash(org.external_id.as_deref()));
                }
                _ => output::print_item(&org, format)?,
            }
        }

        OrgCommands::Create {
            name,
            email,
            description,
            slug,
            external_id,
        } => {
            let body = json!({
                "name": name,
                "email": email,
                "description": description,
                "slug": slug,
                "externalId": external_id,
            });
            let _: String = client.post(&format!("{}/new", ORGS), &body).await?;
            output::print_success(&format!("Organization '{}' created", name));
        }

        OrgCommands::Delete { id, force } => {
            if !force {
                output::print_info(
                    "This will delete the organization and all of its memberships. Use --force to confirm.",
                );
                return Ok(());
            }

            let _: String = client.delete(&format!("{}/{}", ORGS, id)).await?;
            output::print_success(&format!("Organization {} deleted", id));
        }

        OrgCommands::Members { id, add, remove } => {
            if let Some(user) = add {
                let _: String = client
                    .post_empty(&format!("{}/{}/members/{}", ORGS, id, user))
                    .await?;
                output::print_success(&format!("User {} added to organization {}", user, id));
            } else if let Some(user) = remove {
                let _: String = client
                    .delete(&format!("{}/{}/members/{}", ORGS, id, user))
                    .await?;
                output::print_success(&format!("User {} removed from organization {}", user, id));
            } else {
                let members: Vec<User> = client.get(&format!("{}/{}/members", ORGS, id)).await?;
                output::print_list(&members, user_rows, format)?;
            }
        }
    }

    Ok(())
}
