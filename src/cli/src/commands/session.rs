//! Role catalog and principal introspection.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::models::{Role, UserInfo};
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct RoleRow {
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Description")]
    description: String,
}

fn role_rows(roles: &[Role]) -> Vec<RoleRow> {
    roles
        .iter()
        .map(|r| RoleRow {
            role: r.role.clone(),
            description: r.description.clone(),
        })
        .collect()
}

pub async fn roles(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let roles: Vec<Role> = client.get("/admin/api/roles").await?;
    output::print_list(&roles, role_rows, format)
}

pub async fn whoami(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let me: UserInfo = client.get("/admin/api/users/current").await?;

    if format != OutputFormat::Table {
        return output::print_item(&me, format);
    }

    output::print_header("Current Principal");
    output::print_detail("ID", &me.id.to_string());
    output::print_detail("Username", &me.username);
    output::print_detail("Type", &me.user_type);
    output::print_detail("Role", &me.role);
    if let (Some(first), Some(last)) = (&me.first_name, &me.last_name) {
        output::print_detail("Name", &format!("{} {}", first, last));
    }
    if let Some(email) = &me.email_address {
        output::print_detail("Email", email);
    }
    Ok(())
}
