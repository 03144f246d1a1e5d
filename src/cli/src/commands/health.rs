//! Health check command.
//!
//! Queries the `/health` endpoint and, with `--detailed`, whether the
//! configured credentials are accepted.

use anyhow::Result;
use clap::Args;
use serde_json::Value;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Also report whether the configured credentials authenticate
    #[arg(short, long)]
    detailed: bool,
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("unknown")
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let mut health: Value = client.get("/health").await?;

    if args.detailed {
        let auth: Value = client.get("/authentication-status").await?;
        health["authenticated"] = auth.get("authenticated").cloned().unwrap_or(Value::Bool(false));
    }

    if format != OutputFormat::Table {
        return output::print_item(&health, format);
    }

    let status = field(&health, "status");
    output::print_header("System Health");
    output::print_detail("Status", status);
    output::print_detail("API URL", client.base_url());
    output::print_detail("Store", field(&health, "store"));
    output::print_detail("Version", field(&health, "version"));
    output::print_detail("Timestamp", field(&health, "timestamp"));
    if let Some(authenticated) = health.get("authenticated").and_then(|v| v.as_bool()) {
        output::print_detail("Authenticated", &authenticated.to_string());
    }

    if status == "healthy" {
        output::print_success("All systems operational");
    } else {
        output::print_error(&format!("System status: {}", status));
    }

    Ok(())
}
