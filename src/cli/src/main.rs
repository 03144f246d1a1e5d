//! Castellan CLI - Command-line client for the Castellan admin API.
//!
//! Provides commands for users, API keys, organizations, roles, health and
//! local configuration.

mod client;
mod commands;
mod models;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use client::{ApiClient, Credentials};
use commands::{config, health, keys, orgs, session, users};
use output::OutputFormat;

/// Castellan - access-control and membership administration
#[derive(Parser)]
#[command(
    name = "castellan",
    version,
    about = "Castellan - access-control and membership administration",
    long_about = "CLI tool for managing Castellan users, API keys and organizations.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "CASTELLAN_API_URL")]
    api_url: Option<String>,

    /// Session token sent as a bearer credential
    #[arg(long, global = true, env = "CASTELLAN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// API key as <username>:<secret>, sent as HTTP Basic
    #[arg(long, global = true, env = "CASTELLAN_API_KEY", hide_env_values = true, conflicts_with = "token")]
    api_key: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// User management operations
    #[command(subcommand)]
    Users(users::UserCommands),

    /// API-key operations
    #[command(subcommand)]
    Keys(keys::KeyCommands),

    /// Organization management operations
    #[command(subcommand)]
    Orgs(orgs::OrgCommands),

    /// List the role catalog
    Roles,

    /// Show the authenticated principal
    Whoami,

    /// Check system health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

impl Cli {
    /// Flags win over the config file; a token wins over an API key.
    fn credentials(&self) -> Result<Credentials> {
        if let Some(token) = self.token.clone().or_else(|| {
            self.api_key
                .is_none()
                .then(|| config::load_value("token"))
                .flatten()
        }) {
            return Ok(Credentials::Bearer(token));
        }
        match self.api_key.clone().or_else(|| config::load_value("api-key")) {
            Some(pair) => Credentials::api_key(&pair),
            None => Ok(Credentials::None),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = run(cli, format).await;

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli, format: OutputFormat) -> Result<()> {
    if let Commands::Config(cmd) = cli.command {
        return config::execute(cmd, format).await;
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| config::load_value("api-url"))
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let client = ApiClient::new(&api_url, cli.credentials()?)?;

    match cli.command {
        Commands::Users(cmd) => users::execute(cmd, &client, format).await,
        Commands::Keys(cmd) => keys::execute(cmd, &client, format).await,
        Commands::Orgs(cmd) => orgs::execute(cmd, &client, format).await,
        Commands::Roles => session::roles(&client, format).await,
        Commands::Whoami => session::whoami(&client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        // Handled before a client is built.
        Commands::Config(_) => Ok(()),
    }
}
