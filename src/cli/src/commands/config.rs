//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.castellan/config.toml`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

/// Keys the CLI reads from its configuration file.
pub const KNOWN_KEYS: &[&str] = &["api-url", "token", "api-key"];

const SECRET_KEYS: &[&str] = &["token", "api-key"];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key (api-url, token or api-key)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Persistent CLI configuration stored on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl CliConfig {
    /// Values with session tokens and API secrets masked.
    fn redacted(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let shown = if SECRET_KEYS.contains(&k.as_str()) {
                    mask(v)
                } else {
                    v.clone()
                };
                (k.clone(), shown)
            })
            .collect()
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(6).collect();
    format!("{}…", visible)
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".castellan").join("config.toml"))
}

fn load_from(path: &std::path::Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse config file")
}

fn save_to(path: &std::path::Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn load_config() -> Result<CliConfig> {
    load_from(&config_path()?)
}

/// Read a single value from the config file, if set.
pub fn load_value(key: &str) -> Option<String> {
    load_config().ok().and_then(|cfg| cfg.values.get(key).cloned())
}

fn check_key(key: &str) -> Result<()> {
    if KNOWN_KEYS.contains(&key) {
        Ok(())
    } else {
        anyhow::bail!("Unknown key '{}'. Known keys: {}", key, KNOWN_KEYS.join(", "))
    }
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            check_key(&key)?;
            let path = config_path()?;
            let mut cfg = load_from(&path)?;
            cfg.values.insert(key.clone(), value);
            save_to(&path, &cfg)?;

            let shown = cfg.redacted().remove(&key).unwrap_or_default();
            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, shown)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": shown }), format)?,
            }
        }

        ConfigCommands::Get { key } => {
            check_key(&key)?;
            match load_config()?.values.get(&key) {
                Some(value) => match format {
                    OutputFormat::Table => println!("{}", value),
                    _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
                },
                None => anyhow::bail!("Key '{}' not set", key),
            }
        }

        ConfigCommands::Show => {
            let cfg = load_config()?;

            if cfg.values.is_empty() {
                output::print_info("No configuration values set.");
                return Ok(());
            }

            let values = cfg.redacted();
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for (k, v) in &values {
                        output::print_detail(k, v);
                    }
                }
                _ => output::print_item(&values, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will reset all CLI configuration. Use --force to confirm.");
                return Ok(());
            }

            let path = config_path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }

            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}
