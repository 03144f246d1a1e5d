//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{CastellanError, Result};

/// Environment variable prefix, e.g. `CASTELLAN__SERVER__PORT`.
pub const ENV_PREFIX: &str = "CASTELLAN";

/// Minimum accepted length of the session signing secret.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration; absent means the in-process store.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Identity store behaviour
    #[serde(default)]
    pub store: StoreConfig,

    /// Bulk API-key issuance
    #[serde(default)]
    pub issuer: IssuerConfig,

    /// Session tokens
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Initial administrator
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Demo provisioning
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on any single store operation, lock wait included.
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout: default_operation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuerConfig {
    /// Largest batch accepted by a single bulk call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,

    /// Prefix prepended to every generated secret
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret for session tokens
    #[serde(default)]
    pub jwt_secret: String,

    /// Session token lifetime
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Token issuer claim
    #[serde(default = "default_token_issuer")]
    pub issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            session_ttl: default_session_ttl(),
            issuer: default_token_issuer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Expose Prometheus metrics at `/metrics`
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: true,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// Create the administrator when no ADMIN user exists
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_admin_username")]
    pub admin_username: String,

    #[serde(default = "default_admin_email")]
    pub admin_email: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_username: default_admin_username(),
            admin_email: default_admin_email(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DemoConfig {
    /// Mount `/demo/login`
    #[serde(default)]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_operation_timeout() -> Duration { Duration::from_secs(5) }
fn default_max_batch_size() -> u32 { 100 }
fn default_key_prefix() -> String { "cst_".to_string() }
fn default_session_ttl() -> Duration { Duration::from_secs(8 * 60 * 60) }
fn default_token_issuer() -> String { "castellan".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_admin_username() -> String { "admin".to_string() }
fn default_admin_email() -> String { "admin@localhost.localdomain".to_string() }
fn default_true() -> bool { true }

impl Config {
    /// Load configuration from environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(CastellanError::configuration(format!(
                "auth.jwt_secret must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }
        if self.issuer.max_batch_size == 0 {
            return Err(CastellanError::configuration(
                "issuer.max_batch_size must be at least 1",
            ));
        }
        if self.store.operation_timeout.is_zero() {
            return Err(CastellanError::configuration(
                "store.operation_timeout must be positive",
            ));
        }
        Ok(())
    }

    /// Socket address string for the HTTP listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.issuer.max_batch_size, 100);
        assert_eq!(config.store.operation_timeout, Duration::from_secs(5));
        assert!(config.database.url.is_none());
        assert!(!config.demo.enabled);
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = Config::default();
        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = SECRET.to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let mut config = Config::default();
        config.auth.jwt_secret = SECRET.to_string();
        config.issuer.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090

[store]
operation_timeout = "250ms"

[issuer]
max_batch_size = 10
key_prefix = "test_"

[auth]
jwt_secret = "{SECRET}"
session_ttl = "1h"

[demo]
enabled = true
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.store.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.issuer.max_batch_size, 10);
        assert_eq!(config.issuer.key_prefix, "test_");
        assert_eq!(config.auth.session_ttl, Duration::from_secs(3600));
        assert!(config.demo.enabled);
    }
}
