//! Castellan Server - Main entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use castellan_core::{
    api::{self, AppState},
    bootstrap,
    config::Config,
    db::PgDirectory,
    middleware::Authenticator,
    store::{MemoryDirectory, SharedStore},
    telemetry::{self, TelemetryConfig},
};

#[derive(Parser)]
#[command(name = "castellan-server")]
#[command(about = "Castellan access-control and membership backend")]
#[command(version)]
struct Args {
    /// Optional TOML configuration file; environment variables override it
    #[arg(short, long, env = "CASTELLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Defaults to `serve`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin API server
    Serve,

    /// Print a new session token for an existing account and exit
    IssueSession {
        /// Username of the account
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = match args.config {
        Some(path) => Config::from_file(&path.to_string_lossy())?,
        None => Config::load()?,
    };

    if let Some(Command::IssueSession { user }) = args.command {
        return issue_session(&config, &user).await;
    }

    telemetry::init(&TelemetryConfig::from(&config.observability))?;
    let metrics = if config.observability.metrics_enabled {
        Some(telemetry::init_metrics("castellan-server")?)
    } else {
        None
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Castellan Server"
    );

    let store = open_store(&config).await?;
    tracing::info!(backend = store.backend(), "Identity store ready");

    let mut state = AppState::new(store.clone(), &config)?;
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }

    if let Some(admin) = bootstrap::ensure_admin(&store, &config.bootstrap).await? {
        let token = state.authenticator.issue_session(admin.id)?;
        // Printed once to the terminal, never to the log stream.
        eprintln!(
            "Administrator '{}' created. Session token (valid {}s):\n{}",
            admin.username,
            config.auth.session_ttl.as_secs(),
            token
        );
    }

    let app = api::build_router(state);

    let addr = config.bind_address();
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    telemetry::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<SharedStore> {
    match config.database.url.as_deref() {
        Some(url) => {
            let db = PgDirectory::connect(&config.database, url, config.store.operation_timeout)
                .await?;
            if config.database.run_migrations {
                db.migrate().await?;
                tracing::info!("Database migrations applied");
            }
            Ok(Arc::new(db))
        }
        None => {
            tracing::warn!("No database URL configured; using the in-memory store");
            Ok(Arc::new(MemoryDirectory::new(config.store.operation_timeout)))
        }
    }
}

/// One-shot: stdout carries only the token, so logging stays uninitialized.
async fn issue_session(config: &Config, username: &str) -> anyhow::Result<()> {
    if config.database.url.is_none() {
        anyhow::bail!("issue-session needs database.url; the in-memory store starts empty");
    }
    let store = open_store(config).await?;
    let authenticator = Authenticator::new(&config.auth, store.clone())?;
    let (user, token) = bootstrap::issue_operator_session(&store, &authenticator, username).await?;

    eprintln!(
        "Session for '{}' (valid {}s):",
        user.username,
        config.auth.session_ttl.as_secs()
    );
    println!("{}", token);
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
