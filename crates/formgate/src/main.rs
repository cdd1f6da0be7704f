use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use formgate::{router, AppState};
use formgate_core::analytics::{AnalyticsRegister, DEFAULT_RETENTION_DAYS};
use formgate_core::db::Database;
use formgate_core::email::EmailService;
use formgate_core::notify::NotificationDispatcher;
use formgate_core::AppConfig;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Form intake and heartbeat analytics service", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; a missing file means defaults
    #[arg(long, global = true, default_value = "config/formgate.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Run database migrations
    Migrate,
    /// Delete analytics rows not seen within the retention window
    AnalyticsSweep(SweepArgs),
    /// Send a plain-text test email through the configured provider
    SendTestEmail(TestEmailArgs),
    /// Publish a test message to the configured ntfy topic
    SendTestNotification,
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
    days: i64,
}

#[derive(Args, Debug)]
struct TestEmailArgs {
    /// Recipient address
    #[arg(long)]
    to: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(path) = formgate::telemetry::init(cli.json_logs) {
        debug!(path = %path.display(), "loaded environment file");
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::Migrate => {
            let database = Database::connect(&config.database).await?;
            database.run_migrations().await?;
            info!(kind = %database.kind(), "Database migrations applied");
            Ok(())
        }
        Command::AnalyticsSweep(args) => {
            let database = Database::connect(&config.database).await?;
            database.run_migrations().await?;
            let register =
                AnalyticsRegister::new(database.analytics(), config.analytics.secret_key.clone());
            let removed = register.sweep(args.days).await?;
            info!(removed, days = args.days, "Analytics sweep finished");
            Ok(())
        }
        Command::SendTestEmail(args) => {
            let email = EmailService::from_config(&config.email)?;
            email
                .send_test(&args.to)
                .await
                .with_context(|| format!("failed to send test email to {}", args.to))?;
            info!(to = %args.to, "Test email sent");
            Ok(())
        }
        Command::SendTestNotification => {
            let notifier = NotificationDispatcher::from_config(&config)?;
            notifier
                .send_test()
                .await
                .context("failed to send test notification")?;
            info!(topic = %config.notifications.ntfy.topic, "Test notification sent");
            Ok(())
        }
    }
}

async fn serve(config: &AppConfig) -> Result<()> {
    let state = AppState::build(config).await?;
    if state.analytics.is_none() {
        warn!("Analytics collection is disabled");
    }
    if !state.admin.is_configured() {
        warn!("Admin credentials are not configured; admin routes will reject every login");
    }
    let eviction = state.spawn_eviction();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    eviction.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
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
    info!("Shutdown signal received");
}
