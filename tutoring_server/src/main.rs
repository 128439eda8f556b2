//! Tutoring marketplace server.
//!
//! Serves the HTTP API, drains the notification queue and runs the
//! completion sweep and payout settlement on a timer.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Error};
use pico_args::Arguments;
use tutoring::{
    accounts::{AccountError, AccountManager},
    db::{Database, MemoryStore},
    notify::{NotificationQueue, NotificationWorker, RetryPolicy},
    providers::{
        LogMailer, Mailer, MeetingProvider, PaymentProvider, StripeClient, StripeConfig,
        Unconfigured, WebhookMailer, ZoomClient,
    },
};
use tutoring_server::{
    api::{self, AppState, Providers},
    config::{AdminBootstrap, ProvidersConfig, ServerConfig},
    jobs, logging, metrics,
};

const HELP: &str = "\
Run the tutoring marketplace server

USAGE:
  tutoring_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:3000]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --in-memory              Keep all data in process memory (no PostgreSQL)
  -h, --help               Print help information

ENVIRONMENT:
  JWT_SECRET               JWT signing secret (required, 32+ chars)
  PASSWORD_PEPPER          Password hashing pepper (required, 16+ chars)
  STRIPE_SECRET_KEY        Payment provider key
  ZOOM_ACCOUNT_ID          Meeting provider account (with ZOOM_CLIENT_ID/SECRET)
  MAIL_WEBHOOK_URL         Email relay endpoint
  METRICS_BIND             Prometheus listener (e.g. 0.0.0.0:9090)
  ADMIN_EMAIL              Admin account created at startup (with ADMIN_PASSWORD)
  (See .env.example for all configuration options)
";

const NOTIFICATION_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let in_memory = pargs.contains("--in-memory");
    let bind: Option<SocketAddr> = pargs.opt_value_from_str("--bind")?;
    let database_url: Option<String> = pargs.opt_value_from_str("--db-url")?;

    logging::init();

    let config = ServerConfig::from_env(bind, database_url, in_memory)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(anyhow::Error::msg)?;
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let (queue, receiver) = NotificationQueue::channel(NOTIFICATION_QUEUE_CAPACITY);
    let (providers, mailer) = build_providers(&config.providers);

    let state = if config.in_memory {
        tracing::warn!("Serving from the in-memory store; data is lost on exit");
        AppState::new(
            Arc::new(MemoryStore::new()),
            providers,
            queue,
            &config.security,
            config.workflow.clone(),
        )
    } else {
        tracing::info!("Connecting to database");
        let db = Database::new(&config.database)
            .await
            .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to apply migrations")?;
        tracing::info!("Database connected and migrated");

        AppState::new(
            Arc::new(db.store()),
            providers,
            queue,
            &config.security,
            config.workflow.clone(),
        )
        .with_database(db)
    };

    if let Some(admin) = &config.admin {
        bootstrap_admin(&state.accounts, admin).await?;
    }

    tokio::spawn(NotificationWorker::new(receiver, mailer, RetryPolicy::default()).run());
    jobs::spawn_completion_sweep(state.classrooms.clone(), config.jobs.completion_sweep);
    jobs::spawn_settlement(state.payouts.clone(), config.jobs.settlement_interval);

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down server...");

    Ok(())
}

/// Concrete provider clients, or stand-ins when credentials are missing
fn build_providers(config: &ProvidersConfig) -> (Providers, Arc<dyn Mailer>) {
    let payments: Arc<dyn PaymentProvider> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeClient::new(StripeConfig::new(key.clone()))),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY unset; funding and payouts are unavailable");
            Arc::new(Unconfigured)
        }
    };

    let meetings: Arc<dyn MeetingProvider> = match &config.zoom {
        Some(credentials) => Arc::new(ZoomClient::new(credentials.clone())),
        None => {
            tracing::warn!("Zoom credentials unset; accepted classes get no meeting link");
            Arc::new(Unconfigured)
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.mail_webhook_url {
        Some(url) => Arc::new(WebhookMailer::new(url.clone())),
        None => Arc::new(LogMailer),
    };

    (Providers { payments, meetings }, mailer)
}

async fn bootstrap_admin(accounts: &AccountManager, admin: &AdminBootstrap) -> Result<(), Error> {
    match accounts
        .create_admin(
            admin.email.clone(),
            admin.password.clone(),
            "Administrator".to_string(),
        )
        .await
    {
        Ok(account) => {
            tracing::info!(user_id = account.id, "Admin account created");
            Ok(())
        }
        Err(AccountError::EmailTaken) => Ok(()),
        Err(e) => Err(e).context("Failed to create admin account"),
    }
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}
