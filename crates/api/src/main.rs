//! ZandMarket API server.
//!
//! # Architecture
//!
//! - Axum JSON API consumed by the web shop
//! - Stripe hosted checkout; orders are written only from verified webhooks
//! - `PostgreSQL` for orders, stock, carts and notifications
//! - SMTP (lettre) for transactional mail, logged and dropped when unset
//!
//! Migrations are not run on startup:
//! `cargo run -p zandmarket-cli -- migrate`

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zandmarket_api::config::ApiConfig;
use zandmarket_api::db::{self, PgStore};
use zandmarket_api::middleware::api_rate_limiter;
use zandmarket_api::payments::StripeGateway;
use zandmarket_api::services::email::{LogMailer, Mailer, SmtpMailer};
use zandmarket_api::state::AppState;

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ApiConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Errors and warnings become Sentry events, info and debug breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn mailer(config: &ApiConfig) -> Result<Arc<dyn Mailer>, Box<dyn Error>> {
    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, "SMTP mailer configured");
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            tracing::warn!("SMTP not configured, outgoing mail will be logged and dropped");
            Arc::new(LogMailer)
        }
    };
    Ok(mailer)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = ApiConfig::from_env()?;

    // Sentry before the subscriber so the tracing layer has a client
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "zandmarket_api=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    let gateway = StripeGateway::new(&config.stripe, &config.frontend_url)?;
    let mailer = mailer(&config)?;
    let addr = config.socket_addr();
    tracing::info!(price_policy = ?config.price_policy, "Checkout price policy");

    let state = AppState::new(
        config,
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(gateway),
        mailer,
    );

    let rate_limiter = api_rate_limiter();
    if rate_limiter.is_none() {
        tracing::warn!("Rate limiter configuration rejected, serving without it");
    }

    let app = zandmarket_api::app(state, rate_limiter)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("zandmarket-api listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
