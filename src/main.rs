/// Tessera - multi-tenant account and identity backend
///
/// Accounts backed by OAuth2 clients, their users, and the confirmation,
/// invitation and password-reset workflows, served over a HAL-style REST API.

mod account;
mod api;
mod auth;
mod config;
mod context;
mod db;
mod error;
mod jobs;
mod mailer;
mod metrics;
mod notifier;
mod oauth;
mod server;

use anyhow::Context as _;
use config::ServerConfig;
use context::AppContext;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServerConfig::from_env().context("Failed to load configuration")?;

    init_logging(&config);

    info_banner();

    // Create application context
    let ctx = AppContext::new(config)
        .await
        .context("Failed to initialize application context")?;

    ctx.bootstrap().await.context("Bootstrap failed")?;

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::new(ctx.clone())));
    scheduler.start();

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn info_banner() {
    tracing::info!("Tessera identity service v{}", env!("CARGO_PKG_VERSION"));
}
