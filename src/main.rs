/// Courier - contacts and chat relay backend
///
/// Tracks phone-number ownership over time, runs the claim workflow for
/// transferring contested numbers, and relays chat messages through an
/// external push gateway with delivery-receipt tracking.
mod api;
mod auth;
mod config;
mod context;
mod db;
mod directory;
mod error;
mod jobs;
mod messaging;
mod metrics;
mod phone;
mod push;
mod server;

use config::ServerConfig;
use context::AppContext;
use error::CourierResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> CourierResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = AppContext::new(config).await?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}
