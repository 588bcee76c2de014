//! Replicant Executor
//!
//! Runs synthetic transactions on demand over HTTP.
//!
//! Architecture:
//! - Configuration: flags with `REPLICANT_*` environment fallbacks
//! - Drivers: Lua scripts and declarative browser steps
//! - Renderer: the headless browser process behind the automation driver,
//!   recycled on a fixed interval
//! - Executor: timeout, retry and per-transaction de-duplication
//! - API: run requests and stored transaction management

mod api;
mod cdp;
mod config;
mod driver;
mod executor;
mod renderer;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;
use crate::driver::{AutomationDriver, ScriptDriver};
use crate::executor::Executor;
use crate::renderer::{ChromeLauncher, RendererManager};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;
    info!("Starting Replicant Executor");

    let store = replicant_store::open(&config.store)
        .with_context(|| format!("Failed to open store '{}'", config.store))?;
    info!("Opened store {}", config.store);

    let client = reqwest::Client::new();
    let mut executor = Executor::new(config.dedup);
    executor.register(Arc::new(
        ScriptDriver::new(client.clone()).with_memory_limit(config.script_memory_limit_bytes()),
    ));

    let renderer = if config.no_renderer {
        warn!("Renderer disabled, automation transactions are unavailable");
        None
    } else {
        let renderer = start_renderer(&config, client.clone()).await?;
        executor.register(Arc::new(AutomationDriver::new(renderer.clone(), client)));
        Some(renderer)
    };
    info!("Registered drivers: {}", executor.drivers().join(", "));

    let app = api::create_router(AppState {
        executor: Arc::new(executor),
        store: store.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.address))?;
    info!("Listening on {}", config.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    if let Some(renderer) = renderer {
        renderer.shutdown().await;
    }
    store.close().context("Failed to close store")?;

    Ok(())
}

async fn start_renderer(config: &Config, client: reqwest::Client) -> Result<Arc<RendererManager>> {
    let (binary, args) = config.renderer_args()?;
    info!(
        "Renderer: {} (ports {}/{}, recycle every {:?})",
        binary,
        config.debugging_port,
        config.debugging_port + 1,
        config.recycle_interval
    );

    let launcher = ChromeLauncher::new(binary, args, config.debugging_port, client);
    let manager = Arc::new(RendererManager::new(
        Arc::new(launcher),
        config.renderer_settings(),
    ));
    manager.start().await.context("Failed to start renderer")?;
    manager.spawn_recycler();

    Ok(manager)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
