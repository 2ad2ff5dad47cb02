//! Postbox Web - thin HTTP intake for email jobs.
//!
//! Validates `POST /emails` requests, enqueues them to RabbitMQ and answers
//! immediately. Delivery happens in the worker.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use postbox::util::shutdown_signal;
use postbox::web::{enqueue_email, health, AppState};
use postbox::{Broker, BrokerClient, Config, JobProducer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        queue = %config.email_queue,
        frontend_url = %config.frontend_url,
        "config_loaded"
    );

    // The intake owns its own connection, separate from the worker's
    let broker = Arc::new(BrokerClient::from_config(&config));
    broker
        .initialize()
        .await
        .context("Failed to connect to RabbitMQ")?;

    let producer = JobProducer::new(broker.clone()).with_frontend_url(config.frontend_url.clone());
    let state = AppState::new(config.clone(), producer);

    let app = Router::new()
        .route("/health", get(health))
        .route("/emails", post(enqueue_email))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("web_server_shutting_down");
        })
        .await
        .context("Server error")?;

    broker.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}
