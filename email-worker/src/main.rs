//! Postbox Worker - consumes `email_queue` and delivers outbound email.
//!
//! Runs the supervisor loop until SIGINT/SIGTERM, restarting the consumer
//! whenever the broker connection fails.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use postbox::util::stop_on_shutdown;
use postbox::{
    Broker, BrokerClient, Config, EmailJobHandler, EmailProcessor, EmailWorker,
    HandlebarsRenderer, SmtpTransport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    let config = Config::from_env();
    tracing::info!(
        rabbitmq_url_set = !config.rabbitmq_url.is_empty(),
        queue = %config.email_queue,
        dead_letter_queue = %config.dead_letter_queue(),
        prefetch = config.prefetch_count,
        max_retries = config.max_retries,
        retry_base_ms = config.retry_base_delay_ms,
        dead_letter_exhausted = config.dead_letter_exhausted,
        templates_dir = %config.templates_dir,
        "config_loaded"
    );

    let broker = Arc::new(BrokerClient::from_config(&config));
    let renderer = Arc::new(HandlebarsRenderer::new(&config.templates_dir));
    let transport =
        Arc::new(SmtpTransport::new(&config.smtp).context("Failed to configure SMTP transport")?);

    let processor = EmailProcessor::new(renderer, transport, config.sender())
        .with_retry_policy(config.max_retries, config.retry_base_delay());
    let handler = EmailJobHandler::new(Arc::new(processor))
        .dead_letter_failures(config.dead_letter_exhausted);

    let worker = EmailWorker::new(broker.clone(), Arc::new(handler))
        .with_restart_delay(config.worker_restart_delay());

    worker.run(stop_on_shutdown()).await;

    broker.close().await;
    tracing::info!("worker_shutdown_complete");

    Ok(())
}
