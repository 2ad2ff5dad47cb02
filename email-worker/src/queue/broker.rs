//! Broker contract shared by the RabbitMQ client and the in-memory broker.
//!
//! Settlement rules live in [`dispatch`]: a handler that returns `Ok` gets its
//! message acknowledged, anything else (decode failure, handler error, panic)
//! is rejected without requeue and lands in the dead-letter queue. Any JSON
//! body whose `type` is not `SEND_EMAIL` goes to
//! [`JobHandler::handle_unknown`] without decoding the payload.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, warn};

use serde_json::Value;

use super::types::{EmailJob, JobKind};

/// Errors surfaced by broker operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to connect to broker: {0}")]
    Connection(String),

    #[error("broker client is not initialized")]
    NotInitialized,

    #[error("failed to publish job: {0}")]
    Publish(String),

    #[error("failed to serialize job: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("consumer failed: {0}")]
    Consume(String),

    #[error("consumer stream closed by broker")]
    ConsumerClosed,
}

/// Receives each decoded job delivered by [`Broker::consume`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: EmailJob) -> anyhow::Result<()>;

    /// Called for a message whose `type` is not `SEND_EMAIL`. The payload is
    /// never decoded. Returning `Ok` acknowledges the message.
    async fn handle_unknown(&self, kind: String) -> anyhow::Result<()> {
        warn!(job_type = %kind, "job_unknown_type");
        Ok(())
    }
}

/// Durable queue with a dead-letter sibling.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connect and declare both queues. Idempotent while connected.
    async fn initialize(&self) -> Result<(), QueueError>;

    /// Persist one job on the primary queue.
    async fn publish(&self, job: &EmailJob) -> Result<(), QueueError>;

    /// Deliver jobs to `handler` one at a time until `stop` flips to `true`.
    ///
    /// Returns `Ok(())` only when stopped; any broker-side failure is an error
    /// so the caller can restart.
    async fn consume(
        &self,
        handler: Arc<dyn JobHandler>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), QueueError>;

    /// Release the connection. Safe to call repeatedly.
    async fn close(&self);
}

/// What the broker should do with a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    DeadLetter,
}

/// Decode a message body, run the handler and decide how to settle it.
pub async fn dispatch(handler: &dyn JobHandler, body: &[u8]) -> Disposition {
    let raw: Value = match serde_json::from_slice(body) {
        Ok(raw) => raw,
        Err(e) => {
            error!(
                error = %e,
                body_preview = %preview(body),
                "job_decode_failed"
            );
            return Disposition::DeadLetter;
        }
    };

    let handled = match job_type(&raw) {
        Some(JobKind::SEND_EMAIL) => {
            let job = match serde_json::from_value::<EmailJob>(raw) {
                Ok(job) => job,
                Err(e) => {
                    error!(
                        error = %e,
                        body_preview = %preview(body),
                        "job_decode_failed"
                    );
                    return Disposition::DeadLetter;
                }
            };
            AssertUnwindSafe(handler.handle(job)).catch_unwind().await
        }
        other => {
            let kind = other.unwrap_or_default().to_string();
            AssertUnwindSafe(handler.handle_unknown(kind))
                .catch_unwind()
                .await
        }
    };

    match handled {
        Ok(Ok(())) => Disposition::Ack,
        Ok(Err(e)) => {
            error!(error = %format!("{e:#}"), "job_handler_failed");
            Disposition::DeadLetter
        }
        Err(_) => {
            error!("job_handler_panicked");
            Disposition::DeadLetter
        }
    }
}

/// The `type` tag of a decoded body, if it is a string.
fn job_type(raw: &Value) -> Option<&str> {
    raw.get("type").and_then(Value::as_str)
}

fn preview(body: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(&body[..body.len().min(500)])
}

/// Resolve once `stop` holds `true` or its sender is gone.
pub async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            warn!("stop_signal_dropped");
            return;
        }
    }
}
