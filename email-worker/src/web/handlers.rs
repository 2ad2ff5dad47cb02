//! Intake endpoint handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::producer::JobProducer;
use crate::queue::{EmailOptions, JobOrigin};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub producer: JobProducer,
}

impl AppState {
    pub fn new(config: Config, producer: JobProducer) -> Self {
        Self {
            config: Arc::new(config),
            producer,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        queue: state.config.email_queue.clone(),
    })
}

// =============================================================================
// Enqueue
// =============================================================================

/// Body of `POST /emails`: the email options plus optional caller metadata.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(flatten)]
    pub options: EmailOptions,
    #[serde(default)]
    pub metadata: JobOrigin,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EnqueueResponse {
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl EnqueueResponse {
    fn rejected(error: &'static str) -> Self {
        Self {
            queued: false,
            error: Some(error),
        }
    }
}

/// Enqueue an email job.
///
/// Returns 202 once the broker has accepted the job, 400 for an unusable
/// request and 503 when the broker refused it.
pub async fn enqueue_email(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> (StatusCode, Json<EnqueueResponse>) {
    let EnqueueRequest { options, metadata } = request;

    if options.to.trim().is_empty() {
        warn!("enqueue_missing_recipient");
        return (
            StatusCode::BAD_REQUEST,
            Json(EnqueueResponse::rejected("missing recipient")),
        );
    }
    if options.template.trim().is_empty() {
        warn!(to = %options.to, "enqueue_missing_template");
        return (
            StatusCode::BAD_REQUEST,
            Json(EnqueueResponse::rejected("missing template")),
        );
    }

    info!(
        to = %options.to,
        template = %options.template,
        priority = options.priority.as_str(),
        "enqueue_request_received"
    );

    if !state.producer.enqueue(options, metadata).await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(EnqueueResponse::rejected("queue unavailable")),
        );
    }

    (
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            queued: true,
            error: None,
        }),
    )
}
