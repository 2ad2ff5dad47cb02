//! Email job processing.
//!
//! [`EmailProcessor::process`] renders one job, hands it to the mail
//! transport and retries with exponential backoff.
//!
//! ## Outcomes
//!
//! ```text
//! SEND_EMAIL ─render─send─▶ Sent
//!      │          └─fail─▶ sleep 2^n ─▶ retry (n < max) ─▶ … ─▶ Exhausted
//! other type ─────────────▶ UnknownKind
//! ```
//!
//! None of these is an error: the caller decides what a failed outcome means
//! for the broker message.

pub mod backoff;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::queue::{EmailJob, JobKind, MAX_RETRIES};
use crate::render::{RenderError, TemplateRenderer};
use crate::transport::{
    MailTransport, OutgoingEmail, PriorityHeaders, SendReceipt, TransportError,
};

pub use backoff::{backoff_delay, RecordingSleeper, Sleeper, TokioSleeper};

/// Default backoff unit: 1s, 2s, 4s.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// A single failed attempt.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Final result of processing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Sent { retry_count: u32, message_id: String },
    UnknownKind(String),
    Exhausted { attempts: u32, last_error: String },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Sent { .. })
    }
}

pub struct EmailProcessor {
    renderer: Arc<dyn TemplateRenderer>,
    transport: Arc<dyn MailTransport>,
    sleeper: Arc<dyn Sleeper>,
    sender: String,
    max_retries: u32,
    retry_base: Duration,
}

impl EmailProcessor {
    /// Create a processor sending as `sender` (`"Name" <address>`).
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        transport: Arc<dyn MailTransport>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            renderer,
            transport,
            sleeper: Arc::new(TokioSleeper),
            sender: sender.into(),
            max_retries: MAX_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Override the retry ceiling (clamped to [`MAX_RETRIES`]) and backoff unit.
    pub fn with_retry_policy(mut self, max_retries: u32, retry_base: Duration) -> Self {
        self.max_retries = max_retries.min(MAX_RETRIES);
        self.retry_base = retry_base;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Process one job to completion, including every retry.
    pub async fn process(&self, job: &EmailJob) -> ProcessOutcome {
        if let JobKind::Other(kind) = &job.kind {
            warn!(job_type = %kind, to = %job.data.to, "email_job_unknown_type");
            return ProcessOutcome::UnknownKind(kind.clone());
        }

        let mut job = job.clone();
        loop {
            let attempt = job.retry_count() + 1;

            match self.attempt(&job).await {
                Ok(receipt) => {
                    info!(
                        to = %job.data.to,
                        template = %job.data.template,
                        attempt = attempt,
                        message_id = %receipt.message_id,
                        transport = self.transport.name(),
                        "email_sent"
                    );
                    return ProcessOutcome::Sent {
                        retry_count: job.retry_count(),
                        message_id: receipt.message_id,
                    };
                }
                Err(e) => {
                    warn!(
                        to = %job.data.to,
                        template = %job.data.template,
                        attempt = attempt,
                        error = %e,
                        "email_send_failed"
                    );

                    if job.retry_count() >= self.max_retries {
                        error!(
                            to = %job.data.to,
                            template = %job.data.template,
                            attempts = attempt,
                            "email_retries_exhausted"
                        );
                        return ProcessOutcome::Exhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        };
                    }

                    let delay = backoff_delay(self.retry_base, job.retry_count());
                    info!(
                        to = %job.data.to,
                        delay = ?delay,
                        next_retry = job.retry_count() + 1,
                        "email_retry_scheduled"
                    );
                    self.sleeper.sleep(delay).await;
                    job = job.next_attempt();
                }
            }
        }
    }

    async fn attempt(&self, job: &EmailJob) -> Result<SendReceipt, ProcessingError> {
        let html = self.renderer.render(&job.data.template, &job.data.context)?;

        let email = OutgoingEmail {
            from: self.sender.clone(),
            to: job.data.to.clone(),
            subject: job.data.subject.clone(),
            html,
            priority: job.data.priority,
            headers: PriorityHeaders::for_priority(job.data.priority),
        };

        Ok(self.transport.send(&email).await?)
    }
}
