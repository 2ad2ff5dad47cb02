//! Queue message types for the email pipeline.
//!
//! A single job shape travels through `email_queue`. Messages the worker
//! rejects are routed by the broker to the `email_queue_failed` sibling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Primary queue name for outbound email jobs.
pub const EMAIL_QUEUE: &str = "email_queue";

/// Suffix appended to a primary queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = "_failed";

/// Hard ceiling for the per-job retry counter.
pub const MAX_RETRIES: u32 = 3;

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

// =============================================================================
// Job kind
// =============================================================================

/// Tag identifying what a job asks the worker to do.
///
/// Unrecognised tags are kept verbatim so they can be logged and so a
/// decoded job re-encodes to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    SendEmail,
    Other(String),
}

impl JobKind {
    pub const SEND_EMAIL: &'static str = "SEND_EMAIL";

    pub fn as_str(&self) -> &str {
        match self {
            JobKind::SendEmail => Self::SEND_EMAIL,
            JobKind::Other(tag) => tag,
        }
    }
}

impl From<String> for JobKind {
    fn from(tag: String) -> Self {
        if tag == Self::SEND_EMAIL {
            JobKind::SendEmail
        } else {
            JobKind::Other(tag)
        }
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::SendEmail => JobKind::SEND_EMAIL.to_string(),
            JobKind::Other(tag) => tag,
        }
    }
}

// =============================================================================
// Payload
// =============================================================================

/// Delivery priority requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

/// Everything needed to render and send one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailOptions {
    /// Recipient email address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Template identifier, resolved by the template renderer
    pub template: String,
    /// Values exposed to the template
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    /// Number of retries already spent on this job
    #[serde(default)]
    pub retry_count: u32,
}

impl EmailOptions {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            template: template.into(),
            context: Map::new(),
            priority: Priority::Normal,
            retry_count: 0,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Caller-supplied part of the job metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl JobOrigin {
    pub fn new(user_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            source: Some(source.into()),
        }
    }
}

/// Metadata attached to a job when it is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Enqueue time, stamped by the producer
    pub timestamp: DateTime<Utc>,
}

impl JobMetadata {
    pub fn stamped(origin: JobOrigin, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: origin.user_id,
            source: origin.source,
            timestamp,
        }
    }
}

// =============================================================================
// Job
// =============================================================================

/// The message body stored in `email_queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub data: EmailOptions,
    pub metadata: JobMetadata,
}

impl EmailJob {
    /// Create a `SEND_EMAIL` job.
    pub fn send_email(data: EmailOptions, metadata: JobMetadata) -> Self {
        Self {
            kind: JobKind::SendEmail,
            data,
            metadata,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.data.retry_count
    }

    /// The job to use for the next attempt: an identical copy with the retry
    /// counter advanced by one, saturating at [`MAX_RETRIES`].
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.data.retry_count = (self.data.retry_count + 1).min(MAX_RETRIES);
        next
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}
