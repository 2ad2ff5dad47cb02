//! Mail transport abstraction.
//!
//! The processor hands a fully rendered [`OutgoingEmail`] to a
//! [`MailTransport`]. Pooling and rate limiting are the transport's concern.

pub mod headers;
pub mod mock;
pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::Priority;

pub use headers::PriorityHeaders;
pub use mock::MockTransport;
pub use smtp::{SmtpSettings, SmtpTransport};

/// A rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Sender mailbox, e.g. `"PromptHub" <noreply@prompthub.dev>`
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub priority: Priority,
    pub headers: PriorityHeaders,
}

/// Result of a successful hand-off to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Transport-specific message ID or server response line
    pub message_id: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid {field} address: {message}")]
    InvalidAddress { field: &'static str, message: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport rejected message ({}): {message}", severity(.permanent))]
    Rejected { permanent: bool, message: String },
}

fn severity(permanent: &bool) -> &'static str {
    if *permanent {
        "permanent"
    } else {
        "transient"
    }
}

/// Delivers rendered email.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, TransportError>;

    fn name(&self) -> &'static str;
}
