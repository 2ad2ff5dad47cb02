//! Postbox - asynchronous outbound email pipeline.
//!
//! Business logic enqueues an email request and returns immediately. A
//! separate worker renders the template, sends the message and retries with
//! exponential backoff. Messages the worker cannot handle end up in a
//! dead-letter queue.
//!
//! Binaries:
//! - `postbox-worker`: consumes `email_queue` and sends mail
//! - `postbox-web`: thin HTTP intake that enqueues jobs
//!
//! ## Architecture
//!
//! ```text
//! caller → JobProducer → email_queue → EmailWorker → EmailProcessor → SMTP
//!                             │ reject
//!                             ▼
//!                     email_queue_failed
//! ```

pub mod config;
pub mod process;
pub mod producer;
pub mod queue;
pub mod render;
pub mod transport;
pub mod util;
pub mod web;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use process::{EmailProcessor, ProcessOutcome, ProcessingError};
pub use producer::{JobProducer, WelcomeRecipient};
pub use queue::{
    Broker, BrokerClient, EmailJob, EmailOptions, InMemoryBroker, JobKind, JobMetadata, JobOrigin,
    Priority, QueueError, EMAIL_QUEUE, MAX_RETRIES,
};
pub use render::{HandlebarsRenderer, RenderError, TemplateRenderer};
pub use transport::{MailTransport, MockTransport, SmtpTransport, TransportError};
pub use web::AppState;
pub use worker::{EmailJobHandler, EmailWorker, WorkerState};
