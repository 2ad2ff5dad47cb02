//! Queue module for the durable email job queue.
//!
//! This module provides:
//! - The job wire format (`EmailJob`)
//! - The `Broker` contract and its settlement rules
//! - A RabbitMQ implementation and an in-memory one
//!
//! ## Topology
//!
//! ```text
//! Producer → email_queue ──ack──▶ (removed)
//!                 │
//!                 └──reject, no requeue──▶ email_queue_failed
//! ```

pub mod broker;
pub mod memory;
pub mod rabbitmq;
pub mod types;

pub use broker::{dispatch, wait_for_stop, Broker, Disposition, JobHandler, QueueError};
pub use memory::InMemoryBroker;
pub use rabbitmq::BrokerClient;
pub use types::{
    dead_letter_queue, EmailJob, EmailOptions, JobKind, JobMetadata, JobOrigin, Priority,
    EMAIL_QUEUE, MAX_RETRIES,
};
