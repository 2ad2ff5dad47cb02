//! HTTP intake for services that cannot link the library.
//!
//! Requests are validated, handed to the [`JobProducer`](crate::JobProducer)
//! and answered immediately. Rendering and delivery happen in the worker.

pub mod handlers;

pub use handlers::{enqueue_email, health, AppState, EnqueueRequest, EnqueueResponse, HealthResponse};
