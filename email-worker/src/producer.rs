//! Job producer used by business logic to request an email.
//!
//! Enqueueing never fails loudly: a notification is always secondary to the
//! caller's own work, so every error is logged and reported as `false`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::queue::{Broker, EmailJob, EmailOptions, JobMetadata, JobOrigin, Priority};

pub const WELCOME_TEMPLATE: &str = "welcome";
pub const WELCOME_SUBJECT: &str = "Welcome to PromptHub! 🎉";

/// A freshly registered user.
#[derive(Debug, Clone)]
pub struct WelcomeRecipient {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct JobProducer {
    broker: Arc<dyn Broker>,
    frontend_url: String,
}

impl JobProducer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            frontend_url: "http://localhost:3000".to_string(),
        }
    }

    /// Base URL used for links in producer-built emails.
    pub fn with_frontend_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enqueue an email job. Returns whether the broker accepted it.
    pub async fn enqueue(&self, mut options: EmailOptions, origin: JobOrigin) -> bool {
        options.retry_count = 0;

        let job = EmailJob::send_email(options, JobMetadata::stamped(origin, Utc::now()));

        match self.broker.publish(&job).await {
            Ok(()) => {
                info!(
                    to = %job.data.to,
                    template = %job.data.template,
                    priority = job.data.priority.as_str(),
                    source = job.metadata.source.as_deref().unwrap_or(""),
                    "email_job_queued"
                );
                true
            }
            Err(e) => {
                error!(
                    to = %job.data.to,
                    template = %job.data.template,
                    error = %e,
                    "email_job_queue_failed"
                );
                false
            }
        }
    }

    /// Enqueue without caller metadata.
    pub async fn send_email(&self, options: EmailOptions) -> bool {
        self.enqueue(options, JobOrigin::default()).await
    }

    /// Enqueue the welcome email sent after signup.
    pub async fn queue_welcome_email(&self, recipient: &WelcomeRecipient, source: &str) -> bool {
        let name = recipient
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("there");

        let options = EmailOptions::new(&recipient.email, WELCOME_SUBJECT, WELCOME_TEMPLATE)
            .with_context("name", name)
            .with_context("email", recipient.email.as_str())
            .with_context("dashboardUrl", format!("{}/dashboard", self.frontend_url))
            .with_priority(Priority::Normal);

        self.enqueue(options, JobOrigin::new(&recipient.user_id, source))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryBroker, JobKind};
    use serde_json::Value;

    async fn producer() -> (InMemoryBroker, JobProducer) {
        let broker = InMemoryBroker::new();
        broker.initialize().await.unwrap();
        let producer = JobProducer::new(Arc::new(broker.clone()))
            .with_frontend_url("https://prompthub.dev/");
        (broker, producer)
    }

    #[tokio::test]
    async fn test_enqueue_publishes_stamped_job() {
        let (broker, producer) = producer().await;
        let before = Utc::now();

        let queued = producer
            .enqueue(
                EmailOptions::new("a@b.com", "Welcome", "welcome").with_context("name", "Ann"),
                JobOrigin::new("u-1", "signup"),
            )
            .await;

        assert!(queued);
        let jobs = broker.primary_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::SendEmail);
        assert_eq!(jobs[0].data.context["name"], Value::from("Ann"));
        assert_eq!(jobs[0].metadata.user_id.as_deref(), Some("u-1"));
        assert_eq!(jobs[0].metadata.source.as_deref(), Some("signup"));
        assert!(jobs[0].metadata.timestamp >= before);
    }

    #[tokio::test]
    async fn test_enqueue_resets_retry_count() {
        let (broker, producer) = producer().await;
        let mut options = EmailOptions::new("a@b.com", "Hi", "welcome");
        options.retry_count = 2;

        assert!(producer.send_email(options).await);
        assert_eq!(broker.primary_jobs()[0].retry_count(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_before_initialize_returns_false() {
        let broker = InMemoryBroker::new();
        let producer = JobProducer::new(Arc::new(broker.clone()));

        let queued = producer
            .send_email(EmailOptions::new("a@b.com", "Hi", "welcome"))
            .await;

        assert!(!queued);
        assert_eq!(broker.primary_depth(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_returns_false() {
        let (broker, producer) = producer().await;
        broker.fail_publishes(true);

        assert!(!producer.send_email(EmailOptions::new("a@b.com", "Hi", "welcome")).await);
        assert_eq!(broker.primary_depth(), 0);
    }

    #[tokio::test]
    async fn test_welcome_email() {
        let (broker, producer) = producer().await;
        let recipient = WelcomeRecipient {
            user_id: "u-42".to_string(),
            email: "ann@example.com".to_string(),
            name: Some("Ann".to_string()),
        };

        assert!(producer.queue_welcome_email(&recipient, "google_signup").await);

        let job = &broker.primary_jobs()[0];
        assert_eq!(job.data.to, "ann@example.com");
        assert_eq!(job.data.subject, WELCOME_SUBJECT);
        assert_eq!(job.data.template, "welcome");
        assert_eq!(job.data.priority, Priority::Normal);
        assert_eq!(job.data.context["name"], Value::from("Ann"));
        assert_eq!(job.data.context["email"], Value::from("ann@example.com"));
        assert_eq!(
            job.data.context["dashboardUrl"],
            Value::from("https://prompthub.dev/dashboard")
        );
        assert_eq!(job.metadata.user_id.as_deref(), Some("u-42"));
        assert_eq!(job.metadata.source.as_deref(), Some("google_signup"));
    }

    #[tokio::test]
    async fn test_welcome_email_without_name() {
        let (broker, producer) = producer().await;
        let recipient = WelcomeRecipient {
            user_id: "u-7".to_string(),
            email: "anon@example.com".to_string(),
            name: None,
        };

        producer.queue_welcome_email(&recipient, "signup").await;
        assert_eq!(
            broker.primary_jobs()[0].data.context["name"],
            Value::from("there")
        );
    }
}
