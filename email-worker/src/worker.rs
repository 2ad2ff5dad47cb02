//! Email worker: the supervisor that keeps a consumer attached to the queue.
//!
//! ```text
//! Stopped ─▶ Initializing ─▶ Consuming
//!    ▲            │              │
//!    └── delay ◀──┴── error ◀────┘
//! ```
//!
//! The loop never gives up on its own. It only ends when the stop signal
//! fires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::process::{EmailProcessor, ProcessOutcome};
use crate::queue::{wait_for_stop, Broker, EmailJob, JobHandler};

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Bridges broker deliveries to the [`EmailProcessor`].
pub struct EmailJobHandler {
    processor: Arc<EmailProcessor>,
    dead_letter_failures: bool,
}

impl EmailJobHandler {
    /// Exhausted and unknown-type jobs are acknowledged and dropped.
    pub fn new(processor: Arc<EmailProcessor>) -> Self {
        Self {
            processor,
            dead_letter_failures: false,
        }
    }

    /// Route exhausted and unknown-type jobs to the dead-letter queue instead.
    pub fn dead_letter_failures(mut self, enabled: bool) -> Self {
        self.dead_letter_failures = enabled;
        self
    }
}

#[async_trait]
impl JobHandler for EmailJobHandler {
    async fn handle(&self, job: EmailJob) -> anyhow::Result<()> {
        info!(
            job_type = job.kind.as_str(),
            to = %job.data.to,
            template = %job.data.template,
            retry_count = job.retry_count(),
            "email_job_processing"
        );

        let outcome = self.processor.process(&job).await;
        if outcome.is_success() || !self.dead_letter_failures {
            return Ok(());
        }

        match outcome {
            ProcessOutcome::UnknownKind(kind) => Err(anyhow!("unknown job type {kind}")),
            ProcessOutcome::Exhausted { attempts, last_error } => Err(anyhow!(
                "email to {} failed after {attempts} attempts: {last_error}",
                job.data.to
            )),
            ProcessOutcome::Sent { .. } => Ok(()),
        }
    }

    async fn handle_unknown(&self, kind: String) -> anyhow::Result<()> {
        warn!(job_type = %kind, "email_job_unknown_type");
        if self.dead_letter_failures {
            return Err(anyhow!("unknown job type {kind:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Initializing,
    Consuming,
}

pub struct EmailWorker {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn JobHandler>,
    restart_delay: Duration,
    state: watch::Sender<WorkerState>,
}

impl EmailWorker {
    pub fn new(broker: Arc<dyn Broker>, handler: Arc<dyn JobHandler>) -> Self {
        let (state, _) = watch::channel(WorkerState::Stopped);
        Self {
            broker,
            handler,
            restart_delay: DEFAULT_RESTART_DELAY,
            state,
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Watch the supervisor's state transitions.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until `stop` becomes `true`.
    ///
    /// Any initialization or consumer failure is logged and the whole
    /// startup sequence is retried after the restart delay.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut restarts: u64 = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            self.state.send_replace(WorkerState::Initializing);
            info!(restarts = restarts, "email_worker_starting");

            let initialized = tokio::select! {
                result = self.broker.initialize() => result,
                _ = wait_for_stop(&mut stop) => break,
            };

            let failure = match initialized {
                Ok(()) => {
                    self.state.send_replace(WorkerState::Consuming);
                    info!("email_worker_consuming");

                    match self.broker.consume(self.handler.clone(), stop.clone()).await {
                        Ok(()) => break,
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            self.state.send_replace(WorkerState::Stopped);
            error!(
                error = %failure,
                restart_delay = ?self.restart_delay,
                "email_worker_failed"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.restart_delay) => {}
                _ = wait_for_stop(&mut stop) => break,
            }

            restarts += 1;
            warn!(restarts = restarts, "email_worker_restarting");
        }

        self.state.send_replace(WorkerState::Stopped);
        info!("email_worker_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EmailOptions, InMemoryBroker, JobKind, JobMetadata, JobOrigin};
    use crate::render::{RenderError, TemplateRenderer};
    use crate::transport::MockTransport;
    use crate::process::RecordingSleeper;
    use chrono::Utc;
    use serde_json::{Map, Value};

    struct StaticRenderer;

    impl TemplateRenderer for StaticRenderer {
        fn render(&self, _template: &str, _context: &Map<String, Value>) -> Result<String, RenderError> {
            Ok("<p>hi</p>".to_string())
        }
    }

    fn handler(transport: MockTransport, dead_letter: bool) -> EmailJobHandler {
        let processor = EmailProcessor::new(Arc::new(StaticRenderer), Arc::new(transport), "a@b.com")
            .with_sleeper(Arc::new(RecordingSleeper::new()));
        EmailJobHandler::new(Arc::new(processor)).dead_letter_failures(dead_letter)
    }

    fn job(kind: JobKind) -> EmailJob {
        let mut job = EmailJob::send_email(
            EmailOptions::new("ann@example.com", "Hi", "welcome"),
            JobMetadata::stamped(JobOrigin::default(), Utc::now()),
        );
        job.kind = kind;
        job
    }

    #[tokio::test]
    async fn test_handler_acknowledges_exhausted_by_default() {
        let handler = handler(MockTransport::always_failing(), false);
        assert!(handler.handle(job(JobKind::SendEmail)).await.is_ok());
        assert!(handler.handle(job(JobKind::Other("PING".into()))).await.is_ok());
    }

    #[tokio::test]
    async fn test_handler_dead_letters_when_enabled() {
        let handler = handler(MockTransport::always_failing(), true);

        let err = handler.handle(job(JobKind::SendEmail)).await.unwrap_err();
        assert!(err.to_string().contains("after 4 attempts"));

        let err = handler.handle(job(JobKind::Other("PING".into()))).await.unwrap_err();
        assert!(err.to_string().contains("PING"));
    }

    #[tokio::test]
    async fn test_unknown_type_follows_dead_letter_setting() {
        let acking = handler(MockTransport::new(), false);
        assert!(acking.handle_unknown("SEND_SMS".to_string()).await.is_ok());

        let dead_lettering = handler(MockTransport::new(), true);
        let err = dead_lettering
            .handle_unknown("SEND_SMS".to_string())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SEND_SMS"));
    }

    #[tokio::test]
    async fn test_handler_success_with_dead_letter_enabled() {
        let handler = handler(MockTransport::new(), true);
        assert!(handler.handle(job(JobKind::SendEmail)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_restarts_after_failed_initialization() {
        let broker = InMemoryBroker::new();
        broker.fail_initializations(2);

        let worker = Arc::new(
            EmailWorker::new(
                Arc::new(broker.clone()),
                Arc::new(handler(MockTransport::new(), false)),
            )
            .with_restart_delay(Duration::from_secs(5)),
        );
        let mut state = worker.state();
        let (stop_tx, stop_rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        let running = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(stop_rx).await })
        };

        state
            .wait_for(|s| *s == WorkerState::Consuming)
            .await
            .unwrap();

        assert_eq!(broker.initialize_calls(), 3);
        assert!(broker.is_initialized());
        assert!(started.elapsed() >= Duration::from_secs(10));

        stop_tx.send(true).unwrap();
        running.await.unwrap();
        assert_eq!(*worker.state().borrow(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_restarts_when_consumer_closes() {
        let broker = InMemoryBroker::new();
        let worker = Arc::new(EmailWorker::new(
            Arc::new(broker.clone()),
            Arc::new(handler(MockTransport::new(), false)),
        ));
        let mut state = worker.state();
        let (stop_tx, stop_rx) = watch::channel(false);

        let running = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(stop_rx).await })
        };

        state.wait_for(|s| *s == WorkerState::Consuming).await.unwrap();
        broker.close().await;
        state.wait_for(|s| *s == WorkerState::Stopped).await.unwrap();
        state.wait_for(|s| *s == WorkerState::Consuming).await.unwrap();

        assert_eq!(broker.initialize_calls(), 2);

        stop_tx.send(true).unwrap();
        running.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_restart_delay() {
        let broker = InMemoryBroker::new();
        broker.fail_initializations(u32::MAX);
        let worker = Arc::new(EmailWorker::new(
            Arc::new(broker.clone()),
            Arc::new(handler(MockTransport::new(), false)),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);

        let running = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(stop_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_tx.send(true).unwrap();
        running.await.unwrap();

        assert_eq!(broker.initialize_calls(), 1);
    }
}
