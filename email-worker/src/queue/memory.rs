//! In-process broker with the same queue semantics as the RabbitMQ client.
//!
//! Messages are stored as serialized bytes, so everything that goes through
//! this broker also goes through the wire format. Rejected messages move to
//! the dead-letter list exactly like a queue declared with
//! `x-dead-letter-routing-key`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use super::broker::{dispatch, wait_for_stop, Broker, Disposition, JobHandler, QueueError};
use super::types::EmailJob;

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: Mutex<MemoryState>,
    available: Notify,
}

#[derive(Default)]
struct MemoryState {
    initialized: bool,
    primary: VecDeque<Vec<u8>>,
    dead_letter: Vec<Vec<u8>>,
    acknowledged: usize,
    initialize_calls: u32,
    failing_initializations: u32,
    fail_publishes: bool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` calls to `initialize` fail as if the broker
    /// were unreachable.
    pub fn fail_initializations(&self, count: u32) {
        self.state().failing_initializations = count;
    }

    /// Make every publish fail with a transport error.
    pub fn fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    /// Append a raw body to the primary queue, bypassing serialization.
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        self.state().primary.push_back(body.into());
        self.inner.available.notify_one();
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn initialize_calls(&self) -> u32 {
        self.state().initialize_calls
    }

    pub fn primary_depth(&self) -> usize {
        self.state().primary.len()
    }

    pub fn dead_letter_depth(&self) -> usize {
        self.state().dead_letter.len()
    }

    pub fn acknowledged(&self) -> usize {
        self.state().acknowledged
    }

    /// Jobs currently waiting on the primary queue, decoded.
    pub fn primary_jobs(&self) -> Vec<EmailJob> {
        self.state()
            .primary
            .iter()
            .filter_map(|body| EmailJob::from_slice(body).ok())
            .collect()
    }

    /// Raw bodies that were dead-lettered, oldest first.
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.state().dead_letter.clone()
    }

    fn take_next(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(QueueError::ConsumerClosed);
        }
        Ok(state.primary.pop_front())
    }

    fn settle(&self, body: Vec<u8>, disposition: Disposition) {
        let mut state = self.state();
        match disposition {
            Disposition::Ack => state.acknowledged += 1,
            Disposition::DeadLetter => {
                warn!(body_length = body.len(), "memory_job_dead_lettered");
                state.dead_letter.push(body);
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn initialize(&self) -> Result<(), QueueError> {
        let mut state = self.state();
        state.initialize_calls += 1;

        if state.failing_initializations > 0 {
            state.failing_initializations -= 1;
            return Err(QueueError::Connection("broker unreachable".into()));
        }

        if !state.initialized {
            state.initialized = true;
            info!("memory_broker_initialized");
        }
        Ok(())
    }

    async fn publish(&self, job: &EmailJob) -> Result<(), QueueError> {
        let body = job.to_vec()?;
        {
            let mut state = self.state();
            if !state.initialized {
                return Err(QueueError::NotInitialized);
            }
            if state.fail_publishes {
                return Err(QueueError::Publish("write to broker failed".into()));
            }
            state.primary.push_back(body);
        }
        self.inner.available.notify_one();
        Ok(())
    }

    async fn consume(
        &self,
        handler: Arc<dyn JobHandler>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), QueueError> {
        if !self.is_initialized() {
            return Err(QueueError::NotInitialized);
        }

        loop {
            match self.take_next()? {
                Some(body) => {
                    let disposition = tokio::select! {
                        disposition = dispatch(handler.as_ref(), &body) => disposition,
                        _ = wait_for_stop(&mut stop) => {
                            // Unacked work goes back to the head of the queue.
                            self.state().primary.push_front(body);
                            return Ok(());
                        }
                    };
                    self.settle(body, disposition);
                }
                None => {
                    tokio::select! {
                        _ = self.inner.available.notified() => {}
                        _ = wait_for_stop(&mut stop) => return Ok(()),
                    }
                }
            }
        }
    }

    async fn close(&self) {
        let was_open = std::mem::replace(&mut self.state().initialized, false);
        if was_open {
            self.inner.available.notify_one();
            info!("memory_broker_closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::types::{EmailOptions, JobMetadata, JobOrigin};
    use anyhow::anyhow;
    use chrono::Utc;

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _job: EmailJob) -> anyhow::Result<()> {
            Err(anyhow!("renderer exploded"))
        }
    }

    struct OkHandler;

    #[async_trait]
    impl JobHandler for OkHandler {
        async fn handle(&self, _job: EmailJob) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn job(to: &str) -> EmailJob {
        EmailJob::send_email(
            EmailOptions::new(to, "Hi", "welcome"),
            JobMetadata::stamped(JobOrigin::default(), Utc::now()),
        )
    }

    async fn drain(broker: &InMemoryBroker, handler: Arc<dyn JobHandler>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let consumer = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.consume(handler, stop_rx).await })
        };
        while broker.primary_depth() > 0 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        stop_tx.send(true).unwrap();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_publish_before_initialize_fails() {
        let broker = InMemoryBroker::new();
        let result = broker.publish(&job("a@b.com")).await;
        assert!(matches!(result, Err(QueueError::NotInitialized)));
        assert_eq!(broker.primary_depth(), 0);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.initialize().await.unwrap();
        broker.initialize().await.unwrap();
        assert!(broker.is_initialized());
        assert_eq!(broker.initialize_calls(), 2);
    }

    #[tokio::test]
    async fn test_simulated_outage() {
        let broker = InMemoryBroker::new();
        broker.fail_initializations(1);
        assert!(matches!(
            broker.initialize().await,
            Err(QueueError::Connection(_))
        ));
        broker.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_handler_moves_message_to_dead_letter() {
        let broker = InMemoryBroker::new();
        broker.initialize().await.unwrap();
        broker.publish(&job("a@b.com")).await.unwrap();

        drain(&broker, Arc::new(FailingHandler)).await;

        assert_eq!(broker.primary_depth(), 0);
        assert_eq!(broker.dead_letter_depth(), 1);
        assert_eq!(broker.acknowledged(), 0);
    }

    #[tokio::test]
    async fn test_successful_handler_acknowledges() {
        let broker = InMemoryBroker::new();
        broker.initialize().await.unwrap();
        broker.publish(&job("a@b.com")).await.unwrap();
        broker.publish(&job("c@d.com")).await.unwrap();

        drain(&broker, Arc::new(OkHandler)).await;

        assert_eq!(broker.acknowledged(), 2);
        assert_eq!(broker.dead_letter_depth(), 0);
    }

    #[tokio::test]
    async fn test_consume_before_initialize_fails() {
        let broker = InMemoryBroker::new();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let result = broker.consume(Arc::new(OkHandler), stop_rx).await;
        assert!(matches!(result, Err(QueueError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.initialize().await.unwrap();
        broker.close().await;
        broker.close().await;
        assert!(!broker.is_initialized());
        assert!(matches!(
            broker.publish(&job("a@b.com")).await,
            Err(QueueError::NotInitialized)
        ));
    }
}
