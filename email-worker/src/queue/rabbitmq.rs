//! RabbitMQ broker client built on lapin.
//!
//! One client owns one connection/channel pair. The producer side and the
//! worker side each construct their own client; a client is cheap to clone
//! and clones share the same channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use super::broker::{dispatch, wait_for_stop, Broker, Disposition, JobHandler, QueueError};
use super::types::{dead_letter_queue, EmailJob};
use crate::config::Config;

/// Persistent delivery mode flag for published messages.
const PERSISTENT: u8 = 2;

/// RabbitMQ-backed [`Broker`].
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    url: String,
    queue: String,
    dead_letter_queue: String,
    prefetch_count: u16,
    consumer_tag_prefix: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl BrokerClient {
    /// Create an unconnected client for `queue` and its `<queue>_failed` sibling.
    pub fn new(url: impl Into<String>, queue: impl Into<String>, prefetch_count: u16) -> Self {
        let queue = queue.into();
        Self {
            inner: Arc::new(BrokerInner {
                url: url.into(),
                dead_letter_queue: dead_letter_queue(&queue),
                queue,
                prefetch_count,
                consumer_tag_prefix: format!("postbox-{}", Uuid::new_v4()),
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.rabbitmq_url.clone(),
            config.email_queue.clone(),
            config.prefetch_count,
        )
    }

    /// A tag no earlier `basic_consume` on this client has used.
    fn next_consumer_tag(&self) -> String {
        format!("{}-{}", self.inner.consumer_tag_prefix, Uuid::new_v4().simple())
    }

    /// The live channel, if `initialize` has succeeded.
    async fn channel(&self) -> Result<Channel, QueueError> {
        let channel = self.inner.channel.read().await;
        match channel.as_ref() {
            Some(ch) if ch.status().connected() => Ok(ch.clone()),
            Some(_) => Err(QueueError::Connection("channel is no longer connected".into())),
            None => Err(QueueError::NotInitialized),
        }
    }

    async fn settle(
        &self,
        channel: &Channel,
        delivery_tag: u64,
        disposition: Disposition,
    ) -> Result<(), QueueError> {
        match disposition {
            Disposition::Ack => {
                channel
                    .basic_ack(delivery_tag, BasicAckOptions::default())
                    .await
                    .map_err(|e| QueueError::Consume(format!("ack failed: {e}")))?;
                info!(
                    queue = %self.inner.queue,
                    delivery_tag = delivery_tag,
                    "rabbitmq_job_acked"
                );
            }
            Disposition::DeadLetter => {
                channel
                    .basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
                    .await
                    .map_err(|e| QueueError::Consume(format!("reject failed: {e}")))?;
                warn!(
                    queue = %self.inner.queue,
                    dead_letter_queue = %self.inner.dead_letter_queue,
                    delivery_tag = delivery_tag,
                    "rabbitmq_job_dead_lettered"
                );
            }
        }
        Ok(())
    }
}

/// Queue arguments routing rejected messages to `dead_letter_queue` through
/// the default exchange.
fn dead_letter_arguments(dead_letter_queue: &str) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(LongString::from("")),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(LongString::from(dead_letter_queue)),
    );
    args
}

#[async_trait]
impl Broker for BrokerClient {
    async fn initialize(&self) -> Result<(), QueueError> {
        if self.channel().await.is_ok() {
            return Ok(());
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(());
            }
        }

        channel.take();
        if let Some(stale) = connection.take() {
            if let Err(e) = stale.close(200, "Reconnecting").await {
                warn!(error = %e, "rabbitmq_stale_connection_close_error");
            }
        }

        info!(url_length = self.inner.url.len(), "rabbitmq_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        info!("rabbitmq_connected");

        let ch = conn
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("channel creation failed: {e}")))?;

        ch.basic_qos(self.inner.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("failed to set QoS: {e}")))?;

        ch.queue_declare(
            &self.inner.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            dead_letter_arguments(&self.inner.dead_letter_queue),
        )
        .await
        .map_err(|e| QueueError::Connection(format!("failed to declare primary queue: {e}")))?;

        ch.queue_declare(
            &self.inner.dead_letter_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| {
            QueueError::Connection(format!("failed to declare dead-letter queue: {e}"))
        })?;

        info!(
            queue = %self.inner.queue,
            dead_letter_queue = %self.inner.dead_letter_queue,
            prefetch_count = self.inner.prefetch_count,
            "rabbitmq_queues_declared"
        );

        *connection = Some(conn);
        *channel = Some(ch);

        Ok(())
    }

    async fn publish(&self, job: &EmailJob) -> Result<(), QueueError> {
        let channel = self.channel().await?;

        let body = job.to_vec()?;
        let message_id = Uuid::new_v4().to_string();

        channel
            .basic_publish(
                "",
                &self.inner.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.clone().into()),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(format!("publish not confirmed: {e}")))?;

        info!(
            queue = %self.inner.queue,
            message_id = %message_id,
            to = %job.data.to,
            template = %job.data.template,
            body_length = body.len(),
            "rabbitmq_job_published"
        );

        Ok(())
    }

    async fn consume(
        &self,
        handler: Arc<dyn JobHandler>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), QueueError> {
        let channel = self.channel().await?;

        let mut consumer = channel
            .basic_consume(
                &self.inner.queue,
                &self.next_consumer_tag(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Consume(format!("failed to start consumer: {e}")))?;

        info!(
            queue = %self.inner.queue,
            consumer_tag = consumer.tag().as_str(),
            "rabbitmq_consumer_started"
        );

        let result = loop {
            tokio::select! {
                _ = wait_for_stop(&mut stop) => {
                    info!("rabbitmq_consumer_stopping");
                    break Ok(());
                }
                delivery = consumer.next() => {
                    let delivery = match delivery {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(e)) => break Err(QueueError::Consume(e.to_string())),
                        None => {
                            warn!("rabbitmq_consumer_closed");
                            break Err(QueueError::ConsumerClosed);
                        }
                    };

                    let delivery_tag = delivery.delivery_tag;
                    let message_id = delivery
                        .properties
                        .message_id()
                        .as_ref()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info!(
                        queue = %self.inner.queue,
                        message_id = %message_id,
                        delivery_tag = delivery_tag,
                        redelivered = delivery.redelivered,
                        "rabbitmq_job_received"
                    );

                    // Stopping mid-job leaves the message unacked for redelivery.
                    let disposition = tokio::select! {
                        disposition = dispatch(handler.as_ref(), &delivery.data) => disposition,
                        _ = wait_for_stop(&mut stop) => {
                            warn!(
                                message_id = %message_id,
                                delivery_tag = delivery_tag,
                                "rabbitmq_job_abandoned"
                            );
                            break Ok(());
                        }
                    };

                    if let Err(e) = self.settle(&channel, delivery_tag, disposition).await {
                        break Err(e);
                    }
                }
            }
        };

        // Cancel on every exit so a restart on the same channel starts clean.
        if channel.status().connected() {
            if let Err(e) = channel
                .basic_cancel(consumer.tag().as_str(), BasicCancelOptions::default())
                .await
            {
                warn!(error = %e, "rabbitmq_consumer_cancel_error");
            }
        }

        result
    }

    async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if channel.is_none() && connection.is_none() {
            return;
        }

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_client_closed");
    }
}
