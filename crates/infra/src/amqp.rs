//! RabbitMQ-backed [`MessageQueue`] (AMQP 0-9-1 via `lapin`).
//!
//! - **Durable queue**: declared durable, not exclusive, not auto-delete
//! - **Prefetch 1**: the broker hands out one unacknowledged message at a time
//! - **Manual ack**: every delivery is settled explicitly by the pipeline
//!
//! The pipeline runs on a plain thread; broker futures are driven with
//! [`tokio::runtime::Handle::block_on`] on the runtime passed to [`AmqpQueue::connect`].

use std::time::Duration;

use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use skyrelay_queue::{MessageQueue, QueueMessage};

use crate::config::Settings;

/// Messages the broker may push before the current one is settled.
const PREFETCH_COUNT: u16 = 1;

#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("AMQP connection error: {0}")]
    Connection(#[source] lapin::Error),

    #[error("AMQP channel error: {0}")]
    Channel(#[source] lapin::Error),

    #[error("failed to declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to start consumer on {queue}: {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("delivery failed: {0}")]
    Delivery(#[source] lapin::Error),

    #[error("failed to settle delivery {delivery_tag}: {source}")]
    Settle {
        delivery_tag: u64,
        #[source]
        source: lapin::Error,
    },

    #[error("consumer stream ended")]
    ConsumerClosed,
}

/// Broker-side handle for one delivery.
pub struct AmqpHandle {
    acker: Acker,
}

impl std::fmt::Debug for AmqpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpHandle").finish_non_exhaustive()
    }
}

pub struct AmqpQueue {
    runtime: Handle,
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
}

impl AmqpQueue {
    /// Connect, declare the queue, set prefetch and start a manual-ack consumer.
    #[instrument(skip_all, fields(queue = %settings.queue_name))]
    pub fn connect(runtime: Handle, settings: &Settings) -> Result<Self, AmqpError> {
        info!(url = %settings.redacted_amqp_url(), "connecting_to_rabbitmq");

        let queue_name = settings.queue_name.clone();
        let consumer_tag = format!("skyrelay-{}", Uuid::now_v7());

        let (connection, channel, consumer) = runtime.block_on(async {
            let connection = Connection::connect(
                &settings.amqp_url,
                ConnectionProperties::default().with_connection_name("skyrelay-worker".into()),
            )
            .await
            .map_err(AmqpError::Connection)?;

            let channel = connection
                .create_channel()
                .await
                .map_err(AmqpError::Channel)?;

            channel
                .queue_declare(
                    &queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        exclusive: false,
                        auto_delete: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|source| AmqpError::Declare {
                    queue: queue_name.clone(),
                    source,
                })?;

            channel
                .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
                .await
                .map_err(AmqpError::Channel)?;

            let consumer = channel
                .basic_consume(
                    &queue_name,
                    &consumer_tag,
                    BasicConsumeOptions {
                        no_ack: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|source| AmqpError::Consume {
                    queue: queue_name.clone(),
                    source,
                })?;

            Ok::<_, AmqpError>((connection, channel, consumer))
        })?;

        info!(consumer_tag = %consumer_tag, prefetch = PREFETCH_COUNT, "rabbitmq_connected");

        Ok(Self {
            runtime,
            connection,
            channel,
            consumer,
            consumer_tag,
        })
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Close the channel, then the connection. Unsettled deliveries are
    /// returned to the queue by the broker.
    pub fn close(self) -> Result<(), AmqpError> {
        let Self {
            runtime,
            connection,
            channel,
            ..
        } = self;

        runtime.block_on(async {
            channel.close(200, "OK").await.map_err(AmqpError::Channel)?;
            connection
                .close(200, "OK")
                .await
                .map_err(AmqpError::Connection)
        })?;

        debug!("rabbitmq_closed");
        Ok(())
    }
}

impl MessageQueue for AmqpQueue {
    type Handle = AmqpHandle;
    type Error = AmqpError;

    fn receive(&mut self, timeout: Duration) -> Result<Option<QueueMessage<AmqpHandle>>, AmqpError> {
        let next = self
            .runtime
            .block_on(tokio::time::timeout(timeout, self.consumer.next()));

        match next {
            Err(_elapsed) => Ok(None),
            Ok(None) => Err(AmqpError::ConsumerClosed),
            Ok(Some(Err(err))) => Err(AmqpError::Delivery(err)),
            Ok(Some(Ok(delivery))) => Ok(Some(QueueMessage::new(
                delivery.data,
                delivery.delivery_tag,
                delivery.redelivered,
                AmqpHandle {
                    acker: delivery.acker,
                },
            ))),
        }
    }

    fn ack(&mut self, message: QueueMessage<AmqpHandle>) -> Result<(), AmqpError> {
        let delivery_tag = message.delivery_tag();
        let handle = message.into_handle();
        self.runtime
            .block_on(handle.acker.ack(BasicAckOptions::default()))
            .map_err(|source| AmqpError::Settle {
                delivery_tag,
                source,
            })
    }

    fn reject(
        &mut self,
        message: QueueMessage<AmqpHandle>,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        let delivery_tag = message.delivery_tag();
        let handle = message.into_handle();
        self.runtime
            .block_on(handle.acker.nack(BasicNackOptions {
                requeue,
                multiple: false,
            }))
            .map_err(|source| AmqpError::Settle {
                delivery_tag,
                source,
            })
    }
}
