//! RabbitMQ adapter built on lapin.
//!
//! One durable jobs queue with manual acks and a raised consumer timeout
//! for long folder-organize runs, plus a fanout exchange for events. On
//! connection loss every consumer re-registers after a fixed backoff;
//! unacked jobs are redelivered by the broker and the handlers'
//! short-circuit-on-terminal-state idempotency absorbs the duplicates.

use crate::{Broker, EventStream, JobAcker, JobDelivery, JobStream};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tome_core::{Event, Job, Result, TomeError};

const JOBS_QUEUE: &str = "tome.jobs";
const EVENTS_EXCHANGE: &str = "tome.events";
/// 24h, so a long folder-organize run cannot trip the broker's default
/// consumer timeout and force a requeue mid-stage.
const CONSUMER_TIMEOUT_MS: i64 = 24 * 60 * 60 * 1000;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PERSISTENT: u8 = 2;

struct ConnState {
    connection: Connection,
    channel: Channel,
}

struct Inner {
    url: String,
    state: Mutex<Option<ConnState>>,
}

/// Lapin-backed [`Broker`]. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct AmqpBroker {
    inner: Arc<Inner>,
}

fn unavailable(e: impl std::fmt::Display) -> TomeError {
    TomeError::BrokerUnavailable(e.to_string())
}

async fn open(url: &str) -> lapin::Result<ConnState> {
    let connection = Connection::connect(url, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    let mut args = FieldTable::default();
    args.insert("x-consumer-timeout".into(), AMQPValue::LongLongInt(CONSUMER_TIMEOUT_MS));
    channel
        .queue_declare(
            JOBS_QUEUE,
            QueueDeclareOptions { durable: true, ..Default::default() },
            args,
        )
        .await?;
    channel
        .exchange_declare(
            EVENTS_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
    Ok(ConnState { connection, channel })
}

impl Inner {
    /// Current publish channel, connecting if needed.
    async fn channel(&self) -> Result<Channel> {
        let mut state = self.state.lock().await;
        if let Some(conn) = state.as_ref() {
            if conn.connection.status().connected() {
                return Ok(conn.channel.clone());
            }
        }
        let conn = open(&self.url).await.map_err(unavailable)?;
        let channel = conn.channel.clone();
        *state = Some(conn);
        Ok(channel)
    }

    /// A fresh channel on the shared connection, for consumers.
    async fn consumer_channel(&self) -> Result<Channel> {
        let mut state = self.state.lock().await;
        if let Some(conn) = state.as_ref() {
            if conn.connection.status().connected() {
                return conn.connection.create_channel().await.map_err(unavailable);
            }
        }
        let conn = open(&self.url).await.map_err(unavailable)?;
        let channel = conn.connection.create_channel().await.map_err(unavailable);
        *state = Some(conn);
        channel
    }

    async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}

impl AmqpBroker {
    /// Connect to the broker, retrying with a fixed backoff until the
    /// first connection succeeds. Later connection losses are handled per
    /// operation.
    pub async fn connect(url: impl Into<String>) -> Self {
        let inner = Arc::new(Inner { url: url.into(), state: Mutex::new(None) });
        loop {
            match inner.channel().await {
                Ok(_) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "broker connect failed, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        Self { inner }
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let channel = self.inner.channel().await?;
        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await;
        let result = match confirm {
            Ok(confirm) => confirm.await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.inner.invalidate().await;
            return Err(unavailable(e));
        }
        Ok(())
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl JobAcker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await.map_err(unavailable)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish_job(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_vec(job)?;
        self.publish("", JOBS_QUEUE, &payload).await
    }

    async fn publish_event(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.publish(EVENTS_EXCHANGE, "", &payload).await
    }

    async fn consume_jobs(&self) -> Result<JobStream> {
        let inner = self.inner.clone();
        let stream = async_stream::stream! {
            loop {
                let channel = match inner.consumer_channel().await {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!(error = %e, "jobs consumer reconnect failed");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
                if let Err(e) = channel.basic_qos(1, BasicQosOptions::default()).await {
                    tracing::warn!(error = %e, "failed to set prefetch");
                    inner.invalidate().await;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
                let consumer = channel
                    .basic_consume(
                        JOBS_QUEUE,
                        "tome-worker",
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await;
                let mut consumer = match consumer {
                    Ok(consumer) => consumer,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to register jobs consumer");
                        inner.invalidate().await;
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
                tracing::info!(queue = JOBS_QUEUE, "jobs consumer registered");

                while let Some(delivery) = consumer.next().await {
                    match delivery {
                        Ok(delivery) => match serde_json::from_slice::<Job>(&delivery.data) {
                            Ok(job) => {
                                yield JobDelivery::new(
                                    job,
                                    Box::new(AmqpAcker { acker: delivery.acker }),
                                );
                            }
                            Err(e) => {
                                // A poison message would otherwise redeliver forever.
                                tracing::warn!(error = %e, "dropping undecodable job");
                                let _ = delivery.acker.ack(BasicAckOptions::default()).await;
                            }
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "jobs consumer errored");
                            break;
                        }
                    }
                }
                inner.invalidate().await;
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn subscribe_events(&self) -> Result<EventStream> {
        let inner = self.inner.clone();
        let stream = async_stream::stream! {
            loop {
                let channel = match inner.consumer_channel().await {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!(error = %e, "events subscriber reconnect failed");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
                // Server-named exclusive queue bound to the fanout
                // exchange: each subscriber sees every event.
                let queue = match channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                {
                    Ok(queue) => queue,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to declare events queue");
                        inner.invalidate().await;
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
                let bind = channel
                    .queue_bind(
                        queue.name().as_str(),
                        EVENTS_EXCHANGE,
                        "",
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await;
                if let Err(e) = bind {
                    tracing::warn!(error = %e, "failed to bind events queue");
                    inner.invalidate().await;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
                let consumer = channel
                    .basic_consume(
                        queue.name().as_str(),
                        "",
                        BasicConsumeOptions { no_ack: true, ..Default::default() },
                        FieldTable::default(),
                    )
                    .await;
                let mut consumer = match consumer {
                    Ok(consumer) => consumer,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to register events consumer");
                        inner.invalidate().await;
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };

                while let Some(delivery) = consumer.next().await {
                    match delivery {
                        Ok(delivery) => match serde_json::from_slice::<Event>(&delivery.data) {
                            Ok(event) => yield event,
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping undecodable event");
                            }
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "events consumer errored");
                            break;
                        }
                    }
                }
                inner.invalidate().await;
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        };
        Ok(Box::pin(stream))
    }
}
