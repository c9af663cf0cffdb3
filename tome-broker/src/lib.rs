//! Broker adapters for the two durable queues the pipeline runs on: the
//! manually-acknowledged jobs queue and the fan-out events queue.

pub mod amqp;
pub mod memory;

pub use memory::MemoryBroker;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use tome_core::{Event, Job, Result};

/// One job handed to the consumer. The job must be acknowledged exactly
/// when the handler reaches a terminal outcome: success, or failure after
/// the failed state has been recorded durably.
pub struct JobDelivery {
    pub job: Job,
    acker: Box<dyn JobAcker>,
}

impl JobDelivery {
    pub fn new(job: Job, acker: Box<dyn JobAcker>) -> Self {
        Self { job, acker }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

#[async_trait]
pub trait JobAcker: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<()>;
}

pub type JobStream = Pin<Box<dyn Stream<Item = JobDelivery> + Send>>;
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Transport to the message broker. Jobs are persistent and consumed by a
/// single worker with a prefetch window of one; events fan out to every
/// subscriber.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a job; returns once the broker has accepted persistence
    /// responsibility. Fails only with `BrokerUnavailable`.
    async fn publish_job(&self, job: &Job) -> Result<()>;

    /// Publish a lifecycle event. Best-effort from the caller's point of
    /// view; callers log and continue on failure.
    async fn publish_event(&self, event: &Event) -> Result<()>;

    /// The single consumer stream over the jobs queue. Deliveries carry
    /// their own acknowledgement handle.
    async fn consume_jobs(&self) -> Result<JobStream>;

    /// A fan-out subscription to the events queue. Each call observes
    /// every event published after the call.
    async fn subscribe_events(&self) -> Result<EventStream>;
}
