//! In-process broker used by tests and local development. Jobs flow over
//! an unbounded channel with a single consumer; events are recorded and
//! broadcast to live subscribers.

use crate::{Broker, EventStream, JobAcker, JobDelivery, JobStream};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tome_core::{Event, Job, Result, TomeError};

struct Inner {
    jobs_tx: mpsc::UnboundedSender<Job>,
    jobs_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    events_tx: broadcast::Sender<Event>,
    published_events: Mutex<Vec<Event>>,
}

#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                jobs_tx,
                jobs_rx: tokio::sync::Mutex::new(Some(jobs_rx)),
                events_tx,
                published_events: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pop the next queued job without blocking. Test helper for driving
    /// the orchestrator deterministically.
    pub async fn try_pop_job(&self) -> Option<Job> {
        let mut guard = self.inner.jobs_rx.lock().await;
        guard.as_mut()?.try_recv().ok()
    }

    /// Every event published so far, in publish order.
    pub fn published_events(&self) -> Vec<Event> {
        self.inner.published_events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_events(&self) {
        self.inner.published_events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

struct NoopAcker;

#[async_trait]
impl JobAcker for NoopAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish_job(&self, job: &Job) -> Result<()> {
        self.inner
            .jobs_tx
            .send(job.clone())
            .map_err(|_| TomeError::BrokerUnavailable("jobs channel closed".into()))
    }

    async fn publish_event(&self, event: &Event) -> Result<()> {
        self.inner
            .published_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        // No live subscribers is fine.
        let _ = self.inner.events_tx.send(event.clone());
        Ok(())
    }

    async fn consume_jobs(&self) -> Result<JobStream> {
        let receiver = self
            .inner
            .jobs_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| TomeError::BrokerUnavailable("jobs queue already consumed".into()))?;
        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(receiver)
            .map(|job| JobDelivery::new(job, Box::new(NoopAcker)));
        Ok(Box::pin(stream))
    }

    async fn subscribe_events(&self) -> Result<EventStream> {
        let rx = self.inner.events_tx.subscribe();
        // Lagged subscribers lose the oldest events, matching the
        // progress-not-audit-log contract.
        let stream = BroadcastStream::new(rx).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }
}
