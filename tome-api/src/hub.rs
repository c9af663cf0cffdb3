use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tome_broker::Broker;
use tome_core::{Event, Result, WorkId};

const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Per-work event fan-out for the API process.
///
/// One task consumes the events queue and dispatches to per-work broadcast
/// channels. Slow subscribers lag and lose the oldest events rather than
/// blocking anyone else: the stream is progress, not an audit log, and
/// clients reconcile by reading entities on (re)connect.
pub struct EventHub {
    capacity: usize,
    works: RwLock<HashMap<WorkId, broadcast::Sender<Event>>>,
    global: broadcast::Sender<Event>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity);
        Self { capacity, works: RwLock::new(HashMap::new()), global }
    }

    /// Live events for one work, starting now. No replay.
    pub fn subscribe(&self, work_id: &WorkId) -> broadcast::Receiver<Event> {
        let mut works = self.works.write().unwrap_or_else(|e| e.into_inner());
        works
            .entry(work_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Every event, including the global folder events.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.global.subscribe()
    }

    /// Route one event to its work channel (if anyone listens) and to the
    /// global channel.
    pub fn dispatch(&self, event: &Event) {
        let _ = self.global.send(event.clone());

        if let Some(work_id) = event.work_id() {
            let mut works = self.works.write().unwrap_or_else(|e| e.into_inner());
            if let Some(sender) = works.get(work_id) {
                if sender.send(event.clone()).is_err() {
                    // Last subscriber left; drop the channel.
                    works.remove(work_id);
                }
            }
        }
    }

    /// Consume the broker's event stream until it ends, dispatching each
    /// event. Intended to run as a background task in the API process.
    pub async fn run(self: Arc<Self>, broker: Arc<dyn Broker>) -> Result<()> {
        let mut events = broker.subscribe_events().await?;
        tracing::info!("event fan-out running");
        while let Some(event) = events.next().await {
            self.dispatch(&event);
        }
        tracing::info!("event stream ended");
        Ok(())
    }
}
