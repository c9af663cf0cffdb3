use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tome_broker::Broker;
use tome_core::{Event, Job, ModelGateway};
use tome_graph::{LinearIndex, LinkSuggester, VectorIndex};
use tome_store::Store;

/// Shared dependencies for the orchestrator and every stage handler.
pub struct PipelineContext {
    pub store: Arc<dyn Store>,
    pub broker: Arc<dyn Broker>,
    pub gateway: Arc<dyn ModelGateway>,
    pub suggester: LinkSuggester,
    organize_active: Arc<AtomicBool>,
}

impl PipelineContext {
    /// Wire the context with the default linear vector index over the
    /// store.
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        gateway: Arc<dyn ModelGateway>,
    ) -> Self {
        let index: Arc<dyn VectorIndex> = Arc::new(LinearIndex::new(store.clone()));
        Self::with_index(store, broker, gateway, index)
    }

    pub fn with_index(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        gateway: Arc<dyn ModelGateway>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let suggester = LinkSuggester::new(index, gateway.clone());
        Self { store, broker, gateway, suggester, organize_active: Arc::new(AtomicBool::new(false)) }
    }

    /// Publish a lifecycle event. Events are progress, not an audit log:
    /// a publish failure is logged and swallowed.
    pub(crate) async fn emit(&self, event: Event) {
        if let Err(e) = self.broker.publish_event(&event).await {
            tracing::warn!(event = event.type_name(), error = %e, "event publish failed");
        }
    }

    /// Enqueue a successor job. The cascade is opportunistic: if the
    /// broker is down the current job's redelivery re-creates it, so
    /// failures are logged and swallowed rather than failing a stage that
    /// already completed.
    pub(crate) async fn cascade(&self, job: Job) {
        if let Err(e) = self.broker.publish_job(&job).await {
            tracing::warn!(job = %job.job_type, error = %e, "successor enqueue failed");
        }
    }

    /// Claim the process-wide folder-organize slot. `None` means another
    /// organize run is active.
    pub(crate) fn try_begin_organize(&self) -> Option<OrganizeGuard> {
        self.organize_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| OrganizeGuard { flag: self.organize_active.clone() })
    }
}

/// Releases the organize slot when the handler returns, on success or
/// error alike.
pub(crate) struct OrganizeGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for OrganizeGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
