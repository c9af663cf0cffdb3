//! The job-pipeline orchestrator: a single-consumer loop over the durable
//! jobs queue, the per-chapter stage handlers, the cross-stage cascade
//! rules, and the delete-equals-cancel protocol.

mod context;
mod handlers;
mod orchestrator;

pub use context::PipelineContext;
pub use orchestrator::Orchestrator;
