use crate::context::PipelineContext;
use crate::handlers;
use futures::StreamExt;
use std::sync::Arc;
use tome_broker::JobDelivery;
use tome_core::{ChapterId, Event, Job, JobType, Stage, StageStatus, TomeError, WorkId};
use tome_store::ChapterPatch;

/// The single consumer of the jobs queue. One job is dispatched at a time;
/// the handler runs to completion before the next delivery, and every
/// delivery is acknowledged on a terminal outcome: success, or failure
/// after the failed state has been recorded durably.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Consume jobs until the stream ends.
    pub async fn run(&self) -> tome_core::Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Consume jobs until `shutdown` resolves. The in-flight job finishes;
    /// no further deliveries are taken.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> tome_core::Result<()> {
        let mut jobs = self.ctx.broker.consume_jobs().await?;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("orchestrator draining: shutdown requested");
                    return Ok(());
                }
                delivery = jobs.next() => match delivery {
                    Some(delivery) => self.process(delivery).await,
                    None => {
                        tracing::info!("jobs stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Dispatch one delivery and acknowledge it. Never propagates handler
    /// errors: by the time the ack happens, any failure is already
    /// recorded on the chapter.
    pub async fn process(&self, delivery: JobDelivery) {
        let job = delivery.job.clone();
        self.dispatch(&job).await;
        if let Err(e) = delivery.ack().await {
            tracing::warn!(job = %job.job_type, error = %e, "job ack failed; broker will redeliver");
        }
    }

    /// Route a job to its stage handler, applying the shared
    /// failure-recording discipline. Public so tests and embedded callers
    /// can drive jobs without the consume loop.
    pub async fn dispatch(&self, job: &Job) {
        tracing::info!(job = %job.job_type, work_id = ?job.work_id, chapter_id = ?job.chapter_id, "job received");
        match job.job_type {
            JobType::Overview | JobType::Analysis | JobType::Notes => {
                let (Some(work_id), Some(chapter_id)) = (&job.work_id, &job.chapter_id) else {
                    tracing::warn!(job = %job.job_type, "chapter job missing ids; dropping");
                    return;
                };
                let stage = match job.job_type {
                    JobType::Overview => Stage::Overview,
                    JobType::Analysis => Stage::Analysis,
                    _ => Stage::Notes,
                };
                let result = match stage {
                    Stage::Overview => handlers::overview::run(&self.ctx, work_id, chapter_id).await,
                    Stage::Analysis => handlers::analysis::run(&self.ctx, work_id, chapter_id).await,
                    Stage::Notes => handlers::notes::run(&self.ctx, work_id, chapter_id).await,
                };
                if let Err(e) = result {
                    self.record_stage_failure(stage, work_id, chapter_id, &e).await;
                }
            }
            JobType::BookAnalysis => {
                let Some(work_id) = &job.work_id else {
                    tracing::warn!("book_analysis job missing work id; dropping");
                    return;
                };
                if let Err(e) = handlers::book::run(&self.ctx, work_id, job.force()).await {
                    // The book stage never marks the work failed; the next
                    // finished chapter re-probes it.
                    tracing::warn!(work_id = %work_id, error = %e, "book analysis failed; work left processing");
                }
            }
            JobType::FolderOrganize => {
                if let Err(e) = handlers::folders::run(&self.ctx).await {
                    tracing::warn!(error = %e, "folder organize failed");
                    self.ctx.emit(Event::FoldersError { error: e.to_string() }).await;
                }
            }
        }
    }

    /// Record a stage failure durably, then surface it through events.
    /// The order matters: state first, events second, ack (by the caller)
    /// last.
    async fn record_stage_failure(
        &self,
        stage: Stage,
        work_id: &WorkId,
        chapter_id: &ChapterId,
        error: &TomeError,
    ) {
        let message = error.to_string();
        tracing::error!(work_id = %work_id, chapter_id = %chapter_id, stage = %stage, error = %message, "stage failed");

        let patch = match stage {
            Stage::Overview => ChapterPatch::new().overview_status(StageStatus::Failed),
            Stage::Analysis => ChapterPatch::new().analysis_status(StageStatus::Failed),
            Stage::Notes => ChapterPatch::new().notes_status(StageStatus::Failed),
        }
        .error(message.clone());

        match self.ctx.store.update_chapter(chapter_id, patch).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Deleted while failing: cancellation wins, stay silent.
                tracing::debug!(chapter_id = %chapter_id, "chapter gone before failure record");
                return;
            }
            Err(e) => {
                tracing::error!(chapter_id = %chapter_id, error = %e, "failed to record stage failure");
            }
        }

        self.ctx
            .emit(Event::StageStatus {
                work_id: work_id.clone(),
                chapter_id: chapter_id.clone(),
                stage,
                status: StageStatus::Failed,
            })
            .await;
        self.ctx
            .emit(Event::Error {
                work_id: work_id.clone(),
                chapter_id: Some(chapter_id.clone()),
                stage: Some(stage),
                message,
            })
            .await;
    }
}
