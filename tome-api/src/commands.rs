use std::sync::Arc;
use tome_broker::Broker;
use tome_core::{
    Chapter, ChapterId, Job, Result, Stage, StageStatus, TomeError, WorkId, WorkStatus,
};
use tome_store::{ChapterPatch, Store};

/// User-facing pipeline commands. Each translates to store mutations plus
/// job enqueues; a `BrokerUnavailable` error surfaces to callers as
/// service-unavailable.
pub struct Commands {
    store: Arc<dyn Store>,
    broker: Arc<dyn Broker>,
}

fn stage_patch(stage: Stage, status: StageStatus) -> ChapterPatch {
    match stage {
        Stage::Overview => ChapterPatch::new().overview_status(status),
        Stage::Analysis => ChapterPatch::new().analysis_status(status),
        Stage::Notes => ChapterPatch::new().notes_status(status),
    }
}

impl Commands {
    pub fn new(store: Arc<dyn Store>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Run (or retry, or regenerate) one stage of a chapter. Marks the
    /// stage processing so the UI reflects intent immediately, then
    /// enqueues the job.
    pub async fn generate(&self, chapter_id: &ChapterId, stage: Stage) -> Result<Chapter> {
        let chapter = self
            .store
            .get_chapter(chapter_id)
            .await?
            .ok_or_else(|| TomeError::EntityMissing(format!("chapter {chapter_id}")))?;

        let current = chapter.stage_status(stage);
        if !current.can_transition_to(StageStatus::Processing) {
            return Err(TomeError::PreconditionNotMet(format!(
                "{stage} cannot start from {current}"
            )));
        }

        let updated = self
            .store
            .update_chapter(chapter_id, stage_patch(stage, StageStatus::Processing).clear_error())
            .await?
            .ok_or_else(|| TomeError::EntityMissing(format!("chapter {chapter_id}")))?;

        self.broker
            .publish_job(&Job::stage(stage, chapter.work_id.clone(), chapter_id.clone()))
            .await?;
        tracing::info!(chapter_id = %chapter_id, stage = %stage, "stage job enqueued");
        Ok(updated)
    }

    /// Mark a stage skipped, unblocking downstream stages. Idempotent:
    /// skipping an already-terminal stage changes nothing.
    pub async fn skip(&self, chapter_id: &ChapterId, stage: Stage) -> Result<Chapter> {
        let chapter = self
            .store
            .get_chapter(chapter_id)
            .await?
            .ok_or_else(|| TomeError::EntityMissing(format!("chapter {chapter_id}")))?;

        let current = chapter.stage_status(stage);
        if !current.can_transition_to(StageStatus::Skipped) {
            return Ok(chapter);
        }

        self.store
            .update_chapter(chapter_id, stage_patch(stage, StageStatus::Skipped))
            .await?
            .ok_or_else(|| TomeError::EntityMissing(format!("chapter {chapter_id}")))
    }

    /// Reset every chapter of a work to pending and enqueue overviews for
    /// all of them. Re-opens the work's overall status.
    pub async fn regenerate_work(&self, work_id: &WorkId) -> Result<()> {
        let mut work = self
            .store
            .get_work(work_id)
            .await?
            .ok_or_else(|| TomeError::EntityMissing(format!("work {work_id}")))?;
        work.status = WorkStatus::Processing;
        self.store.save_work(&work).await?;

        let chapters = self.store.chapters_of(work_id).await?;
        for chapter in &chapters {
            self.store
                .update_chapter(
                    &chapter.id,
                    ChapterPatch::new()
                        .overview_status(StageStatus::Pending)
                        .analysis_status(StageStatus::Pending)
                        .notes_status(StageStatus::Pending)
                        .status(StageStatus::Pending)
                        .clear_error(),
                )
                .await?;
        }
        for chapter in &chapters {
            self.broker
                .publish_job(&Job::stage(Stage::Overview, work_id.clone(), chapter.id.clone()))
                .await?;
        }
        tracing::info!(work_id = %work_id, chapters = chapters.len(), "work regeneration enqueued");
        Ok(())
    }

    /// Force a fresh overall analysis for a work.
    pub async fn regenerate_analysis(&self, work_id: &WorkId) -> Result<()> {
        self.broker.publish_job(&Job::book_analysis(work_id.clone(), true)).await
    }

    /// Kick off (or resume) folder organization over all notes.
    pub async fn organize_folders(&self) -> Result<()> {
        self.broker.publish_job(&Job::folder_organize()).await
    }
}
