use crate::context::PipelineContext;
use std::time::Duration;
use tome_core::{
    ChapterId, Event, Job, Result, Stage, StageStatus, StructuredSummary, Summary, TomeError,
    WorkId,
};
use tome_store::ChapterPatch;

const ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Analysis stage: generate the structured summary, merge it into the
/// chapter's summary document, and cascade into notes.
pub(crate) async fn run(
    ctx: &PipelineContext,
    work_id: &WorkId,
    chapter_id: &ChapterId,
) -> Result<()> {
    let Some(chapter) = ctx.store.get_chapter(chapter_id).await? else {
        tracing::debug!(chapter_id = %chapter_id, "analysis cancelled: chapter gone");
        return Ok(());
    };
    if chapter.analysis_status == StageStatus::Completed {
        tracing::debug!(chapter_id = %chapter_id, "analysis already completed; redelivery short-circuit");
        return Ok(());
    }
    if !chapter.overview_status.satisfies_readiness() {
        return Err(TomeError::PreconditionNotMet(format!(
            "analysis requires overview completed or skipped, found {}",
            chapter.overview_status
        )));
    }
    let Some(work) = ctx.store.get_work(work_id).await? else {
        tracing::debug!(work_id = %work_id, "analysis cancelled: work gone");
        return Ok(());
    };

    ctx.store
        .update_chapter(
            chapter_id,
            ChapterPatch::new().analysis_status(StageStatus::Processing).clear_error(),
        )
        .await?;
    ctx.emit(Event::StageStatus {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
        stage: Stage::Analysis,
        status: StageStatus::Processing,
    })
    .await;

    let structured = generate_with_retries(ctx, &chapter.raw_text, work.kind).await?;

    if ctx.store.get_chapter(chapter_id).await?.is_none() {
        tracing::debug!(chapter_id = %chapter_id, "analysis cancelled mid-generation; discarding output");
        return Ok(());
    }

    let mut summary = ctx
        .store
        .get_summary_by_chapter(chapter_id)
        .await?
        .unwrap_or_else(|| Summary::shell(chapter_id.clone()));
    summary.main_idea = structured.main_idea;
    summary.key_concepts = structured.key_concepts;
    summary.examples = structured.examples;
    summary.mental_models = structured.mental_models;
    summary.life_lessons = structured.life_lessons;
    ctx.store.save_summary(&summary).await?;

    ctx.store
        .update_chapter(
            chapter_id,
            ChapterPatch::new()
                .analysis_status(StageStatus::Completed)
                .summary_ref(&summary.id),
        )
        .await?;

    ctx.emit(Event::ChapterDone {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
        summary,
    })
    .await;
    ctx.emit(Event::StageStatus {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
        stage: Stage::Analysis,
        status: StageStatus::Completed,
    })
    .await;
    tracing::info!(work_id = %work_id, chapter_id = %chapter_id, "analysis completed");

    ctx.cascade(Job::stage(Stage::Notes, work_id.clone(), chapter_id.clone())).await;
    Ok(())
}

/// Up to three attempts, pausing between them; malformed output (nothing
/// in mainIdea nor keyConcepts) counts as a failed attempt.
async fn generate_with_retries(
    ctx: &PipelineContext,
    text: &str,
    kind: tome_core::WorkKind,
) -> Result<StructuredSummary> {
    for attempt in 1..=ATTEMPTS {
        match ctx.gateway.generate_structured_summary(text, kind).await {
            Ok(structured) if !structured.is_malformed() => return Ok(structured),
            Ok(_) => {
                tracing::warn!(attempt, "structured summary malformed");
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "structured summary attempt failed");
            }
        }
        if attempt < ATTEMPTS {
            tokio::time::sleep(RETRY_PAUSE).await;
        }
    }
    Err(TomeError::Model(format!(
        "structured summary malformed or failing after {ATTEMPTS} attempts"
    )))
}
