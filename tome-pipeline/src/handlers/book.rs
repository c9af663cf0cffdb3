use crate::context::PipelineContext;
use tome_core::{Analysis, Event, Result, WorkId, WorkStatus};

/// Book-analysis stage. Without `force` this is a probe: it returns
/// silently unless every chapter is done. Generator failures never mark
/// the work as errored; the next finished chapter probes again.
pub(crate) async fn run(ctx: &PipelineContext, work_id: &WorkId, force: bool) -> Result<()> {
    let Some(mut work) = ctx.store.get_work(work_id).await? else {
        tracing::debug!(work_id = %work_id, "book analysis cancelled: work gone");
        return Ok(());
    };

    let chapters = ctx.store.chapters_of(work_id).await?;
    let all_done = !chapters.is_empty() && chapters.iter().all(|c| c.is_done());
    if !all_done && !force {
        tracing::debug!(work_id = %work_id, "book analysis probe: chapters still in flight");
        return Ok(());
    }

    let mut summaries = Vec::new();
    for chapter in &chapters {
        if let Some(summary) = ctx.store.get_summary_by_chapter(&chapter.id).await? {
            summaries.push(summary);
        }
    }
    // Even a forced run has nothing to synthesize from zero summaries.
    if summaries.is_empty() {
        tracing::debug!(work_id = %work_id, "book analysis skipped: no summaries");
        return Ok(());
    }

    ctx.emit(Event::Status {
        work_id: work_id.clone(),
        message: "generating overall analysis".into(),
    })
    .await;

    let draft = match ctx
        .gateway
        .generate_overall_analysis(&summaries, work.kind, work.source_kind)
        .await
    {
        Ok(draft) => draft,
        Err(e) => {
            tracing::warn!(work_id = %work_id, error = %e, "overall analysis generation failed; work stays processing");
            return Ok(());
        }
    };

    if ctx.store.get_work(work_id).await?.is_none() {
        tracing::debug!(work_id = %work_id, "book analysis cancelled mid-generation; discarding output");
        return Ok(());
    }

    let analysis = Analysis {
        work_id: work_id.clone(),
        core_themes: draft.core_themes,
        key_takeaways: draft.key_takeaways,
        mental_models: draft.mental_models,
        practical_applications: draft.practical_applications,
    };
    ctx.store.save_analysis(&analysis).await?;

    work.status = WorkStatus::Done;
    ctx.store.save_work(&work).await?;

    ctx.emit(Event::BookDone { work_id: work_id.clone(), work }).await;
    tracing::info!(work_id = %work_id, "overall analysis written");
    Ok(())
}
