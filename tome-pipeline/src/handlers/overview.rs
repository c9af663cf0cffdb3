use crate::context::PipelineContext;
use std::sync::{Arc, Mutex};
use tome_core::{
    ChapterId, Event, Job, Result, Stage, StageStatus, Summary, WorkId,
};
use tome_store::ChapterPatch;

/// Tokens accumulate until this many new characters before another
/// cumulative stream event goes out, bounding event volume for long
/// chapters.
const STREAM_FLUSH_CHARS: usize = 48;

struct StreamState {
    text: String,
    flushed: usize,
}

/// Overview stage: generate the narrative markdown summary of a chapter
/// and cascade into analysis.
pub(crate) async fn run(
    ctx: &PipelineContext,
    work_id: &WorkId,
    chapter_id: &ChapterId,
) -> Result<()> {
    let Some(chapter) = ctx.store.get_chapter(chapter_id).await? else {
        tracing::debug!(chapter_id = %chapter_id, "overview cancelled: chapter gone");
        return Ok(());
    };
    if chapter.overview_status == StageStatus::Completed {
        tracing::debug!(chapter_id = %chapter_id, "overview already completed; redelivery short-circuit");
        return Ok(());
    }
    let Some(work) = ctx.store.get_work(work_id).await? else {
        tracing::debug!(work_id = %work_id, "overview cancelled: work gone");
        return Ok(());
    };

    // Create the summary shell up front so summaryRef is valid for the
    // whole processing window.
    let summary = match ctx.store.get_summary_by_chapter(chapter_id).await? {
        Some(summary) => summary,
        None => {
            let summary = Summary::shell(chapter_id.clone());
            ctx.store.save_summary(&summary).await?;
            summary
        }
    };

    ctx.store
        .update_chapter(
            chapter_id,
            ChapterPatch::new()
                .overview_status(StageStatus::Processing)
                .summary_ref(&summary.id)
                .clear_error(),
        )
        .await?;
    ctx.emit(Event::StageStatus {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
        stage: Stage::Overview,
        status: StageStatus::Processing,
    })
    .await;

    // Forward coalesced cumulative text to subscribers while the model
    // streams. The sink is synchronous, so chunks hop through a channel to
    // an async publisher task.
    let (stream_tx, mut stream_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let forwarder = {
        let broker = ctx.broker.clone();
        let work_id = work_id.clone();
        let chapter_id = chapter_id.clone();
        tokio::spawn(async move {
            while let Some(content) = stream_rx.recv().await {
                let event = Event::OverviewStream {
                    work_id: work_id.clone(),
                    chapter_id: chapter_id.clone(),
                    content,
                };
                if let Err(e) = broker.publish_event(&event).await {
                    tracing::warn!(error = %e, "overview stream event dropped");
                }
            }
        })
    };

    let state = Arc::new(Mutex::new(StreamState { text: String::new(), flushed: 0 }));
    let sink_state = state.clone();
    let sink_stream_tx = stream_tx.clone();
    let sink = move |token: &str| {
        let mut state = sink_state.lock().unwrap_or_else(|e| e.into_inner());
        state.text.push_str(token);
        if state.text.len() - state.flushed >= STREAM_FLUSH_CHARS {
            state.flushed = state.text.len();
            let _ = sink_stream_tx.send(state.text.clone());
        }
    };

    let generated = ctx
        .gateway
        .generate_overview(&chapter.raw_text, work.kind, work.source_kind, Some(&sink))
        .await;

    let overview = match generated {
        Ok(overview) => overview,
        Err(e) => {
            drop(sink);
            drop(stream_tx);
            let _ = forwarder.await;
            return Err(e);
        }
    };

    // Post-execution cancel check: stale output is discarded when the
    // chapter vanished during generation.
    if ctx.store.get_chapter(chapter_id).await?.is_none() {
        tracing::debug!(chapter_id = %chapter_id, "overview cancelled mid-generation; discarding output");
        drop(sink);
        drop(stream_tx);
        let _ = forwarder.await;
        return Ok(());
    }

    // Final cumulative flush.
    {
        let state = state.lock().unwrap_or_else(|e| e.into_inner());
        if state.text.len() > state.flushed && !state.text.is_empty() {
            let _ = stream_tx.send(state.text.clone());
        }
    }
    drop(sink);
    drop(stream_tx);
    let _ = forwarder.await;

    let mut summary = ctx
        .store
        .get_summary_by_chapter(chapter_id)
        .await?
        .unwrap_or_else(|| Summary::shell(chapter_id.clone()));
    summary.overview = overview;
    ctx.store.save_summary(&summary).await?;

    ctx.store
        .update_chapter(
            chapter_id,
            ChapterPatch::new()
                .overview_status(StageStatus::Completed)
                .summary_ref(&summary.id),
        )
        .await?;
    ctx.emit(Event::StageStatus {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
        stage: Stage::Overview,
        status: StageStatus::Completed,
    })
    .await;
    tracing::info!(work_id = %work_id, chapter_id = %chapter_id, "overview completed");

    ctx.cascade(Job::stage(Stage::Analysis, work_id.clone(), chapter_id.clone())).await;
    Ok(())
}
