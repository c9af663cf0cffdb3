use crate::context::PipelineContext;
use chrono::Utc;
use tome_core::{
    ChapterId, Event, GraphNode, Job, Note, NoteDraft, NoteId, NoteSource, Result, Stage,
    StageStatus, TomeError, WorkId,
};
use tome_store::ChapterPatch;

/// Notes stage: wipe prior notes for the chapter, derive atomic notes from
/// the structured summary, embed and link each one, and finalize the
/// chapter.
pub(crate) async fn run(
    ctx: &PipelineContext,
    work_id: &WorkId,
    chapter_id: &ChapterId,
) -> Result<()> {
    let Some(chapter) = ctx.store.get_chapter(chapter_id).await? else {
        tracing::debug!(chapter_id = %chapter_id, "notes cancelled: chapter gone");
        return Ok(());
    };
    if chapter.notes_status == StageStatus::Completed {
        tracing::debug!(chapter_id = %chapter_id, "notes already completed; redelivery short-circuit");
        return Ok(());
    }
    if !chapter.analysis_status.satisfies_readiness() {
        return Err(TomeError::PreconditionNotMet(format!(
            "notes require analysis completed or skipped, found {}",
            chapter.analysis_status
        )));
    }
    let summary = ctx
        .store
        .get_summary_by_chapter(chapter_id)
        .await?
        .filter(|s| s.has_structured_content())
        .ok_or_else(|| {
            TomeError::PreconditionNotMet(
                "notes require a summary with a main idea or key concepts".into(),
            )
        })?;

    ctx.store
        .update_chapter(
            chapter_id,
            ChapterPatch::new().notes_status(StageStatus::Processing).clear_error(),
        )
        .await?;
    ctx.emit(Event::StageStatus {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
        stage: Stage::Notes,
        status: StageStatus::Processing,
    })
    .await;

    // Clean-regenerate semantics: prior notes and their graph presence go
    // first, so a retry never sees half of an old generation.
    ctx.store.delete_notes_by_chapter(work_id, chapter_id).await?;

    let drafts = ctx.gateway.generate_atomic_notes(&summary).await?;
    tracing::info!(chapter_id = %chapter_id, count = drafts.len(), "atomic notes generated");

    // Per-note work is unordered and fail-fast: one failure aborts the
    // stage, and the wipe above makes the retry safe.
    futures::future::try_join_all(
        drafts.into_iter().map(|draft| persist_note(ctx, work_id, chapter_id, draft)),
    )
    .await?;

    if ctx.store.get_chapter(chapter_id).await?.is_none() {
        tracing::debug!(chapter_id = %chapter_id, "notes cancelled mid-generation; discarding output");
        return Ok(());
    }

    ctx.store
        .update_chapter(
            chapter_id,
            ChapterPatch::new()
                .notes_status(StageStatus::Completed)
                .status(StageStatus::Completed),
        )
        .await?;

    ctx.emit(Event::ChapterFinalized {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
    })
    .await;
    ctx.emit(Event::StageStatus {
        work_id: work_id.clone(),
        chapter_id: chapter_id.clone(),
        stage: Stage::Notes,
        status: StageStatus::Completed,
    })
    .await;
    tracing::info!(work_id = %work_id, chapter_id = %chapter_id, "notes completed");

    // Opportunistic probe; it returns silently until the last chapter
    // finishes.
    ctx.cascade(Job::book_analysis(work_id.clone(), false)).await;
    Ok(())
}

async fn persist_note(
    ctx: &PipelineContext,
    work_id: &WorkId,
    chapter_id: &ChapterId,
    draft: NoteDraft,
) -> Result<()> {
    let embedding = ctx.gateway.embed(&format!("{}\n{}", draft.title, draft.content)).await?;

    let mut note = Note {
        id: NoteId::generate(),
        title: draft.title,
        content: draft.content,
        tags: draft.tags,
        source: NoteSource { work_id: work_id.clone(), chapter_id: chapter_id.clone() },
        embedding,
        suggested_links: Vec::new(),
        created_at: Utc::now(),
    };
    note.suggested_links = ctx.suggester.suggest(&note).await?;

    ctx.store.save_note(&note).await?;

    let node_id = note.id.clone();
    let node = GraphNode {
        title: note.title.clone(),
        tags: note.tags.clone(),
        created_at: note.created_at,
    };
    ctx.store
        .update_graph(Box::new(move |graph| {
            graph.nodes.insert(node_id, node);
        }))
        .await?;
    Ok(())
}
