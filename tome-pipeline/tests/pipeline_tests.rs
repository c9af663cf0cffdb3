mod common;

use common::{EMBED_DIM, world};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tome_core::{
    ChapterId, Event, Folder, FolderSet, Job, Note, NoteId, NoteSource, Stage, StageStatus,
    WorkId, WorkStatus,
};
use tome_store::{ChapterPatch, Store};

/// Happy path: one work, one chapter, the full overview → analysis →
/// notes → book-analysis cascade from a single enqueued job.
#[tokio::test]
async fn test_single_chapter_cascade_to_book_done() {
    let w = world();
    w.seed("w1", "c1").await;

    w.enqueue_and_pump(Job::stage(Stage::Overview, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    let lifecycle = w.event_names(&[
        "stageStatus",
        "chapterDone",
        "chapterFinalized",
        "bookDone",
    ]);
    assert_eq!(
        lifecycle,
        vec![
            "stageStatus", // overview processing
            "stageStatus", // overview completed
            "stageStatus", // analysis processing
            "chapterDone",
            "stageStatus", // analysis completed
            "stageStatus", // notes processing
            "chapterFinalized",
            "stageStatus", // notes completed
            "bookDone",
        ]
    );

    let chapter = w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert_eq!(chapter.overview_status, StageStatus::Completed);
    assert_eq!(chapter.analysis_status, StageStatus::Completed);
    assert_eq!(chapter.notes_status, StageStatus::Completed);
    assert_eq!(chapter.status, StageStatus::Completed);

    let summary = w.store.get_summary_by_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert!(!summary.overview.is_empty());
    assert!(!summary.main_idea.is_empty());

    let notes = w
        .store
        .notes_by_chapter(&WorkId::from("w1"), &ChapterId::from("c1"))
        .await
        .unwrap();
    assert!(!notes.is_empty());
    for note in &notes {
        assert_eq!(note.embedding.len(), EMBED_DIM);
    }

    // Every embedded note has a graph node of the same id.
    let graph = w.store.get_graph().await.unwrap();
    for note in &notes {
        assert!(graph.nodes.contains_key(&note.id));
    }

    let work = w.store.get_work(&WorkId::from("w1")).await.unwrap().unwrap();
    assert_eq!(work.status, WorkStatus::Done);
    assert!(w.store.get_analysis(&WorkId::from("w1")).await.unwrap().is_some());
    w.assert_stage_dag("c1").await;
}

/// Overview stream events carry cumulative text.
#[tokio::test]
async fn test_overview_stream_is_cumulative() {
    let w = world();
    w.seed("w1", "c1").await;
    *w.gateway.overview.lock().unwrap() =
        "word ".repeat(40).trim_end().to_string();

    w.enqueue_and_pump(Job::stage(Stage::Overview, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    let streams: Vec<String> = w
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::OverviewStream { content, .. } => Some(content),
            _ => None,
        })
        .collect();
    assert!(streams.len() >= 2, "expected coalesced stream events");
    for pair in streams.windows(2) {
        assert!(pair[1].starts_with(&pair[0]), "stream must be cumulative");
        assert!(pair[1].len() > pair[0].len());
    }
}

/// Cancel mid-flight: deleting the work during the overview call discards
/// all output silently.
#[tokio::test]
async fn test_delete_during_overview_cancels_silently() {
    let w = world();
    w.seed("w1", "c1").await;
    *w.gateway.delete_during_overview.lock().await =
        Some((Arc::new(w.store.clone()), WorkId::from("w1")));

    w.enqueue_and_pump(Job::stage(Stage::Overview, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    // The processing event already went out; nothing terminal followed.
    let statuses: Vec<StageStatus> = w
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::StageStatus { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![StageStatus::Processing]);

    assert!(w.store.get_summary_by_chapter(&ChapterId::from("c1")).await.unwrap().is_none());
    // No successor job was enqueued.
    assert!(w.broker.try_pop_job().await.is_none());
}

/// Malformed structured summaries exhaust the three attempts and fail the
/// stage; notes are never enqueued.
#[tokio::test(start_paused = true)]
async fn test_analysis_malformed_retries_exhausted() {
    let w = world();
    w.seed("w1", "c1").await;
    w.store
        .update_chapter(
            &ChapterId::from("c1"),
            ChapterPatch::new().overview_status(StageStatus::Completed),
        )
        .await
        .unwrap();
    w.gateway.malformed_summary.store(true, Ordering::SeqCst);

    w.enqueue_and_pump(Job::stage(Stage::Analysis, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    assert_eq!(w.gateway.summary_calls.load(Ordering::SeqCst), 3);

    let chapter = w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert_eq!(chapter.analysis_status, StageStatus::Failed);
    assert!(chapter.last_error.as_deref().unwrap_or_default().contains("3 attempts"));

    let names = w.event_names(&["stageStatus", "error", "chapterDone"]);
    assert_eq!(names, vec!["stageStatus", "stageStatus", "error"]);
    assert!(w.broker.try_pop_job().await.is_none(), "no notes job after failure");
    w.assert_stage_dag("c1").await;
}

/// Skip then regenerate: a skipped overview satisfies the analysis
/// precondition and the cascade continues into notes.
#[tokio::test]
async fn test_skipped_overview_satisfies_analysis_precondition() {
    let w = world();
    w.seed("w1", "c1").await;
    w.store
        .update_chapter(
            &ChapterId::from("c1"),
            ChapterPatch::new().overview_status(StageStatus::Skipped),
        )
        .await
        .unwrap();

    w.enqueue_and_pump(Job::stage(Stage::Analysis, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    let chapter = w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert_eq!(chapter.overview_status, StageStatus::Skipped);
    assert_eq!(chapter.analysis_status, StageStatus::Completed);
    assert_eq!(chapter.notes_status, StageStatus::Completed);
    w.assert_stage_dag("c1").await;
}

/// A stage invoked before its predecessor fails with a recorded
/// precondition error.
#[tokio::test]
async fn test_analysis_before_overview_fails_precondition() {
    let w = world();
    w.seed("w1", "c1").await;

    w.enqueue_and_pump(Job::stage(Stage::Analysis, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    let chapter = w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert_eq!(chapter.analysis_status, StageStatus::Failed);
    assert!(
        chapter.last_error.as_deref().unwrap_or_default().contains("precondition"),
        "error should name the precondition: {:?}",
        chapter.last_error
    );
}

/// Redelivery of a completed stage is a no-op: no state change, no
/// events, no successor.
#[tokio::test]
async fn test_redelivered_completed_stage_short_circuits() {
    let w = world();
    w.seed("w1", "c1").await;
    w.enqueue_and_pump(Job::stage(Stage::Overview, WorkId::from("w1"), ChapterId::from("c1")))
        .await;
    let before = w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    w.broker.clear_events();

    // Same delivery again, as after a broker redelivery.
    w.enqueue_and_pump(Job::stage(Stage::Overview, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    assert!(w.events().is_empty(), "no new events on redelivery");
    assert!(w.broker.try_pop_job().await.is_none(), "no successor on redelivery");
    let after = w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert_eq!(before.updated_at, after.updated_at, "state unchanged");
}

/// Probe semantics: book analysis does nothing while any chapter is still
/// in flight, then succeeds when re-probed after completion.
#[tokio::test]
async fn test_book_analysis_probe_waits_for_all_chapters() {
    let w = world();
    let (_, chapter_a) = w.seed("w2", "cA").await;
    let chapter_b = w.add_chapter("w2", "cB", 1).await;

    // cA fully done with a summary; cB still generating notes.
    let mut summary = tome_core::Summary::shell(chapter_a.id.clone());
    summary.overview = "done".into();
    summary.main_idea = "idea".into();
    w.store.save_summary(&summary).await.unwrap();
    w.store
        .update_chapter(
            &chapter_a.id,
            ChapterPatch::new()
                .overview_status(StageStatus::Completed)
                .analysis_status(StageStatus::Completed)
                .notes_status(StageStatus::Completed),
        )
        .await
        .unwrap();
    w.store
        .update_chapter(
            &chapter_b.id,
            ChapterPatch::new()
                .overview_status(StageStatus::Completed)
                .analysis_status(StageStatus::Completed)
                .notes_status(StageStatus::Processing),
        )
        .await
        .unwrap();

    w.enqueue_and_pump(Job::book_analysis(WorkId::from("w2"), false)).await;

    assert_eq!(w.gateway.overall_calls.load(Ordering::SeqCst), 0);
    assert!(w.store.get_analysis(&WorkId::from("w2")).await.unwrap().is_none());
    assert!(w.events().is_empty());

    // cB finishes; the notes handler would re-enqueue the probe.
    w.store
        .update_chapter(&chapter_b.id, ChapterPatch::new().notes_status(StageStatus::Completed))
        .await
        .unwrap();
    w.enqueue_and_pump(Job::book_analysis(WorkId::from("w2"), false)).await;

    assert_eq!(w.gateway.overall_calls.load(Ordering::SeqCst), 1);
    assert!(w.store.get_analysis(&WorkId::from("w2")).await.unwrap().is_some());
    let names = w.event_names(&["bookDone"]);
    assert_eq!(names, vec!["bookDone"]);
}

/// Forced book analysis still returns early when there are no summaries.
#[tokio::test]
async fn test_forced_book_analysis_with_no_summaries_is_noop() {
    let w = world();
    w.seed("w1", "c1").await;

    w.enqueue_and_pump(Job::book_analysis(WorkId::from("w1"), true)).await;

    assert_eq!(w.gateway.overall_calls.load(Ordering::SeqCst), 0);
    assert!(w.store.get_analysis(&WorkId::from("w1")).await.unwrap().is_none());
}

/// Generator failure leaves the work processing, never errored.
#[tokio::test]
async fn test_book_analysis_generator_failure_leaves_work_processing() {
    let w = world();
    let (_, chapter) = w.seed("w1", "c1").await;
    let mut summary = tome_core::Summary::shell(chapter.id.clone());
    summary.main_idea = "idea".into();
    w.store.save_summary(&summary).await.unwrap();
    w.store
        .update_chapter(
            &chapter.id,
            ChapterPatch::new()
                .overview_status(StageStatus::Completed)
                .analysis_status(StageStatus::Completed)
                .notes_status(StageStatus::Completed),
        )
        .await
        .unwrap();
    w.gateway.fail_overall.store(true, Ordering::SeqCst);

    w.enqueue_and_pump(Job::book_analysis(WorkId::from("w1"), false)).await;

    let work = w.store.get_work(&WorkId::from("w1")).await.unwrap().unwrap();
    assert_eq!(work.status, WorkStatus::Processing);
    assert!(w.store.get_analysis(&WorkId::from("w1")).await.unwrap().is_none());
    assert!(w.event_names(&["bookDone", "error"]).is_empty());
}

fn seeded_note(id: u32) -> Note {
    Note {
        id: NoteId::from(format!("n{id}").as_str()),
        title: format!("Note {id}"),
        content: format!("Content {id}"),
        tags: Vec::new(),
        source: NoteSource {
            work_id: WorkId::from("w1"),
            chapter_id: ChapterId::from("c1"),
        },
        embedding: vec![1.0, 0.0, 0.0, 0.0],
        suggested_links: Vec::new(),
        created_at: chrono::Utc::now() + chrono::Duration::seconds(i64::from(id)),
    }
}

/// Folder organize resumes: prior assignments survive, only the
/// complement is batched, and the taxonomy is reused.
#[tokio::test]
async fn test_folder_organize_resumes_prior_state() {
    let w = world();
    for i in 1..=45 {
        w.store.save_note(&seeded_note(i)).await.unwrap();
    }
    let prior = FolderSet {
        folders: vec![
            Folder {
                name: "Productivity".into(),
                note_ids: vec![NoteId::from("n1"), NoteId::from("n2")],
            },
            Folder { name: "Uncategorized".into(), note_ids: vec![] },
        ],
    };
    w.store.save_folders(&prior).await.unwrap();

    w.enqueue_and_pump(Job::folder_organize()).await;

    // Taxonomy reused: the naming call never happened.
    assert_eq!(w.gateway.names_calls.load(Ordering::SeqCst), 0);

    let progress: Vec<(u32, u32)> = w
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::FoldersProgress { current, total, .. } => Some((current, total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
    assert_eq!(w.event_names(&["foldersDone"]).len(), 1);

    let folders = w.store.get_folders().await.unwrap().unwrap();
    let productivity = folders.folders.iter().find(|f| f.name == "Productivity").unwrap();
    assert!(productivity.note_ids.contains(&NoteId::from("n1")));
    assert!(productivity.note_ids.contains(&NoteId::from("n2")));

    // Every note ends up in exactly one folder.
    let assigned = folders.assigned_ids();
    assert_eq!(assigned.len(), 45);
}

/// When batch assignment keeps failing, the batch routes to
/// Uncategorized instead of failing the run.
#[tokio::test(start_paused = true)]
async fn test_folder_batch_failure_routes_to_uncategorized() {
    let w = world();
    for i in 1..=5 {
        w.store.save_note(&seeded_note(i)).await.unwrap();
    }
    w.gateway.fail_names.store(true, Ordering::SeqCst);
    w.gateway.fail_assign.store(true, Ordering::SeqCst);

    w.enqueue_and_pump(Job::folder_organize()).await;

    // One batch, three attempts.
    assert_eq!(w.gateway.assign_calls.load(Ordering::SeqCst), 3);

    let folders = w.store.get_folders().await.unwrap().unwrap();
    let uncategorized =
        folders.folders.iter().find(|f| f.name == "Uncategorized").unwrap();
    assert_eq!(uncategorized.note_ids.len(), 5);
    // Defaults were used for the taxonomy.
    assert!(folders.folders.iter().any(|f| f.name == "Productivity"));
    assert_eq!(w.event_names(&["foldersDone"]).len(), 1);
}

/// A second organize request while one is running is rejected with a
/// foldersError.
#[tokio::test]
async fn test_concurrent_folder_organize_is_rejected() {
    let w = world();
    for i in 1..=3 {
        w.store.save_note(&seeded_note(i)).await.unwrap();
    }
    let gate = Arc::new(tokio::sync::Notify::new());
    *w.gateway.hold_names.lock().unwrap() = Some(gate.clone());

    let first = {
        let orchestrator = w.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.dispatch(&Job::folder_organize()).await;
        })
    };
    // Let the first run claim the slot and park inside the naming call.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    w.orchestrator.dispatch(&Job::folder_organize()).await;
    let rejected: Vec<String> = w
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::FoldersError { error } => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(rejected, vec!["already in progress".to_string()]);

    *w.gateway.hold_names.lock().unwrap() = None;
    gate.notify_waiters();
    first.await.unwrap();
    assert_eq!(w.event_names(&["foldersDone"]).len(), 1);
}

/// Notes regenerate wipes the previous generation before writing the new
/// one.
#[tokio::test]
async fn test_notes_regenerate_replaces_prior_notes() {
    let w = world();
    w.seed("w1", "c1").await;
    w.enqueue_and_pump(Job::stage(Stage::Overview, WorkId::from("w1"), ChapterId::from("c1")))
        .await;
    let first: Vec<NoteId> = w
        .store
        .notes_by_chapter(&WorkId::from("w1"), &ChapterId::from("c1"))
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(first.len(), 2);

    // Regenerate notes with a different draft set.
    *w.gateway.drafts.lock().unwrap() = vec![tome_core::NoteDraft {
        title: "Spacing effect".into(),
        content: "Distributed review outlasts cramming.".into(),
        tags: vec!["memory".into()],
    }];
    w.store
        .update_chapter(
            &ChapterId::from("c1"),
            ChapterPatch::new().notes_status(StageStatus::Skipped),
        )
        .await
        .unwrap();
    w.enqueue_and_pump(Job::stage(Stage::Notes, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    let second = w
        .store
        .notes_by_chapter(&WorkId::from("w1"), &ChapterId::from("c1"))
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].title, "Spacing effect");

    let graph = w.store.get_graph().await.unwrap();
    for old in &first {
        assert!(!graph.nodes.contains_key(old), "old note nodes must be pruned");
    }
    assert!(graph.nodes.contains_key(&second[0].id));
}

/// Fresh notes link against notes from other works via the vector index.
#[tokio::test]
async fn test_notes_receive_suggested_links_across_works() {
    let w = world();
    // A pre-existing note from another work, close in embedding space to
    // everything the mock embeds.
    let mut existing = seeded_note(99);
    existing.source.work_id = WorkId::from("w0");
    existing.embedding = vec![0.5, 0.5, 0.5, 0.5];
    w.store.save_note(&existing).await.unwrap();

    w.seed("w1", "c1").await;
    w.enqueue_and_pump(Job::stage(Stage::Overview, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    let notes = w
        .store
        .notes_by_chapter(&WorkId::from("w1"), &ChapterId::from("c1"))
        .await
        .unwrap();
    assert!(
        notes.iter().any(|n| !n.suggested_links.is_empty()),
        "at least one note should carry link suggestions"
    );
    for link in notes.iter().flat_map(|n| &n.suggested_links) {
        assert!(link.confidence > 0.5);
        assert!(!link.reason.is_empty());
    }
}

/// The redelivery-after-failure path stays retryable: a failed stage can
/// be re-enqueued and succeed.
#[tokio::test(start_paused = true)]
async fn test_failed_stage_retry_succeeds() {
    let w = world();
    w.seed("w1", "c1").await;
    w.store
        .update_chapter(
            &ChapterId::from("c1"),
            ChapterPatch::new().overview_status(StageStatus::Completed),
        )
        .await
        .unwrap();
    w.gateway.malformed_summary.store(true, Ordering::SeqCst);
    w.enqueue_and_pump(Job::stage(Stage::Analysis, WorkId::from("w1"), ChapterId::from("c1")))
        .await;
    assert_eq!(
        w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap().analysis_status,
        StageStatus::Failed
    );

    // Operator retry: same job, healthy gateway.
    w.gateway.malformed_summary.store(false, Ordering::SeqCst);
    w.enqueue_and_pump(Job::stage(Stage::Analysis, WorkId::from("w1"), ChapterId::from("c1")))
        .await;

    let chapter = w.store.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert_eq!(chapter.analysis_status, StageStatus::Completed);
    assert!(chapter.last_error.is_none());
    w.assert_stage_dag("c1").await;
}
