//! Shared test fixtures: a configurable mock gateway and a small world
//! harness that drives the orchestrator deterministically.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tome_broker::{Broker, MemoryBroker};
use tome_core::{
    AnalysisDraft, Chapter, ChapterId, Event, FolderAssignment, FolderCandidate, LinkVerdict,
    ModelGateway, Note, NoteDraft, Result, SourceKind, StructuredSummary, Summary, TokenSink,
    TomeError, Work, WorkId, WorkKind,
};
use tome_pipeline::{Orchestrator, PipelineContext};
use tome_store::{MemoryStore, Store};

pub struct MockGateway {
    pub overview: std::sync::Mutex<String>,
    pub malformed_summary: AtomicBool,
    pub summary_calls: AtomicU32,
    pub drafts: std::sync::Mutex<Vec<NoteDraft>>,
    pub fail_overall: AtomicBool,
    pub overall_calls: AtomicU32,
    pub names_calls: AtomicU32,
    pub fail_names: AtomicBool,
    pub assign_calls: AtomicU32,
    pub fail_assign: AtomicBool,
    /// When set, the overview call deletes this work mid-generation,
    /// simulating a user cancellation racing the model.
    pub delete_during_overview: tokio::sync::Mutex<Option<(Arc<dyn Store>, WorkId)>>,
    /// When set, suggest_folder_names parks until notified.
    pub hold_names: std::sync::Mutex<Option<Arc<tokio::sync::Notify>>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            overview: std::sync::Mutex::new(
                "A chapter about deliberate practice and feedback loops.".to_string(),
            ),
            malformed_summary: AtomicBool::new(false),
            summary_calls: AtomicU32::new(0),
            drafts: std::sync::Mutex::new(vec![
                NoteDraft {
                    title: "Deliberate practice".into(),
                    content: "Skill grows fastest at the edge of ability.".into(),
                    tags: vec!["learning".into()],
                },
                NoteDraft {
                    title: "Feedback loops".into(),
                    content: "Short loops beat long loops.".into(),
                    tags: vec!["systems".into()],
                },
            ]),
            fail_overall: AtomicBool::new(false),
            overall_calls: AtomicU32::new(0),
            names_calls: AtomicU32::new(0),
            fail_names: AtomicBool::new(false),
            assign_calls: AtomicU32::new(0),
            fail_assign: AtomicBool::new(false),
            delete_during_overview: tokio::sync::Mutex::new(None),
            hold_names: std::sync::Mutex::new(None),
        }
    }
}

/// Deterministic fake embedding: direction derived from the text bytes.
pub const EMBED_DIM: usize = 4;

fn fake_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBED_DIM];
    for (i, b) in text.bytes().enumerate() {
        v[i % EMBED_DIM] += f32::from(b) / 255.0;
    }
    v
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn generate_overview(
        &self,
        _text: &str,
        _kind: WorkKind,
        _source_kind: SourceKind,
        on_token: Option<&TokenSink>,
    ) -> Result<String> {
        let overview = self.overview.lock().unwrap().clone();
        if let Some(sink) = on_token {
            for word in overview.split_inclusive(' ') {
                sink(word);
            }
        }
        if let Some((store, work_id)) = self.delete_during_overview.lock().await.take() {
            store.delete_work(&work_id).await?;
        }
        Ok(overview)
    }

    async fn generate_structured_summary(
        &self,
        _text: &str,
        _kind: WorkKind,
    ) -> Result<StructuredSummary> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        if self.malformed_summary.load(Ordering::SeqCst) {
            return Ok(StructuredSummary::default());
        }
        Ok(StructuredSummary {
            main_idea: "Practice with feedback compounds".into(),
            key_concepts: vec!["deliberate practice".into(), "feedback".into()],
            examples: vec!["chess drills".into()],
            mental_models: vec!["edge of ability".into()],
            life_lessons: vec!["seek faster feedback".into()],
        })
    }

    async fn generate_atomic_notes(&self, _summary: &Summary) -> Result<Vec<NoteDraft>> {
        Ok(self.drafts.lock().unwrap().clone())
    }

    async fn generate_overall_analysis(
        &self,
        _summaries: &[Summary],
        _kind: WorkKind,
        _source_kind: SourceKind,
    ) -> Result<AnalysisDraft> {
        self.overall_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_overall.load(Ordering::SeqCst) {
            return Err(TomeError::Model("overall analysis unavailable".into()));
        }
        Ok(AnalysisDraft {
            core_themes: vec!["mastery".into()],
            key_takeaways: vec!["practice deliberately".into()],
            mental_models: vec!["feedback loops".into()],
            practical_applications: vec!["schedule reviews".into()],
        })
    }

    async fn suggest_folder_names(&self, _sample_titles: &[String]) -> Result<Vec<String>> {
        let hold = self.hold_names.lock().unwrap().clone();
        if let Some(notify) = hold {
            notify.notified().await;
        }
        self.names_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_names.load(Ordering::SeqCst) {
            return Err(TomeError::Model("naming unavailable".into()));
        }
        Ok(vec![
            "Learning".into(),
            "Systems".into(),
            "Habits".into(),
            "Focus".into(),
            "Memory".into(),
            "Practice".into(),
            "Decision Making".into(),
            "Motivation".into(),
        ])
    }

    async fn assign_folder_batch(
        &self,
        notes: &[FolderCandidate],
        taxonomy: &[String],
    ) -> Result<Vec<FolderAssignment>> {
        self.assign_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_assign.load(Ordering::SeqCst) {
            return Err(TomeError::Model("assignment unavailable".into()));
        }
        Ok(notes
            .iter()
            .enumerate()
            .map(|(i, note)| FolderAssignment {
                id: note.id.clone(),
                folder: taxonomy[i % taxonomy.len()].clone(),
            })
            .collect())
    }

    async fn explain_link_relationship(&self, _a: &Note, b: &Note) -> Result<LinkVerdict> {
        Ok(LinkVerdict {
            related: true,
            reason: format!("both touch on {}", b.title.to_lowercase()),
            confidence: 0.8,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(fake_embedding(text))
    }
}

pub struct World {
    pub store: MemoryStore,
    pub broker: MemoryBroker,
    pub gateway: Arc<MockGateway>,
    pub orchestrator: Orchestrator,
}

pub fn world() -> World {
    let store = MemoryStore::new();
    let broker = MemoryBroker::new();
    let gateway = Arc::new(MockGateway::default());
    let ctx = Arc::new(PipelineContext::new(
        Arc::new(store.clone()),
        Arc::new(broker.clone()),
        gateway.clone(),
    ));
    World { store, broker, gateway, orchestrator: Orchestrator::new(ctx) }
}

impl World {
    /// Seed one work with one chapter, ids fixed for assertions.
    pub async fn seed(&self, work_id: &str, chapter_id: &str) -> (Work, Chapter) {
        let mut work = Work::new(format!("Work {work_id}"), WorkKind::Nonfiction, SourceKind::Pdf);
        work.id = WorkId::from(work_id);
        let mut chapter = Chapter::new(work.id.clone(), 0, "Raw chapter text.");
        chapter.id = ChapterId::from(chapter_id);
        work.chapter_ids.push(chapter.id.clone());
        self.store.save_work(&work).await.unwrap();
        self.store.save_chapter(&chapter).await.unwrap();
        (work, chapter)
    }

    /// Add another chapter to an existing work.
    pub async fn add_chapter(&self, work_id: &str, chapter_id: &str, index: u32) -> Chapter {
        let mut work = self.store.get_work(&WorkId::from(work_id)).await.unwrap().unwrap();
        let mut chapter = Chapter::new(work.id.clone(), index, "More raw text.");
        chapter.id = ChapterId::from(chapter_id);
        work.chapter_ids.push(chapter.id.clone());
        self.store.save_work(&work).await.unwrap();
        self.store.save_chapter(&chapter).await.unwrap();
        chapter
    }

    /// Publish a job and drain the queue to quiescence, running cascades.
    pub async fn enqueue_and_pump(&self, job: tome_core::Job) {
        self.broker.publish_job(&job).await.unwrap();
        self.pump().await;
    }

    pub async fn pump(&self) {
        while let Some(job) = self.broker.try_pop_job().await {
            self.orchestrator.dispatch(&job).await;
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.broker.published_events()
    }

    /// Published event type names, optionally filtered to a subset of
    /// interest.
    pub fn event_names(&self, keep: &[&str]) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e.type_name().to_string())
            .filter(|name| keep.is_empty() || keep.contains(&name.as_str()))
            .collect()
    }

    /// The stage-status DAG every chapter must satisfy at rest.
    pub async fn assert_stage_dag(&self, chapter_id: &str) {
        let chapter =
            self.store.get_chapter(&ChapterId::from(chapter_id)).await.unwrap().unwrap();
        use tome_core::StageStatus::*;
        if matches!(chapter.notes_status, Processing | Completed) {
            assert!(
                chapter.analysis_status.satisfies_readiness(),
                "notes {} but analysis {}",
                chapter.notes_status,
                chapter.analysis_status
            );
        }
        if matches!(chapter.analysis_status, Processing | Completed) {
            assert!(
                chapter.overview_status.satisfies_readiness(),
                "analysis {} but overview {}",
                chapter.analysis_status,
                chapter.overview_status
            );
        }
    }
}
