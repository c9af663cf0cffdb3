use async_trait::async_trait;
use tome_core::{
    Analysis, Chapter, ChapterId, FolderSet, KnowledgeGraph, Note, NoteId, Result, StageStatus,
    Summary, Work, WorkId,
};

/// Field-level patch applied atomically to a chapter. `None` fields are
/// left untouched; `updatedAt` is always refreshed.
#[derive(Debug, Clone, Default)]
pub struct ChapterPatch {
    pub overview_status: Option<StageStatus>,
    pub analysis_status: Option<StageStatus>,
    pub notes_status: Option<StageStatus>,
    pub status: Option<StageStatus>,
    pub summary_ref: Option<String>,
    /// `Some(None)` clears a previous error, `Some(Some(msg))` records one.
    pub last_error: Option<Option<String>>,
}

impl ChapterPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overview_status(mut self, status: StageStatus) -> Self {
        self.overview_status = Some(status);
        self
    }

    pub fn analysis_status(mut self, status: StageStatus) -> Self {
        self.analysis_status = Some(status);
        self
    }

    pub fn notes_status(mut self, status: StageStatus) -> Self {
        self.notes_status = Some(status);
        self
    }

    pub fn status(mut self, status: StageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn summary_ref(mut self, summary_id: impl Into<String>) -> Self {
        self.summary_ref = Some(summary_id.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    /// Apply the patch to an owned chapter; shared by both store backends.
    pub fn apply(&self, chapter: &mut Chapter) {
        if let Some(s) = self.overview_status {
            chapter.overview_status = s;
        }
        if let Some(s) = self.analysis_status {
            chapter.analysis_status = s;
        }
        if let Some(s) = self.notes_status {
            chapter.notes_status = s;
        }
        if let Some(s) = self.status {
            chapter.status = s;
        }
        if let Some(ref summary_ref) = self.summary_ref {
            chapter.summary_ref = Some(summary_ref.clone());
        }
        if let Some(ref last_error) = self.last_error {
            chapter.last_error = last_error.clone();
        }
        chapter.updated_at = chrono::Utc::now();
    }
}

/// One page of the notes listing.
#[derive(Debug, Clone)]
pub struct NotePage {
    pub notes: Vec<Note>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Mutation applied to the knowledge-graph singleton under the store's
/// read-modify-write cycle.
pub type GraphUpdate = Box<dyn FnOnce(&mut KnowledgeGraph) + Send>;

/// Entity CRUD over the shared document store. All writes are per-id
/// upserts and last-writer-wins, except [`Store::update_chapter`] (atomic
/// field patch) and [`Store::update_graph`] (serialized read-modify-write).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_work(&self, id: &WorkId) -> Result<Option<Work>>;
    async fn save_work(&self, work: &Work) -> Result<()>;

    /// Delete a work and cascade: its chapters, their summaries, their
    /// notes, the graph nodes and edges of those notes, and the work-level
    /// analysis. Deleting the record is the pipeline's cancellation signal.
    async fn delete_work(&self, id: &WorkId) -> Result<()>;

    async fn get_chapter(&self, id: &ChapterId) -> Result<Option<Chapter>>;
    async fn save_chapter(&self, chapter: &Chapter) -> Result<()>;

    /// Atomic field-level patch; returns the new document, or `None` when
    /// the chapter no longer exists.
    async fn update_chapter(&self, id: &ChapterId, patch: ChapterPatch)
    -> Result<Option<Chapter>>;

    /// All chapters of a work, ordered by chapter index.
    async fn chapters_of(&self, work_id: &WorkId) -> Result<Vec<Chapter>>;

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>>;
    async fn get_summary_by_chapter(&self, chapter_id: &ChapterId) -> Result<Option<Summary>>;
    async fn save_summary(&self, summary: &Summary) -> Result<()>;

    async fn get_note(&self, id: &NoteId) -> Result<Option<Note>>;
    async fn save_note(&self, note: &Note) -> Result<()>;
    async fn all_notes(&self) -> Result<Vec<Note>>;
    async fn notes_by_chapter(&self, work_id: &WorkId, chapter_id: &ChapterId)
    -> Result<Vec<Note>>;

    /// Delete a chapter's notes and prune their graph nodes and incident
    /// edges. Clean-regenerate semantics for the notes stage.
    async fn delete_notes_by_chapter(
        &self,
        work_id: &WorkId,
        chapter_id: &ChapterId,
    ) -> Result<()>;

    /// Paginated listing, newest first. `search` matches title or content,
    /// case-insensitive; `page` is 1-based.
    async fn list_notes(&self, page: u32, limit: u32, search: Option<&str>) -> Result<NotePage>;

    async fn get_analysis(&self, work_id: &WorkId) -> Result<Option<Analysis>>;
    async fn save_analysis(&self, analysis: &Analysis) -> Result<()>;

    async fn get_graph(&self) -> Result<KnowledgeGraph>;

    /// Read-modify-write on the graph singleton; mutations are serialized
    /// so concurrent note tasks cannot lose updates. Returns the graph
    /// after the mutation.
    async fn update_graph(&self, update: GraphUpdate) -> Result<KnowledgeGraph>;

    async fn get_folders(&self) -> Result<Option<FolderSet>>;
    async fn save_folders(&self, folders: &FolderSet) -> Result<()>;
}
