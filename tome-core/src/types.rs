use chrono::{DateTime, Utc};
use derive_more::{AsRef, Deref, Display, From, Into};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize, Default,
)]
pub struct WorkId(String);

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize, Default,
)]
pub struct ChapterId(String);

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize, Default,
)]
pub struct NoteId(String);

impl WorkId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl ChapterId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl NoteId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl From<&str> for WorkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for ChapterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of source material a work is. Drives prompt selection in the
/// model gateway, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    Fiction,
    #[default]
    Nonfiction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Pdf,
    Youtube,
    Blog,
    Other,
}

/// Overall status of a work. Transitions processing→done or
/// processing→error; a regenerate command re-opens it to processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    #[default]
    Processing,
    Done,
    Error,
}

/// The three-step per-chapter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Overview,
    Analysis,
    Notes,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Overview => "overview",
            Stage::Analysis => "analysis",
            Stage::Notes => "notes",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage status of a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Skipped,
    Failed,
}

impl StageStatus {
    /// True for states that satisfy a downstream stage's readiness check.
    pub fn satisfies_readiness(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }

    /// True for states no handler will overwrite on redelivery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped | StageStatus::Failed)
    }

    /// The permitted transitions: pending→processing, processing→terminal,
    /// processing→processing (in-flight rewrite), failed→processing (retry),
    /// skipped→processing (regenerate).
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Processing, Processing) => true,
            (Processing, Completed) | (Processing, Failed) | (Processing, Skipped) => true,
            (Failed, Processing) => true,
            (Skipped, Processing) => true,
            // Skip is a direct user action and is allowed from rest states.
            (Pending, Skipped) | (Failed, Skipped) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One ingested source: a book, a transcript, an article.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub id: WorkId,
    pub kind: WorkKind,
    pub source_kind: SourceKind,
    pub title: String,
    /// Chapter ids, dense and ordered by chapter index.
    pub chapter_ids: Vec<ChapterId>,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
}

impl Work {
    pub fn new(title: impl Into<String>, kind: WorkKind, source_kind: SourceKind) -> Self {
        Self {
            id: WorkId::generate(),
            kind,
            source_kind,
            title: title.into(),
            chapter_ids: Vec::new(),
            status: WorkStatus::Processing,
            created_at: Utc::now(),
        }
    }
}

/// A contiguous unit of a work's text, with one status per pipeline stage.
///
/// The stage statuses form a DAG: notes may only be processing or completed
/// when analysis is completed or skipped, and analysis likewise requires
/// overview. Handlers enforce this through preconditions; the store does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: ChapterId,
    pub work_id: WorkId,
    pub chapter_index: u32,
    pub raw_text: String,
    pub summary_ref: Option<String>,
    pub overview_status: StageStatus,
    pub analysis_status: StageStatus,
    pub notes_status: StageStatus,
    /// Rollup convenience status written when the notes stage completes.
    /// Never consulted by stage preconditions.
    pub status: StageStatus,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Chapter {
    pub fn new(work_id: WorkId, chapter_index: u32, raw_text: impl Into<String>) -> Self {
        Self {
            id: ChapterId::generate(),
            work_id,
            chapter_index,
            raw_text: raw_text.into(),
            summary_ref: None,
            overview_status: StageStatus::Pending,
            analysis_status: StageStatus::Pending,
            notes_status: StageStatus::Pending,
            status: StageStatus::Pending,
            updated_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Overview => self.overview_status,
            Stage::Analysis => self.analysis_status,
            Stage::Notes => self.notes_status,
        }
    }

    /// A chapter counts as done when every stage is completed or skipped.
    pub fn is_done(&self) -> bool {
        self.overview_status.satisfies_readiness()
            && self.analysis_status.satisfies_readiness()
            && self.notes_status.satisfies_readiness()
    }
}

/// Per-chapter derived document: the narrative overview plus the structured
/// fields merged in by the analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: String,
    pub chapter_id: ChapterId,
    pub overview: String,
    pub main_idea: String,
    pub key_concepts: Vec<String>,
    pub examples: Vec<String>,
    pub mental_models: Vec<String>,
    pub life_lessons: Vec<String>,
}

impl Summary {
    /// An empty shell, created when the overview stage first touches the
    /// chapter so that `summaryRef` is valid for the whole stage lifetime.
    pub fn shell(chapter_id: ChapterId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chapter_id,
            overview: String::new(),
            main_idea: String::new(),
            key_concepts: Vec::new(),
            examples: Vec::new(),
            mental_models: Vec::new(),
            life_lessons: Vec::new(),
        }
    }

    /// Whether the structured fields carry enough content to derive notes.
    pub fn has_structured_content(&self) -> bool {
        !self.main_idea.trim().is_empty() || !self.key_concepts.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteSource {
    pub work_id: WorkId,
    pub chapter_id: ChapterId,
}

/// A link proposed by the vector/LLM pass, attached to the note document.
/// It becomes a graph edge only when accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedLink {
    pub target: NoteId,
    pub reason: String,
    pub confidence: f32,
}

/// A single-idea knowledge fragment with tags and an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub source: NoteSource,
    pub embedding: Vec<f32>,
    pub suggested_links: Vec<SuggestedLink>,
    pub created_at: DateTime<Utc>,
}

/// Work-level synthesis produced by the book-analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub work_id: WorkId,
    pub core_themes: Vec<String>,
    pub key_takeaways: Vec<String>,
    pub mental_models: Vec<String>,
    pub practical_applications: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeOrigin {
    Manual,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    #[default]
    Directed,
    Bidirectional,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from: NoteId,
    pub to: NoteId,
    pub reason: String,
    pub created_by: EdgeOrigin,
    pub confidence: f32,
    pub direction: EdgeDirection,
}

/// The singleton knowledge graph: one mutable document, mutated only under
/// the store's read-modify-write operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGraph {
    pub nodes: HashMap<NoteId, GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    pub fn has_edge(&self, from: &NoteId, to: &NoteId) -> bool {
        self.edges.iter().any(|e| &e.from == from && &e.to == to)
    }

    /// Remove a note's node and every edge touching it.
    pub fn remove_note(&mut self, id: &NoteId) {
        self.nodes.remove(id);
        self.edges.retain(|e| &e.from != id && &e.to != id);
    }
}

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub name: String,
    pub note_ids: Vec<NoteId>,
}

/// The singleton thematic partition of all notes. A note appears in at most
/// one folder; "Uncategorized" is the implicit catch-all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderSet {
    pub folders: Vec<Folder>,
}

impl FolderSet {
    /// Names usable as a taxonomy: non-empty folders other than the
    /// catch-all.
    pub fn taxonomy(&self) -> Vec<String> {
        self.folders
            .iter()
            .filter(|f| !f.note_ids.is_empty() && f.name != UNCATEGORIZED)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Every note id already placed in some folder.
    pub fn assigned_ids(&self) -> std::collections::HashSet<NoteId> {
        self.folders.iter().flat_map(|f| f.note_ids.iter().cloned()).collect()
    }

    /// Place a note in the named folder, creating the folder if needed.
    /// The note must not already be assigned elsewhere.
    pub fn assign(&mut self, name: &str, note_id: NoteId) {
        if let Some(folder) = self.folders.iter_mut().find(|f| f.name == name) {
            folder.note_ids.push(note_id);
            return;
        }
        self.folders.push(Folder { name: name.to_string(), note_ids: vec![note_id] });
    }

    /// Seed empty folders for each taxonomy name plus the catch-all, keeping
    /// any existing assignments.
    pub fn ensure_folders(&mut self, taxonomy: &[String]) {
        for name in taxonomy {
            if !self.folders.iter().any(|f| &f.name == name) {
                self.folders.push(Folder { name: name.clone(), note_ids: Vec::new() });
            }
        }
        if !self.folders.iter().any(|f| f.name == UNCATEGORIZED) {
            self.folders.push(Folder { name: UNCATEGORIZED.to_string(), note_ids: Vec::new() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_transitions() {
        use StageStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));
        assert!(Skipped.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_chapter_done_requires_all_stages() {
        let mut chapter = Chapter::new(WorkId::from("w1"), 0, "text");
        assert!(!chapter.is_done());

        chapter.overview_status = StageStatus::Completed;
        chapter.analysis_status = StageStatus::Skipped;
        chapter.notes_status = StageStatus::Completed;
        assert!(chapter.is_done());

        chapter.notes_status = StageStatus::Processing;
        assert!(!chapter.is_done());
    }

    #[test]
    fn test_summary_structured_content() {
        let mut summary = Summary::shell(ChapterId::from("c1"));
        assert!(!summary.has_structured_content());

        summary.key_concepts.push("compounding".to_string());
        assert!(summary.has_structured_content());

        summary.key_concepts.clear();
        summary.main_idea = "  ".to_string();
        assert!(!summary.has_structured_content());
    }

    #[test]
    fn test_folder_set_taxonomy_skips_empty_and_uncategorized() {
        let folders = FolderSet {
            folders: vec![
                Folder { name: "Productivity".into(), note_ids: vec![NoteId::from("n1")] },
                Folder { name: "Science".into(), note_ids: vec![] },
                Folder { name: UNCATEGORIZED.into(), note_ids: vec![NoteId::from("n2")] },
            ],
        };
        assert_eq!(folders.taxonomy(), vec!["Productivity".to_string()]);
    }

    #[test]
    fn test_graph_remove_note_prunes_incident_edges() {
        let mut graph = KnowledgeGraph::default();
        let (a, b, c) = (NoteId::from("a"), NoteId::from("b"), NoteId::from("c"));
        for id in [&a, &b, &c] {
            graph.nodes.insert(
                id.clone(),
                GraphNode { title: id.to_string(), tags: vec![], created_at: Utc::now() },
            );
        }
        graph.edges.push(GraphEdge {
            from: a.clone(),
            to: b.clone(),
            reason: "related".into(),
            created_by: EdgeOrigin::Ai,
            confidence: 0.8,
            direction: EdgeDirection::Directed,
        });
        graph.edges.push(GraphEdge {
            from: b.clone(),
            to: c.clone(),
            reason: "related".into(),
            created_by: EdgeOrigin::Manual,
            confidence: 1.0,
            direction: EdgeDirection::Directed,
        });

        graph.remove_note(&b);
        assert!(graph.nodes.contains_key(&a));
        assert!(!graph.nodes.contains_key(&b));
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_work_serializes_camel_case() {
        let work = Work::new("Deep Work", WorkKind::Nonfiction, SourceKind::Pdf);
        let json = serde_json::to_value(&work).unwrap();
        assert_eq!(json["sourceKind"], "pdf");
        assert_eq!(json["status"], "processing");
        assert!(json["chapterIds"].is_array());
    }
}
