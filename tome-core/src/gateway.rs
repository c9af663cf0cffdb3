use crate::error::Result;
use crate::types::{Note, NoteId, SourceKind, Summary, WorkKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Callback invoked with each token of a streamed overview. Implementations
/// may coalesce tokens before forwarding them to clients.
pub type TokenSink = dyn Fn(&str) + Send + Sync;

/// Structured fields produced by the analysis stage, merged into the
/// chapter's [`Summary`] document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredSummary {
    pub main_idea: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub mental_models: Vec<String>,
    #[serde(default)]
    pub life_lessons: Vec<String>,
}

impl StructuredSummary {
    /// Malformed output per the analysis retry rule: nothing usable in
    /// either of the two load-bearing fields.
    pub fn is_malformed(&self) -> bool {
        self.main_idea.trim().is_empty() && self.key_concepts.is_empty()
    }
}

/// An atomic note as generated, before embedding and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: String,
    /// At most ~120 words per the upstream contract; not enforced here.
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Work-level synthesis as generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDraft {
    #[serde(default)]
    pub core_themes: Vec<String>,
    #[serde(default)]
    pub key_takeaways: Vec<String>,
    #[serde(default)]
    pub mental_models: Vec<String>,
    #[serde(default)]
    pub practical_applications: Vec<String>,
}

/// The judgement returned for a candidate note pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkVerdict {
    pub related: bool,
    pub reason: String,
    pub confidence: f32,
}

/// A note offered to the folder-assignment call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderCandidate {
    pub id: NoteId,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderAssignment {
    pub id: NoteId,
    pub folder: String,
}

/// Contract to the external AI model gateway. Every call may fail
/// transiently; retry policy belongs to the callers, not to
/// implementations.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Generate the markdown narrative overview of a chapter, optionally
    /// streaming tokens as they arrive.
    async fn generate_overview(
        &self,
        text: &str,
        kind: WorkKind,
        source_kind: SourceKind,
        on_token: Option<&TokenSink>,
    ) -> Result<String>;

    /// Generate the structured summary of a chapter. Output may be
    /// malformed; callers check [`StructuredSummary::is_malformed`].
    async fn generate_structured_summary(
        &self,
        text: &str,
        kind: WorkKind,
    ) -> Result<StructuredSummary>;

    /// Derive atomic notes from a merged summary. An empty list is a valid
    /// outcome.
    async fn generate_atomic_notes(&self, summary: &Summary) -> Result<Vec<NoteDraft>>;

    /// Synthesize the work-level analysis from all chapter summaries.
    async fn generate_overall_analysis(
        &self,
        summaries: &[Summary],
        kind: WorkKind,
        source_kind: SourceKind,
    ) -> Result<AnalysisDraft>;

    /// Propose 8–12 folder names from a sample of note titles.
    async fn suggest_folder_names(&self, sample_titles: &[String]) -> Result<Vec<String>>;

    /// Assign each note in a batch to one of the taxonomy names.
    async fn assign_folder_batch(
        &self,
        notes: &[FolderCandidate],
        taxonomy: &[String],
    ) -> Result<Vec<FolderAssignment>>;

    /// Judge whether two notes are conceptually related.
    async fn explain_link_relationship(&self, a: &Note, b: &Note) -> Result<LinkVerdict>;

    /// Embed text into the model's fixed-dimension vector space.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
