use crate::types::{ChapterId, Stage, WorkId};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The five work units the jobs queue carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Overview,
    Analysis,
    Notes,
    BookAnalysis,
    FolderOrganize,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Overview => "overview",
            JobType::Analysis => "analysis",
            JobType::Notes => "notes",
            JobType::BookAnalysis => "book_analysis",
            JobType::FolderOrganize => "folder_organize",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Stage> for JobType {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Overview => JobType::Overview,
            Stage::Analysis => JobType::Analysis,
            Stage::Notes => JobType::Notes,
        }
    }
}

/// Wire envelope for one job. Persistent, at-least-once, manually
/// acknowledged on a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_id: Option<WorkId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<ChapterId>,
    /// Echo of the job type for chapter jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Job {
    /// A chapter-stage job (overview, analysis or notes).
    pub fn stage(stage: Stage, work_id: WorkId, chapter_id: ChapterId) -> Self {
        Self {
            job_type: stage.into(),
            work_id: Some(work_id),
            chapter_id: Some(chapter_id),
            stage: Some(stage),
            payload: None,
        }
    }

    /// A book-analysis job. Probes return silently until every chapter is
    /// done unless `force` is set.
    pub fn book_analysis(work_id: WorkId, force: bool) -> Self {
        Self {
            job_type: JobType::BookAnalysis,
            work_id: Some(work_id),
            chapter_id: None,
            stage: None,
            payload: Some(json!({ "force": force })),
        }
    }

    pub fn folder_organize() -> Self {
        Self {
            job_type: JobType::FolderOrganize,
            work_id: None,
            chapter_id: None,
            stage: None,
            payload: None,
        }
    }

    /// The `force` flag of a book-analysis payload; absent means false.
    pub fn force(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get("force"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
