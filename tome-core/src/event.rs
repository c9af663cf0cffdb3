use crate::types::{ChapterId, FolderSet, Stage, StageStatus, Summary, Work, WorkId};
use serde::{Deserialize, Serialize};

/// Lifecycle notifications published by the worker and fanned out to
/// connected clients by the API process. Best-effort progress, not an audit
/// log: clients reconcile state by reading entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// A chapter stage transitioned to a new status.
    StageStatus {
        work_id: WorkId,
        chapter_id: ChapterId,
        stage: Stage,
        status: StageStatus,
    },
    /// Incremental (cumulative) overview text for a chapter.
    OverviewStream {
        work_id: WorkId,
        chapter_id: ChapterId,
        content: String,
    },
    /// The analysis stage merged structured fields; the UI may refresh.
    ChapterDone {
        work_id: WorkId,
        chapter_id: ChapterId,
        summary: Summary,
    },
    /// The notes stage completed for a chapter.
    ChapterFinalized {
        work_id: WorkId,
        chapter_id: ChapterId,
    },
    /// The overall analysis was written.
    BookDone {
        work_id: WorkId,
        work: Work,
    },
    FoldersProcessing {
        message: String,
    },
    /// One folder-organize batch was persisted.
    FoldersProgress {
        current: u32,
        total: u32,
        folders: FolderSet,
        message: String,
    },
    FoldersDone {
        folders: FolderSet,
        message: String,
    },
    FoldersError {
        error: String,
    },
    /// Free-form progress tag.
    Status {
        work_id: WorkId,
        message: String,
    },
    Error {
        work_id: WorkId,
        #[serde(skip_serializing_if = "Option::is_none")]
        chapter_id: Option<ChapterId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        message: String,
    },
}

impl Event {
    /// The work this event belongs to; folder events are global.
    pub fn work_id(&self) -> Option<&WorkId> {
        match self {
            Event::StageStatus { work_id, .. }
            | Event::OverviewStream { work_id, .. }
            | Event::ChapterDone { work_id, .. }
            | Event::ChapterFinalized { work_id, .. }
            | Event::BookDone { work_id, .. }
            | Event::Status { work_id, .. }
            | Event::Error { work_id, .. } => Some(work_id),
            Event::FoldersProcessing { .. }
            | Event::FoldersProgress { .. }
            | Event::FoldersDone { .. }
            | Event::FoldersError { .. } => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Event::StageStatus { .. } => "stageStatus",
            Event::OverviewStream { .. } => "overviewStream",
            Event::ChapterDone { .. } => "chapterDone",
            Event::ChapterFinalized { .. } => "chapterFinalized",
            Event::BookDone { .. } => "bookDone",
            Event::FoldersProcessing { .. } => "foldersProcessing",
            Event::FoldersProgress { .. } => "foldersProgress",
            Event::FoldersDone { .. } => "foldersDone",
            Event::FoldersError { .. } => "foldersError",
            Event::Status { .. } => "status",
            Event::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SourceKind, WorkKind};

    #[test]
    fn test_stage_status_wire_format() {
        let event = Event::StageStatus {
            work_id: WorkId::from("w1"),
            chapter_id: ChapterId::from("c1"),
            stage: Stage::Analysis,
            status: StageStatus::Failed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stageStatus");
        assert_eq!(json["workId"], "w1");
        assert_eq!(json["chapterId"], "c1");
        assert_eq!(json["stage"], "analysis");
        assert_eq!(json["status"], "failed");
    }

    #[test]
    fn test_error_event_omits_absent_fields() {
        let event = Event::Error {
            work_id: WorkId::from("w1"),
            chapter_id: None,
            stage: None,
            message: "gateway timeout".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("chapterId").is_none());
        assert!(json.get("stage").is_none());
        assert_eq!(json["message"], "gateway timeout");
    }

    #[test]
    fn test_folder_events_are_global() {
        let event = Event::FoldersProgress {
            current: 1,
            total: 3,
            folders: FolderSet::default(),
            message: "batch 1/3".into(),
        };
        assert!(event.work_id().is_none());
        assert_eq!(event.type_name(), "foldersProgress");
    }

    #[test]
    fn test_book_done_round_trip() {
        let work = Work::new("Meditations", WorkKind::Nonfiction, SourceKind::Other);
        let event = Event::BookDone { work_id: work.id.clone(), work };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.type_name(), "bookDone");
        assert_eq!(decoded.work_id(), event.work_id());
    }
}
