//! Core types for the tome reading pipeline: the entity model, the job and
//! event wire envelopes shared by the API and worker processes, the error
//! taxonomy, and the model-gateway contract.

pub mod error;
pub mod event;
pub mod gateway;
pub mod job;
pub mod types;

pub use error::{Result, TomeError};
pub use event::Event;
pub use gateway::{
    AnalysisDraft, FolderAssignment, FolderCandidate, LinkVerdict, ModelGateway, NoteDraft,
    StructuredSummary, TokenSink,
};
pub use job::{Job, JobType};
pub use types::{
    Analysis, Chapter, ChapterId, EdgeDirection, EdgeOrigin, Folder, FolderSet, GraphEdge,
    GraphNode, KnowledgeGraph, Note, NoteId, NoteSource, Stage, StageStatus, SuggestedLink,
    Summary, SourceKind, UNCATEGORIZED, Work, WorkId, WorkKind, WorkStatus,
};
