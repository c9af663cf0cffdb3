use thiserror::Error;

/// Error taxonomy for the pipeline. Stage handlers record `Model`,
/// `Embedding`, `Store` and `PreconditionNotMet` durably on the chapter
/// before the job is acknowledged; `EntityMissing` is the cancellation path
/// and is never recorded.
#[derive(Debug, Error)]
pub enum TomeError {
    /// Transport to the message broker cannot be reached. Callers surface
    /// this as service-unavailable and retry.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// An expected work or chapter was not found mid-handler. Deletion of
    /// the durable record is the cancellation signal.
    #[error("entity missing: {0}")]
    EntityMissing(String),

    /// A stage was invoked with a predecessor stage not completed or
    /// skipped.
    #[error("precondition not met: {0}")]
    PreconditionNotMet(String),

    /// The AI gateway returned an error, a timeout, or malformed output
    /// after the handler's own retries.
    #[error("model error: {0}")]
    Model(String),

    /// Embedding-path failure; fails the notes stage.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Persistence layer failure, with the underlying cause in the message.
    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TomeError>;
