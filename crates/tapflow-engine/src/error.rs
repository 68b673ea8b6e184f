//! Engine-level errors.
//!
//! These surface at post time or while loading a resource bundle. Failures
//! inside a running walk never appear here: a run reports them through its
//! terminal status instead.

use thiserror::Error;

use tapflow_pipeline::PipelineError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("resource is not valid (no bundle loaded or last load failed)")]
    InvalidResource,

    #[error("entry node '{0}' not found")]
    EntryNotFound(String),

    #[error("entry node '{0}' is a sub node and cannot be posted")]
    EntryIsSub(String),

    #[error("tasker is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("bundle file '{path}': {source}")]
    BundleJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("bundle io: {0}")]
    Io(#[from] std::io::Error),
}
