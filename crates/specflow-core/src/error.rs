use crate::diagnostics::ErrorCategory;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecflowError {
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted data in {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    #[error("cannot read task file {path}: {reason}")]
    TaskDiscovery { path: PathBuf, reason: String },

    #[error("invalid transition for task {task} from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("timed out after {waited_ms}ms waiting for the {resource} lock")]
    LockTimeout { resource: String, waited_ms: u128 },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid feature id '{0}': must be numeric, optionally followed by -name")]
    InvalidFeatureId(String),

    #[error("invalid progress data: {0}")]
    InvalidProgress(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SpecflowError {
    /// Wrap an I/O failure with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SpecflowError::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SpecflowError::Storage { .. } | SpecflowError::Io(_) => ErrorCategory::Storage,
            SpecflowError::CorruptedData { .. } | SpecflowError::Json(_) => {
                ErrorCategory::CorruptedData
            }
            SpecflowError::TaskDiscovery { .. } => ErrorCategory::TaskDiscovery,
            SpecflowError::InvalidTransition { .. } => ErrorCategory::StateTransition,
            SpecflowError::Configuration(_) => ErrorCategory::Configuration,
            SpecflowError::LockTimeout { .. } => ErrorCategory::LockContention,
            SpecflowError::TaskNotFound(_) => ErrorCategory::NotFound,
            SpecflowError::InvalidFeatureId(_)
            | SpecflowError::InvalidProgress(_)
            | SpecflowError::Validation(_) => ErrorCategory::Validation,
        }
    }

    /// Fatal errors must reach the caller; the rest are recovered or reported
    /// as return values by the layer that observes them.
    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

pub type Result<T> = std::result::Result<T, SpecflowError>;
