use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the capture operations that can fail as a whole.
///
/// Per-line problems never show up here: they become a
/// [`LineOutcome`](crate::outcome::LineOutcome) and the session keeps going.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] kube::runtime::watcher::Error),

    #[error("Could not encode log record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {what} pattern '{pattern}': {source}")]
    Pattern {
        what: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("No operator pod found with selector {0}")]
    NoOperatorPod(String),

    #[error("Log pipe closed: {0}")]
    PipeClosed(#[source] std::io::Error),
}

impl CaptureError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
