//! Error taxonomy (made by FontLab https://www.fontlab.com/)
//!
//! [`ServeError`] is what a request can end in; the HTTP layer maps each kind
//! to a status code. [`ConfigError`] only happens at setup time.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Failures reported by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key {key:?}: {reason}")]
    InvalidArgument { key: PathBuf, reason: &'static str },
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
    #[error("{} is a directory", .0.display())]
    IsDirectory(PathBuf),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(key: impl Into<PathBuf>, reason: &'static str) -> Self {
        Self::InvalidArgument {
            key: key.into(),
            reason,
        }
    }
}

/// A pipeline run that did not complete.
///
/// Cheap to clone so that every caller waiting on the same in-flight build
/// receives the same failure.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed: {cause:#}")]
pub struct PipelineError {
    stage: &'static str,
    cause: Arc<anyhow::Error>,
}

impl PipelineError {
    pub fn new(stage: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            cause: Arc::new(cause.into()),
        }
    }

    /// Name of the stage that failed (`source`, `glyph`, `ttf2woff`, `dest`, ...).
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

/// Every way a font request can fail.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("unsupported font format {0:?}")]
    UnsupportedFormat(String),
    #[error("source font {} not found", .0.display())]
    SourceNotFound(PathBuf),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("no .{extension} artifact available for {hash}")]
    ArtifactNotFound { hash: String, extension: String },
    #[error("{} is a directory", .0.display())]
    Forbidden(PathBuf),
    #[error("storage failure: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for ServeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::IsDirectory(path) => Self::Forbidden(path),
            other => Self::Storage(other),
        }
    }
}

/// Setup-time configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_storage_errors_become_forbidden() {
        let key = PathBuf::from("dest/x.css");
        let err = ServeError::from(StorageError::IsDirectory(key.clone()));
        assert!(matches!(err, ServeError::Forbidden(path) if path == key));

        let err = ServeError::from(StorageError::NotFound(PathBuf::from("x.ttf")));
        assert!(
            matches!(err, ServeError::Storage(StorageError::NotFound(_))),
            "{err:?}"
        );
    }

    #[test]
    fn pipeline_error_reports_stage_and_cause_chain() {
        let cause = anyhow::anyhow!("bad glyf").context("subsetting SentyBrush.ttf");
        let err = PipelineError::new("glyph", cause);

        assert_eq!(err.stage(), "glyph");
        let text = err.to_string();
        assert!(text.starts_with("glyph stage failed"), "{text}");
        assert!(text.contains("bad glyf"), "{text}");
    }
}
