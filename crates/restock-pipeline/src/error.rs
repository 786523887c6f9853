//! Pipeline error types

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid input file {path}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },

    #[error("No valid snapshot date in '{file}': {reason}")]
    SnapshotDate { file: String, reason: String },

    #[error("Required column '{column}' not found in {file}")]
    MissingColumn { file: String, column: &'static str },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Domain(#[from] restock_common::RestockError),

    #[error("Reference sales cache lock poisoned")]
    CachePoisoned,

    #[error("Worker task failed: {0}")]
    Join(String),

    #[error("Pipeline run cancelled")]
    Cancelled,

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn invalid_file(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidFile {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Attribute this error to `path`, unless it already names a file.
    pub fn in_file(self, path: &Path) -> Self {
        match self {
            err @ PipelineError::File { .. } => err,
            other => PipelineError::File {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }

    /// File the error was attributed to, if any
    pub fn file(&self) -> Option<&Path> {
        match self {
            PipelineError::File { path, .. } | PipelineError::InvalidFile { path, .. } => {
                Some(path)
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_file_wraps_once() {
        let err = PipelineError::Validation("empty store".to_string())
            .in_file(Path::new("a.csv"))
            .in_file(Path::new("b.csv"));

        assert_eq!(err.file(), Some(Path::new("a.csv")));
        assert_eq!(err.to_string(), "a.csv: Validation error: empty store");
    }
}
