//! File-scoped errors. None of these abort a batch.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} has no header row")]
    MissingHeader(PathBuf),

    #[error("file name {0:?} does not follow {{city}}_{{snapshot}}_{{name}}")]
    InvalidFileName(String),

    #[error("no transform policy for {0}")]
    UnknownRecordType(PathBuf),

    #[error("row {row} has {found} fields, header has {expected}")]
    Arity {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("failed to serialize batch report: {0}")]
    Report(#[from] serde_json::Error),
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
