// Service-level error types

use crate::parser::error::ParseError;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Top-level error returned by the pipeline service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("Workflow is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Unknown target '{0}' (not part of the workflow matrix)")]
    UnknownTarget(String),
}

/// Errors raised by a cache store
///
/// These never fail a run; the coordinator downgrades them to a miss or a
/// skipped save.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt cache entry {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Cache store unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while invoking an external tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found on PATH")]
    NotFound(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' exited with status {code:?}")]
    NonZeroExit { program: String, code: Option<i32> },

    #[error("'{program}' timed out after {seconds}s")]
    TimedOut { program: String, seconds: u64 },

    #[error("Unexpected output from '{program}': {output}")]
    UnexpectedOutput { program: String, output: String },
}
