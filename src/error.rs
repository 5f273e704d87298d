use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Failed to open read cursor: {0}")]
    OpenCursor(String),

    #[error("Cursor error: {0}")]
    Cursor(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Explain failed: {0}")]
    Explain(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type BenchResult<T> = Result<T, BenchError>;

impl From<rocksdb::Error> for BenchError {
    fn from(err: rocksdb::Error) -> Self {
        BenchError::Storage(err.into_string())
    }
}

impl From<tokio::task::JoinError> for BenchError {
    fn from(err: tokio::task::JoinError) -> Self {
        BenchError::Worker(err.to_string())
    }
}
