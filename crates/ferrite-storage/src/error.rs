//! Storage driver error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("invalid offset {offset} for path: {path}")]
    InvalidOffset { path: String, offset: u64 },

    #[error("driver {driver} does not support {operation}")]
    Unsupported {
        driver: &'static str,
        operation: &'static str,
    },

    #[error("unknown storage driver: {0}")]
    InvalidDriverName(String),

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("writer is no longer open")]
    WriterClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage driver error: {0}")]
    Backend(String),
}

impl DriverError {
    /// True for the not-found family, which callers translate into their own
    /// domain errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::PathNotFound { .. })
    }
}
