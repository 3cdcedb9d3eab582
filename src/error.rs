//! Error types for logsift
//!
//! This module defines the error hierarchy for an import/query run:
//! - Line parse rejections (non-fatal, counted)
//! - Connection and schema provisioning failures (fatal)
//! - Per-record write failures (non-fatal, aggregated)
//! - Query failures (fatal to the call)
//! - Configuration and CLI errors
//!
//! Raw engine failures (SQLite, sled, Redis, JSON) are carried by
//! [`BackendError`] and wrapped with the phase they happened in.

use crate::db::BackendKind;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the logsift library
#[derive(Error, Debug)]
pub enum LogsiftError {
    /// Backend could not be reached or opened
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Destination could not be provisioned or cleared
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Analytics query failed
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Backend failure outside a more specific phase (finalization, close)
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (reading the log file, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline thread died
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Why a single log line was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line does not match the access-log grammar
    #[error("line does not match the access-log format")]
    Malformed,

    /// A numeric field matched the grammar but does not fit its integer type
    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    /// Line is not valid UTF-8
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Raw storage-engine failures
#[derive(Error, Debug)]
pub enum BackendError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// sled error
    #[cfg(feature = "document")]
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Redis error
    #[cfg(feature = "kv")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Document (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures establishing a connection (fatal, nothing has been written yet)
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Could not open the SQLite database
    #[error("Failed to open SQLite database '{path}': {source}")]
    Sqlite {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Could not open the document store
    #[error("Failed to open document store '{path}': {reason}")]
    Document { path: PathBuf, reason: String },

    /// Could not reach the key-value server
    #[error("Failed to connect to key-value store at '{url}': {reason}")]
    KeyValue { url: String, reason: String },

    /// Backend support was not compiled in
    #[error("{kind} backend is not available in this build")]
    Unavailable { kind: BackendKind },

    /// Destination name is not a safe identifier
    #[error("Invalid destination '{name}': {reason}")]
    InvalidDestination { name: String, reason: String },

    /// Closing the connection failed (pending writes may be lost)
    #[error("Failed to close connection: {0}")]
    Close(BackendError),
}

/// Provisioning or clearing the destination failed
#[derive(Error, Debug)]
#[error("Failed to prepare destination '{destination}': {source}")]
pub struct SchemaError {
    pub destination: String,
    #[source]
    pub source: BackendError,
}

/// A single record could not be persisted
#[derive(Error, Debug)]
#[error("Write failed: {0}")]
pub struct WriteError(#[from] pub BackendError);

/// Analytics query failures
#[derive(Error, Debug)]
pub enum QueryError {
    /// The connected backend has no analytical query surface
    #[error("{backend} backend does not support analytics queries")]
    Unsupported { backend: BackendKind },

    /// A parameter failed validation
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Query not found in catalog
    #[error("Query not found: {0}")]
    NotFound(String),

    /// Execution failed in the backend
    #[error("Query execution failed: {0}")]
    Backend(#[from] BackendError),
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Backend(BackendError::Sqlite(err))
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Input log file missing or unreadable
    #[error("Invalid input file '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    /// Destination is not a safe identifier
    #[error("Invalid destination '{name}': {reason}")]
    InvalidDestination { name: String, reason: String },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// Unparseable reference time
    #[error("Invalid reference time '{value}': {reason}")]
    InvalidReferenceTime { value: String, reason: String },
}

/// Result type alias for LogsiftError
pub type Result<T> = std::result::Result<T, LogsiftError>;

/// Result type alias for BackendError
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type alias for QueryError
pub type QueryResult<T> = std::result::Result<T, QueryError>;

impl ParseError {
    /// Short label used in logs and summaries
    pub fn label(&self) -> &'static str {
        match self {
            ParseError::Malformed => "malformed",
            ParseError::InvalidNumber { .. } => "invalid-number",
            ParseError::InvalidUtf8 => "invalid-utf8",
        }
    }
}
