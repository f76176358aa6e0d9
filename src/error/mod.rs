//! Error handling for docseek.
//!
//! This module provides:
//! - [`DocseekError`]: The main error enum for all engine operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Serializable error with code, suggestion and context

mod codes;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

/// Main error type for docseek operations.
#[derive(Error, Debug)]
pub enum DocseekError {
    #[error("Embedding backend '{model}' failed: {reason}")]
    EmbeddingBackend { model: String, reason: String },

    #[error("All embedding models failed (fallback '{fallback}' included): {reason}")]
    AllModelsFailed { fallback: String, reason: String },

    #[error("{index} index corrupted: {reason}")]
    IndexCorruption { index: &'static str, reason: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocseekError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EmbeddingBackend { .. } => ErrorCode::EmbeddingBackendFailed,
            Self::AllModelsFailed { .. } => ErrorCode::EmbeddingUnavailable,
            Self::IndexCorruption { .. } => ErrorCode::IndexCorrupted,
            Self::DimensionMismatch { .. } => ErrorCode::IndexDimensionMismatch,
            Self::MalformedInput(_) => ErrorCode::MalformedInput,
            Self::CacheUnavailable(_) => ErrorCode::CacheUnavailable,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DocumentNotFound(_) => ErrorCode::DocumentNotFound,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) | Self::Serialization(_) => ErrorCode::SerializationError,
            Self::ConfigNotFound(_) => ErrorCode::ConfigNotFound,
            Self::Config(_) | Self::MissingConfig(_) => ErrorCode::ConfigInvalid,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::EmbeddingBackend { model, reason } => {
                Some(serde_json::json!({ "model": model, "reason": reason }))
            }
            Self::IndexCorruption { index, reason } => {
                Some(serde_json::json!({ "index": index, "reason": reason }))
            }
            Self::DimensionMismatch { expected, actual } => {
                Some(serde_json::json!({ "expected": expected, "actual": actual }))
            }
            Self::DocumentNotFound(id) => Some(serde_json::json!({ "document_id": id })),
            Self::ConfigNotFound(path) => Some(serde_json::json!({ "path": path })),
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            _ => None,
        }
    }

    /// Whether the engine recovers from this error locally with degraded behavior.
    ///
    /// Embedding and cache failures degrade; index corruption is surfaced so the
    /// engine can rebuild; everything else propagates.
    #[must_use]
    pub const fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingBackend { .. }
                | Self::CacheUnavailable(_)
                | Self::MalformedInput(_)
        )
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "INDEX_CORRUPTED")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 202)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Whether this error is potentially recoverable by the user
    pub recoverable: bool,

    /// Error category (e.g., "embedding", "index", "cache")
    pub category: String,
}

impl StructuredError {
    /// Create a new structured error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    /// Create a structured error from a [`DocseekError`].
    #[must_use]
    pub fn from_error(err: &DocseekError) -> Self {
        let mut structured = Self::new(err.code(), err.to_string());
        structured.context = err.context();
        structured
    }

    /// Add context to this error.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<DocseekError> for StructuredError {
    fn from(err: DocseekError) -> Self {
        Self::from_error(&err)
    }
}

/// Result type alias using [`DocseekError`].
pub type Result<T> = std::result::Result<T, DocseekError>;
