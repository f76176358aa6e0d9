//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Embedding errors
//! - 2xx: Index errors
//! - 3xx: Config errors
//! - 4xx: Search / input errors
//! - 5xx: Cache errors
//! - 6xx: Storage errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for JSON output.
///
/// Each variant maps to a numeric code (e.g., `EmbeddingBackendFailed` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Embedding errors (1xx)
    // ========================================
    /// E101: A single embedding backend failed (network, decode, model unavailable)
    EmbeddingBackendFailed,
    /// E103: Every configured model and the fallback model failed
    EmbeddingUnavailable,

    // ========================================
    // Index errors (2xx)
    // ========================================
    /// E202: Index bookkeeping is inconsistent and needs a rebuild
    IndexCorrupted,
    /// E203: Vector dimensions do not match the index
    IndexDimensionMismatch,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E301: Config file not found
    ConfigNotFound,
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,

    // ========================================
    // Search errors (4xx)
    // ========================================
    /// E401: Document or query text is empty or invalid
    MalformedInput,
    /// E402: The caller cancelled the operation
    Cancelled,
    /// E403: Requested document does not exist
    DocumentNotFound,

    // ========================================
    // Cache errors (5xx)
    // ========================================
    /// E501: Cache backend could not be used
    CacheUnavailable,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Database operation failed
    DatabaseError,
    /// E602: Serialization/deserialization failed
    SerializationError,
    /// E603: IO operation failed
    IoError,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E901: Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `EmbeddingBackendFailed` -> 101).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::EmbeddingBackendFailed => 101,
            Self::EmbeddingUnavailable => 103,

            Self::IndexCorrupted => 202,
            Self::IndexDimensionMismatch => 203,

            Self::ConfigNotFound => 301,
            Self::ConfigInvalid => 302,

            Self::MalformedInput => 401,
            Self::Cancelled => 402,
            Self::DocumentNotFound => 403,

            Self::CacheUnavailable => 501,

            Self::DatabaseError => 601,
            Self::SerializationError => 602,
            Self::IoError => 603,

            Self::InternalError => 901,
        }
    }

    /// Get the error code as a formatted string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::EmbeddingBackendFailed => "Check the embedding endpoint and model name in [[embedding.models]]",
            Self::EmbeddingUnavailable => "No embedding model answered. Enable a local `hash` model or fix the fallback",

            Self::IndexCorrupted => "The index is rebuilt from stored chunks automatically. Re-ingest if it persists",
            Self::IndexDimensionMismatch => "All models must produce embedding.dims dimensions. Re-ingest after changing dims",

            Self::ConfigNotFound => "Create a config.toml or pass --config <path>",
            Self::ConfigInvalid => "Check TOML syntax and value ranges in the config file",

            Self::MalformedInput => "Provide non-empty text with at least one word longer than two characters",
            Self::Cancelled => "The operation was cancelled before completion. Retry if still needed",
            Self::DocumentNotFound => "Run `docseek stats` to see indexed documents",

            Self::CacheUnavailable => "Search continues without the cache. Check cache settings",

            Self::DatabaseError => "Check the data directory is writable. Delete docseek.db to start fresh",
            Self::SerializationError => "The stored data may be corrupted. Re-ingest the affected documents",
            Self::IoError => "File operation failed. Check the path exists and permissions are correct",

            Self::InternalError => "An unexpected error occurred. Please report this issue with full error output",
        }
    }

    /// Check if this error is potentially recoverable by the user.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::EmbeddingBackendFailed
            | Self::EmbeddingUnavailable
            | Self::IndexCorrupted
            | Self::ConfigNotFound
            | Self::ConfigInvalid
            | Self::MalformedInput
            | Self::Cancelled
            | Self::DocumentNotFound
            | Self::CacheUnavailable
            | Self::IoError => true,

            Self::IndexDimensionMismatch
            | Self::DatabaseError
            | Self::SerializationError
            | Self::InternalError => false,
        }
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "embedding",
            2 => "index",
            3 => "config",
            4 => "search",
            5 => "cache",
            6 => "storage",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::EmbeddingBackendFailed,
            Self::EmbeddingUnavailable,
            Self::IndexCorrupted,
            Self::IndexDimensionMismatch,
            Self::ConfigNotFound,
            Self::ConfigInvalid,
            Self::MalformedInput,
            Self::Cancelled,
            Self::DocumentNotFound,
            Self::CacheUnavailable,
            Self::DatabaseError,
            Self::SerializationError,
            Self::IoError,
            Self::InternalError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::EmbeddingBackendFailed.numeric(), 101);
        assert_eq!(ErrorCode::IndexCorrupted.numeric(), 202);
        assert_eq!(ErrorCode::ConfigInvalid.numeric(), 302);
        assert_eq!(ErrorCode::MalformedInput.numeric(), 401);
        assert_eq!(ErrorCode::CacheUnavailable.numeric(), 501);
        assert_eq!(ErrorCode::DatabaseError.numeric(), 601);
        assert_eq!(ErrorCode::InternalError.numeric(), 901);
    }

    #[test]
    fn test_error_code_string() {
        assert_eq!(ErrorCode::IndexCorrupted.code_string(), "E202");
        assert_eq!(format!("{}", ErrorCode::MalformedInput), "E401");
    }

    #[test]
    fn test_all_codes_have_suggestions_and_categories() {
        for code in ErrorCode::all() {
            assert!(!code.suggestion().is_empty(), "{code:?} has no suggestion");
            assert_ne!(code.category(), "unknown", "{code:?} has no category");
        }
    }

    #[test]
    fn test_numeric_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            assert!(seen.insert(code.numeric()), "duplicate numeric for {code:?}");
        }
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::IndexCorrupted).unwrap();
        assert_eq!(json, "\"INDEX_CORRUPTED\"");
        let back: ErrorCode = serde_json::from_str("\"CACHE_UNAVAILABLE\"").unwrap();
        assert_eq!(back, ErrorCode::CacheUnavailable);
    }

    #[test]
    fn test_category_assignment() {
        assert_eq!(ErrorCode::EmbeddingUnavailable.category(), "embedding");
        assert_eq!(ErrorCode::IndexDimensionMismatch.category(), "index");
        assert_eq!(ErrorCode::ConfigNotFound.category(), "config");
        assert_eq!(ErrorCode::Cancelled.category(), "search");
        assert_eq!(ErrorCode::CacheUnavailable.category(), "cache");
        assert_eq!(ErrorCode::IoError.category(), "storage");
    }

    #[test]
    fn test_recoverable_categorization() {
        assert!(ErrorCode::EmbeddingBackendFailed.is_recoverable());
        assert!(ErrorCode::MalformedInput.is_recoverable());
        assert!(!ErrorCode::InternalError.is_recoverable());
        assert!(!ErrorCode::SerializationError.is_recoverable());
    }
}
