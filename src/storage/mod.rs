//! Storage layer for docseek
//!
//! Optional SQLite persistence: chunks are the source of truth for both
//! indices, vector entries are stored so restarts skip re-embedding, and the
//! query cache is snapshotted on shutdown.

pub mod migrations;
pub mod sqlite;

pub use sqlite::Database;
