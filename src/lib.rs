pub mod app;
pub mod cache;
pub mod cancel;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod search;
pub mod storage;
pub mod text;
pub mod types;

pub use engine::{EngineSnapshot, RetrievalEngine};
pub use error::{DocseekError, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
