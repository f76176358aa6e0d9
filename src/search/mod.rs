//! Hybrid retrieval over document chunks
//!
//! ```text
//!                 query text           query vector
//!                     │                     │
//!                     ▼                     ▼
//!        ┌────────────────────────┐ ┌────────────────────────┐
//!        │  LexicalIndex (BM25)   │ │  VectorIndex (cosine)  │
//!        └────────────────────────┘ └────────────────────────┘
//!                     │                     │
//!                     └──────────┬──────────┘
//!                                ▼
//!                ┌───────────────────────────────┐
//!                │  FusionEngine (fusion.rs)     │
//!                │  normalize, weight, rerank    │
//!                └───────────────────────────────┘
//!                                │
//!                                ▼
//!                      ranked SearchResults
//! ```

pub mod fusion;
pub mod lexical;
pub mod similarity;
pub mod vector;

pub use fusion::FusionEngine;
pub use lexical::{IndexedChunk, LexicalHit, LexicalIndex, ScoreExplanation};
pub use similarity::cosine_similarity;
pub use vector::{
    MemoryVectorStore, SqliteVectorStore, VectorEntry, VectorHit, VectorIndex, VectorStore,
};
