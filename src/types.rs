//! Core data model shared by the chunker, both indices, the fusion engine and
//! the query cache.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable chunk identifier: `{document_id}#{index:04}`.
///
/// Ordering is lexicographic, which keeps chunks of one document in
/// position order and gives fusion a deterministic tie-break key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    #[must_use]
    pub fn for_document(document_id: &DocumentId, index: usize) -> Self {
        Self(format!("{}#{index:04}", document_id.as_str()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Known document shapes. Anything not modelled here goes into
/// [`ChunkMetadata::extra`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    Text,
    Markdown,
    Code {
        #[serde(default)]
        language: Option<String>,
    },
    Pdf {
        #[serde(default)]
        page_count: Option<u32>,
    },
    Web {
        url: String,
    },
}

impl DocumentKind {
    /// Short tag used for filtering and content-type boosts.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Code { .. } => "code",
            Self::Pdf { .. } => "pdf",
            Self::Web { .. } => "web",
        }
    }

    /// Parse a kind tag as given on the command line (`code:rust` sets a language).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (tag, detail) = value
            .split_once(':')
            .map_or((value, None), |(tag, detail)| (tag, Some(detail)));
        match tag.trim().to_lowercase().as_str() {
            "text" | "txt" | "plain" => Some(Self::Text),
            "markdown" | "md" => Some(Self::Markdown),
            "code" => Some(Self::Code {
                language: detail.map(str::to_string),
            }),
            "pdf" => Some(Self::Pdf { page_count: None }),
            "web" | "html" => Some(Self::Web {
                url: detail.unwrap_or_default().to_string(),
            }),
            _ => None,
        }
    }

    /// Guess a kind from a file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "md" | "markdown" => Self::Markdown,
            "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" | "rb" | "swift"
            | "kt" => Self::Code {
                language: Some(ext.to_lowercase()),
            },
            "pdf" => Self::Pdf { page_count: None },
            "html" | "htm" => Self::Web { url: String::new() },
            _ => Self::Text,
        }
    }
}

/// Per-chunk metadata carried into the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub document_title: String,
    pub document_kind: DocumentKind,
    pub chunk_index: usize,
    pub chunk_count: usize,
    /// Extension fields not covered by [`DocumentKind`].
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ChunkMetadata {
    /// Look up a metadata value by key for filtering.
    ///
    /// Modelled keys (`title`, `kind`, `language`, `url`, `chunk_index`) are
    /// resolved first, then the extension map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        match key {
            "title" => Some(Cow::Borrowed(&self.document_title)),
            "kind" => Some(Cow::Borrowed(self.document_kind.tag())),
            "language" => match &self.document_kind {
                DocumentKind::Code {
                    language: Some(lang),
                } => Some(Cow::Borrowed(lang)),
                _ => None,
            },
            "url" => match &self.document_kind {
                DocumentKind::Web { url } => Some(Cow::Borrowed(url)),
                _ => None,
            },
            "chunk_index" => Some(Cow::Owned(self.chunk_index.to_string())),
            other => self.extra.get(other).map(|v| Cow::Borrowed(v.as_str())),
        }
    }
}

/// A bounded fragment of a document: the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub content: String,
    pub token_count: usize,
    /// Byte offset of `content` in the source text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub keywords: Vec<String>,
    pub metadata: ChunkMetadata,
}

/// Raw document handed over by the extraction layer.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub kind: DocumentKind,
    pub text: String,
    pub extra: BTreeMap<String, String>,
}

impl Document {
    pub fn new(
        id: impl Into<DocumentId>,
        title: impl Into<String>,
        kind: DocumentKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            text: text.into(),
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Equality predicate over [`ChunkMetadata::get`] (or the document id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub key: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse `key=value`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (key, value) = raw.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key, value.trim()))
    }

    #[must_use]
    pub fn matches(&self, document_id: &DocumentId, metadata: &ChunkMetadata) -> bool {
        if self.key == "document_id" {
            return document_id.as_str() == self.value;
        }
        metadata
            .get(&self.key)
            .is_some_and(|value| value.eq_ignore_ascii_case(&self.value))
    }
}

/// One ranked hit. Scores are normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub content: String,
    pub bm25_score: f32,
    pub vector_score: f32,
    pub combined_score: f32,
    pub matched_terms: Vec<String>,
    /// Rerank multiplier that was applied (1.0 when no boost fired).
    #[serde(default = "unit_boost")]
    pub boost: f32,
}

const fn unit_boost() -> f32 {
    1.0
}

/// Caller options for a single search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum cosine similarity for vector candidates.
    pub threshold: f32,
    /// `false` runs lexical scoring only.
    pub use_hybrid: bool,
    pub use_cache: bool,
    #[serde(default)]
    pub filters: Vec<MetadataFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.3,
            use_hybrid: true,
            use_cache: true,
            filters: Vec::new(),
        }
    }
}

impl SearchOptions {
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub const fn lexical_only(mut self) -> Self {
        self.use_hybrid = false;
        self
    }

    #[must_use]
    pub const fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filters.push(filter);
        self
    }
}
