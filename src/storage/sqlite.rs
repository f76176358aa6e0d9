//! SQLite persistence for chunks, vector entries and the query cache

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Row, params};

use crate::cache::CacheEntry;
use crate::error::{DocseekError, Result};
use crate::search::VectorEntry;
use crate::storage::migrations;
use crate::types::{Chunk, ChunkId, ChunkMetadata, DocumentId};

/// SQLite database shared by the engine and the SQLite vector store.
pub struct Database {
    conn: Mutex<Connection>,
    schema_version: u32,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema_version", &self.schema_version)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::configure_pragmas(&conn)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database (tests, ephemeral engines).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let schema_version = migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            schema_version,
        })
    }

    /// Lock the connection.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Current schema version after migrations.
    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    /// Insert or replace chunks in one transaction.
    pub fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (
                    id, document_id, content, token_count, start_offset, end_offset,
                    keywords_json, metadata_json, created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    document_id=excluded.document_id,
                    content=excluded.content,
                    token_count=excluded.token_count,
                    start_offset=excluded.start_offset,
                    end_offset=excluded.end_offset,
                    keywords_json=excluded.keywords_json,
                    metadata_json=excluded.metadata_json",
            )?;
            let now = Utc::now().to_rfc3339();
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id.as_str(),
                    chunk.document_id.as_str(),
                    chunk.content,
                    to_i64(chunk.token_count),
                    to_i64(chunk.start_offset),
                    to_i64(chunk.end_offset),
                    serde_json::to_string(&chunk.keywords)?,
                    serde_json::to_string(&chunk.metadata)?,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All chunks ordered by id (document, then position).
    pub fn load_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, content, token_count, start_offset, end_offset,
                    keywords_json, metadata_json
             FROM chunks ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        let mut chunks = Vec::new();
        while let Some(row) = rows.next()? {
            chunks.push(chunk_from_row(row)?);
        }
        Ok(chunks)
    }

    pub fn delete_document_chunks(&self, document_id: &DocumentId) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM chunks WHERE document_id = ?",
            [document_id.as_str()],
        )?;
        Ok(removed)
    }

    pub fn count_chunks(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(from_i64(count))
    }

    // ------------------------------------------------------------------
    // Vector entries
    // ------------------------------------------------------------------

    pub fn upsert_vector_entry(&self, entry: &VectorEntry) -> Result<()> {
        self.conn().execute(
            "INSERT INTO vector_entries (
                chunk_id, document_id, dims, embedding, metadata_json, models_json, quality
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(chunk_id) DO UPDATE SET
                document_id=excluded.document_id,
                dims=excluded.dims,
                embedding=excluded.embedding,
                metadata_json=excluded.metadata_json,
                models_json=excluded.models_json,
                quality=excluded.quality",
            params![
                entry.chunk_id.as_str(),
                entry.document_id.as_str(),
                to_i64(entry.embedding.len()),
                encode_embedding(&entry.embedding),
                serde_json::to_string(&entry.metadata)?,
                serde_json::to_string(&entry.models)?,
                f64::from(entry.quality),
            ],
        )?;
        Ok(())
    }

    pub fn load_vector_entries(&self) -> Result<Vec<VectorEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, document_id, dims, embedding, metadata_json, models_json, quality
             FROM vector_entries ORDER BY chunk_id",
        )?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(vector_entry_from_row(row)?);
        }
        Ok(entries)
    }

    pub fn delete_vector_entry(&self, chunk_id: &ChunkId) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM vector_entries WHERE chunk_id = ?",
            [chunk_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    pub fn delete_document_vectors(&self, document_id: &DocumentId) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM vector_entries WHERE document_id = ?",
            [document_id.as_str()],
        )?;
        Ok(removed)
    }

    pub fn clear_vector_entries(&self) -> Result<()> {
        self.conn().execute("DELETE FROM vector_entries", [])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query cache
    // ------------------------------------------------------------------

    /// Replace the stored cache snapshot.
    pub fn replace_cache_entries(&self, entries: &[CacheEntry]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cache_entries", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cache_entries (
                    id, normalized_query, scope, dims, query_vector, results_json,
                    created_at, ttl_ms, access_count, last_accessed_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for entry in entries {
                let dims = entry.query_vector.as_ref().map_or(0, Vec::len);
                stmt.execute(params![
                    entry.id,
                    entry.normalized_query,
                    entry.scope,
                    to_i64(dims),
                    entry.query_vector.as_deref().map(encode_embedding),
                    serde_json::to_string(&entry.results)?,
                    entry.created_at.to_rfc3339(),
                    i64::try_from(entry.ttl_ms).unwrap_or(i64::MAX),
                    i64::try_from(entry.access_count).unwrap_or(i64::MAX),
                    entry.last_accessed_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_cache_entries(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, normalized_query, scope, dims, query_vector, results_json,
                    created_at, ttl_ms, access_count, last_accessed_at
             FROM cache_entries ORDER BY last_accessed_at",
        )?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(cache_entry_from_row(row)?);
        }
        Ok(entries)
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA mmap_size = 268435456;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }
}

fn chunk_from_row(row: &Row<'_>) -> Result<Chunk> {
    let id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let keywords_json: String = row.get(6)?;
    let metadata_json: String = row.get(7)?;

    Ok(Chunk {
        id: ChunkId::from(id),
        document_id: DocumentId::from(document_id),
        content: row.get(2)?,
        token_count: from_i64(row.get(3)?),
        start_offset: from_i64(row.get(4)?),
        end_offset: from_i64(row.get(5)?),
        keywords: serde_json::from_str(&keywords_json)?,
        metadata: serde_json::from_str::<ChunkMetadata>(&metadata_json)?,
    })
}

fn vector_entry_from_row(row: &Row<'_>) -> Result<VectorEntry> {
    let chunk_id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let dims = from_i64(row.get(2)?);
    let blob: Vec<u8> = row.get(3)?;
    let metadata_json: String = row.get(4)?;
    let models_json: String = row.get(5)?;
    let quality: f64 = row.get(6)?;
    #[allow(clippy::cast_possible_truncation)]
    let quality = quality as f32;

    Ok(VectorEntry {
        chunk_id: ChunkId::from(chunk_id),
        document_id: DocumentId::from(document_id),
        embedding: decode_embedding(&blob, dims)?,
        metadata: serde_json::from_str(&metadata_json)?,
        models: serde_json::from_str(&models_json)?,
        quality,
    })
}

fn cache_entry_from_row(row: &Row<'_>) -> Result<CacheEntry> {
    let dims = from_i64(row.get(3)?);
    let blob: Option<Vec<u8>> = row.get(4)?;
    let results_json: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let ttl_ms: i64 = row.get(7)?;
    let access_count: i64 = row.get(8)?;
    let last_accessed_at: String = row.get(9)?;

    let query_vector = blob
        .map(|bytes| decode_embedding(&bytes, dims))
        .transpose()?;

    Ok(CacheEntry {
        id: row.get(0)?,
        normalized_query: row.get(1)?,
        scope: row.get(2)?,
        query_vector,
        results: serde_json::from_str(&results_json)?,
        created_at: parse_timestamp(&created_at)?,
        ttl_ms: u64::try_from(ttl_ms).unwrap_or_default(),
        access_count: u64::try_from(access_count).unwrap_or_default(),
        last_accessed_at: parse_timestamp(&last_accessed_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| DocseekError::Serialization(format!("invalid timestamp '{value}': {err}")))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_embedding(bytes: &[u8], dims: usize) -> Result<Vec<f32>> {
    let expected = dims.saturating_mul(4);
    if bytes.len() != expected {
        return Err(DocseekError::Serialization(format!(
            "embedding blob length mismatch: expected {}, got {}",
            expected,
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
