//! Persistent memory backend — SQLite with FTS5 full-text search.
//!
//! Storage: `agents/<id>/workspace/memory.db`
//!
//! Provides ranked keyword search via FTS5/BM25 instead of substring
//! matching, plus efficient upsert and tag filtering.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// A single memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: String,
    /// BM25 relevance score (only populated in search results).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// SQLite-backed memory store with FTS5 search.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) the memory database at `workspace/memory.db`.
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        let db_path = workspace.join("memory.db");
        Self::open_path(&db_path)
    }

    /// Open a database at an explicit path (useful for tests).
    pub fn open_path(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        // Main table.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                tags  TEXT NOT NULL DEFAULT '[]',
                ts    TEXT NOT NULL
            );",
        )?;

        // FTS5 virtual table for ranked search.
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                key, value, tags,
                content='memories',
                content_rowid='rowid'
            );",
        )?;

        // Triggers to keep FTS in sync.
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
                INSERT INTO memories_fts(rowid, key, value, tags)
                VALUES (new.rowid, new.key, new.value, new.tags);
            END;
            CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, key, value, tags)
                VALUES ('delete', old.rowid, old.key, old.value, old.tags);
            END;
            CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, key, value, tags)
                VALUES ('delete', old.rowid, old.key, old.value, old.tags);
                INSERT INTO memories_fts(rowid, key, value, tags)
                VALUES (new.rowid, new.key, new.value, new.tags);
            END;",
        )?;

        // Embedding cache table for semantic search.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_embeddings (
                key       TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                dim       INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Migrate entries from a legacy `memory.jsonl` file into SQLite.
    ///
    /// Skips keys that already exist. Returns the number imported.
    pub fn migrate_from_jsonl(&self, workspace: &Path) -> anyhow::Result<usize> {
        let jsonl_path = workspace.join("memory.jsonl");
        let content = match std::fs::read_to_string(&jsonl_path) {
            Ok(c) => c,
            Err(_) => return Ok(0),
        };

        let conn = self.conn.lock().expect("memory db poisoned");
        let mut count = 0usize;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            #[derive(Deserialize)]
            struct Legacy {
                key: String,
                value: String,
                #[serde(default)]
                tags: Vec<String>,
                timestamp: String,
            }
            if let Ok(entry) = serde_json::from_str::<Legacy>(line) {
                let tags_json = serde_json::to_string(&entry.tags).unwrap_or_else(|_| "[]".into());
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO memories (key, value, tags, ts) VALUES (?1, ?2, ?3, ?4)",
                    params![entry.key, entry.value, tags_json, entry.timestamp],
                )?;
                count += inserted;
            }
        }

        if count > 0 {
            // Rename old file so we don't re-import.
            let bak = workspace.join("memory.jsonl.migrated");
            let _ = std::fs::rename(&jsonl_path, &bak);
            tracing::info!(count, "migrated legacy memory.jsonl → memory.db");
        }

        Ok(count)
    }

    /// Upsert a memory entry by key.
    pub fn save(&self, key: &str, value: &str, tags: &[String]) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("memory db poisoned");
        let tags_json = serde_json::to_string(tags)?;
        let ts = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO memories (key, value, tags, ts)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value=?2, tags=?3, ts=?4",
            params![key, value, tags_json, ts],
        )?;
        Ok(())
    }

    /// Delete a memory entry by key. Returns true if a row was deleted.
    pub fn forget(&self, key: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().expect("memory db poisoned");
        let deleted = conn.execute("DELETE FROM memories WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }

    /// Search memories using FTS5 ranked search.
    ///
    /// When `query` is empty, returns all memories (optionally filtered by tag).
    /// When `query` is non-empty, uses FTS5 BM25 scoring for relevance ranking.
    pub fn search(
        &self,
        query: &str,
        tag: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().expect("memory db poisoned");

        if query.is_empty() {
            // No search query — return all, optionally filtered by tag.
            let mut stmt = conn.prepare(
                "SELECT key, value, tags, ts FROM memories ORDER BY ts DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(MemoryEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    tags: parse_tags(&row.get::<_, String>(2)?),
                    timestamp: row.get(3)?,
                    score: None,
                })
            })?;
            let mut results = Vec::new();
            for row in rows {
                let entry = row?;
                if let Some(t) = tag {
                    if !entry.tags.iter().any(|et| et.eq_ignore_ascii_case(t)) {
                        continue;
                    }
                }
                results.push(entry);
            }
            Ok(results)
        } else {
            // FTS5 ranked search.
            // Sanitize the query for FTS5: wrap each word in quotes
            // with prefix matching (*) for partial word matches.
            let fts_query = query
                .split_whitespace()
                .map(|w| {
                    let clean = w.replace('"', "");
                    format!("\"{clean}\" OR \"{clean}\"*")
                })
                .collect::<Vec<_>>()
                .join(" OR ");

            let sql = "SELECT m.key, m.value, m.tags, m.ts, rank
                        FROM memories_fts f
                        JOIN memories m ON m.rowid = f.rowid
                        WHERE memories_fts MATCH ?1
                        ORDER BY rank
                        LIMIT ?2";
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![fts_query, limit as i64], |row| {
                Ok(MemoryEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    tags: parse_tags(&row.get::<_, String>(2)?),
                    timestamp: row.get(3)?,
                    score: Some(row.get::<_, f64>(4)?),
                })
            })?;
            let mut results = Vec::new();
            for row in rows {
                let entry = row?;
                if let Some(t) = tag {
                    if !entry.tags.iter().any(|et| et.eq_ignore_ascii_case(t)) {
                        continue;
                    }
                }
                results.push(entry);
            }
            Ok(results)
        }
    }

    /// Get all memories for system prompt injection.
    ///
    /// Returns at most 50 entries, most recent first, capped at `max_chars`.
    pub fn prompt_block(&self, max_chars: usize) -> String {
        let entries = match self.search("", None, 50) {
            Ok(e) => e,
            Err(_) => return String::new(),
        };
        if entries.is_empty() {
            return String::new();
        }

        let mut block = String::from("<memory>\n");
        for entry in &entries {
            let line = format!("- **{}**: {}\n", entry.key, entry.value);
            if block.len() + line.len() > max_chars {
                break;
            }
            block.push_str(&line);
        }
        block.push_str("</memory>");
        block
    }

    /// Return total number of memory entries.
    pub fn count(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock().expect("memory db poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    // ── Embedding / semantic search ─────────────────────────

    /// Store an embedding vector for a memory key.
    pub fn save_embedding(&self, key: &str, embedding: &[f32]) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("memory db poisoned");
        let blob = embedding_to_blob(embedding);
        conn.execute(
            "INSERT INTO memory_embeddings (key, embedding, dim)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET embedding=?2, dim=?3",
            params![key, blob, embedding.len() as i64],
        )?;
        Ok(())
    }

    /// Delete a cached embedding for a key.
    pub fn delete_embedding(&self, key: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("memory db poisoned");
        conn.execute("DELETE FROM memory_embeddings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Return all keys that have no cached embedding yet.
    pub fn keys_without_embeddings(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().expect("memory db poisoned");
        let mut stmt = conn.prepare(
            "SELECT m.key FROM memories m
             LEFT JOIN memory_embeddings e ON m.key = e.key
             WHERE e.key IS NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Semantic search: rank memories by cosine similarity to `query_embedding`.
    ///
    /// Only considers memories that have cached embeddings. Returns up to
    /// `limit` entries ordered by descending similarity.
    pub fn search_semantic(
        &self,
        query_embedding: &[f32],
        tag: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().expect("memory db poisoned");
        let mut stmt = conn.prepare(
            "SELECT m.key, m.value, m.tags, m.ts, e.embedding, e.dim
             FROM memory_embeddings e
             JOIN memories m ON m.key = e.key",
        )?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            let tags_json: String = row.get(2)?;
            let ts: String = row.get(3)?;
            let blob: Vec<u8> = row.get(4)?;
            let dim: i64 = row.get(5)?;
            Ok((key, value, tags_json, ts, blob, dim as usize))
        })?;

        let mut scored: Vec<(f64, MemoryEntry)> = Vec::new();
        for row in rows {
            let (key, value, tags_json, ts, blob, dim) = row?;
            let tags = parse_tags(&tags_json);
            if let Some(t) = tag {
                if !tags.iter().any(|et| et.eq_ignore_ascii_case(t)) {
                    continue;
                }
            }
            let emb = blob_to_embedding(&blob, dim);
            let sim = cosine_similarity(query_embedding, &emb);
            scored.push((
                sim,
                MemoryEntry {
                    key,
                    value,
                    tags,
                    timestamp: ts,
                    score: Some(sim),
                },
            ));
        }

        // Sort by similarity descending.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }
}

fn parse_tags(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

/// Serialize an f32 slice to a compact little-endian byte blob.
fn embedding_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a byte blob back to an f32 vector.
fn blob_to_embedding(blob: &[u8], dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|i| {
            let start = i * 4;
            let bytes: [u8; 4] = blob[start..start + 4].try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(bytes)
        })
        .collect()
}

/// Cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

// ── Tests ───────────────────────────────────────────────────
