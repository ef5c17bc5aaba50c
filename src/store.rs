//! Transactional CRUD over the engine schema.
//!
//! [`Store`] wraps a [`SqlitePool`] and translates every engine operation
//! into one or more SQL statements against the schema created by
//! [`crate::migrate`]. Composite writes — indexing a file, replacing a
//! conversation, deleting a parent — each run inside a single transaction so
//! a concurrent reader on a second connection never observes a partial state.
//!
//! Two invariants are maintained here:
//!
//! - For every fragment there is exactly one `fragments_fts` row whose rowid
//!   equals the fragment id; the row is written and removed in the same
//!   transaction as the fragment.
//! - Children (fragments, exchanges) are never updated in place; they are
//!   deleted and reinserted as a set owned by their parent.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, is_zero_norm, vec_to_blob};
use crate::models::{Conversation, ExchangeRecord, FileRecord, NewExchange, NewFragment};

/// SQLite-backed store for files, fragments, conversations, and exchanges.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Files ────────────────────────────────────────────────────────────

    /// Look up a file row by its relative path.
    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT id, path, content_hash, created_at, updated_at FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| FileRecord {
            id: r.get("id"),
            path: r.get("path"),
            content_hash: r.get("content_hash"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Enumerate all file rows.
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT id, path, content_hash, created_at, updated_at FROM files ORDER BY path ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| FileRecord {
                id: r.get("id"),
                path: r.get("path"),
                content_hash: r.get("content_hash"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    /// Atomically write a file row and its full fragment set.
    ///
    /// Runs inside a single transaction:
    /// 1. Upserts the file row (insert on first observation, fingerprint +
    ///    `updated_at` refresh on change).
    /// 2. Deletes the old FTS rows and fragments for the file.
    /// 3. Inserts the new fragments and their FTS shadow rows, with the FTS
    ///    rowid equal to the fragment id.
    ///
    /// Returns the file id.
    pub async fn index_file(
        &self,
        path: &str,
        content_hash: &str,
        fragments: &[NewFragment],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;

        let file_id = match existing {
            Some(id) => {
                sqlx::query(
                    "DELETE FROM fragments_fts WHERE rowid IN \
                     (SELECT id FROM fragments WHERE file_id = ?)",
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM fragments WHERE file_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    "UPDATE files SET content_hash = ?, updated_at = datetime('now') WHERE id = ?",
                )
                .bind(content_hash)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                id
            }
            None => {
                let result = sqlx::query("INSERT INTO files (path, content_hash) VALUES (?, ?)")
                    .bind(path)
                    .bind(content_hash)
                    .execute(&mut *tx)
                    .await?;
                result.last_insert_rowid()
            }
        };

        for (position, fragment) in fragments.iter().enumerate() {
            let blob = fragment.embedding.as_ref().map(|v| vec_to_blob(v));

            let result = sqlx::query(
                "INSERT INTO fragments (file_id, position, text, original_text, embedding) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(position as i64)
            .bind(&fragment.text)
            .bind(&fragment.original_text)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;

            let fragment_id = result.last_insert_rowid();

            sqlx::query("INSERT INTO fragments_fts (rowid, content) VALUES (?, ?)")
                .bind(fragment_id)
                .bind(&fragment.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(file_id)
    }

    /// Delete a file row and everything it owns.
    ///
    /// The FTS rows are removed explicitly (the virtual table is outside the
    /// foreign-key graph); the fragments go with the file via cascade, all in
    /// one transaction.
    pub async fn delete_file(&self, file_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM fragments_fts WHERE rowid IN \
             (SELECT id FROM fragments WHERE file_id = ?)",
        )
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ── Conversations ────────────────────────────────────────────────────

    /// Fetch a conversation row by id.
    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, source, session_id, timestamp, archive_path, exchange_count, \
             content_hash, client_version, cwd FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(conversation_from_row))
    }

    /// Enumerate all conversations with the given source tag.
    pub async fn list_conversations(&self, source: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, source, session_id, timestamp, archive_path, exchange_count, \
             content_hash, client_version, cwd FROM conversations WHERE source = ? \
             ORDER BY timestamp DESC",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(conversation_from_row).collect())
    }

    /// Atomically insert-or-replace a conversation and its full exchange set.
    ///
    /// Runs inside a single transaction: deletes all exchanges owned by the
    /// conversation id, upserts the conversation row, then inserts every
    /// exchange in order with a fresh UUID id.
    pub async fn replace_conversation(
        &self,
        conversation: &Conversation,
        exchanges: &[NewExchange],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM exchanges WHERE conversation_id = ?")
            .bind(&conversation.id)
            .execute(&mut *tx)
            .await?;

        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO conversations
                (id, source, session_id, timestamp, archive_path, exchange_count,
                 content_hash, last_indexed, client_version, cwd)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.source)
        .bind(&conversation.session_id)
        .bind(&conversation.timestamp)
        .bind(&conversation.archive_path)
        .bind(exchanges.len() as i64)
        .bind(&conversation.content_hash)
        .bind(now)
        .bind(&conversation.client_version)
        .bind(&conversation.cwd)
        .execute(&mut *tx)
        .await?;

        for exchange in exchanges {
            let tool_calls = if exchange.tool_calls.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&exchange.tool_calls)?)
            };
            let blob = exchange.embedding.as_ref().map(|v| vec_to_blob(v));

            sqlx::query(
                r#"
                INSERT INTO exchanges
                    (id, conversation_id, position, timestamp, user_text, assistant_text,
                     tool_calls, parent_id, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&conversation.id)
            .bind(exchange.position)
            .bind(&exchange.timestamp)
            .bind(&exchange.user_text)
            .bind(&exchange.assistant_text)
            .bind(&tool_calls)
            .bind(&exchange.parent_id)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a conversation; its exchanges go with it via cascade.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch all exchanges of a conversation ordered by position.
    pub async fn get_exchanges(&self, conversation_id: &str) -> Result<Vec<ExchangeRecord>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, position, timestamp, user_text, assistant_text, \
             tool_calls, parent_id, embedding IS NOT NULL AS has_embedding \
             FROM exchanges WHERE conversation_id = ? ORDER BY position ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut exchanges = Vec::with_capacity(rows.len());
        for row in rows {
            let tool_calls: Option<String> = row.get("tool_calls");
            let tool_calls = match tool_calls {
                Some(json) => serde_json::from_str(&json).unwrap_or_default(),
                None => Vec::new(),
            };

            exchanges.push(ExchangeRecord {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                position: row.get("position"),
                timestamp: row.get("timestamp"),
                user_text: row.get("user_text"),
                assistant_text: row.get("assistant_text"),
                tool_calls,
                parent_id: row.get("parent_id"),
                has_embedding: row.get("has_embedding"),
            });
        }

        Ok(exchanges)
    }

    // ── Search primitives ────────────────────────────────────────────────

    /// BM25 query against the FTS5 shadow table.
    ///
    /// Returns up to `limit` `(fragment id, rank)` pairs ordered by rank
    /// ascending (smaller is better, per SQLite's convention). A query that
    /// matches nothing returns an empty vector; arbitrary query text is
    /// quoted per term so it cannot raise an FTS syntax error.
    pub async fn lexical_search(&self, query: &str, limit: i64) -> Result<Vec<(i64, f64)>> {
        let match_expr = fts_match_expr(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT rowid, rank FROM fragments_fts WHERE fragments_fts MATCH ? \
             ORDER BY rank LIMIT ?",
        )
        .bind(&match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<i64, _>("rowid"), row.get::<f64, _>("rank")))
            .collect())
    }

    /// Exact cosine-similarity scan over all embedded fragments.
    ///
    /// Returns up to `limit` `(fragment id, similarity)` pairs ordered by
    /// similarity descending. Fragments without an embedding are invisible
    /// here; zero-norm embeddings are excluded (their similarity is
    /// undefined). Ties keep insertion order.
    pub async fn vector_search(&self, query_vec: &[f32], limit: i64) -> Result<Vec<(i64, f64)>> {
        let rows = sqlx::query(
            "SELECT id, embedding FROM fragments WHERE embedding IS NOT NULL ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<(i64, f64)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            if is_zero_norm(&vec) {
                continue;
            }
            let similarity = cosine_similarity(query_vec, &vec) as f64;
            candidates.push((row.get::<i64, _>("id"), similarity));
        }

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(limit as usize);

        Ok(candidates)
    }

    /// Recover a fragment's text, owning file path, and position.
    ///
    /// Returns `None` for an unresolvable id (the caller skips it).
    pub async fn hydrate_fragment(&self, id: i64) -> Result<Option<(String, String, i64)>> {
        let row = sqlx::query(
            "SELECT f.text, fi.path, f.position FROM fragments f \
             JOIN files fi ON fi.id = f.file_id WHERE f.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| (r.get("text"), r.get("path"), r.get("position"))))
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Truncate all content tables, clear autoincrement counters, and
    /// reclaim space.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM exchanges").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM conversations")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM fragments_fts")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM fragments").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;

        let has_sequence: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='sqlite_sequence'",
        )
        .fetch_one(&mut *tx)
        .await?;
        if has_sequence {
            sqlx::query("DELETE FROM sqlite_sequence WHERE name IN ('files', 'fragments')")
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        // VACUUM cannot run inside a transaction.
        sqlx::query("VACUUM").execute(&self.pool).await?;

        Ok(())
    }
}

fn conversation_from_row(row: sqlx::sqlite::SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        source: row.get("source"),
        session_id: row.get("session_id"),
        timestamp: row.get("timestamp"),
        archive_path: row.get("archive_path"),
        exchange_count: row.get("exchange_count"),
        content_hash: row.get("content_hash"),
        client_version: row.get("client_version"),
        cwd: row.get("cwd"),
    }
}

/// Quote each whitespace-separated term so user input is matched literally.
fn fts_match_expr(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_match_expr_quotes_terms() {
        assert_eq!(fts_match_expr("hello world"), "\"hello\" \"world\"");
    }

    #[test]
    fn test_fts_match_expr_escapes_quotes() {
        assert_eq!(fts_match_expr("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
    }

    #[test]
    fn test_fts_match_expr_empty() {
        assert_eq!(fts_match_expr("   "), "");
    }
}
