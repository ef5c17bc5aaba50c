//! Database schema migrations.
//!
//! Creates all required tables and ensures idempotent execution.
//! Designed to be run via `ctxc init`.
//!
//! # Schema
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────────┐
//! │    files     │──┐  │  fragments   │     │ fragments_fts │
//! │              │  │  │              │     │   (FTS5)      │
//! │ id (PK)      │  └──│ file_id      │     │ rowid =       │
//! │ path (UQ)    │     │ position     │─────│  fragment id  │
//! │ content_hash │     │ text         │     │ content       │
//! │ created_at   │     │ original_text│     └───────────────┘
//! │ updated_at   │     │ embedding    │
//! └──────────────┘     └──────────────┘
//!
//! ┌───────────────┐     ┌───────────────┐
//! │ conversations │──┐  │   exchanges   │
//! │               │  │  │               │
//! │ id (PK)       │  └──│ conversation_ │
//! │ source        │     │   id          │
//! │ session_id    │     │ position      │
//! │ timestamp     │     │ user_text     │
//! │ archive_path  │     │ assistant_text│
//! │ exchange_count│     │ tool_calls    │
//! │ content_hash  │     │ parent_id     │
//! │ client_version│     │ embedding     │
//! │ cwd           │     └───────────────┘
//! └───────────────┘
//! ```
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `files` | One row per indexed Markdown source file |
//! | `fragments` | Retrieval units with optional embedding BLOBs |
//! | `fragments_fts` | FTS5 shadow of fragment text (rowid = fragment id) |
//! | `conversations` | One row per captured agent session |
//! | `exchanges` | User/assistant turn pairs owned by a conversation |
//!
//! # Idempotency
//!
//! All operations use `CREATE TABLE IF NOT EXISTS` or check for existing
//! objects before creation. Running `ctxc init` multiple times is safe.
//! Columns added after the first release (`conversations.content_hash`) are
//! detected via `PRAGMA table_info` and added with `ALTER TABLE`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Run all database migrations against a freshly opened pool.
///
/// # Errors
///
/// Returns an error if the database connection fails or any SQL statement
/// cannot be executed.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Run all migrations against an existing pool. Safe to call repeatedly.
pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            content_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            original_text TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(file_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table (not idempotent natively, check first). The rowid of
    // each row is the owning fragment's id.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='fragments_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query("CREATE VIRTUAL TABLE fragments_fts USING fts5(content)")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            session_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            archive_path TEXT NOT NULL,
            exchange_count INTEGER NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            last_indexed INTEGER,
            client_version TEXT,
            cwd TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exchanges (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            user_text TEXT NOT NULL,
            assistant_text TEXT NOT NULL,
            tool_calls TEXT,
            parent_id TEXT,
            embedding BLOB,
            UNIQUE(conversation_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // content_hash arrived after the first release; add it to databases
    // created before it existed.
    ensure_column(pool, "conversations", "content_hash", "TEXT NOT NULL DEFAULT ''").await?;

    // Indexes for common query patterns
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_timestamp ON conversations(timestamp DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_source ON conversations(source)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_exchanges_conversation ON exchanges(conversation_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_exchanges_timestamp ON exchanges(timestamp DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_file ON fragments(file_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Add `column` to `table` when an older database is missing it.
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, decl: &str) -> Result<()> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;

    let present = rows.iter().any(|row| {
        let name: String = row.get("name");
        name == column
    });

    if !present {
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, column, decl
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}
