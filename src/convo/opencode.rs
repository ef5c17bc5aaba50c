//! Foreign-database conversation source.
//!
//! Reads a sibling SQLite database (read-only) exposing `session`, `message`,
//! and `part` tables, each carrying a JSON payload in a `data` column.
//! Message payloads have `role` (`user`/`assistant`/`system`), `time.created`
//! (epoch milliseconds), and an optional `parentID`. Part payloads have a
//! `type` (`text`, `tool-call`, …) and a `text` or `tool` field.
//!
//! User parts concatenate into the user text, assistant text parts into the
//! assistant text, and `tool-call` parts contribute tool names. An assistant
//! turn with no text but at least one tool call still yields a valid
//! exchange (empty assistant text).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::OpencodeSourceConfig;
use crate::models::{Conversation, NewExchange, ParsedConversation};

use super::ConversationSource;

pub const SOURCE_TAG: &str = "opencode";

/// Source backed by a foreign SQLite database. The artifact pointer for this
/// provider is the session identifier.
pub struct OpencodeSource {
    db_path: PathBuf,
}

impl OpencodeSource {
    pub fn new(config: &OpencodeSourceConfig) -> Self {
        Self {
            db_path: config.db_path.clone(),
        }
    }

    pub fn from_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Open a read-only connection; the foreign database is never written.
    async fn open(&self) -> Result<SqlitePool> {
        if !self.db_path.exists() {
            bail!(
                "Foreign database does not exist: {}",
                self.db_path.display()
            );
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", self.db_path.display()))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(pool)
    }
}

#[async_trait]
impl ConversationSource for OpencodeSource {
    fn tag(&self) -> &'static str {
        SOURCE_TAG
    }

    async fn list_artifacts(&self) -> Result<Vec<String>> {
        let pool = self.open().await?;
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM session ORDER BY id ASC")
            .fetch_all(&pool)
            .await?;
        pool.close().await;
        Ok(ids)
    }

    async fn load(&self, artifact: &str) -> Result<ParsedConversation> {
        let pool = self.open().await?;
        let result = load_session(&pool, artifact).await;
        pool.close().await;
        result
    }
}

/// A message row with its decoded payload.
struct MessageRow {
    id: String,
    role: String,
    created_ms: i64,
    parent_id: Option<String>,
}

async fn load_session(pool: &SqlitePool, session_id: &str) -> Result<ParsedConversation> {
    let session_row = sqlx::query("SELECT id, data FROM session WHERE id = ?")
        .bind(session_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("Session not found: {}", session_id))?;

    let session_data: serde_json::Value = {
        let raw: String = session_row.get("data");
        serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null)
    };

    let client_version = session_data
        .get("version")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let cwd = session_data
        .get("directory")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let session_created_ms = session_data
        .get("time")
        .and_then(|t| t.get("created"))
        .and_then(|v| v.as_i64());

    // All messages for the session, ordered by creation time.
    let message_rows = sqlx::query("SELECT id, data FROM message WHERE session_id = ?")
        .bind(session_id)
        .fetch_all(pool)
        .await?;

    let mut messages: Vec<MessageRow> = Vec::with_capacity(message_rows.len());
    for row in &message_rows {
        let raw: String = row.get("data");
        let data: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("Session {}: invalid message payload: {}", session_id, e))?;

        messages.push(MessageRow {
            id: row.get("id"),
            role: data
                .get("role")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            created_ms: data
                .get("time")
                .and_then(|t| t.get("created"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            parent_id: data
                .get("parentID")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        });
    }
    messages.sort_by_key(|m| m.created_ms);

    let mut exchanges: Vec<NewExchange> = Vec::new();
    let mut current: Option<InProgress> = None;

    for message in &messages {
        let (text, tools) = message_parts(pool, &message.id).await?;

        match message.role.as_str() {
            "user" => {
                flush(&mut current, &mut exchanges);
                current = Some(InProgress {
                    user_text: text,
                    assistant_text: String::new(),
                    tools: Vec::new(),
                    timestamp: epoch_ms_to_iso(message.created_ms),
                    parent_id: message.parent_id.clone(),
                });
            }
            "assistant" => {
                if let Some(in_progress) = current.as_mut() {
                    in_progress.assistant_text.push_str(&text);
                    in_progress.tools.extend(tools);
                }
            }
            // System (and unknown) roles carry no exchange content.
            _ => {}
        }
    }
    flush(&mut current, &mut exchanges);

    let timestamp = session_created_ms
        .or(messages.first().map(|m| m.created_ms))
        .map(epoch_ms_to_iso)
        .unwrap_or_default();

    let conversation = Conversation {
        id: format!("{}:{}", SOURCE_TAG, session_id),
        source: SOURCE_TAG.to_string(),
        session_id: session_id.to_string(),
        timestamp,
        archive_path: session_id.to_string(),
        exchange_count: exchanges.len() as i64,
        content_hash: String::new(),
        client_version,
        cwd,
    };

    Ok(ParsedConversation {
        conversation,
        exchanges,
    })
}

struct InProgress {
    user_text: String,
    assistant_text: String,
    tools: Vec<String>,
    timestamp: String,
    parent_id: Option<String>,
}

/// Emit the in-progress exchange when valid. An assistant turn with only
/// tool calls counts; a user turn with no reply does not.
fn flush(current: &mut Option<InProgress>, exchanges: &mut Vec<NewExchange>) {
    if let Some(in_progress) = current.take() {
        let has_user = !in_progress.user_text.trim().is_empty();
        let has_reply =
            !in_progress.assistant_text.trim().is_empty() || !in_progress.tools.is_empty();

        if has_user && has_reply {
            exchanges.push(NewExchange {
                position: exchanges.len() as i64,
                timestamp: in_progress.timestamp,
                user_text: in_progress.user_text,
                assistant_text: in_progress.assistant_text,
                tool_calls: in_progress.tools,
                parent_id: in_progress.parent_id,
                embedding: None,
            });
        }
    }
}

/// Concatenate a message's text parts and collect its tool-call names,
/// ordered by part id.
async fn message_parts(pool: &SqlitePool, message_id: &str) -> Result<(String, Vec<String>)> {
    let rows = sqlx::query("SELECT id, data FROM part WHERE message_id = ? ORDER BY id ASC")
        .bind(message_id)
        .fetch_all(pool)
        .await?;

    let mut text = String::new();
    let mut tools = Vec::new();

    for row in &rows {
        let raw: String = row.get("data");
        let data: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(_) => continue,
        };

        match data.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(part_text) = data.get("text").and_then(|v| v.as_str()) {
                    text.push_str(part_text);
                }
            }
            Some("tool-call") => {
                if let Some(tool) = data.get("tool").and_then(|v| v.as_str()) {
                    tools.push(tool.to_string());
                }
            }
            _ => {}
        }
    }

    Ok((text, tools))
}

fn epoch_ms_to_iso(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}
