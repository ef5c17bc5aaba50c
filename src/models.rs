//! Core data models used throughout Context Cache.
//!
//! These types represent the files, fragments, conversations, and exchanges
//! that flow through the ingestion and retrieval pipeline. The data lifecycle
//! is:
//!
//! ```text
//! notes tree   → hash → fragment → embed → FileRecord + NewFragment
//! conversation → hash → embed           → ParsedConversation + NewExchange
//!                                             ↓
//!                                        search → FragmentHit / ExchangeHit
//! ```
//!
//! Parents (files, conversations) are upserted in place; children (fragments,
//! exchanges) are never updated — they are deleted and reinserted as a set
//! whenever the parent's content fingerprint changes.

use serde::Serialize;

/// A Markdown source file tracked by the store.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Autoincrement primary key.
    pub id: i64,
    /// Path relative to the notes root (unique).
    pub path: String,
    /// SHA-256 fingerprint of the file contents (lowercase hex).
    pub content_hash: String,
    /// First-indexed timestamp.
    pub created_at: String,
    /// Last-updated timestamp.
    pub updated_at: String,
}

/// A fragment to be written for a file. Ids and positions are assigned by the
/// store at insert time; position is the index within the slice.
#[derive(Debug, Clone)]
pub struct NewFragment {
    /// Processed text, returned to search callers.
    pub text: String,
    /// Original text before processing, kept for lossless re-processing.
    pub original_text: String,
    /// Optional embedding vector, serialized to a little-endian f32 BLOB.
    pub embedding: Option<Vec<f32>>,
}

/// A conversation row as stored.
#[derive(Debug, Clone)]
pub struct Conversation {
    /// `"{source}:{session_id}"` — deterministic across re-ingestions.
    pub id: String,
    /// Provider tag: `"claude"` or `"opencode"`.
    pub source: String,
    /// Session identifier carried from the source.
    pub session_id: String,
    /// Session start timestamp (ISO-8601 text).
    pub timestamp: String,
    /// Artifact pointer: archive file path (claude) or session id (opencode).
    pub archive_path: String,
    /// Number of exchanges owned by this conversation.
    pub exchange_count: i64,
    /// Canonical content fingerprint (see [`crate::hash`]).
    pub content_hash: String,
    /// Client version reported by the source, if any.
    pub client_version: Option<String>,
    /// Working directory reported by the source, if any.
    pub cwd: Option<String>,
}

/// An exchange to be written for a conversation. The store assigns a UUID id
/// at insert time.
#[derive(Debug, Clone)]
pub struct NewExchange {
    /// Zero-based position within the conversation.
    pub position: i64,
    /// Timestamp (ISO-8601 text).
    pub timestamp: String,
    pub user_text: String,
    pub assistant_text: String,
    /// Names of tools invoked during the assistant turn, in order.
    pub tool_calls: Vec<String>,
    /// Parent turn identifier carried from the source, if any.
    pub parent_id: Option<String>,
    /// Optional embedding vector.
    pub embedding: Option<Vec<f32>>,
}

/// A parsed conversation produced by a source adapter, before fingerprinting.
#[derive(Debug, Clone)]
pub struct ParsedConversation {
    pub conversation: Conversation,
    pub exchanges: Vec<NewExchange>,
}

/// A stored exchange row as fetched back from the store.
#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    pub id: String,
    pub conversation_id: String,
    pub position: i64,
    pub timestamp: String,
    pub user_text: String,
    pub assistant_text: String,
    pub tool_calls: Vec<String>,
    pub parent_id: Option<String>,
    pub has_embedding: bool,
}

/// A hybrid-search result over knowledge-base fragments.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentHit {
    /// Path of the owning file, relative to the notes root.
    pub source_path: String,
    /// Zero-based fragment position within the file.
    pub position: i64,
    /// Fragment text.
    pub text: String,
    /// Display score in `[0.0, 1.0]`; the top result is always `1.0`.
    pub score: f64,
}

/// A conversation-search result, one row per matching exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeHit {
    pub conversation_id: String,
    pub session_id: String,
    /// Conversation start timestamp (ISO-8601).
    pub timestamp: String,
    /// Exchange timestamp (ISO-8601).
    pub exchange_timestamp: String,
    pub source: String,
    /// Zero-based exchange position within the conversation.
    pub position: i64,
    pub user_text: String,
    pub assistant_text: String,
    /// Constant `1.0`; this search is a recall device, not a relevance device.
    pub score: f64,
    /// Artifact pointer for the owning conversation.
    pub archive_path: String,
}

/// Summary of one note-indexing run.
#[derive(Debug, Clone, Default)]
pub struct NoteIndexSummary {
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
    pub deleted: u64,
    /// Total fragments written across added + updated files.
    pub fragments: u64,
    /// Per-file errors; ingestion of other files continued.
    pub errors: Vec<String>,
}

/// Summary of one conversation-indexing run, symmetric to
/// [`NoteIndexSummary`].
#[derive(Debug, Clone, Default)]
pub struct ConversationIndexSummary {
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
    pub deleted: u64,
    /// Total exchanges written across added + updated conversations.
    pub exchanges: u64,
    pub errors: Vec<String>,
}

/// Aggregate store counts reported by `ctxc stats`.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub files: i64,
    pub fragments: i64,
    pub embedded_fragments: i64,
    pub conversations: i64,
    pub exchanges: i64,
    /// `(source tag, conversation count)` pairs, most populous first.
    pub by_source: Vec<(String, i64)>,
}
