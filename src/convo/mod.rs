//! Conversation ingestion: source adapters and reconciliation.
//!
//! A [`ConversationSource`] knows how to enumerate the artifacts a provider
//! currently has (archive file paths, or foreign-database session ids) and
//! how to parse one artifact into a canonical [`ParsedConversation`]. The
//! reconciler is polymorphic over that trait and applies the same three
//! invariants as note ingestion: skip-unchanged, replace-on-change,
//! prune-on-deletion.
//!
//! Two adapters exist:
//!
//! - [`claude`] — line-delimited JSONL archives on disk.
//! - [`opencode`] — a read-only sibling SQLite database.

pub mod claude;
pub mod opencode;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::embedding::Embedder;
use crate::hash::conversation_fingerprint;
use crate::models::{ConversationIndexSummary, NewExchange, ParsedConversation};
use crate::store::Store;

/// A provider of conversation artifacts.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// The provider tag stored on every conversation row.
    fn tag(&self) -> &'static str;

    /// Enumerate the artifacts the provider currently has. Conversations in
    /// the store whose artifact pointer is absent from this list are pruned.
    async fn list_artifacts(&self) -> Result<Vec<String>>;

    /// Parse one artifact into a canonical conversation with ordered
    /// exchanges.
    async fn load(&self, artifact: &str) -> Result<ParsedConversation>;
}

/// Reconcile the store with a conversation source.
///
/// Per-artifact failures (parse, read, embed, write) are captured in the
/// summary's error list; the run continues with the next artifact. A failure
/// to enumerate artifacts is fatal for the run.
pub async fn index_conversations(
    store: &Store,
    source: &dyn ConversationSource,
    embedder: Option<&dyn Embedder>,
) -> Result<ConversationIndexSummary> {
    let mut summary = ConversationIndexSummary::default();

    let artifacts = source.list_artifacts().await?;
    let current: HashSet<&str> = artifacts.iter().map(|a| a.as_str()).collect();

    // Prune conversations whose artifact is gone from the source.
    for conversation in store.list_conversations(source.tag()).await? {
        if !current.contains(conversation.archive_path.as_str()) {
            match store.delete_conversation(&conversation.id).await {
                Ok(()) => summary.deleted += 1,
                Err(e) => summary.errors.push(format!("{}: {}", conversation.id, e)),
            }
        }
    }

    for artifact in &artifacts {
        summary.processed += 1;

        let mut parsed = match source.load(artifact).await {
            Ok(p) => p,
            Err(e) => {
                summary.errors.push(format!("{}: {}", artifact, e));
                continue;
            }
        };

        let fingerprint = conversation_fingerprint(&parsed.conversation, &parsed.exchanges);

        let existing = match store.get_conversation(&parsed.conversation.id).await {
            Ok(row) => row,
            Err(e) => {
                summary.errors.push(format!("{}: {}", artifact, e));
                continue;
            }
        };

        if let Some(ref row) = existing {
            if row.content_hash == fingerprint {
                summary.skipped += 1;
                continue;
            }
        }

        parsed.conversation.content_hash = fingerprint;

        if let Some(embedder) = embedder {
            if !parsed.exchanges.is_empty() {
                let texts: Vec<String> = parsed
                    .exchanges
                    .iter()
                    .map(exchange_embedding_text)
                    .collect();

                match embedder.embed(&texts).await {
                    Ok(vectors) => {
                        for (exchange, vector) in parsed.exchanges.iter_mut().zip(vectors) {
                            exchange.embedding = Some(vector);
                        }
                    }
                    Err(e) => {
                        summary.errors.push(format!("{}: {}", artifact, e));
                        continue;
                    }
                }
            }
        }

        match store
            .replace_conversation(&parsed.conversation, &parsed.exchanges)
            .await
        {
            Ok(()) => {
                summary.exchanges += parsed.exchanges.len() as u64;
                if existing.is_some() {
                    summary.updated += 1;
                } else {
                    summary.added += 1;
                }
            }
            Err(e) => summary.errors.push(format!("{}: {}", artifact, e)),
        }
    }

    Ok(summary)
}

/// The text embedded for an exchange. The tools suffix is omitted when the
/// assistant turn invoked no tools.
pub fn exchange_embedding_text(exchange: &NewExchange) -> String {
    if exchange.tool_calls.is_empty() {
        format!(
            "User: {}\n\nAssistant: {}",
            exchange.user_text, exchange.assistant_text
        )
    } else {
        format!(
            "User: {}\n\nAssistant: {}\n\nTools used: {}",
            exchange.user_text,
            exchange.assistant_text,
            exchange.tool_calls.join(", ")
        )
    }
}
