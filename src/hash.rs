//! Content fingerprints for change detection.
//!
//! Fingerprints are SHA-256 digests rendered as lowercase hex. They decide
//! skip vs. replace during reconciliation and are not a security boundary.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::Path;

use crate::models::{Conversation, NewExchange};

/// Fingerprint a file's contents as read from disk.
pub fn hash_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(hash_str(&content))
}

/// SHA-256 of a string, lowercase hex.
pub fn hash_str(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint a parsed conversation.
///
/// The canonical payload embeds the conversation id, session id, source tag,
/// and each exchange's position, user text, and assistant text. Timestamps
/// and tool-call lists are deliberately omitted so re-exports that change
/// only wall-clock metadata do not trigger re-embedding.
pub fn conversation_fingerprint(conversation: &Conversation, exchanges: &[NewExchange]) -> String {
    let mut canonical = String::new();
    canonical.push_str(&conversation.id);
    canonical.push('\n');
    canonical.push_str(&conversation.session_id);
    canonical.push('\n');
    canonical.push_str(&conversation.source);
    canonical.push('\n');

    for exchange in exchanges {
        let _ = write!(
            canonical,
            "{}\n{}\n{}\n",
            exchange.position, exchange.user_text, exchange.assistant_text
        );
    }

    hash_str(&canonical)
}
