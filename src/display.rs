//! Render a conversation archive for reading.
//!
//! Parses the raw line-delimited archive directly — never the store — so the
//! rendered output preserves formatting the canonical exchange record drops.
//! A missing file yields a one-line error message rather than an error.

use anyhow::Result;
use std::path::Path;

use crate::convo::claude::parse_archive;

/// Render a conversation archive as a reader-friendly text document.
///
/// `start` and `end` are optional 1-indexed inclusive exchange bounds; out of
/// range values clamp to the available exchanges.
pub fn render_conversation(
    path: &Path,
    start: Option<usize>,
    end: Option<usize>,
) -> Result<String> {
    if !path.exists() {
        return Ok(format!(
            "Conversation file not found: {}",
            path.display()
        ));
    }

    let parsed = parse_archive(path)?;
    let conversation = &parsed.conversation;

    let mut out = String::new();
    out.push_str(&format!("# Conversation {}\n\n", conversation.session_id));
    if !conversation.timestamp.is_empty() {
        out.push_str(&format!("Started: {}\n", conversation.timestamp));
    }
    if let Some(ref version) = conversation.client_version {
        out.push_str(&format!("Client: {}\n", version));
    }
    if let Some(ref cwd) = conversation.cwd {
        out.push_str(&format!("Directory: {}\n", cwd));
    }
    out.push_str(&format!("Exchanges: {}\n", parsed.exchanges.len()));

    let total = parsed.exchanges.len();
    let from = start.unwrap_or(1).max(1);
    let to = end.unwrap_or(total).min(total);

    for exchange in &parsed.exchanges {
        let number = exchange.position as usize + 1;
        if number < from || number > to {
            continue;
        }

        out.push_str(&format!("\n## Exchange {}\n\n", number));
        if !exchange.timestamp.is_empty() {
            out.push_str(&format!("_{}_\n\n", exchange.timestamp));
        }
        out.push_str(&format!("**User:**\n{}\n\n", exchange.user_text));
        out.push_str(&format!("**Assistant:**\n{}\n", exchange.assistant_text));
        if !exchange.tool_calls.is_empty() {
            out.push_str(&format!("\nTools: {}\n", exchange.tool_calls.join(", ")));
        }
    }

    Ok(out)
}
