//! Substring + date-range search over exchanges.
//!
//! This is a recall device, not a relevance device: rows match when either
//! side of the exchange contains the query substring (case-sensitive, via
//! `instr`) and the owning conversation's timestamp falls inside the
//! optional inclusive bounds. Results carry a constant score of 1.0 and are
//! ordered by conversation timestamp descending, then exchange position
//! ascending. This ranker is deliberately not fused with fragment search.

use anyhow::Result;
use sqlx::Row;

use crate::models::ExchangeHit;
use crate::store::Store;

/// Search exchanges by substring with optional ISO-8601 timestamp bounds.
///
/// `after` and `before` are compared lexicographically against the
/// conversation timestamp, which is correct for ISO-8601 text (a date-only
/// bound like `2024-07-01` behaves as midnight at the start of that day).
pub async fn search_conversations(
    store: &Store,
    query: &str,
    after: Option<&str>,
    before: Option<&str>,
    limit: i64,
) -> Result<Vec<ExchangeHit>> {
    if query.is_empty() || limit < 1 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT c.id AS conversation_id, c.session_id, c.source, c.archive_path,
               c.timestamp AS conversation_timestamp,
               e.position, e.timestamp AS exchange_timestamp,
               e.user_text, e.assistant_text
        FROM exchanges e
        JOIN conversations c ON c.id = e.conversation_id
        WHERE (instr(e.user_text, ?1) > 0 OR instr(e.assistant_text, ?1) > 0)
          AND (?2 IS NULL OR c.timestamp >= ?2)
          AND (?3 IS NULL OR c.timestamp <= ?3)
        ORDER BY c.timestamp DESC, e.position ASC
        LIMIT ?4
        "#,
    )
    .bind(query)
    .bind(after)
    .bind(before)
    .bind(limit)
    .fetch_all(store.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| ExchangeHit {
            conversation_id: row.get("conversation_id"),
            session_id: row.get("session_id"),
            timestamp: row.get("conversation_timestamp"),
            exchange_timestamp: row.get("exchange_timestamp"),
            source: row.get("source"),
            position: row.get("position"),
            user_text: row.get("user_text"),
            assistant_text: row.get("assistant_text"),
            score: 1.0,
            archive_path: row.get("archive_path"),
        })
        .collect())
}

/// Render hits as a Markdown document, one section per exchange.
pub fn format_markdown(hits: &[ExchangeHit]) -> String {
    if hits.is_empty() {
        return "No matching exchanges.".to_string();
    }

    let mut out = String::new();
    for hit in hits {
        out.push_str(&format!(
            "## {} — {} (exchange {})\n\n",
            hit.timestamp, hit.session_id, hit.position
        ));
        out.push_str(&format!("- source: {}\n", hit.source));
        out.push_str(&format!("- archive: {}\n\n", hit.archive_path));
        out.push_str(&format!("**User:** {}\n\n", hit.user_text));
        out.push_str(&format!("**Assistant:** {}\n\n", hit.assistant_text));
    }
    out
}

/// Render hits as pretty-printed JSON.
pub fn format_json(hits: &[ExchangeHit]) -> Result<String> {
    Ok(serde_json::to_string_pretty(hits)?)
}
