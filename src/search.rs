//! Fragment search: lexical, vector, and hybrid retrieval.
//!
//! The hybrid path is the primary contract:
//!
//! 1. Fetch `2 × limit` lexical candidates (FTS5 BM25) and `2 × limit`
//!    vector candidates (cosine over stored embeddings).
//! 2. Hand both identifier lists to the fuser (Reciprocal Rank Fusion,
//!    configurable `K`).
//! 3. Keep the first `limit` fused entries and min-max normalize their fused
//!    scores into display scores: the top result is always `1.0`, all-equal
//!    scores map to `1.0`.
//! 4. Hydrate each retained identifier into fragment text, owning file path,
//!    and fragment position. Unresolvable identifiers are skipped silently.
//!
//! `keyword` and `semantic` modes run a single ranker through the same
//! normalization and hydration, for callers without an embedder or without
//! indexed text.

use anyhow::{bail, Result};

use crate::fusion::reciprocal_rank_fusion;
use crate::models::FragmentHit;
use crate::store::Store;

/// Run a hybrid search: fuse lexical and vector rankings, normalize, hydrate.
///
/// `query_vec` must come from the same embedder family that produced the
/// stored fragment embeddings. The engine never retries embedding generation;
/// callers own that decision.
pub async fn hybrid_search(
    store: &Store,
    query: &str,
    query_vec: &[f32],
    limit: i64,
    rrf_k: u32,
) -> Result<Vec<FragmentHit>> {
    if query.trim().is_empty() || limit < 1 {
        return Ok(Vec::new());
    }

    let candidate_limit = limit * 2;
    let lexical = store.lexical_search(query, candidate_limit).await?;
    let vector = store.vector_search(query_vec, candidate_limit).await?;

    let lexical_ids: Vec<i64> = lexical.iter().map(|(id, _)| *id).collect();
    let vector_ids: Vec<i64> = vector.iter().map(|(id, _)| *id).collect();

    let fused = reciprocal_rank_fusion(&[&lexical_ids, &vector_ids], rrf_k);

    hydrate(store, fused, limit).await
}

/// Run a lexical-only search (BM25 over the FTS5 shadow table).
pub async fn keyword_search(store: &Store, query: &str, limit: i64) -> Result<Vec<FragmentHit>> {
    if query.trim().is_empty() || limit < 1 {
        return Ok(Vec::new());
    }

    // BM25 rank is ascending-better; negate so ranked[0] is the best and the
    // min-max normalization below maps it to 1.0.
    let ranked: Vec<(i64, f64)> = store
        .lexical_search(query, limit)
        .await?
        .into_iter()
        .map(|(id, rank)| (id, -rank))
        .collect();

    hydrate(store, ranked, limit).await
}

/// Run a vector-only search (cosine over stored embeddings).
pub async fn semantic_search(
    store: &Store,
    query_vec: &[f32],
    limit: i64,
) -> Result<Vec<FragmentHit>> {
    if limit < 1 {
        return Ok(Vec::new());
    }

    let ranked = store.vector_search(query_vec, limit).await?;
    hydrate(store, ranked, limit).await
}

/// Truncate to `limit`, min-max normalize scores over the retained prefix,
/// and join each identifier back to its fragment text and file path.
async fn hydrate(
    store: &Store,
    mut ranked: Vec<(i64, f64)>,
    limit: i64,
) -> Result<Vec<FragmentHit>> {
    ranked.truncate(limit as usize);

    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    let scores: Vec<f64> = ranked.iter().map(|(_, s)| *s).collect();
    let display = normalize_display_scores(&scores);

    let mut hits = Vec::with_capacity(ranked.len());
    for ((id, _), score) in ranked.iter().zip(display) {
        if let Some((text, path, position)) = store.hydrate_fragment(*id).await? {
            hits.push(FragmentHit {
                source_path: path,
                position,
                text,
                score,
            });
        }
        // Unresolvable ids are skipped, not reported.
    }

    Ok(hits)
}

/// Min-max normalize scores to `[0.0, 1.0]` over the retained prefix.
///
/// If all scores are equal they normalize to `1.0`; the top score always
/// maps to `1.0`.
pub fn normalize_display_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let s_min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Validate a search mode string.
pub fn validate_mode(mode: &str) -> Result<()> {
    match mode {
        "keyword" | "semantic" | "hybrid" => Ok(()),
        _ => bail!(
            "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
            mode
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_display_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single_is_one() {
        assert_eq!(normalize_display_scores(&[0.42]), vec![1.0]);
    }

    #[test]
    fn test_normalize_all_equal_is_one() {
        let normalized = normalize_display_scores(&[3.0, 3.0, 3.0]);
        assert!(normalized.iter().all(|s| (*s - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_normalize_top_is_one_and_non_increasing() {
        let normalized = normalize_display_scores(&[0.9, 0.5, 0.5, 0.1]);
        assert!((normalized[0] - 1.0).abs() < 1e-12);
        for window in normalized.windows(2) {
            assert!(window[0] >= window[1]);
        }
        for s in &normalized {
            assert!(*s >= 0.0 && *s <= 1.0);
        }
        assert!((normalized[3] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_mode() {
        assert!(validate_mode("hybrid").is_ok());
        assert!(validate_mode("keyword").is_ok());
        assert!(validate_mode("semantic").is_ok());
        assert!(validate_mode("fuzzy").is_err());
    }
}
