//! Reciprocal Rank Fusion (RRF).
//!
//! Combines ordered ranked lists of fragment identifiers into a single
//! ranked list using only rank positions, never raw scores:
//!
//! ```text
//! fused(id) = Σ_ℓ 1 / (K + rank_ℓ(id))
//! ```
//!
//! with `rank_ℓ(id)` the zero-based position of `id` in list ℓ; the term is
//! omitted when `id` is absent from a list. `K` (default 60) dampens the
//! contribution of top ranks; 60 is the value recommended by Cormack, Clarke
//! and Buettcher (SIGIR 2009).

/// Default fusion constant.
pub const DEFAULT_RRF_K: u32 = 60;

/// Fuse ranked identifier lists into `(identifier, fused score)` pairs,
/// ordered by fused score descending.
///
/// Equal scores order later-accumulated entries first; the ordering is
/// deterministic for fixed inputs.
pub fn reciprocal_rank_fusion(lists: &[&[i64]], k: u32) -> Vec<(i64, f64)> {
    let k = k as f64;

    let mut order: Vec<i64> = Vec::new();
    let mut scores: std::collections::HashMap<i64, f64> = std::collections::HashMap::new();

    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            let entry = scores.entry(*id).or_insert_with(|| {
                order.push(*id);
                0.0
            });
            *entry += 1.0 / (k + rank as f64);
        }
    }

    let mut fused: Vec<(i64, f64)> = order.iter().map(|id| (*id, scores[id])).collect();
    fused.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.reverse();
    fused
}
