//! Overlapping character-window fragmenter.
//!
//! Splits note text into fragments of at most `chunk_chars` characters with
//! `overlap_chars` of overlap between consecutive windows. Window ends back
//! off to the most recent space so a word is never split at a window end;
//! window starts are not adjusted and may land mid-word.

/// Split text into overlapping fragments.
///
/// Inputs no longer than `chunk_chars` are returned unchanged as a single
/// fragment. Longer inputs are windowed: each window covers `chunk_chars`
/// characters starting at `start`; if the window does not reach the end of
/// the input, its end backs off to the most recent space (when that space
/// lies strictly after `start`). Emitted fragments are trimmed, empty
/// fragments are dropped, and `start` advances by
/// `chunk_chars - overlap_chars` per window.
pub fn fragment_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();

    if chars.len() <= chunk_chars {
        return vec![text.to_string()];
    }

    let step = chunk_chars.saturating_sub(overlap_chars).max(1);
    let mut fragments = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + chunk_chars).min(chars.len());
        let mut end = hard_end;

        if hard_end < chars.len() {
            if let Some(space) = (0..=hard_end).rev().find(|&i| chars.get(i) == Some(&' ')) {
                if space > start {
                    end = space;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            fragments.push(trimmed.to_string());
        }

        if hard_end == chars.len() {
            break;
        }
        start += step;
    }

    fragments
}
