//! Markdown tree reconciliation.
//!
//! Walks the configured notes root and reconciles the store against the
//! on-disk state, honoring three invariants:
//!
//! - **Skip-unchanged** — a file whose content fingerprint matches the stored
//!   one is not rewritten.
//! - **Replace-on-change** — a changed file has all of its fragments deleted
//!   and rebuilt from the new content, in one transaction.
//! - **Prune-on-deletion** — a stored file whose path is gone from disk is
//!   deleted together with everything it owns.
//!
//! Per-file errors (unreadable file, embedding failure, write failure) are
//! captured in the summary's error list; the run continues with the next
//! file.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::config::{ChunkingConfig, NotesConfig};
use crate::embedding::Embedder;
use crate::fragment::fragment_text;
use crate::hash::hash_str;
use crate::models::{NewFragment, NoteIndexSummary};
use crate::store::Store;

/// Reconcile the store with the Markdown tree under `notes.root`.
pub async fn index_notes(
    store: &Store,
    notes: &NotesConfig,
    chunking: &ChunkingConfig,
    embedder: Option<&dyn Embedder>,
) -> Result<NoteIndexSummary> {
    let root = &notes.root;
    if !root.exists() {
        bail!("Notes root does not exist: {}", root.display());
    }

    let include_set = build_globset(&notes.include_globs)?;
    let exclude_set = build_globset(&notes.exclude_globs)?;

    // Collect (absolute path, relative path) for every matching file.
    let mut entries: Vec<(PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        entries.push((path.to_path_buf(), rel_str));
    }

    // Sort for deterministic ordering
    entries.sort_by(|a, b| a.1.cmp(&b.1));

    let mut summary = NoteIndexSummary::default();

    // Prune stored files whose path is no longer on disk.
    let on_disk: HashSet<&str> = entries.iter().map(|(_, rel)| rel.as_str()).collect();
    for record in store.list_files().await? {
        if !on_disk.contains(record.path.as_str()) {
            match store.delete_file(record.id).await {
                Ok(()) => summary.deleted += 1,
                Err(e) => summary.errors.push(format!("{}: {}", record.path, e)),
            }
        }
    }

    for (abs, rel) in &entries {
        summary.processed += 1;

        let content = match std::fs::read_to_string(abs) {
            Ok(c) => c,
            Err(e) => {
                summary.errors.push(format!("{}: {}", rel, e));
                continue;
            }
        };
        let content_hash = hash_str(&content);

        let existing = match store.get_file_by_path(rel).await {
            Ok(row) => row,
            Err(e) => {
                summary.errors.push(format!("{}: {}", rel, e));
                continue;
            }
        };

        let is_update = match &existing {
            Some(record) if record.content_hash == content_hash => {
                summary.skipped += 1;
                continue;
            }
            Some(_) => true,
            None => false,
        };

        let fragments = match build_fragments(&content, chunking, embedder).await {
            Ok(f) => f,
            Err(e) => {
                summary.errors.push(format!("{}: {}", rel, e));
                continue;
            }
        };

        match store.index_file(rel, &content_hash, &fragments).await {
            Ok(_) => {
                summary.fragments += fragments.len() as u64;
                if is_update {
                    summary.updated += 1;
                } else {
                    summary.added += 1;
                }
            }
            Err(e) => summary.errors.push(format!("{}: {}", rel, e)),
        }
    }

    Ok(summary)
}

/// Fragment a file's content and (when an embedder is supplied) embed every
/// fragment. An embedding failure fails the whole file so its previous state
/// stays intact.
async fn build_fragments(
    content: &str,
    chunking: &ChunkingConfig,
    embedder: Option<&dyn Embedder>,
) -> Result<Vec<NewFragment>> {
    let texts = fragment_text(content, chunking.chunk_chars, chunking.overlap_chars);

    let embeddings: Vec<Option<Vec<f32>>> = match embedder {
        Some(embedder) => embedder
            .embed(&texts)
            .await?
            .into_iter()
            .map(Some)
            .collect(),
        None => vec![None; texts.len()],
    };

    Ok(texts
        .into_iter()
        .zip(embeddings)
        .map(|(text, embedding)| NewFragment {
            original_text: text.clone(),
            text,
            embedding,
        })
        .collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
