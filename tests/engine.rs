//! End-to-end engine scenarios: ingestion reconciliation, hybrid search,
//! conversation indexing, and conversation recall, run in-process against a
//! temporary store with a deterministic stub embedder.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use context_cache::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, NotesConfig, RetrievalConfig, SourcesConfig,
};
use context_cache::convo::claude::ClaudeArchiveSource;
use context_cache::convo::opencode::OpencodeSource;
use context_cache::convo::index_conversations;
use context_cache::convsearch::search_conversations;
use context_cache::db;
use context_cache::embedding::Embedder;
use context_cache::migrate;
use context_cache::models::NewFragment;
use context_cache::notes::index_notes;
use context_cache::search::hybrid_search;
use context_cache::store::Store;

/// Deterministic embedder mapping every input to `[0.1, 0.2, 0.3, 0, …, 0]`.
struct StubEmbedder;

impl StubEmbedder {
    fn vector() -> Vec<f32> {
        let mut v = vec![0.0f32; 384];
        v[0] = 0.1;
        v[1] = 0.2;
        v[2] = 0.3;
        v
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }

    fn dims(&self) -> usize {
        384
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| Self::vector()).collect())
    }
}

fn test_config(dir: &Path) -> Config {
    Config {
        db: DbConfig {
            path: dir.join("cache.sqlite"),
        },
        notes: Some(NotesConfig {
            root: dir.join("notes"),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
        }),
        chunking: ChunkingConfig::default(),
        embedding: EmbeddingConfig::default(),
        retrieval: RetrievalConfig::default(),
        sources: SourcesConfig::default(),
    }
}

async fn setup() -> (TempDir, Config, Store) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    std::fs::create_dir_all(tmp.path().join("notes")).unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations_on(&pool).await.unwrap();

    (tmp, config, Store::new(pool))
}

fn write_note(tmp: &TempDir, name: &str, content: &str) {
    std::fs::write(tmp.path().join("notes").join(name), content).unwrap();
}

async fn count(store: &Store, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(store.pool()).await.unwrap()
}

// ── Notes: S1–S3 and the reconciliation invariants ───────────────────────

#[tokio::test]
async fn s1_single_file_roundtrip() {
    let (tmp, config, store) = setup().await;
    write_note(&tmp, "test.md", "TypeScript is a typed superset of JavaScript.");

    let notes_cfg = config.notes.as_ref().unwrap();
    let summary = index_notes(&store, notes_cfg, &config.chunking, Some(&StubEmbedder))
        .await
        .unwrap();

    assert_eq!(summary.added, 1);
    assert_eq!(summary.fragments, 1);
    assert!(summary.errors.is_empty());

    let hits = hybrid_search(&store, "TypeScript", &StubEmbedder::vector(), 10, 60)
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_path, "test.md");
    assert_eq!(hits[0].position, 0);
    assert_eq!(hits[0].score, 1.0);
}

#[tokio::test]
async fn s2_delete_detection() {
    let (tmp, config, store) = setup().await;
    write_note(&tmp, "a.md", "notes about alpha");
    write_note(&tmp, "b.md", "notes about beta");

    let notes_cfg = config.notes.as_ref().unwrap();
    index_notes(&store, notes_cfg, &config.chunking, Some(&StubEmbedder))
        .await
        .unwrap();

    std::fs::remove_file(tmp.path().join("notes/a.md")).unwrap();

    let summary = index_notes(&store, notes_cfg, &config.chunking, Some(&StubEmbedder))
        .await
        .unwrap();

    assert_eq!(summary.deleted, 1);
    assert!(store.get_file_by_path("a.md").await.unwrap().is_none());
    assert!(store.get_file_by_path("b.md").await.unwrap().is_some());
}

#[tokio::test]
async fn s3_change_reindex() {
    let (tmp, config, store) = setup().await;
    let long_x = "alpha bravo charlie delta echo foxtrot golf hotel india juliett ".repeat(20);
    write_note(&tmp, "c.md", &long_x);

    let notes_cfg = config.notes.as_ref().unwrap();
    index_notes(&store, notes_cfg, &config.chunking, Some(&StubEmbedder))
        .await
        .unwrap();

    let old_fragments = count(&store, "SELECT COUNT(*) FROM fragments").await;
    assert!(old_fragments > 1);

    let long_y = "kilo lima mike november oscar papa quebec ".repeat(8);
    write_note(&tmp, "c.md", &long_y);

    let summary = index_notes(&store, notes_cfg, &config.chunking, Some(&StubEmbedder))
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.added, 0);

    // No fragment of content X survives.
    let stale: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments WHERE text LIKE '%alpha%'")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(stale, 0);

    // Lexical shadow count equals the new fragment count.
    let fragments = count(&store, "SELECT COUNT(*) FROM fragments").await;
    let shadow = count(&store, "SELECT COUNT(*) FROM fragments_fts").await;
    assert_eq!(fragments, shadow);
    assert_ne!(fragments, old_fragments);
}

#[tokio::test]
async fn skip_unchanged_across_runs() {
    let (tmp, config, store) = setup().await;
    write_note(&tmp, "a.md", "stable content");
    write_note(&tmp, "b.md", "more stable content");

    let notes_cfg = config.notes.as_ref().unwrap();
    let first = index_notes(&store, notes_cfg, &config.chunking, Some(&StubEmbedder))
        .await
        .unwrap();
    assert_eq!(first.added, 2);

    for _ in 0..3 {
        let again = index_notes(&store, notes_cfg, &config.chunking, Some(&StubEmbedder))
            .await
            .unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.updated, 0);
        assert_eq!(again.deleted, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(again.fragments, 0);
    }
}

#[tokio::test]
async fn lexical_shadow_coherence_after_any_run() {
    let (tmp, config, store) = setup().await;
    let notes_cfg = config.notes.as_ref().unwrap();

    write_note(&tmp, "a.md", &"one two three four five ".repeat(50));
    write_note(&tmp, "b.md", "short note");
    index_notes(&store, notes_cfg, &config.chunking, None)
        .await
        .unwrap();

    write_note(&tmp, "b.md", "short note, changed");
    std::fs::remove_file(tmp.path().join("notes/a.md")).unwrap();
    index_notes(&store, notes_cfg, &config.chunking, None)
        .await
        .unwrap();

    let fragments = count(&store, "SELECT COUNT(*) FROM fragments").await;
    let shadow = count(&store, "SELECT COUNT(*) FROM fragments_fts").await;
    assert_eq!(fragments, shadow);
}

#[tokio::test]
async fn cascade_on_file_delete() {
    let (tmp, config, store) = setup().await;
    write_note(&tmp, "a.md", &"word ".repeat(300));

    let notes_cfg = config.notes.as_ref().unwrap();
    index_notes(&store, notes_cfg, &config.chunking, None)
        .await
        .unwrap();
    assert!(count(&store, "SELECT COUNT(*) FROM fragments").await > 0);

    let record = store.get_file_by_path("a.md").await.unwrap().unwrap();
    store.delete_file(record.id).await.unwrap();

    assert_eq!(count(&store, "SELECT COUNT(*) FROM fragments").await, 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM fragments_fts").await, 0);
}

#[tokio::test]
async fn vector_scan_roundtrip() {
    let (_tmp, _config, store) = setup().await;

    let mut unit = vec![0.0f32; 384];
    unit[5] = 1.0;

    let mut other = vec![0.0f32; 384];
    other[6] = 1.0;

    store
        .index_file(
            "vectors.md",
            "hash",
            &[
                NewFragment {
                    text: "the target fragment".to_string(),
                    original_text: "the target fragment".to_string(),
                    embedding: Some(unit.clone()),
                },
                NewFragment {
                    text: "a different fragment".to_string(),
                    original_text: "a different fragment".to_string(),
                    embedding: Some(other),
                },
            ],
        )
        .await
        .unwrap();

    let ranked = store.vector_search(&unit, 10).await.unwrap();
    assert!(!ranked.is_empty());
    assert!((ranked[0].1 - 1.0).abs() <= 1e-4);

    let (text, _, _) = store.hydrate_fragment(ranked[0].0).await.unwrap().unwrap();
    assert_eq!(text, "the target fragment");
}

#[tokio::test]
async fn zero_norm_embeddings_excluded_from_vector_rank() {
    let (_tmp, _config, store) = setup().await;

    let mut unit = vec![0.0f32; 4];
    unit[0] = 1.0;

    store
        .index_file(
            "z.md",
            "hash",
            &[
                NewFragment {
                    text: "zero".to_string(),
                    original_text: "zero".to_string(),
                    embedding: Some(vec![0.0; 4]),
                },
                NewFragment {
                    text: "unit".to_string(),
                    original_text: "unit".to_string(),
                    embedding: Some(unit.clone()),
                },
            ],
        )
        .await
        .unwrap();

    let ranked = store.vector_search(&unit, 10).await.unwrap();
    assert_eq!(ranked.len(), 1);
}

#[tokio::test]
async fn lexical_search_empty_on_no_match() {
    let (tmp, config, store) = setup().await;
    write_note(&tmp, "a.md", "plain note text");

    let notes_cfg = config.notes.as_ref().unwrap();
    index_notes(&store, notes_cfg, &config.chunking, None)
        .await
        .unwrap();

    let ranked = store.lexical_search("zzzxqqqj", 10).await.unwrap();
    assert!(ranked.is_empty());

    // Punctuation-heavy input must not raise an FTS syntax error.
    let ranked = store.lexical_search("\"unbalanced (query", 10).await.unwrap();
    assert!(ranked.is_empty());
}

#[tokio::test]
async fn open_existing_rejects_missing_store() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    assert!(db::open_existing(&config).await.is_err());
}

// ── Conversations: S5, S6, and reconciliation ────────────────────────────

fn write_archive(dir: &Path, name: &str, session_id: &str, timestamp: &str, exchanges: &[(&str, &str)]) {
    let mut lines = vec![format!(
        r#"{{"type":"session.start","session_id":"{}","client_version":"1.0.0","timestamp":"{}"}}"#,
        session_id, timestamp
    )];
    for (user, assistant) in exchanges {
        lines.push(format!(
            r#"{{"type":"user.message","content":"{}"}}"#,
            user
        ));
        lines.push(format!(
            r#"{{"type":"assistant.message","content":"{}"}}"#,
            assistant
        ));
    }
    std::fs::write(dir.join(name), lines.join("\n")).unwrap();
}

#[tokio::test]
async fn s5_conversation_replace_shrink() {
    let (tmp, _config, store) = setup().await;
    let archive_dir = tmp.path().join("archives");
    std::fs::create_dir_all(&archive_dir).unwrap();

    write_archive(
        &archive_dir,
        "s1.jsonl",
        "s1",
        "2024-06-01T12:00:00Z",
        &[("q1", "a1"), ("q2", "a2"), ("q3", "a3")],
    );

    let source = ClaudeArchiveSource::from_dir(&archive_dir);
    let summary = index_conversations(&store, &source, Some(&StubEmbedder))
        .await
        .unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.exchanges, 3);

    write_archive(
        &archive_dir,
        "s1.jsonl",
        "s1",
        "2024-06-01T12:00:00Z",
        &[("q1", "a1")],
    );

    let summary = index_conversations(&store, &source, Some(&StubEmbedder))
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);

    let exchanges = store.get_exchanges("claude:s1").await.unwrap();
    assert_eq!(exchanges.len(), 1);
    assert!(exchanges[0].has_embedding);

    let conversation = store.get_conversation("claude:s1").await.unwrap().unwrap();
    assert_eq!(conversation.exchange_count, 1);
}

#[tokio::test]
async fn s6_conversation_search_by_substring_and_range() {
    let (tmp, _config, store) = setup().await;
    let archive_dir = tmp.path().join("archives");
    std::fs::create_dir_all(&archive_dir).unwrap();

    write_archive(
        &archive_dir,
        "june.jsonl",
        "june",
        "2024-06-01T09:00:00Z",
        &[("how do I handle flaky calls?", "wrap them in async retry logic")],
    );
    write_archive(
        &archive_dir,
        "august.jsonl",
        "august",
        "2024-08-01T09:00:00Z",
        &[("same problem again", "reuse the async retry helper")],
    );

    let source = ClaudeArchiveSource::from_dir(&archive_dir);
    index_conversations(&store, &source, None).await.unwrap();

    let hits = search_conversations(&store, "async retry", Some("2024-07-01"), None, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].session_id, "august");
    assert_eq!(hits[0].score, 1.0);

    // Without bounds, both match, newest conversation first.
    let hits = search_conversations(&store, "async retry", None, None, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].session_id, "august");
    assert_eq!(hits[1].session_id, "june");

    // Case-sensitive substring match.
    let hits = search_conversations(&store, "Async Retry", None, None, 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn conversation_skip_unchanged_and_prune() {
    let (tmp, _config, store) = setup().await;
    let archive_dir = tmp.path().join("archives");
    std::fs::create_dir_all(&archive_dir).unwrap();

    write_archive(
        &archive_dir,
        "s1.jsonl",
        "s1",
        "2024-06-01T12:00:00Z",
        &[("q", "a")],
    );

    let source = ClaudeArchiveSource::from_dir(&archive_dir);
    let first = index_conversations(&store, &source, None).await.unwrap();
    assert_eq!(first.added, 1);

    let second = index_conversations(&store, &source, None).await.unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 1);

    std::fs::remove_file(archive_dir.join("s1.jsonl")).unwrap();
    let third = index_conversations(&store, &source, None).await.unwrap();
    assert_eq!(third.deleted, 1);

    assert!(store.get_conversation("claude:s1").await.unwrap().is_none());
    assert_eq!(count(&store, "SELECT COUNT(*) FROM exchanges").await, 0);
}

#[tokio::test]
async fn conversation_parse_error_does_not_halt_run() {
    let (tmp, _config, store) = setup().await;
    let archive_dir = tmp.path().join("archives");
    std::fs::create_dir_all(&archive_dir).unwrap();

    // No session.start record: a parse error for this artifact only.
    std::fs::write(
        archive_dir.join("broken.jsonl"),
        r#"{"type":"user.message","content":"orphan"}"#,
    )
    .unwrap();
    write_archive(
        &archive_dir,
        "good.jsonl",
        "good",
        "2024-06-01T12:00:00Z",
        &[("q", "a")],
    );

    let source = ClaudeArchiveSource::from_dir(&archive_dir);
    let summary = index_conversations(&store, &source, None).await.unwrap();

    assert_eq!(summary.added, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(store.get_conversation("claude:good").await.unwrap().is_some());
}

// ── Foreign-database source ──────────────────────────────────────────────

async fn seed_foreign_db(path: &PathBuf) {
    use sqlx::sqlite::SqliteConnectOptions;
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query("CREATE TABLE session (id TEXT PRIMARY KEY, data TEXT NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE message (id TEXT PRIMARY KEY, session_id TEXT NOT NULL, data TEXT NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE part (id TEXT PRIMARY KEY, message_id TEXT NOT NULL, data TEXT NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();

    sqlx::query("INSERT INTO session (id, data) VALUES (?, ?)")
        .bind("sess1")
        .bind(r#"{"id":"sess1","version":"0.4.2","directory":"/home/me/project","time":{"created":1717243200000}}"#)
        .execute(&pool)
        .await
        .unwrap();

    let rows = [
        ("m1", r#"{"role":"user","time":{"created":1717243201000}}"#),
        ("m2", r#"{"role":"assistant","time":{"created":1717243202000}}"#),
        ("m3", r#"{"role":"user","time":{"created":1717243203000}}"#),
        ("m4", r#"{"role":"assistant","time":{"created":1717243204000}}"#),
    ];
    for (id, data) in rows {
        sqlx::query("INSERT INTO message (id, session_id, data) VALUES (?, ?, ?)")
            .bind(id)
            .bind("sess1")
            .bind(data)
            .execute(&pool)
            .await
            .unwrap();
    }

    let parts = [
        ("p1", "m1", r#"{"type":"text","text":"what files changed?"}"#),
        ("p2", "m2", r#"{"type":"tool-call","tool":"git_diff"}"#),
        ("p3", "m3", r#"{"type":"text","text":"summarize them"}"#),
        ("p4", "m4", r#"{"type":"text","text":"Two files changed: "}"#),
        ("p5", "m4", r#"{"type":"text","text":"lib.rs and main.rs."}"#),
    ];
    for (id, message_id, data) in parts {
        sqlx::query("INSERT INTO part (id, message_id, data) VALUES (?, ?, ?)")
            .bind(id)
            .bind(message_id)
            .bind(data)
            .execute(&pool)
            .await
            .unwrap();
    }

    pool.close().await;
}

#[tokio::test]
async fn opencode_source_parses_sessions() {
    let (tmp, _config, store) = setup().await;
    let foreign = tmp.path().join("opencode.sqlite");
    seed_foreign_db(&foreign).await;

    let source = OpencodeSource::from_path(&foreign);
    let summary = index_conversations(&store, &source, None).await.unwrap();

    assert_eq!(summary.added, 1);
    assert_eq!(summary.exchanges, 2);

    let conversation = store
        .get_conversation("opencode:sess1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.session_id, "sess1");
    assert_eq!(conversation.archive_path, "sess1");
    assert_eq!(conversation.client_version.as_deref(), Some("0.4.2"));
    assert_eq!(conversation.cwd.as_deref(), Some("/home/me/project"));
    assert_eq!(conversation.timestamp, "2024-06-01T12:00:00Z");

    let exchanges = store.get_exchanges("opencode:sess1").await.unwrap();
    assert_eq!(exchanges.len(), 2);

    // Tool-call-only assistant turn: valid exchange with empty assistant text.
    assert_eq!(exchanges[0].user_text, "what files changed?");
    assert_eq!(exchanges[0].assistant_text, "");
    assert_eq!(exchanges[0].tool_calls, vec!["git_diff"]);

    // Text parts concatenate in part order.
    assert_eq!(
        exchanges[1].assistant_text,
        "Two files changed: lib.rs and main.rs."
    );
}

#[tokio::test]
async fn reset_wipes_everything() {
    let (tmp, config, store) = setup().await;
    write_note(&tmp, "a.md", "some content");

    let notes_cfg = config.notes.as_ref().unwrap();
    index_notes(&store, notes_cfg, &config.chunking, None)
        .await
        .unwrap();

    let archive_dir = tmp.path().join("archives");
    std::fs::create_dir_all(&archive_dir).unwrap();
    write_archive(
        &archive_dir,
        "s1.jsonl",
        "s1",
        "2024-06-01T12:00:00Z",
        &[("q", "a")],
    );
    let source = ClaudeArchiveSource::from_dir(&archive_dir);
    index_conversations(&store, &source, None).await.unwrap();

    store.reset().await.unwrap();

    for table in ["files", "fragments", "fragments_fts", "conversations", "exchanges"] {
        let remaining = count(&store, &format!("SELECT COUNT(*) FROM {}", table)).await;
        assert_eq!(remaining, 0, "table {} not emptied", table);
    }
}
