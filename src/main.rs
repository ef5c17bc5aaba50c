//! # Context Cache CLI (`ctxc`)
//!
//! The `ctxc` binary is the primary interface for Context Cache. It provides
//! commands for database initialization, note and conversation ingestion,
//! search, conversation display, statistics, and starting the MCP server.
//!
//! ## Usage
//!
//! ```bash
//! ctxc --config ./config/ctxc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxc init` | Create the SQLite store and run schema migrations |
//! | `ctxc sync <source>` | Reconcile the store with notes, claude, opencode, or all |
//! | `ctxc search "<query>"` | Search indexed note fragments |
//! | `ctxc conversations "<query>"` | Search past agent conversations |
//! | `ctxc show <path>` | Render a conversation archive for reading |
//! | `ctxc stats` | Show store statistics |
//! | `ctxc reset` | Wipe every content table |
//! | `ctxc serve mcp` | Start the MCP stdio server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the store
//! ctxc init --config ./config/ctxc.toml
//!
//! # Index the notes tree
//! ctxc sync notes
//!
//! # Index conversations from every configured source
//! ctxc sync all
//!
//! # Hybrid search (keyword + semantic)
//! ctxc search "sqlite busy timeout"
//!
//! # Recall a past session
//! ctxc conversations "async retry" --after 2024-07-01
//!
//! # Start the MCP server for agent integration
//! ctxc serve mcp
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use context_cache::config::{self, Config};
use context_cache::convo::{self, claude::ClaudeArchiveSource, opencode::OpencodeSource};
use context_cache::db;
use context_cache::display::render_conversation;
use context_cache::embedding::{self, Embedder};
use context_cache::models::{ConversationIndexSummary, NoteIndexSummary};
use context_cache::notes;
use context_cache::search;
use context_cache::server;
use context_cache::stats;
use context_cache::store::Store;
use context_cache::{convsearch, migrate};

/// Context Cache CLI — a personal memory engine for AI coding agents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ctxc.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ctxc",
    about = "Context Cache — a personal memory engine for AI coding agents",
    version,
    long_about = "Context Cache ingests a tree of Markdown notes and past agent conversations, \
    keeps an incremental SQLite index of both, and serves hybrid keyword + semantic search \
    via a CLI and an MCP stdio server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ctxc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema.
    ///
    /// Creates the SQLite database file and all required tables (files,
    /// fragments, fragments_fts, conversations, exchanges). This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Reconcile the store with a source.
    ///
    /// Walks the source, fingerprints every artifact, and applies the
    /// skip-unchanged / replace-on-change / prune-on-deletion rules.
    /// Source format: `notes`, `claude`, `opencode`, or `all`.
    Sync {
        /// Source specifier: `notes`, `claude`, `opencode`, or `all`.
        source: String,
    },

    /// Search indexed note fragments.
    ///
    /// Queries the store using the selected mode and prints ranked results
    /// with display scores in [0, 1].
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `hybrid` (fused), `keyword` (FTS5 BM25), or
        /// `semantic` (cosine over embeddings). Hybrid and semantic require
        /// an embedding provider.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Search past agent conversations by substring.
    ///
    /// Matches either side of an exchange (case-sensitive) and optionally
    /// bounds the owning conversation's timestamp.
    Conversations {
        /// Substring to match against user and assistant text.
        query: String,

        /// Inclusive lower timestamp bound (ISO-8601).
        #[arg(long)]
        after: Option<String>,

        /// Inclusive upper timestamp bound (ISO-8601).
        #[arg(long)]
        before: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,

        /// Output format: `markdown` or `json`.
        #[arg(long, default_value = "markdown")]
        format: String,
    },

    /// Render a conversation archive for reading.
    ///
    /// Parses the raw archive file directly (not the store) so formatting
    /// the canonical record drops is preserved.
    Show {
        /// Path to the `.jsonl` conversation archive.
        path: PathBuf,

        /// First exchange to show (1-indexed, inclusive).
        #[arg(long)]
        start: Option<usize>,

        /// Last exchange to show (1-indexed, inclusive).
        #[arg(long)]
        end: Option<usize>,
    },

    /// Show store statistics.
    Stats,

    /// Wipe every content table and reclaim space.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Start the MCP stdio server.
    ///
    /// Exposes search_kb, search_conversations, and show_conversation as
    /// MCP tools for agent integration.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Serve MCP tools over stdio.
    Mcp,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Store initialized successfully.");
        }
        Commands::Sync { source } => {
            run_sync(&cfg, &source).await?;
        }
        Commands::Search { query, mode, limit } => {
            run_search(&cfg, &query, &mode, limit).await?;
        }
        Commands::Conversations {
            query,
            after,
            before,
            limit,
            format,
        } => {
            run_conversations(&cfg, &query, after, before, limit, &format).await?;
        }
        Commands::Show { path, start, end } => {
            print!("{}", render_conversation(&path, start, end)?);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Reset { yes } => {
            if !yes && !confirm_reset()? {
                println!("Aborted.");
                return Ok(());
            }
            stats::run_reset(&cfg).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}

fn confirm_reset() -> Result<bool> {
    print!("This deletes every indexed file, fragment, conversation, and exchange. Continue? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn run_sync(cfg: &Config, source: &str) -> Result<()> {
    match source {
        "notes" | "claude" | "opencode" | "all" => {}
        _ => bail!(
            "Unknown source: '{}'. Available: notes, claude, opencode, all",
            source
        ),
    }

    let pool = db::connect(cfg).await?;
    migrate::run_migrations_on(&pool).await?;
    let store = Store::new(pool.clone());

    let embedder = embedding::create_embedder(&cfg.embedding)?;
    let embedder_ref: Option<&dyn Embedder> = embedder.as_deref();

    if source == "notes" || source == "all" {
        match cfg.notes.as_ref() {
            Some(notes_cfg) => {
                let summary =
                    notes::index_notes(&store, notes_cfg, &cfg.chunking, embedder_ref).await?;
                print_note_summary(&summary);
            }
            None if source == "notes" => bail!("[notes] is not configured"),
            None => {}
        }
    }

    if source == "claude" || source == "all" {
        match cfg.sources.claude.as_ref() {
            Some(claude_cfg) => {
                let adapter = ClaudeArchiveSource::new(claude_cfg);
                let summary = convo::index_conversations(&store, &adapter, embedder_ref).await?;
                print_conversation_summary("claude", &summary);
            }
            None if source == "claude" => bail!("[sources.claude] is not configured"),
            None => {}
        }
    }

    if source == "opencode" || source == "all" {
        match cfg.sources.opencode.as_ref() {
            Some(opencode_cfg) => {
                let adapter = OpencodeSource::new(opencode_cfg);
                let summary = convo::index_conversations(&store, &adapter, embedder_ref).await?;
                print_conversation_summary("opencode", &summary);
            }
            None if source == "opencode" => bail!("[sources.opencode] is not configured"),
            None => {}
        }
    }

    pool.close().await;
    Ok(())
}

fn print_note_summary(summary: &NoteIndexSummary) {
    println!("sync notes");
    println!("  processed: {}", summary.processed);
    println!("  added:     {}", summary.added);
    println!("  updated:   {}", summary.updated);
    println!("  skipped:   {}", summary.skipped);
    println!("  deleted:   {}", summary.deleted);
    println!("  fragments: {}", summary.fragments);
    print_errors(&summary.errors);
    println!("ok");
}

fn print_conversation_summary(tag: &str, summary: &ConversationIndexSummary) {
    println!("sync {}", tag);
    println!("  processed: {}", summary.processed);
    println!("  added:     {}", summary.added);
    println!("  updated:   {}", summary.updated);
    println!("  skipped:   {}", summary.skipped);
    println!("  deleted:   {}", summary.deleted);
    println!("  exchanges: {}", summary.exchanges);
    print_errors(&summary.errors);
    println!("ok");
}

fn print_errors(errors: &[String]) {
    if !errors.is_empty() {
        println!("  errors:    {}", errors.len());
        for error in errors {
            eprintln!("    {}", error);
        }
    }
}

async fn run_search(cfg: &Config, query: &str, mode: &str, limit: Option<i64>) -> Result<()> {
    search::validate_mode(mode)?;

    if (mode == "hybrid" || mode == "semantic") && !cfg.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            mode
        );
    }

    let pool = db::open_existing(cfg).await?;
    let store = Store::new(pool.clone());
    let limit = limit.unwrap_or(cfg.retrieval.final_limit);

    let query_vec = if mode != "keyword" {
        let embedder = embedding::create_embedder(&cfg.embedding)?
            .ok_or_else(|| anyhow::anyhow!("Embedding provider is disabled"))?;
        Some(embedding::embed_query(embedder.as_ref(), query).await?)
    } else {
        None
    };

    let hits = match mode {
        "keyword" => search::keyword_search(&store, query, limit).await?,
        "semantic" => {
            search::semantic_search(&store, query_vec.as_deref().unwrap(), limit).await?
        }
        _ => {
            search::hybrid_search(
                &store,
                query,
                query_vec.as_deref().unwrap(),
                limit,
                cfg.retrieval.rrf_k,
            )
            .await?
        }
    };

    if hits.is_empty() {
        println!("No results.");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            println!(
                "{}. [{:.2}] {} #{}",
                i + 1,
                hit.score,
                hit.source_path,
                hit.position
            );
            println!("    {}", hit.text.replace('\n', " ").trim());
            println!();
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_conversations(
    cfg: &Config,
    query: &str,
    after: Option<String>,
    before: Option<String>,
    limit: Option<i64>,
    format: &str,
) -> Result<()> {
    match format {
        "markdown" | "json" => {}
        _ => bail!("Unknown format: '{}'. Use markdown or json.", format),
    }

    let pool = db::open_existing(cfg).await?;
    let store = Store::new(pool.clone());
    let limit = limit.unwrap_or(cfg.retrieval.final_limit);

    let hits = convsearch::search_conversations(
        &store,
        query,
        after.as_deref(),
        before.as_deref(),
        limit,
    )
    .await?;

    let rendered = match format {
        "json" => convsearch::format_json(&hits)?,
        _ => convsearch::format_markdown(&hits),
    };
    println!("{}", rendered);

    pool.close().await;
    Ok(())
}
