//! # Context Cache
//!
//! **A personal memory engine for AI coding agents.**
//!
//! Context Cache ingests two heterogeneous corpora — a tree of Markdown notes
//! and past agent conversations captured from multiple upstream tools — and
//! serves hybrid keyword + semantic search over both through a CLI and an
//! MCP stdio server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌───────────┐
//! │ Notes (.md)  │──▶│   Reconcile     │──▶│  SQLite   │
//! │ Conversations│   │ Fragment+Embed │   │ FTS5+Vec  │
//! └──────────────┘   └────────────────┘   └────┬──────┘
//!                                              │
//!                          ┌───────────────────┤
//!                          ▼                   ▼
//!                     ┌──────────┐       ┌──────────┐
//!                     │   CLI    │       │   MCP    │
//!                     │  (ctxc)  │       │ (stdio)  │
//!                     └──────────┘       └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **note indexer** ([`notes`]) walks the Markdown tree, fingerprints
//!    each file ([`hash`]), and reconciles the store against disk: unchanged
//!    files are skipped, changed files are re-fragmented and re-embedded,
//!    deleted files are pruned.
//! 2. The **conversation indexer** ([`convo`]) performs the same
//!    reconciliation for conversation sources ([`convo::claude`],
//!    [`convo::opencode`]).
//! 3. Text is split into overlapping character-window fragments
//!    ([`fragment`]), embedded ([`embedding`]), and written transactionally
//!    ([`store`]).
//! 4. Retrieval runs BM25 over the FTS5 shadow table and cosine similarity
//!    over stored vectors, fused with Reciprocal Rank Fusion ([`fusion`],
//!    [`search`]).
//! 5. Conversation recall is substring + date-range search ([`convsearch`]);
//!    [`display`] renders a raw archive file for reading.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite pool construction (WAL, foreign keys) |
//! | [`migrate`] | Idempotent schema creation and column migrations |
//! | [`models`] | Core data types: files, fragments, conversations, exchanges |
//! | [`store`] | Transactional CRUD over the engine schema |
//! | [`fragment`] | Overlapping character-window fragmenter |
//! | [`hash`] | Content fingerprints for change detection |
//! | [`embedding`] | Embedder trait, local provider, vector utilities |
//! | [`notes`] | Markdown tree reconciliation |
//! | [`convo`] | Conversation source trait + reconciliation |
//! | [`fusion`] | Reciprocal Rank Fusion |
//! | [`search`] | Lexical, vector, and hybrid fragment search |
//! | [`convsearch`] | Substring + date-range search over exchanges |
//! | [`display`] | Render a conversation archive for reading |
//! | [`stats`] | Store statistics and reset |
//! | [`server`] | MCP stdio server (rmcp) |

pub mod config;
pub mod convo;
pub mod convsearch;
pub mod db;
pub mod display;
pub mod embedding;
pub mod fragment;
pub mod fusion;
pub mod hash;
pub mod migrate;
pub mod models;
pub mod notes;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
