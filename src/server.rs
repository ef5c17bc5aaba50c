//! MCP stdio server.
//!
//! Exposes the engine to MCP clients over standard input/output using the
//! JSON-RPC protocol. Three tools are served:
//!
//! | Tool | Description |
//! |------|-------------|
//! | `search_kb` | Hybrid (keyword + semantic) search over note fragments |
//! | `search_conversations` | Substring + date-range search over exchanges |
//! | `show_conversation` | Render a conversation archive for reading |
//!
//! An unknown tool name is rejected with a JSON-RPC method-not-found error.
//! Diagnostics go to stderr; stdout belongs to the protocol.
//!
//! # Client Integration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "context-cache": {
//!       "command": "ctxc",
//!       "args": ["--config", "/path/to/ctxc.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rmcp::model::*;
use rmcp::transport::stdio;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::convsearch;
use crate::db;
use crate::display::render_conversation;
use crate::embedding::{self, Embedder};
use crate::search;
use crate::store::Store;

/// Serves the engine's tools over stdio until the client disconnects.
#[derive(Clone)]
pub struct ContextCacheServer {
    config: Arc<Config>,
    /// The embedding model is heavyweight; it is initialized on first use
    /// and retained for the lifetime of the server.
    embedder: Arc<OnceCell<Option<Arc<dyn Embedder>>>>,
}

impl ContextCacheServer {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            embedder: Arc::new(OnceCell::new()),
        }
    }

    async fn embedder(&self) -> Result<Option<Arc<dyn Embedder>>> {
        let embedder = self
            .embedder
            .get_or_try_init(|| async {
                embedding::create_embedder(&self.config.embedding)
                    .map(|opt| opt.map(Arc::from))
            })
            .await?;
        Ok(embedder.clone())
    }

    async fn open_store(&self) -> Result<Store> {
        let pool = db::open_existing(&self.config).await?;
        Ok(Store::new(pool))
    }

    fn tool_descriptors() -> Vec<Tool> {
        vec![
            make_tool(
                "search_kb",
                "Hybrid keyword + semantic search over the indexed knowledge base. \
                 Returns fragments with their source path, position, and display score.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search query" },
                        "limit": { "type": "integer", "description": "Maximum results (default 10)" }
                    },
                    "required": ["query"]
                }),
            ),
            make_tool(
                "search_conversations",
                "Search past agent conversations by substring, optionally bounded by \
                 ISO-8601 timestamps. Returns matching exchanges, newest conversation first.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Substring to match" },
                        "limit": { "type": "integer", "description": "Maximum results (default 10)" },
                        "after": { "type": "string", "description": "Inclusive lower timestamp bound (ISO-8601)" },
                        "before": { "type": "string", "description": "Inclusive upper timestamp bound (ISO-8601)" },
                        "format": { "type": "string", "enum": ["markdown", "json"], "description": "Output format (default markdown)" }
                    },
                    "required": ["query"]
                }),
            ),
            make_tool(
                "show_conversation",
                "Render a conversation archive file as readable text, optionally \
                 restricted to a 1-indexed inclusive exchange range.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Path to the .jsonl archive" },
                        "start_exchange": { "type": "integer", "description": "First exchange to show (1-indexed)" },
                        "end_exchange": { "type": "integer", "description": "Last exchange to show (1-indexed)" }
                    },
                    "required": ["path"]
                }),
            ),
        ]
    }

    async fn run_search_kb(&self, params: SearchKbParams) -> Result<String> {
        let embedder = self
            .embedder()
            .await?
            .ok_or_else(|| anyhow::anyhow!("search_kb requires an embedding provider; set [embedding] in config"))?;

        let store = self.open_store().await?;
        let query_vec = embedding::embed_query(embedder.as_ref(), &params.query).await?;
        let limit = params.limit.unwrap_or(self.config.retrieval.final_limit);

        let hits = search::hybrid_search(
            &store,
            &params.query,
            &query_vec,
            limit,
            self.config.retrieval.rrf_k,
        )
        .await?;

        store.pool().close().await;
        Ok(serde_json::to_string_pretty(&hits)?)
    }

    async fn run_search_conversations(&self, params: SearchConversationsParams) -> Result<String> {
        let store = self.open_store().await?;
        let limit = params.limit.unwrap_or(self.config.retrieval.final_limit);

        let hits = convsearch::search_conversations(
            &store,
            &params.query,
            params.after.as_deref(),
            params.before.as_deref(),
            limit,
        )
        .await?;

        store.pool().close().await;

        match params.format.as_deref() {
            Some("json") => convsearch::format_json(&hits),
            _ => Ok(convsearch::format_markdown(&hits)),
        }
    }

    fn run_show_conversation(&self, params: ShowConversationParams) -> Result<String> {
        render_conversation(
            Path::new(&params.path),
            params.start_exchange,
            params.end_exchange,
        )
    }
}

#[derive(Deserialize)]
struct SearchKbParams {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct SearchConversationsParams {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    before: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Deserialize)]
struct ShowConversationParams {
    path: String,
    #[serde(default)]
    start_exchange: Option<usize>,
    #[serde(default)]
    end_exchange: Option<usize>,
}

fn make_tool(name: &str, description: &str, schema: serde_json::Value) -> Tool {
    let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };

    Tool {
        name: Cow::Owned(name.to_string()),
        title: None,
        description: Some(Cow::Owned(description.to_string())),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(true)),
        icons: None,
    }
}

impl ServerHandler for ContextCacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "context-cache".to_string(),
                title: Some("Context Cache".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Context Cache — personal memory for AI coding agents. Use search_kb \
                 to find relevant notes, search_conversations to recall past agent \
                 sessions, and show_conversation to read a session archive in full."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(
            Self::tool_descriptors(),
        )))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let result = match request.name.as_ref() {
            "search_kb" => match serde_json::from_value::<SearchKbParams>(params) {
                Ok(p) => self.run_search_kb(p).await,
                Err(e) => Err(e.into()),
            },
            "search_conversations" => {
                match serde_json::from_value::<SearchConversationsParams>(params) {
                    Ok(p) => self.run_search_conversations(p).await,
                    Err(e) => Err(e.into()),
                }
            }
            "show_conversation" => match serde_json::from_value::<ShowConversationParams>(params) {
                Ok(p) => self.run_show_conversation(p),
                Err(e) => Err(e.into()),
            },
            other => {
                return Err(McpError::new(
                    ErrorCode::METHOD_NOT_FOUND,
                    format!("no tool registered with name: {}", other),
                    None,
                ));
            }
        };

        match result {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

/// Start the MCP server on stdio and run until the client disconnects.
pub async fn run_server(config: &Config) -> Result<()> {
    let handler = ContextCacheServer::new(Arc::new(config.clone()));

    eprintln!("Context Cache MCP server listening on stdio");

    let service = handler.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
