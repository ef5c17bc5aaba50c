//! Line-delimited JSONL conversation archives.
//!
//! One structured record per line. Recognized record kinds:
//!
//! | Kind | Payload |
//! |------|---------|
//! | `session.start` | session id, client version, start timestamp, cwd |
//! | `user.message` | `content` text, optional timestamp and parent id |
//! | `assistant.message` | `content` text, optional `tool_requests` list |
//! | `tool.call` / `tool.invoke` | a tool `name` |
//!
//! Any other record kind is ignored. A `session.start` record is required;
//! its absence is a parse error.
//!
//! Exchanges are built by alternation: each `user.message` opens a new
//! in-progress exchange; `assistant.message` records append to its assistant
//! text (joined with a newline when there are several); tool names from
//! assistant tool requests and `tool.*` records accumulate into the
//! exchange's tool list. An in-progress exchange is emitted only once it has
//! both non-empty user text and non-empty assistant text.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ClaudeSourceConfig;
use crate::models::{Conversation, NewExchange, ParsedConversation};

use super::ConversationSource;

pub const SOURCE_TAG: &str = "claude";

/// One line of a conversation archive.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ArchiveRecord {
    #[serde(rename = "session.start")]
    SessionStart {
        session_id: String,
        #[serde(default)]
        client_version: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    #[serde(rename = "user.message")]
    UserMessage {
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        parent_id: Option<String>,
    },
    #[serde(rename = "assistant.message")]
    AssistantMessage {
        content: String,
        #[serde(default)]
        tool_requests: Option<Vec<ToolRequest>>,
    },
    #[serde(rename = "tool.call")]
    ToolCall { name: String },
    #[serde(rename = "tool.invoke")]
    ToolInvoke { name: String },
    #[serde(other)]
    Other,
}

/// A tool request attached to an assistant message; carries either a `name`
/// or a `tool` field depending on the client version.
#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
}

impl ToolRequest {
    pub fn tool_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.tool.as_deref())
    }
}

/// Archive source rooted at a directory of `.jsonl` files.
pub struct ClaudeArchiveSource {
    archive_dir: PathBuf,
}

impl ClaudeArchiveSource {
    pub fn new(config: &ClaudeSourceConfig) -> Self {
        Self {
            archive_dir: config.archive_dir.clone(),
        }
    }

    pub fn from_dir(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }
}

#[async_trait]
impl ConversationSource for ClaudeArchiveSource {
    fn tag(&self) -> &'static str {
        SOURCE_TAG
    }

    async fn list_artifacts(&self) -> Result<Vec<String>> {
        if !self.archive_dir.exists() {
            bail!(
                "Archive directory does not exist: {}",
                self.archive_dir.display()
            );
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&self.archive_dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) == Some("jsonl") {
                artifacts.push(entry.path().to_string_lossy().to_string());
            }
        }

        artifacts.sort();
        Ok(artifacts)
    }

    async fn load(&self, artifact: &str) -> Result<ParsedConversation> {
        parse_archive(Path::new(artifact))
    }
}

/// Session metadata from the `session.start` record.
struct SessionMeta {
    session_id: String,
    client_version: Option<String>,
    timestamp: Option<String>,
    cwd: Option<String>,
}

/// An exchange being assembled while scanning the archive.
#[derive(Default)]
struct InProgress {
    user_text: String,
    assistant_text: String,
    tools: Vec<String>,
    timestamp: Option<String>,
    parent_id: Option<String>,
}

impl InProgress {
    fn is_complete(&self) -> bool {
        !self.user_text.trim().is_empty() && !self.assistant_text.trim().is_empty()
    }
}

/// Parse a conversation archive into a canonical conversation.
///
/// The content fingerprint on the returned conversation is left empty; the
/// reconciler computes and assigns it.
pub fn parse_archive(path: &Path) -> Result<ParsedConversation> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read archive: {}", path.display()))?;

    let mut meta: Option<SessionMeta> = None;
    let mut exchanges: Vec<NewExchange> = Vec::new();
    let mut current: Option<InProgress> = None;

    let flush = |current: &mut Option<InProgress>,
                     exchanges: &mut Vec<NewExchange>,
                     fallback_ts: &str| {
        if let Some(in_progress) = current.take() {
            if in_progress.is_complete() {
                exchanges.push(NewExchange {
                    position: exchanges.len() as i64,
                    timestamp: in_progress
                        .timestamp
                        .unwrap_or_else(|| fallback_ts.to_string()),
                    user_text: in_progress.user_text,
                    assistant_text: in_progress.assistant_text,
                    tool_calls: in_progress.tools,
                    parent_id: in_progress.parent_id,
                    embedding: None,
                });
            }
        }
    };

    for (line_number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record: ArchiveRecord = serde_json::from_str(line).with_context(|| {
            format!(
                "{}: invalid record on line {}",
                path.display(),
                line_number + 1
            )
        })?;

        let fallback_ts = meta
            .as_ref()
            .and_then(|m| m.timestamp.clone())
            .unwrap_or_default();

        match record {
            ArchiveRecord::SessionStart {
                session_id,
                client_version,
                timestamp,
                cwd,
            } => {
                if meta.is_none() {
                    meta = Some(SessionMeta {
                        session_id,
                        client_version,
                        timestamp,
                        cwd,
                    });
                }
            }
            ArchiveRecord::UserMessage {
                content,
                timestamp,
                parent_id,
            } => {
                flush(&mut current, &mut exchanges, &fallback_ts);
                current = Some(InProgress {
                    user_text: content,
                    timestamp,
                    parent_id,
                    ..Default::default()
                });
            }
            ArchiveRecord::AssistantMessage {
                content,
                tool_requests,
            } => {
                if let Some(in_progress) = current.as_mut() {
                    if !in_progress.assistant_text.is_empty() {
                        in_progress.assistant_text.push('\n');
                    }
                    in_progress.assistant_text.push_str(&content);

                    for request in tool_requests.unwrap_or_default() {
                        if let Some(name) = request.tool_name() {
                            in_progress.tools.push(name.to_string());
                        }
                    }
                }
            }
            ArchiveRecord::ToolCall { name } | ArchiveRecord::ToolInvoke { name } => {
                if let Some(in_progress) = current.as_mut() {
                    in_progress.tools.push(name);
                }
            }
            ArchiveRecord::Other => {}
        }
    }

    let fallback_ts = meta
        .as_ref()
        .and_then(|m| m.timestamp.clone())
        .unwrap_or_default();
    flush(&mut current, &mut exchanges, &fallback_ts);

    let meta = meta
        .ok_or_else(|| anyhow!("{}: missing session.start record", path.display()))?;

    let conversation = Conversation {
        id: format!("{}:{}", SOURCE_TAG, meta.session_id),
        source: SOURCE_TAG.to_string(),
        session_id: meta.session_id,
        timestamp: meta.timestamp.unwrap_or_default(),
        archive_path: path.to_string_lossy().to_string(),
        exchange_count: exchanges.len() as i64,
        content_hash: String::new(),
        client_version: meta.client_version,
        cwd: meta.cwd,
    };

    Ok(ParsedConversation {
        conversation,
        exchanges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_archive(lines: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_parse_basic_exchange() {
        let (_tmp, path) = write_archive(&[
            r#"{"type":"session.start","session_id":"s1","client_version":"1.2.0","timestamp":"2024-06-01T12:00:00Z"}"#,
            r#"{"type":"user.message","content":"How do I retry?"}"#,
            r#"{"type":"assistant.message","content":"Use exponential backoff."}"#,
        ]);

        let parsed = parse_archive(&path).unwrap();
        assert_eq!(parsed.conversation.id, "claude:s1");
        assert_eq!(parsed.conversation.session_id, "s1");
        assert_eq!(
            parsed.conversation.client_version.as_deref(),
            Some("1.2.0")
        );
        assert_eq!(parsed.exchanges.len(), 1);
        assert_eq!(parsed.exchanges[0].position, 0);
        assert_eq!(parsed.exchanges[0].user_text, "How do I retry?");
        assert_eq!(parsed.exchanges[0].assistant_text, "Use exponential backoff.");
    }

    #[test]
    fn test_missing_session_start_is_error() {
        let (_tmp, path) = write_archive(&[
            r#"{"type":"user.message","content":"hi"}"#,
            r#"{"type":"assistant.message","content":"hello"}"#,
        ]);
        let err = parse_archive(&path).unwrap_err();
        assert!(err.to_string().contains("session.start"));
    }

    #[test]
    fn test_multiple_assistant_messages_join_with_newline() {
        let (_tmp, path) = write_archive(&[
            r#"{"type":"session.start","session_id":"s1"}"#,
            r#"{"type":"user.message","content":"hi"}"#,
            r#"{"type":"assistant.message","content":"part one"}"#,
            r#"{"type":"assistant.message","content":"part two"}"#,
        ]);
        let parsed = parse_archive(&path).unwrap();
        assert_eq!(parsed.exchanges[0].assistant_text, "part one\npart two");
    }

    #[test]
    fn test_tool_names_accumulate() {
        let (_tmp, path) = write_archive(&[
            r#"{"type":"session.start","session_id":"s1"}"#,
            r#"{"type":"user.message","content":"run tests"}"#,
            r#"{"type":"assistant.message","content":"Running.","tool_requests":[{"name":"bash"},{"tool":"read_file"}]}"#,
            r#"{"type":"tool.call","name":"bash"}"#,
            r#"{"type":"tool.invoke","name":"grep"}"#,
        ]);
        let parsed = parse_archive(&path).unwrap();
        assert_eq!(
            parsed.exchanges[0].tool_calls,
            vec!["bash", "read_file", "bash", "grep"]
        );
    }

    #[test]
    fn test_incomplete_exchange_not_emitted() {
        let (_tmp, path) = write_archive(&[
            r#"{"type":"session.start","session_id":"s1"}"#,
            r#"{"type":"user.message","content":"unanswered"}"#,
            r#"{"type":"user.message","content":"answered"}"#,
            r#"{"type":"assistant.message","content":"yes"}"#,
        ]);
        let parsed = parse_archive(&path).unwrap();
        assert_eq!(parsed.exchanges.len(), 1);
        assert_eq!(parsed.exchanges[0].user_text, "answered");
    }

    #[test]
    fn test_unknown_record_kinds_ignored() {
        let (_tmp, path) = write_archive(&[
            r#"{"type":"session.start","session_id":"s1"}"#,
            r#"{"type":"telemetry.ping","payload":42}"#,
            r#"{"type":"user.message","content":"hi"}"#,
            r#"{"type":"assistant.message","content":"hello"}"#,
        ]);
        let parsed = parse_archive(&path).unwrap();
        assert_eq!(parsed.exchanges.len(), 1);
    }

    #[test]
    fn test_positions_contiguous_from_zero() {
        let (_tmp, path) = write_archive(&[
            r#"{"type":"session.start","session_id":"s1"}"#,
            r#"{"type":"user.message","content":"one"}"#,
            r#"{"type":"assistant.message","content":"first"}"#,
            r#"{"type":"user.message","content":"two"}"#,
            r#"{"type":"assistant.message","content":"second"}"#,
            r#"{"type":"user.message","content":"three"}"#,
            r#"{"type":"assistant.message","content":"third"}"#,
        ]);
        let parsed = parse_archive(&path).unwrap();
        let positions: Vec<i64> = parsed.exchanges.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(parsed.conversation.exchange_count, 3);
    }
}
