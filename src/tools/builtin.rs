//! Built-in tools the runner's contract presumes to exist
//!
//! `finish` is the sentinel that asks the runner to stop with `goal_achieved`.
//! `human_ask` relays a question to the user over an injected channel.
//! `memory_store` / `memory_search` are thin wrappers over the memory
//! collaborator so the planner can manage long-term memory explicitly.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::core::memory::{MemoryKind, MemoryStore};
use crate::error::Result;

use super::traits::{CallContext, ErrorKind, Tool, ToolResult, ToolSpec};

/// Name of the sentinel tool that ends a run with `goal_achieved`.
pub const FINISH_TOOL: &str = "finish";
/// Name of the optional tool that relays a question to the user.
pub const HUMAN_ASK_TOOL: &str = "human_ask";
/// Name of the memory write wrapper.
pub const MEMORY_STORE_TOOL: &str = "memory_store";
/// Name of the memory search wrapper.
pub const MEMORY_SEARCH_TOOL: &str = "memory_search";

/// Sentinel tool: signals goal completion with a closing summary.
pub struct FinishTool {
    spec: ToolSpec,
}

impl FinishTool {
    pub fn new() -> Self {
        FinishTool {
            spec: ToolSpec::new(
                FINISH_TOOL,
                "Declare the task complete. Call this exactly once, when the goal is achieved, \
                 with a short summary of the outcome.",
                json!({
                    "type": "object",
                    "properties": {
                        "summary": {
                            "type": "string",
                            "description": "One-paragraph summary of what was accomplished"
                        }
                    },
                    "required": ["summary"]
                }),
            )
            .idempotent(),
        }
    }
}

impl Default for FinishTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FinishTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: &CallContext) -> ToolResult {
        let summary = args
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        info!("Finish requested: {}", summary);
        ToolResult::success(json!({ "summary": summary }))
    }
}

/// Channel through which `human_ask` reaches the user.
#[async_trait]
pub trait AskChannel: Send + Sync {
    /// Pose a question and wait for the user's answer.
    async fn ask(&self, prompt: &str) -> Result<String>;
}

/// Tool that relays a question to the user and returns the answer.
///
/// Register it only when a channel exists and the configuration allows
/// asking (`allow_human_ask`).
pub struct HumanAskTool {
    spec: ToolSpec,
    channel: Arc<dyn AskChannel>,
}

impl HumanAskTool {
    pub fn new(channel: Arc<dyn AskChannel>) -> Self {
        HumanAskTool {
            spec: ToolSpec::new(
                HUMAN_ASK_TOOL,
                "Ask the user a clarifying question and wait for their answer. \
                 Use sparingly, only when genuinely blocked.",
                json!({
                    "type": "object",
                    "properties": {
                        "prompt": {
                            "type": "string",
                            "description": "The question to ask the user"
                        }
                    },
                    "required": ["prompt"]
                }),
            ),
            channel,
        }
    }
}

#[async_trait]
impl Tool for HumanAskTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: &CallContext) -> ToolResult {
        let prompt = match args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => {
                return ToolResult::failure_before_side_effect(
                    ErrorKind::InvalidArgs,
                    "missing 'prompt'",
                )
            }
        };
        match self.channel.ask(prompt).await {
            Ok(answer) => ToolResult::success(json!({ "answer": answer })),
            Err(e) => ToolResult::failure(ErrorKind::Transient, format!("ask failed: {}", e)),
        }
    }
}

/// Thin wrapper over the memory collaborator's `store` operation.
pub struct MemoryStoreTool {
    spec: ToolSpec,
    memory: Arc<dyn MemoryStore>,
}

impl MemoryStoreTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        MemoryStoreTool {
            spec: ToolSpec::new(
                MEMORY_STORE_TOOL,
                "Save a fact, procedure, or lesson to long-term memory for future runs.",
                json!({
                    "type": "object",
                    "properties": {
                        "kind": {
                            "type": "string",
                            "enum": ["experience", "procedure", "knowledge"],
                            "description": "Record kind. Default: knowledge"
                        },
                        "key": {
                            "type": "string",
                            "description": "Short key for the record"
                        },
                        "content": {
                            "type": "string",
                            "description": "The information to remember"
                        }
                    },
                    "required": ["key", "content"]
                }),
            ),
            memory,
        }
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: &CallContext) -> ToolResult {
        let key = args.get("key").and_then(|v| v.as_str()).unwrap_or_default();
        let content = match args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => {
                return ToolResult::failure_before_side_effect(
                    ErrorKind::InvalidArgs,
                    "missing 'content'",
                )
            }
        };
        let kind = match args.get("kind").and_then(|v| v.as_str()) {
            Some("experience") => MemoryKind::Experience,
            Some("procedure") => MemoryKind::Procedure,
            _ => MemoryKind::Knowledge,
        };
        match self.memory.store(kind, key, content).await {
            Ok(id) => ToolResult::success(json!({ "id": id })),
            Err(e) => ToolResult::failure(ErrorKind::Transient, format!("store failed: {}", e)),
        }
    }
}

/// Thin wrapper over the memory collaborator's `search` operation.
pub struct MemorySearchTool {
    spec: ToolSpec,
    memory: Arc<dyn MemoryStore>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        MemorySearchTool {
            spec: ToolSpec::new(
                MEMORY_SEARCH_TOOL,
                "Search long-term memory for records relevant to a query.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What to look for"
                        },
                        "k": {
                            "type": "integer",
                            "description": "Maximum records to return. Default: 5"
                        }
                    },
                    "required": ["query"]
                }),
            )
            .idempotent()
            .retry_on([ErrorKind::Transient]),
            memory,
        }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: &CallContext) -> ToolResult {
        let query = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q,
            None => {
                return ToolResult::failure_before_side_effect(
                    ErrorKind::InvalidArgs,
                    "missing 'query'",
                )
            }
        };
        let k = args.get("k").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        match self.memory.search(query, k).await {
            Ok(records) => {
                let rendered: Vec<Value> = records
                    .iter()
                    .map(|r| json!({"kind": r.kind, "key": r.key, "content": r.content, "score": r.score}))
                    .collect();
                ToolResult::success(json!({ "records": rendered }))
            }
            Err(e) => ToolResult::failure(ErrorKind::Transient, format!("search failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::InMemoryStore;

    #[tokio::test]
    async fn finish_echoes_summary() {
        let tool = FinishTool::new();
        let out = tool
            .execute(json!({"summary": "done"}), &CallContext::default())
            .await;
        assert!(out.success);
        assert_eq!(out.output["summary"], "done");
    }

    #[tokio::test]
    async fn memory_tools_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let save = MemoryStoreTool::new(store.clone());
        let search = MemorySearchTool::new(store.clone());

        let out = save
            .execute(
                json!({"kind": "procedure", "key": "deploy", "content": "run the release script"}),
                &CallContext::default(),
            )
            .await;
        assert!(out.success);

        let out = search
            .execute(json!({"query": "release script"}), &CallContext::default())
            .await;
        assert!(out.success);
        let records = out.output["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["key"], "deploy");
    }

    #[tokio::test]
    async fn memory_store_requires_content() {
        let store = Arc::new(InMemoryStore::new());
        let save = MemoryStoreTool::new(store);
        let out = save
            .execute(json!({"key": "x"}), &CallContext::default())
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::InvalidArgs));
    }
}
