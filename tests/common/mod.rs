//! Shared fakes for the end-to-end runner tests: a scripted LLM backend and
//! a handful of instrumented tools.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agentloop::core::{InMemoryStore, LlmBackend, LlmOptions, StructuredResponse, VecTraceSink};
use agentloop::error::{Error, Result};
use agentloop::tools::{CallContext, ErrorKind, Tool, ToolRegistry, ToolResult, ToolSpec};
use agentloop::{Collaborators, RunnerConfig};

/// One scripted backend reply: a JSON value or a transport failure.
pub enum Reply {
    Value(Value),
    Error,
}

/// LLM backend that pops pre-scripted replies in call order.
pub struct ScriptedLlm {
    replies: Mutex<Vec<Reply>>,
    pub calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(ScriptedLlm {
            replies: Mutex::new(replies),
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn complete_structured(
        &self,
        _prompt: &str,
        _schema: &Value,
        _options: &LlmOptions,
    ) -> Result<StructuredResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(Error::Llm("script exhausted".into()));
        }
        match replies.remove(0) {
            Reply::Value(value) => Ok(StructuredResponse {
                value,
                prompt_tokens: 50,
                completion_tokens: 50,
            }),
            Reply::Error => Err(Error::Llm("scripted transport failure".into())),
        }
    }
}

/// Reactive-planner reply proposing one tool call.
pub fn action_reply(tool: &str, args: Value) -> Reply {
    Reply::Value(json!({ "call": { "tool_name": tool, "args": args } }))
}

/// Reactive-planner reply proposing the finish sentinel.
pub fn finish_reply(summary: &str) -> Reply {
    action_reply("finish", json!({ "summary": summary }))
}

/// Reflector reply with the given status.
pub fn reflection_reply(status: &str, explanation: &str) -> Reply {
    Reply::Value(json!({ "status": status, "explanation": explanation }))
}

/// Tool that succeeds with empty output. Distinct args keep signatures apart.
pub struct NoOpTool {
    spec: ToolSpec,
}

impl NoOpTool {
    pub fn new() -> Self {
        NoOpTool {
            spec: ToolSpec::new("no_op", "does nothing", json!({"type": "object"})).idempotent(),
        }
    }
}

#[async_trait]
impl Tool for NoOpTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: Value, _ctx: &CallContext) -> ToolResult {
        ToolResult::success(json!({}))
    }
}

/// Fixed-content file reader.
pub struct StaticFileTool {
    spec: ToolSpec,
    content: String,
}

impl StaticFileTool {
    pub fn new(content: &str) -> Self {
        StaticFileTool {
            spec: ToolSpec::new(
                "file_read",
                "read a file",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            )
            .idempotent(),
            content: content.to_string(),
        }
    }
}

#[async_trait]
impl Tool for StaticFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: &CallContext) -> ToolResult {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        ToolResult::success(json!({ "path": path, "size": self.content.len() }))
    }
}

/// Tool that fails with `transient` a fixed number of times, then succeeds.
pub struct FlakyFetchTool {
    spec: ToolSpec,
    failures_before_success: u32,
    pub invocations: Arc<AtomicU32>,
}

impl FlakyFetchTool {
    pub fn new(failures_before_success: u32) -> Self {
        FlakyFetchTool {
            spec: ToolSpec::new(
                "flaky_fetch",
                "fetch a url, flakily",
                json!({
                    "type": "object",
                    "properties": { "url": { "type": "string" } },
                    "required": ["url"]
                }),
            )
            .idempotent()
            .retry_on([ErrorKind::Transient, ErrorKind::Timeout]),
            failures_before_success,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Tool for FlakyFetchTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: Value, _ctx: &CallContext) -> ToolResult {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ToolResult::failure(ErrorKind::Transient, "connection reset")
        } else {
            ToolResult::success(json!({ "body": "fetched" }))
        }
    }
}

/// Tool that raises the kill flag when it starts, then sleeps.
pub struct KillDuringCallTool {
    spec: ToolSpec,
    flag: Arc<AtomicBool>,
    sleep: Duration,
}

impl KillDuringCallTool {
    pub fn new(flag: Arc<AtomicBool>, sleep: Duration) -> Self {
        KillDuringCallTool {
            spec: ToolSpec::new("long_call", "raises the kill flag then sleeps", json!({"type": "object"})),
            flag,
            sleep,
        }
    }
}

#[async_trait]
impl Tool for KillDuringCallTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: Value, _ctx: &CallContext) -> ToolResult {
        self.flag.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.sleep).await;
        ToolResult::success(json!({ "slept_ms": self.sleep.as_millis() as u64 }))
    }
}

/// Install a test subscriber once so `RUST_LOG` surfaces runner logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with instant retries and tight limits, for fast deterministic tests.
pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        max_steps: 10,
        timeout: Duration::from_secs(30),
        tool_retry_backoff: Duration::ZERO,
        llm_retry_backoff: Duration::ZERO,
        cancellation_grace: Duration::from_millis(500),
        ..RunnerConfig::default()
    }
}

/// Registry with the finish sentinel plus the given tools.
pub fn registry(extra: Vec<Box<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(agentloop::tools::FinishTool::new()).unwrap();
    for tool in extra {
        registry.register_boxed(tool).unwrap();
    }
    Arc::new(registry)
}

/// Collaborators wired to a scripted LLM, an in-memory store, and a shared
/// in-memory trace sink. Returns the handles tests assert against.
pub fn collaborators(
    llm: Arc<ScriptedLlm>,
    tools: Arc<ToolRegistry>,
) -> (Collaborators, VecTraceSink, Arc<InMemoryStore>) {
    let sink = VecTraceSink::new();
    let store = Arc::new(InMemoryStore::new());
    let collab = Collaborators::new(llm, store.clone(), tools).with_trace(Box::new(sink.clone()));
    (collab, sink, store)
}
