//! Core tool trait, specs, and result types
//!
//! Tools are the agent's only effectors. Each one declares a `ToolSpec`
//! (schema, danger/idempotency flags, retryable error kinds, timeout) and the
//! registry enforces the dispatch contract around it. Execution failures are
//! values (a `ToolResult` with an `ErrorKind`), never crate errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

/// Classification of a tool (or step) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network flake, rate limit, interrupted call. Retryable.
    Transient,
    /// Exceeded the per-call budget. Retryable if the tool is idempotent.
    Timeout,
    /// Arguments failed schema validation. Not retryable.
    InvalidArgs,
    /// No tool registered under that name. Not retryable.
    UnknownTool,
    /// State did not satisfy the action's declared precondition.
    PreconditionFailed,
    /// Tool reported success but a declared postcondition does not hold.
    PostconditionFailed,
    /// Dangerous tool lacked human approval.
    ApprovalRequired,
    /// A pre-execution safety check refused the action.
    SafetyBlocked,
    /// Planner/reflector/summarizer exhausted LLM retries.
    LlmFailure,
    /// Non-retryable tool error the planner cannot route around.
    Unrecoverable,
}

impl ErrorKind {
    /// Kinds that never warrant a dispatch retry regardless of tool spec.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, ErrorKind::Transient | ErrorKind::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidArgs => "invalid_args",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::PostconditionFailed => "postcondition_failed",
            ErrorKind::ApprovalRequired => "approval_required",
            ErrorKind::SafetyBlocked => "safety_blocked",
            ErrorKind::LlmFailure => "llm_failure",
            ErrorKind::Unrecoverable => "unrecoverable",
        };
        write!(f, "{}", s)
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution was successful.
    pub success: bool,
    /// Structured, tool-specific output.
    pub output: Value,
    /// Failure classification (for failed execution).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Wall-clock duration of the call.
    pub duration_ms: u64,
    /// Estimated cost of the call, in budget units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    /// The failure definitively occurred before any side effect, so a retry
    /// of a non-idempotent tool is safe.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pre_side_effect: bool,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(output: Value) -> Self {
        ToolResult {
            success: true,
            output,
            error_kind: None,
            error_detail: None,
            duration_ms: 0,
            cost_estimate: None,
            pre_side_effect: false,
        }
    }

    /// Create a failed result.
    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            output: Value::Null,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
            duration_ms: 0,
            cost_estimate: None,
            pre_side_effect: false,
        }
    }

    /// Create a failed result that is guaranteed pre-side-effect.
    pub fn failure_before_side_effect(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let mut result = Self::failure(kind, detail);
        result.pre_side_effect = true;
        result
    }

    /// Attach the measured duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Attach a cost estimate.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_estimate = Some(cost);
        self
    }

    /// Render the result as text for a prompt.
    pub fn render(&self) -> String {
        if self.success {
            match &self.output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        } else {
            format!(
                "error[{}]: {}",
                self.error_kind.map(|k| k.to_string()).unwrap_or_default(),
                self.error_detail.as_deref().unwrap_or("no detail")
            )
        }
    }
}

/// Declared contract of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name, unique within a registry.
    pub name: String,
    /// What the tool does, shown to the planner.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub arg_schema: Value,
    /// The tool can cause harm if misused.
    pub dangerous: bool,
    /// Calling the tool twice with the same args is equivalent to once.
    pub idempotent: bool,
    /// The tool needs human approval before execution.
    pub requires_approval: bool,
    /// Error kinds the dispatcher may retry for this tool.
    pub retryable_error_kinds: HashSet<ErrorKind>,
    /// Hard per-call timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl ToolSpec {
    /// Create a spec with conservative defaults: safe, non-idempotent,
    /// no approval, no retryable kinds, 30-second timeout.
    pub fn new(name: impl Into<String>, description: impl Into<String>, arg_schema: Value) -> Self {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            arg_schema,
            dangerous: false,
            idempotent: false,
            requires_approval: false,
            retryable_error_kinds: HashSet::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Mark the tool dangerous.
    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }

    /// Mark the tool idempotent.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Require human approval before execution.
    pub fn requires_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Declare error kinds the dispatcher may retry.
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_error_kinds.extend(kinds);
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A resolved tool invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Tool arguments as JSON.
    pub args: Value,
}

impl ToolCall {
    /// Create a call.
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        ToolCall {
            name: name.into(),
            args,
        }
    }
}

/// Per-run context threaded through every dispatch.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Run this call belongs to.
    pub run_id: Uuid,
    /// Tool names with a satisfied standing approval.
    pub approved: HashSet<String>,
}

impl CallContext {
    /// Create a context for a run.
    pub fn new(run_id: Uuid) -> Self {
        CallContext {
            run_id,
            approved: HashSet::new(),
        }
    }

    /// Record a standing approval for a tool.
    pub fn approve(&mut self, tool_name: impl Into<String>) {
        self.approved.insert(tool_name.into());
    }

    /// Whether the context carries a satisfied approval for a tool.
    pub fn is_approved(&self, tool_name: &str) -> bool {
        self.approved.contains(tool_name)
    }
}

/// A tool that the planner can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's declared contract.
    fn spec(&self) -> &ToolSpec;

    /// Execute the tool. Failures are returned as failed `ToolResult`s.
    async fn execute(&self, args: Value, ctx: &CallContext) -> ToolResult;
}

/// Channel through which a dispatch can request human approval.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Ask the human to approve a pending call. Returns whether it was granted.
    async fn request_approval(&self, tool_name: &str, args: &Value) -> crate::error::Result<bool>;
}

/// Verdict of a pre-execution safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// The action may proceed.
    Allow,
    /// The action is refused; the run terminates.
    Block(String),
}

/// Pre-execution safety check consulted before every dispatch.
pub trait SafetyPolicy: Send + Sync {
    /// Classify a pending call.
    fn check(&self, spec: &ToolSpec, args: &Value) -> SafetyVerdict;
}

/// Policy that allows everything. Dangerous tools are still gated by the
/// approval contract, which is enforced independently of safety.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicy;

impl SafetyPolicy for AllowAllPolicy {
    fn check(&self, _spec: &ToolSpec, _args: &Value) -> SafetyVerdict {
        SafetyVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_kind_determinism() {
        assert!(!ErrorKind::Transient.is_deterministic());
        assert!(!ErrorKind::Timeout.is_deterministic());
        assert!(ErrorKind::InvalidArgs.is_deterministic());
        assert!(ErrorKind::UnknownTool.is_deterministic());
    }

    #[test]
    fn tool_result_constructors() {
        let ok = ToolResult::success(json!({"size": 12}));
        assert!(ok.success);
        assert!(ok.error_kind.is_none());

        let fail = ToolResult::failure(ErrorKind::Transient, "socket reset");
        assert!(!fail.success);
        assert_eq!(fail.error_kind, Some(ErrorKind::Transient));
        assert!(!fail.pre_side_effect);

        let early = ToolResult::failure_before_side_effect(ErrorKind::Transient, "dns");
        assert!(early.pre_side_effect);
    }

    #[test]
    fn tool_result_render() {
        let ok = ToolResult::success(json!("plain text"));
        assert_eq!(ok.render(), "plain text");

        let fail = ToolResult::failure(ErrorKind::UnknownTool, "no such tool");
        assert!(fail.render().contains("unknown_tool"));
    }

    #[test]
    fn spec_builder_flags() {
        let spec = ToolSpec::new("fetch", "fetch a url", json!({"type": "object"}))
            .idempotent()
            .retry_on([ErrorKind::Transient, ErrorKind::Timeout])
            .with_timeout(Duration::from_secs(5));
        assert!(spec.idempotent);
        assert!(!spec.dangerous);
        assert!(spec.retryable_error_kinds.contains(&ErrorKind::Transient));
        assert_eq!(spec.timeout, Duration::from_secs(5));
    }

    #[test]
    fn error_kind_serde_names() {
        let kind: ErrorKind = serde_json::from_str("\"invalid_args\"").unwrap();
        assert_eq!(kind, ErrorKind::InvalidArgs);
        assert_eq!(
            serde_json::to_string(&ErrorKind::ApprovalRequired).unwrap(),
            "\"approval_required\""
        );
    }
}
