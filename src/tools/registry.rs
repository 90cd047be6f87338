//! Tool registry - resolution, validation, approval, and retry-wrapped dispatch
//!
//! The registry is an explicit collaborator handed to the runner, never a
//! process-wide singleton. Registration happens once at startup; registering
//! the same name twice is an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use backoff::backoff::Backoff;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::schema::validate_args;
use super::traits::{
    ApprovalHandler, CallContext, ErrorKind, Tool, ToolCall, ToolResult, ToolSpec,
};

/// Retry policy applied by dispatch, owned by the runner's configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra invocations allowed after the first.
    pub max_retries: u32,
    /// Initial backoff delay; doubles per attempt.
    pub initial_backoff: Duration,
}

/// The result of a dispatch plus how many times the tool actually ran.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Final tool result after any retries.
    pub result: ToolResult,
    /// Number of tool invocations performed (0 when rejected before execution).
    pub attempts: u32,
}

impl DispatchOutcome {
    fn rejected(result: ToolResult) -> Self {
        DispatchOutcome { result, attempts: 0 }
    }

    /// Retries beyond the first invocation.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    approval: Option<Arc<dyn ApprovalHandler>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Double-registration is an error.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<()> {
        let name = tool.spec().name.clone();
        if self.tools.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Register an already-boxed tool.
    pub fn register_boxed(&mut self, tool: Box<dyn Tool>) -> Result<()> {
        let name = tool.spec().name.clone();
        if self.tools.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        self.tools.insert(name, Arc::from(tool));
        Ok(())
    }

    /// Attach a channel for requesting human approval of gated tools.
    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get tool count.
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// The declared spec of a tool, if registered.
    pub fn spec_of(&self, name: &str) -> Option<ToolSpec> {
        self.tools.get(name).map(|t| t.spec().clone())
    }

    /// One line per tool, for planner prompts.
    pub fn render_catalog(&self) -> String {
        let mut names: Vec<&str> = self.names();
        names.sort_unstable();
        names
            .iter()
            .filter_map(|n| self.tools.get(*n))
            .map(|t| {
                let spec = t.spec();
                format!(
                    "- {}: {} (args schema: {})",
                    spec.name, spec.description, spec.arg_schema
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute a tool call under the dispatch contract:
    /// resolve, validate, gate on approval, run with the tool's declared timeout,
    /// and retry transient failures per the policy and the tool's declared
    /// retryable kinds and idempotency.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        ctx: &CallContext,
        retry: &RetryPolicy,
    ) -> DispatchOutcome {
        let tool = match self.get(&call.name) {
            Some(t) => t,
            None => {
                warn!("Dispatch of unknown tool '{}'", call.name);
                return DispatchOutcome::rejected(ToolResult::failure_before_side_effect(
                    ErrorKind::UnknownTool,
                    format!("no tool registered under '{}'", call.name),
                ));
            }
        };
        let spec = tool.spec().clone();

        if let Err(reason) = validate_args(&spec.arg_schema, &call.args) {
            return DispatchOutcome::rejected(ToolResult::failure_before_side_effect(
                ErrorKind::InvalidArgs,
                reason,
            ));
        }

        if spec.requires_approval && !ctx.is_approved(&spec.name) {
            let granted = match &self.approval {
                Some(handler) => handler
                    .request_approval(&spec.name, &call.args)
                    .await
                    .unwrap_or(false),
                None => false,
            };
            if !granted {
                return DispatchOutcome::rejected(ToolResult::failure_before_side_effect(
                    ErrorKind::ApprovalRequired,
                    format!("tool '{}' requires approval and none was granted", spec.name),
                ));
            }
        }

        let mut delays = backoff::ExponentialBackoff {
            initial_interval: retry.initial_backoff,
            current_interval: retry.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let started = Instant::now();
            let result = match tokio::time::timeout(spec.timeout, tool.execute(call.args.clone(), ctx)).await
            {
                Ok(result) => result,
                Err(_) => ToolResult::failure(
                    ErrorKind::Timeout,
                    format!("tool '{}' exceeded {:?}", spec.name, spec.timeout),
                ),
            };
            let result = result.with_duration(started.elapsed().as_millis() as u64);

            if result.success {
                debug!("Tool {} succeeded on attempt {}", spec.name, attempts);
                return DispatchOutcome { result, attempts };
            }

            let kind = result.error_kind.unwrap_or(ErrorKind::Unrecoverable);
            let retryable = spec.retryable_error_kinds.contains(&kind)
                && !kind.is_deterministic()
                && (spec.idempotent || result.pre_side_effect);

            if !retryable || attempts > retry.max_retries {
                if attempts > 1 {
                    warn!(
                        "Tool {} failed with {} after {} attempts",
                        spec.name, kind, attempts
                    );
                }
                return DispatchOutcome { result, attempts };
            }

            let delay = delays.next_backoff().unwrap_or(retry.initial_backoff);
            info!(
                "Tool {} failed with {}, retrying in {:?} (attempt {}/{})",
                spec.name,
                kind,
                delay,
                attempts,
                retry.max_retries + 1
            );
            tokio::time::sleep(delay).await;
        }
    }
}
