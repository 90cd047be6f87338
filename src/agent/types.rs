//! Type definitions for the agent core
//!
//! The data model of a run: the task, the observations the agent accumulates,
//! the actions the planner proposes, the plans that order them, the steps the
//! runner records, and the reflections that classify each outcome.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::memory::MemoryKind;
use crate::tools::{ToolRegistry, ToolResult};

/// The immutable goal of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Natural-language goal.
    pub goal: String,
    /// Optional structured context (key→value).
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl Task {
    /// Create a task from a goal string.
    pub fn new(goal: impl Into<String>) -> Self {
        Task {
            goal: goal.into(),
            context: HashMap::new(),
        }
    }

    /// Attach a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Where an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    User,
    Tool,
    Reflection,
    Memory,
    System,
}

/// A record of something the agent learned in one step. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Origin of the evidence.
    pub source: ObservationSource,
    /// Raw text of the evidence.
    pub raw: String,
    /// Short extracted facts, used for retrieval keys and state fingerprints.
    #[serde(default)]
    pub salient_facts: Vec<String>,
    /// Monotonically increasing sequence number within the run.
    pub seq: u64,
    /// Wall-clock time of recording.
    pub timestamp: DateTime<Utc>,
}

/// A predicate over the current state, declared on an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Some recent observation's raw text contains the given text.
    ObservationContains { text: String },
    /// Some recent salient fact contains the given text.
    FactRecorded { text: String },
    /// A tool with the given name is registered.
    ToolAvailable { name: String },
}

impl Condition {
    /// Whether the predicate is well-formed (non-empty operands).
    pub fn is_well_formed(&self) -> bool {
        match self {
            Condition::ObservationContains { text } | Condition::FactRecorded { text } => {
                !text.trim().is_empty()
            }
            Condition::ToolAvailable { name } => !name.trim().is_empty(),
        }
    }

    /// Evaluate the predicate against recent observations and the registry.
    pub fn evaluate(&self, recent: &[&Observation], tools: &ToolRegistry) -> bool {
        match self {
            Condition::ObservationContains { text } => {
                recent.iter().any(|o| o.raw.contains(text.as_str()))
            }
            Condition::FactRecorded { text } => recent
                .iter()
                .flat_map(|o| o.salient_facts.iter())
                .any(|f| f.contains(text.as_str())),
            Condition::ToolAvailable { name } => tools.contains(name),
        }
    }
}

/// A single proposed tool invocation. Produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Tool to invoke.
    pub tool_name: String,
    /// Arguments, typed per the tool's schema.
    pub args: Value,
    /// Predicates that must hold before dispatch.
    #[serde(default)]
    pub preconditions: Vec<Condition>,
    /// Predicates expected to hold after a successful call.
    #[serde(default)]
    pub postconditions: Vec<Condition>,
    /// Why the planner chose this action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Action {
    /// Create an action with no conditions.
    pub fn new(tool_name: impl Into<String>, args: Value) -> Self {
        Action {
            tool_name: tool_name.into(),
            args,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            rationale: None,
        }
    }

    /// Stable signature of `(tool_name, canonicalized args)` for loop detection.
    ///
    /// Argument canonicalization relies on object keys serializing in sorted
    /// order, so semantically equal argument maps hash identically.
    pub fn signature(&self) -> u64 {
        let canonical = serde_json::to_string(&self.args).unwrap_or_default();
        super::loop_guard::stable_hash(&format!("{}({})", self.tool_name, canonical))
    }
}

/// How a plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    /// Single-step reactive planning.
    React,
    /// Up-front multi-step planning with repair.
    PlanFirst,
}

/// An ordered, finite sequence of actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id; every replan mints a new one.
    pub id: Uuid,
    /// How the plan was produced.
    pub origin: PlanOrigin,
    /// The actions, in execution order.
    pub actions: Vec<Action>,
    /// Prepared alternative continuations, keyed by failing position.
    #[serde(default)]
    pub branches: HashMap<usize, Vec<Action>>,
    /// Index of the next action to execute. Never regresses; a replan
    /// produces a fresh plan instead.
    pub current_index: usize,
}

impl Plan {
    /// Create a plan from actions.
    pub fn new(origin: PlanOrigin, actions: Vec<Action>) -> Self {
        Plan {
            id: Uuid::new_v4(),
            origin,
            actions,
            branches: HashMap::new(),
            current_index: 0,
        }
    }

    /// Create a single-action plan.
    pub fn single(origin: PlanOrigin, action: Action) -> Self {
        Self::new(origin, vec![action])
    }

    /// The action at the current index, if any remain.
    pub fn current(&self) -> Option<&Action> {
        self.actions.get(self.current_index)
    }

    /// Advance past the current action.
    pub fn advance(&mut self) {
        self.current_index += 1;
    }

    /// Whether every action has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.actions.len()
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the plan holds no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Outcome classification of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionStatus {
    /// The action's intent was realized.
    Success,
    /// Largely succeeded; a localized follow-up is advised.
    MinorRepair,
    /// The step did not advance the goal; the plan's assumptions are suspect.
    Replan,
}

/// A write the reflector wants persisted to long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MemoryWriteRequest {
    /// Record kind.
    pub kind: MemoryKind,
    /// Key to store under.
    pub key: String,
    /// Content to store.
    pub content: String,
}

/// The reflector's verdict on one step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Reflection {
    /// Outcome classification.
    pub status: ReflectionStatus,
    /// Why the reflector reached this verdict.
    pub explanation: String,
    /// Advice for the planner's next proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hint: Option<String>,
    /// Failure classification, when the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    /// A short, self-contained lesson worth remembering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson: Option<String>,
    /// An explicit memory write the reflector requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_write: Option<MemoryWriteRequest>,
}

impl Reflection {
    /// A plain success verdict.
    pub fn success(explanation: impl Into<String>) -> Self {
        Reflection {
            status: ReflectionStatus::Success,
            explanation: explanation.into(),
            next_hint: None,
            failure_type: None,
            lesson: None,
            memory_write: None,
        }
    }

    /// A replan verdict with a failure classification.
    pub fn replan(explanation: impl Into<String>, failure_type: impl Into<String>) -> Self {
        Reflection {
            status: ReflectionStatus::Replan,
            explanation: explanation.into(),
            next_hint: None,
            failure_type: Some(failure_type.into()),
            lesson: None,
            memory_write: None,
        }
    }

    /// Whether the runner counts the step as successful.
    /// `minor_repair` counts as success; the hint flows to the planner.
    pub fn counts_as_success(&self) -> bool {
        matches!(
            self.status,
            ReflectionStatus::Success | ReflectionStatus::MinorRepair
        )
    }
}

/// One executed iteration, as recorded in the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Zero-based step index.
    pub index: u32,
    /// Plan the action was drawn from.
    pub plan_snapshot_id: Uuid,
    /// The executed action.
    pub action: Action,
    /// The tool's result after retries.
    pub tool_result: ToolResult,
    /// Sequence number of the observation produced by this step.
    pub observation_id: u64,
    /// The reflector's verdict.
    pub reflection: Reflection,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When reflection completed.
    pub ended_at: DateTime<Utc>,
    /// Tool retries beyond the first invocation.
    pub retries: u32,
}

/// Why a run terminated. Exactly one is recorded per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    GoalAchieved,
    MaxSteps,
    Timeout,
    BudgetExceeded,
    LoopDetected,
    NoStateChange,
    NoProgress,
    KillSwitch,
    UnsafeActionBlocked,
    LlmFailure,
    UnrecoverableToolFailure,
}

impl StopReason {
    /// Whether the reason represents goal completion.
    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::GoalAchieved)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::GoalAchieved => "goal_achieved",
            StopReason::MaxSteps => "max_steps",
            StopReason::Timeout => "timeout",
            StopReason::BudgetExceeded => "budget_exceeded",
            StopReason::LoopDetected => "loop_detected",
            StopReason::NoStateChange => "no_state_change",
            StopReason::NoProgress => "no_progress",
            StopReason::KillSwitch => "kill_switch",
            StopReason::UnsafeActionBlocked => "unsafe_action_blocked",
            StopReason::LlmFailure => "llm_failure",
            StopReason::UnrecoverableToolFailure => "unrecoverable_tool_failure",
        };
        write!(f, "{}", s)
    }
}

/// The outcome of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether the goal was achieved.
    pub success: bool,
    /// The single recorded stop reason.
    pub stop_reason: StopReason,
    /// Steps executed.
    pub steps: u32,
    /// Total wall-clock duration.
    pub duration_seconds: f64,
    /// Closing summary, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_summary: Option<String>,
    /// Id of the trace this run wrote.
    pub trace_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_signature_is_stable_across_key_order() {
        let a = Action::new("click", json!({"x": 1, "y": 2}));
        let b = Action::new("click", json!({"y": 2, "x": 1}));
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn action_signature_differs_by_args() {
        let a = Action::new("click", json!({"x": 1}));
        let b = Action::new("click", json!({"x": 2}));
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn plan_advances_and_exhausts() {
        let mut plan = Plan::new(
            PlanOrigin::PlanFirst,
            vec![Action::new("a", json!({})), Action::new("b", json!({}))],
        );
        assert_eq!(plan.current().unwrap().tool_name, "a");
        plan.advance();
        assert_eq!(plan.current().unwrap().tool_name, "b");
        plan.advance();
        assert!(plan.is_exhausted());
        assert!(plan.current().is_none());
    }

    #[test]
    fn condition_well_formedness() {
        assert!(Condition::ToolAvailable { name: "finish".into() }.is_well_formed());
        assert!(!Condition::FactRecorded { text: "  ".into() }.is_well_formed());
    }

    #[test]
    fn condition_evaluation_over_observations() {
        let obs = Observation {
            source: ObservationSource::Tool,
            raw: "the dialog was dismissed".into(),
            salient_facts: vec!["dialog: dismissed".into()],
            seq: 1,
            timestamp: Utc::now(),
        };
        let recent = vec![&obs];
        let tools = ToolRegistry::new();
        assert!(Condition::ObservationContains { text: "dismissed".into() }.evaluate(&recent, &tools));
        assert!(Condition::FactRecorded { text: "dialog".into() }.evaluate(&recent, &tools));
        assert!(!Condition::ToolAvailable { name: "finish".into() }.evaluate(&recent, &tools));
    }

    #[test]
    fn minor_repair_counts_as_success() {
        let mut r = Reflection::success("ok");
        r.status = ReflectionStatus::MinorRepair;
        assert!(r.counts_as_success());
        assert!(!Reflection::replan("failed", "unknown_tool").counts_as_success());
    }

    #[test]
    fn stop_reason_serde_names() {
        assert_eq!(
            serde_json::to_string(&StopReason::LoopDetected).unwrap(),
            "\"loop_detected\""
        );
        assert!(StopReason::GoalAchieved.is_success());
        assert!(!StopReason::NoProgress.is_success());
    }
}
