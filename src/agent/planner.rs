//! Planner interface and shared planning helpers
//!
//! Two interchangeable strategies implement [`Planner`]: the reactive
//! single-step planner and the plan-first multi-step planner with repair.
//! Shared concerns (structured-output wire types, validation against the
//! tool registry, strategy auto-selection) live here as free functions and
//! are composed, not inherited.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::tools::{validate_args, ToolRegistry};

use super::state::AgentState;
use super::types::{Action, Condition, Plan, Step};

/// What a planner invocation yields: a plan to execute, or a terminal marker
/// declaring the goal already achieved.
#[derive(Debug, Clone)]
pub enum Proposal {
    /// Execute this plan next.
    Plan(Plan),
    /// The task is complete; stop with this summary.
    Finish { summary: String },
}

/// Chooses the next action(s) for the runner.
#[async_trait]
pub trait Planner: Send {
    /// Propose the next plan (or a terminal marker) for the current state.
    async fn propose(&mut self, state: &AgentState) -> Result<Proposal>;

    /// Repair after a failed step. The default strategy plans afresh.
    async fn repair(&mut self, state: &AgentState, _failed: &Step) -> Result<Proposal> {
        self.propose(state).await
    }

    /// Drop any retained planning state.
    fn reset(&mut self) {}
}

// ---------------------------------------------------------------------------
// Structured-output wire types
// ---------------------------------------------------------------------------

/// One proposed tool call inside a plan, as returned by the LLM.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlannedCall {
    /// Tool to invoke.
    pub tool_name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub args: Value,
    /// Predicates that must hold before dispatch.
    #[serde(default)]
    pub preconditions: Vec<Condition>,
    /// Predicates expected after success.
    #[serde(default)]
    pub postconditions: Vec<Condition>,
    /// Why this call.
    #[serde(default)]
    pub rationale: Option<String>,
}

impl From<PlannedCall> for Action {
    fn from(call: PlannedCall) -> Self {
        Action {
            tool_name: call.tool_name,
            args: call.args,
            preconditions: call.preconditions,
            postconditions: call.postconditions,
            rationale: call.rationale,
        }
    }
}

/// The reactive planner's reply: one call, or a completion marker.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NextActionReply {
    /// The proposed call; absent when `task_complete` is set.
    #[serde(default)]
    pub call: Option<PlannedCall>,
    /// The goal is already achieved; no call needed.
    #[serde(default)]
    pub task_complete: bool,
    /// Closing summary when `task_complete` is set.
    #[serde(default)]
    pub summary: Option<String>,
}

/// An alternative continuation attached to a plan position.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BranchReply {
    /// Plan index the branch replaces from.
    pub at: usize,
    /// The alternative continuation.
    pub steps: Vec<PlannedCall>,
}

/// The plan-first planner's reply: a full ordered plan.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlanReply {
    /// Ordered calls.
    pub steps: Vec<PlannedCall>,
    /// Optional alternative continuations keyed by position.
    #[serde(default)]
    pub alternatives: Vec<BranchReply>,
    /// The model's reasoning, kept for the trace.
    #[serde(default)]
    pub reasoning: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a proposed action against the registry: the tool must exist, its
/// args must satisfy the declared schema, and conditions must be well-formed.
pub fn validate_action(action: &Action, registry: &ToolRegistry) -> std::result::Result<(), String> {
    let spec = registry
        .spec_of(&action.tool_name)
        .ok_or_else(|| format!("unknown tool '{}'", action.tool_name))?;
    validate_args(&spec.arg_schema, &action.args)
        .map_err(|e| format!("args for '{}': {}", action.tool_name, e))?;
    for cond in action.preconditions.iter().chain(&action.postconditions) {
        if !cond.is_well_formed() {
            return Err(format!("malformed condition on '{}'", action.tool_name));
        }
    }
    Ok(())
}

/// Validate every action of a plan.
pub fn validate_plan(plan: &Plan, registry: &ToolRegistry) -> std::result::Result<(), String> {
    for action in plan
        .actions
        .iter()
        .chain(plan.branches.values().flatten())
    {
        validate_action(action, registry)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Strategy auto-selection
// ---------------------------------------------------------------------------

/// Which planner variant a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerStrategy {
    /// Single-step reactive planning.
    Reactive,
    /// Up-front multi-step planning with repair.
    PlanFirst,
}

const COORDINATION_WORDS: &[&str] = &["and", "then", "after"];
const PLANNING_VERBS: &[&str] = &["implement", "build", "create"];

/// Choose a strategy from the task text. Long, coordinated, or constructive
/// tasks favor plan-first; short exploratory tasks favor reactive. Chosen
/// once per run unless the planner is reset.
pub fn select_strategy(goal: &str) -> PlannerStrategy {
    let words: Vec<String> = goal
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .collect();

    if words.len() > 12 {
        return PlannerStrategy::PlanFirst;
    }
    if words
        .iter()
        .any(|w| COORDINATION_WORDS.contains(&w.as_str()))
    {
        return PlannerStrategy::PlanFirst;
    }
    if words.iter().any(|w| PLANNING_VERBS.contains(&w.as_str())) {
        return PlannerStrategy::PlanFirst;
    }
    PlannerStrategy::Reactive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::PlanOrigin;
    use crate::tools::FinishTool;
    use serde_json::json;

    fn registry_with_finish() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(FinishTool::new()).unwrap();
        registry
    }

    #[test]
    fn short_exploratory_goal_selects_reactive() {
        assert_eq!(select_strategy("check the weather"), PlannerStrategy::Reactive);
    }

    #[test]
    fn coordination_words_select_plan_first() {
        assert_eq!(
            select_strategy("open the report then email it"),
            PlannerStrategy::PlanFirst
        );
    }

    #[test]
    fn planning_verbs_select_plan_first() {
        assert_eq!(
            select_strategy("build a weekly digest"),
            PlannerStrategy::PlanFirst
        );
    }

    #[test]
    fn long_goals_select_plan_first() {
        let goal = "please go through every unread message in my inbox from this week \
                    sorted oldest first";
        assert_eq!(select_strategy(goal), PlannerStrategy::PlanFirst);
    }

    #[test]
    fn validate_action_rejects_unknown_tool() {
        let registry = registry_with_finish();
        let action = Action::new("do_magic", json!({}));
        assert!(validate_action(&action, &registry).is_err());
    }

    #[test]
    fn validate_action_rejects_bad_args() {
        let registry = registry_with_finish();
        let action = Action::new("finish", json!({"summary": 5}));
        assert!(validate_action(&action, &registry).is_err());
    }

    #[test]
    fn validate_plan_covers_branches() {
        let registry = registry_with_finish();
        let mut plan = Plan::single(
            PlanOrigin::PlanFirst,
            Action::new("finish", json!({"summary": "ok"})),
        );
        plan.branches
            .insert(0, vec![Action::new("do_magic", json!({}))]);
        assert!(validate_plan(&plan, &registry).is_err());
    }

    #[test]
    fn planned_call_converts_to_action() {
        let call = PlannedCall {
            tool_name: "finish".into(),
            args: json!({"summary": "done"}),
            preconditions: vec![],
            postconditions: vec![],
            rationale: Some("goal met".into()),
        };
        let action: Action = call.into();
        assert_eq!(action.tool_name, "finish");
        assert_eq!(action.rationale.as_deref(), Some("goal met"));
    }
}
