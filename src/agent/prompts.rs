//! Prompt assembly for the planner, reflector, and summarizer
//!
//! All prompts are built from the same rendered views of state: the goal and
//! its context, the rolling summary, recent observations, and recalled
//! memory. The structured-output contract is carried by the JSON Schema
//! passed alongside the prompt, so the text only states intent.

use crate::core::memory::MemoryRecord;
use crate::tools::ToolResult;

use super::state::AgentState;
use super::types::{Action, Observation, Plan};

/// How many recent observations are rendered into prompts.
const PROMPT_OBSERVATION_TAIL: usize = 8;

/// Prompt builder for constructing sectioned prompts.
#[derive(Default)]
pub struct PromptBuilder {
    parts: Vec<String>,
}

impl PromptBuilder {
    /// Create a new prompt builder.
    pub fn new() -> Self {
        PromptBuilder { parts: Vec::new() }
    }

    /// Add a section with a header.
    pub fn section(mut self, header: &str, content: &str) -> Self {
        if !content.trim().is_empty() {
            self.parts.push(format!("## {}\n{}", header, content));
        }
        self
    }

    /// Add raw text.
    pub fn text(mut self, text: &str) -> Self {
        self.parts.push(text.to_string());
        self
    }

    /// Build the final prompt.
    pub fn build(self) -> String {
        self.parts.join("\n\n")
    }
}

/// Render recent observations for a prompt, oldest first.
pub fn render_observations(observations: &[&Observation]) -> String {
    observations
        .iter()
        .map(|o| {
            let facts = if o.salient_facts.is_empty() {
                String::new()
            } else {
                format!(" [{}]", o.salient_facts.join("; "))
            };
            format!("#{} ({:?}): {}{}", o.seq, o.source, truncate(&o.raw, 400), facts)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render recalled memory records for a prompt.
pub fn render_memory(records: &[MemoryRecord]) -> String {
    records
        .iter()
        .map(|r| format!("- ({}) {}: {}", r.kind, r.key, truncate(&r.content, 300)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a plan's remaining actions.
pub fn render_plan_tail(plan: &Plan) -> String {
    plan.actions
        .get(plan.current_index..)
        .unwrap_or(&[])
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{}. {}({})", plan.current_index + i, a.tool_name, a.args))
        .collect::<Vec<_>>()
        .join("\n")
}

fn task_sections(builder: PromptBuilder, state: &AgentState) -> PromptBuilder {
    let context = state
        .task
        .context
        .iter()
        .map(|(k, v)| format!("- {}: {}", k, v))
        .collect::<Vec<_>>()
        .join("\n");
    builder
        .section("Goal", &state.task.goal)
        .section("Task context", &context)
        .section("Earlier progress (summarized)", &state.rolling_summary)
        .section(
            "Recent observations",
            &render_observations(&state.recent_observations(PROMPT_OBSERVATION_TAIL)),
        )
        .section("Relevant memory", &render_memory(&state.recalled))
}

/// Prompt for the reactive planner: propose exactly one next action.
pub fn next_action_prompt(state: &AgentState, catalog: &str, hint: Option<&str>) -> String {
    let mut builder = task_sections(PromptBuilder::new(), state)
        .section("Available tools", catalog);
    if let Some(hint) = hint {
        builder = builder.section("Hint from the last reflection", hint);
    }
    builder
        .text(
            "Propose the single next tool call that best advances the goal. \
             If the goal is already achieved, set task_complete to true and provide a summary \
             instead of a tool call. Respond ONLY with JSON matching the schema.",
        )
        .build()
}

/// Prompt for one plan-first candidate. `angle` differentiates candidates.
pub fn candidate_plan_prompt(state: &AgentState, catalog: &str, angle: usize) -> String {
    let strategy_note = match angle {
        0 => "Favor the most direct sequence of tool calls.",
        1 => "Favor a cautious sequence that verifies state before acting.",
        _ => "Favor a sequence that minimizes risky or irreversible calls.",
    };
    task_sections(PromptBuilder::new(), state)
        .section("Available tools", catalog)
        .section("Planning bias", strategy_note)
        .text(
            "Produce a complete ordered plan of tool calls that achieves the goal, ending with \
             the finish tool. Where a step is likely to fail, you may attach an alternative \
             continuation for that position. Respond ONLY with JSON matching the schema.",
        )
        .build()
}

/// Prompt asking for a minimal patch to the remaining plan after a failure.
pub fn patch_plan_prompt(
    state: &AgentState,
    plan: &Plan,
    failed_action: &Action,
    failure: &ToolResult,
) -> String {
    task_sections(PromptBuilder::new(), state)
        .section("Remaining plan", &render_plan_tail(plan))
        .section(
            "Failed step",
            &format!("{}({}) -> {}", failed_action.tool_name, failed_action.args, failure.render()),
        )
        .text(
            "The facts established by already-executed steps appear in the observations above; \
             treat them as true. Produce a minimal patched version of the remaining plan that \
             routes around the failure. Change as little as possible. \
             Respond ONLY with JSON matching the schema.",
        )
        .build()
}

/// Prompt regenerating the plan tail from the failing position.
pub fn regenerate_tail_prompt(state: &AgentState, failed_action: &Action, failure: &ToolResult) -> String {
    task_sections(PromptBuilder::new(), state)
        .section(
            "Failed step",
            &format!("{}({}) -> {}", failed_action.tool_name, failed_action.args, failure.render()),
        )
        .text(
            "The original plan is no longer viable from this point. Using the established facts \
             above, produce a fresh ordered plan for the remainder of the task, ending with the \
             finish tool. Respond ONLY with JSON matching the schema.",
        )
        .build()
}

/// Prompt for the reflector: classify the step's outcome.
pub fn reflection_prompt(
    action: &Action,
    result: &ToolResult,
    observation: &Observation,
    tail: &[&Observation],
    rolling_summary: &str,
) -> String {
    PromptBuilder::new()
        .section("Earlier progress (summarized)", rolling_summary)
        .section("Recent observations", &render_observations(tail))
        .section(
            "Executed action",
            &format!(
                "{}({})\nrationale: {}",
                action.tool_name,
                action.args,
                action.rationale.as_deref().unwrap_or("none given")
            ),
        )
        .section("Tool result", &result.render())
        .section("Resulting observation", &truncate(&observation.raw, 600))
        .text(
            "Classify the step: 'success' if the action's intent was realized, 'minor_repair' if \
             it largely succeeded but needs a localized follow-up (put the follow-up in \
             next_hint), 'replan' if it did not advance the goal or undermined the plan's \
             assumptions. If this step taught something a future task could reuse, phrase it as \
             a short self-contained lesson; otherwise leave lesson empty. Do not invent facts. \
             Respond ONLY with JSON matching the schema.",
        )
        .build()
}

/// Prompt folding evicted observations into the rolling summary.
pub fn summary_fold_prompt(prior_summary: &str, evicted: &[Observation]) -> String {
    let rendered = evicted
        .iter()
        .map(|o| format!("#{} ({:?}): {}", o.seq, o.source, truncate(&o.raw, 300)))
        .collect::<Vec<_>>()
        .join("\n");
    PromptBuilder::new()
        .section("Existing summary", prior_summary)
        .section("Observations to fold in", &rendered)
        .text(
            "Produce one combined summary under 1200 characters that preserves every fact a \
             planner would still need: identifiers, paths, decisions, and outcomes. Drop \
             phrasing, keep facts. Respond ONLY with JSON matching the schema.",
        )
        .build()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{ObservationSource, Task};
    use chrono::Utc;

    fn sample_state() -> AgentState {
        let mut state = AgentState::new(
            Task::new("read the report and email a digest").with_context("mailbox", "work"),
            Utc::now(),
            20,
        );
        state.observe(
            ObservationSource::Tool,
            "report.pdf opened, 14 pages",
            vec!["report.pdf: 14 pages".into()],
            Utc::now(),
        );
        state
    }

    #[test]
    fn builder_skips_empty_sections() {
        let prompt = PromptBuilder::new()
            .section("Filled", "content")
            .section("Empty", "  ")
            .build();
        assert!(prompt.contains("## Filled"));
        assert!(!prompt.contains("## Empty"));
    }

    #[test]
    fn next_action_prompt_includes_state_views() {
        let state = sample_state();
        let prompt = next_action_prompt(&state, "- finish: end the run", Some("close the dialog"));
        assert!(prompt.contains("read the report"));
        assert!(prompt.contains("mailbox: work"));
        assert!(prompt.contains("report.pdf opened"));
        assert!(prompt.contains("close the dialog"));
        assert!(prompt.contains("task_complete"));
    }

    #[test]
    fn candidate_prompts_differ_by_angle() {
        let state = sample_state();
        let a = candidate_plan_prompt(&state, "- finish", 0);
        let b = candidate_plan_prompt(&state, "- finish", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
