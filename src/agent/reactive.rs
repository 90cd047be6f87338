//! Reactive planner - one action per invocation
//!
//! Retains no cross-step state of its own; everything it knows comes from
//! `AgentState`. Preferred for short or exploratory tasks and right after a
//! replan, when committing to a long plan would repeat the mistake.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::core::llm::{schema_for, LlmBackend, LlmOptions};
use crate::error::{Error, Result};
use crate::tools::ToolRegistry;

use super::planner::{validate_action, NextActionReply, Planner, Proposal};
use super::prompts;
use super::state::AgentState;
use super::types::{Action, ObservationSource, Plan, PlanOrigin};

/// Single-step planner: each call proposes exactly one action.
pub struct ReactivePlanner {
    llm: Arc<dyn LlmBackend>,
    registry: Arc<ToolRegistry>,
    options: LlmOptions,
}

impl ReactivePlanner {
    /// Create a reactive planner.
    pub fn new(llm: Arc<dyn LlmBackend>, registry: Arc<ToolRegistry>, options: LlmOptions) -> Self {
        ReactivePlanner {
            llm,
            registry,
            options,
        }
    }

    /// The most recent reflection hint recorded in the observation history.
    fn last_hint(state: &AgentState) -> Option<&str> {
        state
            .observations()
            .iter()
            .rev()
            .find(|o| o.source == ObservationSource::Reflection)
            .map(|o| o.raw.as_str())
    }
}

#[async_trait]
impl Planner for ReactivePlanner {
    async fn propose(&mut self, state: &AgentState) -> Result<Proposal> {
        let catalog = self.registry.render_catalog();
        let prompt = prompts::next_action_prompt(state, &catalog, Self::last_hint(state));
        let schema = schema_for::<NextActionReply>();

        let reply: NextActionReply = self
            .llm
            .complete_structured(&prompt, &schema, &self.options)
            .await?
            .parse()?;

        if reply.task_complete {
            return Ok(Proposal::Finish {
                summary: reply.summary.unwrap_or_default(),
            });
        }

        let call = reply
            .call
            .ok_or_else(|| Error::Llm("reply carried neither a call nor task_complete".into()))?;
        let action: Action = call.into();
        validate_action(&action, &self.registry).map_err(Error::Llm)?;

        debug!("Reactive planner proposes {}", action.tool_name);
        Ok(Proposal::Plan(Plan::single(PlanOrigin::React, action)))
    }
}
