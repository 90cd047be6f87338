//! Plan-first planner - full plans up front, repaired on failure
//!
//! On first invocation it generates several candidate plans, ranks them with
//! an injected scoring function, and adopts the winner. Later invocations are
//! only reached when the adopted plan is exhausted or a step failed; repair
//! runs in a fixed order: prepared branch, minimal LLM patch, tail
//! regeneration, then a single recovery action.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::llm::{schema_for, LlmBackend, LlmOptions};
use crate::error::{Error, Result};
use crate::tools::ToolRegistry;

use super::planner::{validate_plan, PlanReply, Planner, Proposal};
use super::prompts;
use super::recovery::recovery_action;
use super::state::AgentState;
use super::types::{Action, Plan, PlanOrigin, Step};

/// Ranks candidate plans; higher wins.
pub type PlanScorer = Arc<dyn Fn(&Plan) -> f64 + Send + Sync>;

/// Multi-step planner with plan repair.
pub struct PlanFirstPlanner {
    llm: Arc<dyn LlmBackend>,
    registry: Arc<ToolRegistry>,
    options: LlmOptions,
    candidate_plans: usize,
    allow_human_ask: bool,
    scorer: PlanScorer,
}

impl PlanFirstPlanner {
    /// Create a plan-first planner with the default scorer.
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        registry: Arc<ToolRegistry>,
        options: LlmOptions,
        candidate_plans: usize,
        allow_human_ask: bool,
    ) -> Self {
        let scorer = Self::default_scorer();
        PlanFirstPlanner {
            llm,
            registry,
            options,
            candidate_plans: candidate_plans.max(1),
            allow_human_ask,
            scorer,
        }
    }

    /// Replace the scoring function.
    pub fn with_scorer(mut self, scorer: PlanScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Default heuristic: reward ending on the finish sentinel, penalize length.
    pub fn default_scorer() -> PlanScorer {
        Arc::new(|plan: &Plan| {
            let mut score = 0.0;
            if plan
                .actions
                .last()
                .is_some_and(|a| a.tool_name == crate::tools::FINISH_TOOL)
            {
                score += 2.0;
            }
            score - plan.len() as f64 * 0.1
        })
    }

    fn plan_from_reply(reply: PlanReply) -> Plan {
        let actions: Vec<Action> = reply.steps.into_iter().map(Into::into).collect();
        let mut plan = Plan::new(PlanOrigin::PlanFirst, actions);
        for branch in reply.alternatives {
            plan.branches
                .insert(branch.at, branch.steps.into_iter().map(Into::into).collect());
        }
        plan
    }

    async fn generate_candidate(&self, state: &AgentState, angle: usize) -> Result<Plan> {
        let catalog = self.registry.render_catalog();
        let prompt = prompts::candidate_plan_prompt(state, &catalog, angle);
        let schema = schema_for::<PlanReply>();
        let reply: PlanReply = self
            .llm
            .complete_structured(&prompt, &schema, &self.options)
            .await?
            .parse()?;
        let plan = Self::plan_from_reply(reply);
        if plan.is_empty() {
            return Err(Error::Llm("candidate plan has no steps".into()));
        }
        validate_plan(&plan, &self.registry).map_err(Error::Llm)?;
        Ok(plan)
    }

    async fn patched_plan(&self, state: &AgentState, plan: &Plan, failed: &Step) -> Result<Plan> {
        let prompt = prompts::patch_plan_prompt(state, plan, &failed.action, &failed.tool_result);
        let schema = schema_for::<PlanReply>();
        let reply: PlanReply = self
            .llm
            .complete_structured(&prompt, &schema, &self.options)
            .await?
            .parse()?;
        let patched = Self::plan_from_reply(reply);
        if patched.is_empty() {
            return Err(Error::Llm("patched plan has no steps".into()));
        }
        validate_plan(&patched, &self.registry).map_err(Error::Llm)?;
        Ok(patched)
    }

    async fn regenerated_tail(&self, state: &AgentState, failed: &Step) -> Result<Plan> {
        let prompt = prompts::regenerate_tail_prompt(state, &failed.action, &failed.tool_result);
        let schema = schema_for::<PlanReply>();
        let reply: PlanReply = self
            .llm
            .complete_structured(&prompt, &schema, &self.options)
            .await?
            .parse()?;
        let plan = Self::plan_from_reply(reply);
        if plan.is_empty() {
            return Err(Error::Llm("regenerated plan has no steps".into()));
        }
        validate_plan(&plan, &self.registry).map_err(Error::Llm)?;
        Ok(plan)
    }
}

#[async_trait]
impl Planner for PlanFirstPlanner {
    async fn propose(&mut self, state: &AgentState) -> Result<Proposal> {
        let mut best: Option<(f64, Plan)> = None;
        let mut last_err: Option<Error> = None;

        for angle in 0..self.candidate_plans {
            match self.generate_candidate(state, angle).await {
                Ok(plan) => {
                    let score = (self.scorer)(&plan);
                    debug!("Candidate plan {} scored {:.2} ({} steps)", angle, score, plan.len());
                    if best.as_ref().map_or(true, |(s, _)| score > *s) {
                        best = Some((score, plan));
                    }
                }
                Err(e) => {
                    warn!("Candidate plan {} rejected: {}", angle, e);
                    last_err = Some(e);
                }
            }
        }

        match best {
            Some((_, plan)) => Ok(Proposal::Plan(plan)),
            None => Err(last_err.unwrap_or_else(|| Error::Llm("no candidate plans".into()))),
        }
    }

    async fn repair(&mut self, state: &AgentState, failed: &Step) -> Result<Proposal> {
        let plan = match &state.current_plan {
            Some(p) => p.clone(),
            None => return self.propose(state).await,
        };
        let failing = plan.current_index;
        let detail = failed
            .tool_result
            .error_detail
            .clone()
            .unwrap_or_else(|| format!("{} failed", failed.action.tool_name));

        // 1. Prepared alternative branch at the failing position.
        if let Some(branch) = plan.branches.get(&failing) {
            let candidate = Plan::new(PlanOrigin::PlanFirst, branch.clone());
            if !candidate.is_empty() && validate_plan(&candidate, &self.registry).is_ok() {
                debug!("Repair: adopting prepared branch at {}", failing);
                return Ok(Proposal::Plan(candidate));
            }
            warn!("Repair: prepared branch at {} is invalid, skipping", failing);
        }

        // 2. Minimal patch of the remaining plan.
        match self.patched_plan(state, &plan, failed).await {
            Ok(patched) => {
                debug!("Repair: adopting patched plan ({} steps)", patched.len());
                return Ok(Proposal::Plan(patched));
            }
            Err(e) => warn!("Repair: patch failed: {}", e),
        }

        // 3. Regenerate the tail from the failing position.
        match self.regenerated_tail(state, failed).await {
            Ok(regenerated) => {
                debug!("Repair: adopting regenerated tail ({} steps)", regenerated.len());
                return Ok(Proposal::Plan(regenerated));
            }
            Err(e) => warn!("Repair: tail regeneration failed: {}", e),
        }

        // 4. Single recovery action.
        if let Some(action) = recovery_action(&self.registry, self.allow_human_ask, &detail) {
            debug!("Repair: falling back to recovery action {}", action.tool_name);
            return Ok(Proposal::Plan(Plan::single(PlanOrigin::PlanFirst, action)));
        }

        Err(Error::Internal("plan repair exhausted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::StructuredResponse;
    use crate::tools::{CallContext, ErrorKind, FinishTool, Tool, ToolResult, ToolSpec};
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct CannedLlm {
        replies: Mutex<Vec<Result<Value>>>,
    }

    impl CannedLlm {
        fn new(replies: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(CannedLlm {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for CannedLlm {
        async fn complete_structured(
            &self,
            _prompt: &str,
            _schema: &Value,
            _options: &LlmOptions,
        ) -> Result<StructuredResponse> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(Error::Llm("script exhausted".into()));
            }
            replies.remove(0).map(|value| StructuredResponse {
                value,
                prompt_tokens: 10,
                completion_tokens: 10,
            })
        }
    }

    struct StubTool {
        spec: ToolSpec,
    }

    impl StubTool {
        fn named(name: &str) -> Self {
            StubTool {
                spec: ToolSpec::new(name, "stub", json!({"type": "object"})),
            }
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, _args: Value, _ctx: &CallContext) -> ToolResult {
            ToolResult::success(json!({}))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(FinishTool::new()).unwrap();
        registry.register(StubTool::named("probe")).unwrap();
        Arc::new(registry)
    }

    fn state() -> AgentState {
        AgentState::new(
            super::super::types::Task::new("probe the target and report"),
            Utc::now(),
            20,
        )
    }

    fn failed_step(action: Action) -> Step {
        Step {
            index: 0,
            plan_snapshot_id: Uuid::new_v4(),
            action,
            tool_result: ToolResult::failure(ErrorKind::Unrecoverable, "target is gone"),
            observation_id: 1,
            reflection: super::super::types::Reflection::replan("failed", "unrecoverable"),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            retries: 0,
        }
    }

    fn plan_reply(steps: Vec<Value>) -> Value {
        json!({ "steps": steps })
    }

    #[tokio::test]
    async fn best_scoring_candidate_wins() {
        // First candidate does not end with finish; second does.
        let llm = CannedLlm::new(vec![
            Ok(plan_reply(vec![json!({"tool_name": "probe", "args": {}})])),
            Ok(plan_reply(vec![
                json!({"tool_name": "probe", "args": {}}),
                json!({"tool_name": "finish", "args": {"summary": "done"}}),
            ])),
        ]);
        let mut planner = PlanFirstPlanner::new(llm, registry(), LlmOptions::precise(), 2, false);

        match planner.propose(&state()).await.unwrap() {
            Proposal::Plan(plan) => {
                assert_eq!(plan.len(), 2);
                assert_eq!(plan.actions.last().unwrap().tool_name, "finish");
            }
            other => panic!("unexpected proposal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_candidates_are_skipped() {
        let llm = CannedLlm::new(vec![
            Ok(plan_reply(vec![json!({"tool_name": "do_magic", "args": {}})])),
            Ok(plan_reply(vec![
                json!({"tool_name": "finish", "args": {"summary": "ok"}}),
            ])),
        ]);
        let mut planner = PlanFirstPlanner::new(llm, registry(), LlmOptions::precise(), 2, false);

        match planner.propose(&state()).await.unwrap() {
            Proposal::Plan(plan) => assert_eq!(plan.current().unwrap().tool_name, "finish"),
            other => panic!("unexpected proposal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn repair_prefers_prepared_branch() {
        let llm = CannedLlm::new(vec![]);
        let mut planner = PlanFirstPlanner::new(llm, registry(), LlmOptions::precise(), 1, false);

        let mut st = state();
        let mut plan = Plan::new(
            PlanOrigin::PlanFirst,
            vec![Action::new("probe", json!({}))],
        );
        plan.branches.insert(
            0,
            vec![Action::new("finish", json!({"summary": "via branch"}))],
        );
        let old_id = plan.id;
        st.current_plan = Some(plan);

        let failed = failed_step(Action::new("probe", json!({})));
        match planner.repair(&st, &failed).await.unwrap() {
            Proposal::Plan(repaired) => {
                assert_ne!(repaired.id, old_id);
                assert_eq!(repaired.current().unwrap().tool_name, "finish");
            }
            other => panic!("unexpected proposal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn repair_patches_via_llm_when_no_branch() {
        let llm = CannedLlm::new(vec![Ok(plan_reply(vec![
            json!({"tool_name": "finish", "args": {"summary": "patched"}}),
        ]))]);
        let mut planner = PlanFirstPlanner::new(llm, registry(), LlmOptions::precise(), 1, false);

        let mut st = state();
        st.current_plan = Some(Plan::new(
            PlanOrigin::PlanFirst,
            vec![Action::new("probe", json!({}))],
        ));

        let failed = failed_step(Action::new("probe", json!({})));
        match planner.repair(&st, &failed).await.unwrap() {
            Proposal::Plan(plan) => {
                assert_eq!(plan.current().unwrap().args["summary"], "patched")
            }
            other => panic!("unexpected proposal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn repair_falls_back_to_recovery_tool() {
        // Both LLM repair stages fail; a recovery tool is registered.
        let llm = CannedLlm::new(vec![
            Err(Error::Llm("patch unavailable".into())),
            Err(Error::Llm("regen unavailable".into())),
        ]);
        let mut reg = ToolRegistry::new();
        reg.register(FinishTool::new()).unwrap();
        reg.register(StubTool::named("probe")).unwrap();
        reg.register(StubTool::named("wait")).unwrap();
        let mut planner =
            PlanFirstPlanner::new(llm, Arc::new(reg), LlmOptions::precise(), 1, false);

        let mut st = state();
        st.current_plan = Some(Plan::new(
            PlanOrigin::PlanFirst,
            vec![Action::new("probe", json!({}))],
        ));

        let failed = failed_step(Action::new("probe", json!({})));
        match planner.repair(&st, &failed).await.unwrap() {
            Proposal::Plan(plan) => assert_eq!(plan.current().unwrap().tool_name, "wait"),
            other => panic!("unexpected proposal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn repair_exhaustion_is_an_internal_error() {
        let llm = CannedLlm::new(vec![
            Err(Error::Llm("patch unavailable".into())),
            Err(Error::Llm("regen unavailable".into())),
        ]);
        // No recovery tools registered.
        let mut planner = PlanFirstPlanner::new(llm, registry(), LlmOptions::precise(), 1, false);

        let mut st = state();
        st.current_plan = Some(Plan::new(
            PlanOrigin::PlanFirst,
            vec![Action::new("probe", json!({}))],
        ));

        let failed = failed_step(Action::new("probe", json!({})));
        let err = planner.repair(&st, &failed).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
