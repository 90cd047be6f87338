//! The runner: loop driver and safety envelope
//!
//! Owns the perceive→retrieve→plan→execute→observe→reflect→remember cycle.
//! A single run is strictly sequential: one step in flight, suspension only
//! at LLM, tool, and memory calls. The runner enforces every stop condition,
//! coordinates retries and cancellation, and writes the trace.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::clock::{Clock, OsRandom, RandomSource, SystemClock};
use crate::core::llm::{LlmBackend, LlmOptions, StructuredResponse};
use crate::core::memory::{MemoryKind, MemoryStore};
use crate::core::trace::{TraceEvent, TraceRecord, TraceSink, VecTraceSink};
use crate::error::{Error, Result};
use crate::tools::{
    AllowAllPolicy, CallContext, DispatchOutcome, ErrorKind, RetryPolicy, SafetyPolicy,
    SafetyVerdict, ToolCall, ToolRegistry, ToolResult, FINISH_TOOL,
};

use super::config::RunnerConfig;
use super::loop_guard::{stable_hash, LoopGuard};
use super::plan_first::PlanFirstPlanner;
use super::planner::{select_strategy, Planner, PlannerStrategy, Proposal};
use super::reactive::ReactivePlanner;
use super::recovery::recovery_action;
use super::reflector::Reflector;
use super::state::AgentState;
use super::summarizer::ObservationSummarizer;
use super::types::{
    Action, Observation, ObservationSource, Reflection, RunResult, Step, StopReason, Task,
};

/// How many recent salient facts seed the memory query.
const MEMORY_QUERY_FACTS: usize = 3;

/// Poll interval for cancellation sources while a call is in flight.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Everything the runner needs from the outside world, passed in explicitly.
pub struct Collaborators {
    /// Backend for planning calls.
    pub llm_planner: Arc<dyn LlmBackend>,
    /// Backend for reflection calls.
    pub llm_reflector: Arc<dyn LlmBackend>,
    /// Backend for summarization calls.
    pub llm_summarizer: Arc<dyn LlmBackend>,
    /// Long-term memory store.
    pub memory: Arc<dyn MemoryStore>,
    /// Tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Trace destination.
    pub trace: Box<dyn TraceSink>,
    /// Wall-clock source.
    pub clock: Arc<dyn Clock>,
    /// Randomness source; its seed flows to LLM calls.
    pub random: Arc<dyn RandomSource>,
    /// Pre-execution safety check.
    pub safety: Arc<dyn SafetyPolicy>,
    /// Explicit planner, overriding strategy auto-selection.
    pub planner: Option<Box<dyn Planner>>,
}

impl Collaborators {
    /// Create collaborators with one backend serving planner, reflector, and
    /// summarizer, an in-memory trace, and system clock/randomness.
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        memory: Arc<dyn MemoryStore>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Collaborators {
            llm_planner: llm.clone(),
            llm_reflector: llm.clone(),
            llm_summarizer: llm,
            memory,
            tools,
            trace: Box::new(VecTraceSink::new()),
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
            safety: Arc::new(AllowAllPolicy),
            planner: None,
        }
    }

    /// Replace the trace sink.
    pub fn with_trace(mut self, trace: Box<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the randomness source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Replace the safety policy.
    pub fn with_safety(mut self, safety: Arc<dyn SafetyPolicy>) -> Self {
        self.safety = safety;
        self
    }

    /// Inject an explicit planner instead of auto-selecting one.
    pub fn with_planner(mut self, planner: Box<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }
}

/// Run a task to completion under the given configuration and collaborators.
///
/// The single entry point of the crate. Never fails: abnormal terminations
/// are reported through `RunResult::stop_reason` and the trace.
pub async fn run(task: Task, config: RunnerConfig, collaborators: Collaborators) -> RunResult {
    Runner::new(config, collaborators).run(task, None).await
}

// ---------------------------------------------------------------------------
// Token metering
// ---------------------------------------------------------------------------

/// Counts tokens across every LLM call of a run.
struct TokenMeter {
    tokens: AtomicU64,
}

impl TokenMeter {
    fn new() -> Arc<Self> {
        Arc::new(TokenMeter {
            tokens: AtomicU64::new(0),
        })
    }

    fn total(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }
}

/// Decorator that enforces the per-call timeout and feeds the meter.
struct MeteredBackend {
    inner: Arc<dyn LlmBackend>,
    meter: Arc<TokenMeter>,
}

#[async_trait]
impl LlmBackend for MeteredBackend {
    async fn complete_structured(
        &self,
        prompt: &str,
        schema: &Value,
        options: &LlmOptions,
    ) -> Result<StructuredResponse> {
        let response =
            match tokio::time::timeout(options.timeout, self.inner.complete_structured(prompt, schema, options))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::Timeout(format!(
                        "LLM call exceeded {:?}",
                        options.timeout
                    )))
                }
            };
        self.meter
            .tokens
            .fetch_add(response.total_tokens() as u64, Ordering::SeqCst);
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Outcome of racing a tool call against the cancellation sources.
enum DispatchRace {
    /// The call completed with no cancellation.
    Done(DispatchOutcome),
    /// Cancellation fired mid-call; the call still completed within grace.
    DoneCancelled(DispatchOutcome, StopReason),
    /// Cancellation fired and the call outlived the grace window.
    Aborted(StopReason),
}

/// Drives one run. Construct per run; consumed by [`Runner::run`].
pub struct Runner {
    config: RunnerConfig,
    llm_planner: Arc<dyn LlmBackend>,
    llm_reflector: Arc<dyn LlmBackend>,
    llm_summarizer: Arc<dyn LlmBackend>,
    memory: Arc<dyn MemoryStore>,
    tools: Arc<ToolRegistry>,
    trace: Box<dyn TraceSink>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    safety: Arc<dyn SafetyPolicy>,
    planner_override: Option<Box<dyn Planner>>,
    meter: Arc<TokenMeter>,
    run_id: Uuid,
    trace_seq: u64,
}

impl Runner {
    /// Build a runner from a configuration and collaborators.
    pub fn new(config: RunnerConfig, collaborators: Collaborators) -> Self {
        let meter = TokenMeter::new();
        let wrap = |inner: Arc<dyn LlmBackend>| -> Arc<dyn LlmBackend> {
            Arc::new(MeteredBackend {
                inner,
                meter: meter.clone(),
            })
        };
        Runner {
            llm_planner: wrap(collaborators.llm_planner),
            llm_reflector: wrap(collaborators.llm_reflector),
            llm_summarizer: wrap(collaborators.llm_summarizer),
            memory: collaborators.memory,
            tools: collaborators.tools,
            trace: collaborators.trace,
            clock: collaborators.clock,
            random: collaborators.random,
            safety: collaborators.safety,
            planner_override: collaborators.planner,
            meter,
            config,
            run_id: Uuid::new_v4(),
            trace_seq: 0,
        }
    }

    /// The id this run's trace records carry.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Execute the loop until a terminal state.
    pub async fn run(mut self, task: Task, initial_observation: Option<String>) -> RunResult {
        let started_at = self.clock.now();
        let mut state = AgentState::new(task, started_at, self.config.observation_history_limit);
        let mut guard = LoopGuard::new(self.config.loop_window, self.config.loop_repeat_threshold);
        let ctx = CallContext::new(self.run_id);
        let retry_policy = RetryPolicy {
            max_retries: self.config.tool_max_retries,
            initial_backoff: self.config.tool_retry_backoff,
        };

        let seed = self.random.seed();
        let mut planner = self.take_planner(&state, seed);
        let reflector = Reflector::new(
            self.llm_reflector.clone(),
            LlmOptions::balanced()
                .with_timeout(self.config.llm_timeout)
                .with_seed(seed),
        );
        let summarizer = ObservationSummarizer::new(
            self.llm_summarizer.clone(),
            LlmOptions::precise()
                .with_timeout(self.config.llm_timeout)
                .with_seed(seed),
        );

        match initial_observation {
            Some(raw) => self.record_observation(&mut state, ObservationSource::User, raw, vec![]),
            None => {
                let msg = format!("Task accepted: {}", state.task.goal);
                self.record_observation(&mut state, ObservationSource::System, msg, vec![])
            }
        };

        info!(run_id = %self.run_id, "Run started: {}", state.task.goal);

        let mut pending_repair: Option<Step> = None;
        let mut tokens_accounted: u64 = 0;
        let mut final_summary: Option<String> = None;
        let stop_reason: StopReason = 'run: loop {
            self.account_cost(&mut state, &mut tokens_accounted);

            // 1. Stop conditions at the loop boundary.
            if let Some(reason) = self.cancellation(&state) {
                break 'run reason;
            }
            if state.steps >= self.config.max_steps {
                break 'run StopReason::MaxSteps;
            }

            // 2. Compact history if over budget.
            if state.needs_compaction() {
                let evicted = state.evict_overflow();
                match self.fold_with_retry(&summarizer, &state.rolling_summary, &evicted).await {
                    Ok(summary) => state.rolling_summary = summary,
                    Err(e) => {
                        warn!("Summarization exhausted retries: {}", e);
                        final_summary = Some(format!("history compaction failed: {}", e));
                        break 'run StopReason::LlmFailure;
                    }
                }
            }

            // 3. Recall memory relevant to the task and recent facts.
            if let Some(reason) = self.cancellation(&state) {
                break 'run reason;
            }
            self.recall_memory(&mut state).await;

            // 4. Next action: consume the current plan, or ask the planner.
            let action: Action = match self.next_action(&mut state, &mut planner, &mut pending_repair).await {
                NextAction::Execute(action) => action,
                NextAction::Finished(summary) => {
                    final_summary = Some(summary);
                    break 'run StopReason::GoalAchieved;
                }
                NextAction::Stop(reason, detail) => {
                    final_summary = Some(detail);
                    break 'run reason;
                }
            };
            let plan_id = state.current_plan.as_ref().map(|p| p.id).unwrap_or_else(Uuid::nil);
            let step_started = self.clock.now();

            // 5. Preconditions, with one localized recovery attempt.
            let precondition_failure = self
                .check_preconditions_with_recovery(&mut state, &action, &ctx, &retry_policy)
                .await;

            // Pre-execution safety check.
            let safety_block = self.safety_block(&action);

            // 6. Dispatch, racing the cancellation sources.
            let mut cancelled: Option<StopReason> = None;
            let outcome: DispatchOutcome = if let Some(reason) = precondition_failure {
                DispatchOutcome {
                    result: ToolResult::failure_before_side_effect(
                        ErrorKind::PreconditionFailed,
                        reason,
                    ),
                    attempts: 0,
                }
            } else if let Some(reason) = safety_block {
                DispatchOutcome {
                    result: ToolResult::failure_before_side_effect(ErrorKind::SafetyBlocked, reason),
                    attempts: 0,
                }
            } else {
                if let Some(reason) = self.cancellation(&state) {
                    break 'run reason;
                }
                let call = ToolCall::new(action.tool_name.clone(), action.args.clone());
                match self.dispatch_with_cancellation(&state, &call, &ctx, &retry_policy).await {
                    DispatchRace::Done(outcome) => outcome,
                    DispatchRace::DoneCancelled(outcome, reason) => {
                        cancelled = Some(reason);
                        outcome
                    }
                    DispatchRace::Aborted(reason) => {
                        warn!("Step aborted mid-call: {}", reason);
                        break 'run reason;
                    }
                }
            };
            let retries = outcome.retries();
            let mut result = outcome.result;

            // 7. Observe.
            let facts = salient_facts(&action, &result);
            let observation_id =
                self.record_observation(&mut state, ObservationSource::Tool, result.render(), facts);

            // Postconditions: success without the declared evidence is a failure.
            if result.success {
                if let Some(failed) = self.first_failed_condition(&state, &action.postconditions) {
                    result = ToolResult::failure(ErrorKind::PostconditionFailed, failed)
                        .with_duration(result.duration_ms);
                }
            }

            // 8. Reflect, then persist lessons and requested writes.
            let observation = state.last_observation().cloned().unwrap_or_else(|| Observation {
                source: ObservationSource::Tool,
                raw: String::new(),
                salient_facts: vec![],
                seq: observation_id,
                timestamp: step_started,
            });
            if cancelled.is_none() {
                cancelled = self.cancellation(&state);
            }
            let reflection = if cancelled.is_some() {
                // No further LLM calls after cancellation.
                synthesized_reflection(&result)
            } else {
                match self
                    .reflect_with_retry(&reflector, &action, &result, &observation, &state)
                    .await
                {
                    Ok(reflection) => reflection,
                    Err(e) => {
                        warn!("Reflection exhausted retries: {}", e);
                        final_summary = Some(format!("reflection failed: {}", e));
                        break 'run StopReason::LlmFailure;
                    }
                }
            };
            self.emit(TraceEvent::Reflection {
                step_index: state.steps,
                reflection: reflection.clone(),
            });
            if cancelled.is_none() {
                self.persist_memory(&state, &reflection).await;
            }

            // 9. Counters.
            state.steps += 1;
            if reflection.counts_as_success() {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
            }
            if let Some(cost) = result.cost_estimate {
                state.total_cost += cost;
            }
            self.account_cost(&mut state, &mut tokens_accounted);

            // 10. Stuck detection and the step record.
            let looped = guard.record_action(action.signature());
            let fingerprint = stable_hash(&state.fingerprint_input(self.config.loop_window));
            let fingerprint_streak = guard.record_fingerprint(fingerprint);

            let step = Step {
                index: state.steps - 1,
                plan_snapshot_id: plan_id,
                action: action.clone(),
                tool_result: result.clone(),
                observation_id,
                reflection: reflection.clone(),
                started_at: step_started,
                ended_at: self.clock.now(),
                retries,
            };
            self.emit(TraceEvent::Step { step: step.clone() });

            // Plan bookkeeping and the reflection hint.
            if reflection.status == super::types::ReflectionStatus::Replan {
                pending_repair = Some(step);
            } else if let Some(plan) = state.current_plan.as_mut() {
                plan.advance();
                if plan.is_exhausted() {
                    state.current_plan = None;
                }
            }
            if let Some(hint) = reflection.next_hint.clone() {
                self.record_observation(&mut state, ObservationSource::Reflection, hint, vec![]);
            }

            // Terminal checks for this step, in order.
            if action.tool_name == FINISH_TOOL
                && result.success
                && reflection.status == super::types::ReflectionStatus::Success
            {
                final_summary = result
                    .output
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .or(Some(reflection.explanation.clone()));
                break 'run StopReason::GoalAchieved;
            }
            if result.error_kind == Some(ErrorKind::SafetyBlocked) {
                final_summary = Some(reflection.explanation.clone());
                break 'run StopReason::UnsafeActionBlocked;
            }
            if let Some(reason) = cancelled {
                final_summary = Some(reflection.explanation.clone());
                break 'run reason;
            }
            if looped {
                break 'run StopReason::LoopDetected;
            }
            if fingerprint_streak >= self.config.no_state_change_threshold {
                break 'run StopReason::NoStateChange;
            }
            if let Some(threshold) = self.config.no_progress_threshold {
                if state.consecutive_failures >= threshold {
                    break 'run StopReason::NoProgress;
                }
            }
            final_summary = Some(reflection.explanation.clone());
        };

        self.finish_run(state, stop_reason, final_summary)
    }

    // -----------------------------------------------------------------------
    // Loop pieces
    // -----------------------------------------------------------------------

    fn take_planner(&mut self, state: &AgentState, seed: Option<u64>) -> Box<dyn Planner> {
        if let Some(planner) = self.planner_override.take() {
            return planner;
        }
        let options = LlmOptions::precise()
            .with_timeout(self.config.llm_timeout)
            .with_seed(seed);
        match select_strategy(&state.task.goal) {
            PlannerStrategy::Reactive => {
                debug!("Auto-selected reactive planner");
                Box::new(ReactivePlanner::new(
                    self.llm_planner.clone(),
                    self.tools.clone(),
                    options,
                ))
            }
            PlannerStrategy::PlanFirst => {
                debug!("Auto-selected plan-first planner");
                Box::new(PlanFirstPlanner::new(
                    self.llm_planner.clone(),
                    self.tools.clone(),
                    options,
                    self.config.candidate_plans,
                    self.config.allow_human_ask,
                ))
            }
        }
    }

    /// Kill switch, wall-clock timeout, and cost budget, in that order.
    fn cancellation(&self, state: &AgentState) -> Option<StopReason> {
        if self.config.kill_switch.engaged() {
            return Some(StopReason::KillSwitch);
        }
        let elapsed = self
            .clock
            .now()
            .signed_duration_since(state.wall_clock_start);
        if elapsed.num_milliseconds() as i128 > self.config.timeout.as_millis() as i128 {
            return Some(StopReason::Timeout);
        }
        if let Some(budget) = self.config.cost_budget {
            if state.total_cost > budget {
                return Some(StopReason::BudgetExceeded);
            }
        }
        None
    }

    /// Fold LLM token spend into the run's cost, when tracking is enabled.
    fn account_cost(&self, state: &mut AgentState, tokens_accounted: &mut u64) {
        let total = self.meter.total();
        let delta = total.saturating_sub(*tokens_accounted);
        *tokens_accounted = total;
        if delta > 0 {
            if let Some(rate) = self.config.cost_per_1k_tokens {
                state.total_cost += delta as f64 / 1000.0 * rate;
            }
        }
    }

    async fn recall_memory(&mut self, state: &mut AgentState) {
        let mut query = state.task.goal.clone();
        for fact in state.recent_facts(MEMORY_QUERY_FACTS) {
            query.push(' ');
            query.push_str(&fact);
        }
        let k = self.config.memory_recall_k;
        let records =
            match tokio::time::timeout(self.config.memory_timeout, self.memory.search(&query, k))
                .await
            {
                Ok(Ok(records)) => records,
                Ok(Err(e)) => {
                    warn!("Memory search failed: {}", e);
                    Vec::new()
                }
                Err(_) => {
                    warn!("Memory search timed out");
                    Vec::new()
                }
            };
        let mut seen = std::collections::HashSet::new();
        state.recalled = records
            .into_iter()
            .filter(|r| seen.insert(r.content.clone()))
            .collect();
        self.emit(TraceEvent::MemoryQuery {
            query,
            hits: state.recalled.len(),
        });
    }

    async fn next_action(
        &mut self,
        state: &mut AgentState,
        planner: &mut Box<dyn Planner>,
        pending_repair: &mut Option<Step>,
    ) -> NextAction {
        if pending_repair.is_none() {
            if let Some(plan) = &state.current_plan {
                if let Some(action) = plan.current() {
                    return NextAction::Execute(action.clone());
                }
            }
        }

        if let Some(reason) = self.cancellation(state) {
            return NextAction::Stop(reason, "cancelled before planning".into());
        }

        let proposal = match pending_repair.take() {
            Some(failed) => self.repair_with_retry(planner, state, &failed).await,
            None => self.propose_with_retry(planner, state).await,
        };

        match proposal {
            Ok(Proposal::Finish { summary }) => NextAction::Finished(summary),
            Ok(Proposal::Plan(plan)) => {
                self.emit(TraceEvent::Plan { plan: plan.clone() });
                let action = plan.current().cloned();
                state.current_plan = Some(plan);
                match action {
                    Some(action) => NextAction::Execute(action),
                    None => NextAction::Stop(
                        StopReason::LlmFailure,
                        "planner produced an empty plan".into(),
                    ),
                }
            }
            Err(e) => {
                let reason = match e {
                    Error::Internal(_) => StopReason::UnrecoverableToolFailure,
                    _ => StopReason::LlmFailure,
                };
                NextAction::Stop(reason, e.to_string())
            }
        }
    }

    /// First failing precondition; after one recovery attempt, re-checked.
    async fn check_preconditions_with_recovery(
        &mut self,
        state: &mut AgentState,
        action: &Action,
        ctx: &CallContext,
        retry_policy: &RetryPolicy,
    ) -> Option<String> {
        let failed = self.first_failed_condition(state, &action.preconditions)?;
        info!("Precondition failed ({}), attempting recovery", failed);

        if let Some(recovery) = recovery_action(&self.tools, self.config.allow_human_ask, &failed) {
            let call = ToolCall::new(recovery.tool_name.clone(), recovery.args.clone());
            let outcome = self.tools.dispatch(&call, ctx, retry_policy).await;
            let facts = salient_facts(&recovery, &outcome.result);
            self.record_observation(
                state,
                ObservationSource::Tool,
                outcome.result.render(),
                facts,
            );
        }

        self.first_failed_condition(state, &action.preconditions)
    }

    fn first_failed_condition(
        &self,
        state: &AgentState,
        conditions: &[super::types::Condition],
    ) -> Option<String> {
        let recent = state.recent_observations(self.config.loop_window);
        conditions
            .iter()
            .find(|c| !c.evaluate(&recent, &self.tools))
            .map(|c| format!("condition not satisfied: {:?}", c))
    }

    fn safety_block(&self, action: &Action) -> Option<String> {
        let spec = self.tools.spec_of(&action.tool_name)?;
        match self.safety.check(&spec, &action.args) {
            SafetyVerdict::Allow => None,
            SafetyVerdict::Block(reason) => {
                warn!("Safety policy refused {}: {}", action.tool_name, reason);
                Some(reason)
            }
        }
    }

    async fn dispatch_with_cancellation(
        &self,
        state: &AgentState,
        call: &ToolCall,
        ctx: &CallContext,
        retry_policy: &RetryPolicy,
    ) -> DispatchRace {
        let fut = self.tools.dispatch(call, ctx, retry_policy);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                outcome = &mut fut => return DispatchRace::Done(outcome),
                _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {
                    if let Some(reason) = self.cancellation(state) {
                        return match tokio::time::timeout(self.config.cancellation_grace, &mut fut).await {
                            Ok(outcome) => DispatchRace::DoneCancelled(outcome, reason),
                            Err(_) => DispatchRace::Aborted(reason),
                        };
                    }
                }
            }
        }
    }

    async fn persist_memory(&mut self, state: &AgentState, reflection: &Reflection) {
        let failed_step = !reflection.counts_as_success();
        let marker = if failed_step { " [failed-step]" } else { "" };

        if let Some(lesson) = &reflection.lesson {
            let key = format!("lesson-step-{}{}", state.steps, marker);
            self.store_memory(MemoryKind::Experience, &key, lesson, failed_step)
                .await;
        }
        if let Some(write) = &reflection.memory_write {
            let key = format!("{}{}", write.key, marker);
            self.store_memory(write.kind, &key, &write.content, failed_step)
                .await;
        }
    }

    async fn store_memory(&mut self, kind: MemoryKind, key: &str, content: &str, failed_step: bool) {
        match tokio::time::timeout(self.config.memory_timeout, self.memory.store(kind, key, content))
            .await
        {
            Ok(Ok(_)) => self.emit(TraceEvent::MemoryWrite {
                kind,
                key: key.to_string(),
                failed_step,
            }),
            Ok(Err(e)) => warn!("Memory store failed: {}", e),
            Err(_) => warn!("Memory store timed out"),
        }
    }

    // -----------------------------------------------------------------------
    // LLM retry wrappers (each logical call attempted at most max+1 times)
    // -----------------------------------------------------------------------

    async fn propose_with_retry(
        &self,
        planner: &mut Box<dyn Planner>,
        state: &AgentState,
    ) -> Result<Proposal> {
        let mut delays = exponential_delays(self.config.llm_retry_backoff);
        let mut attempts = 0u32;
        loop {
            match planner.propose(state).await {
                Ok(proposal) => return Ok(proposal),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || attempts > self.config.llm_max_retries {
                        return Err(e);
                    }
                    let delay = delays.next_backoff().unwrap_or_default();
                    warn!("Planner failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn repair_with_retry(
        &self,
        planner: &mut Box<dyn Planner>,
        state: &AgentState,
        failed: &Step,
    ) -> Result<Proposal> {
        let mut delays = exponential_delays(self.config.llm_retry_backoff);
        let mut attempts = 0u32;
        loop {
            match planner.repair(state, failed).await {
                Ok(proposal) => return Ok(proposal),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || attempts > self.config.llm_max_retries {
                        return Err(e);
                    }
                    let delay = delays.next_backoff().unwrap_or_default();
                    warn!("Plan repair failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn reflect_with_retry(
        &self,
        reflector: &Reflector,
        action: &Action,
        result: &ToolResult,
        observation: &Observation,
        state: &AgentState,
    ) -> Result<Reflection> {
        let mut delays = exponential_delays(self.config.llm_retry_backoff);
        let mut attempts = 0u32;
        loop {
            match reflector.reflect(action, result, observation, state).await {
                Ok(reflection) => return Ok(reflection),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || attempts > self.config.llm_max_retries {
                        return Err(e);
                    }
                    let delay = delays.next_backoff().unwrap_or_default();
                    warn!("Reflection failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn fold_with_retry(
        &self,
        summarizer: &ObservationSummarizer,
        prior: &str,
        evicted: &[Observation],
    ) -> Result<String> {
        let mut delays = exponential_delays(self.config.llm_retry_backoff);
        let mut attempts = 0u32;
        loop {
            match summarizer.fold(prior, evicted).await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || attempts > self.config.llm_max_retries {
                        return Err(e);
                    }
                    let delay = delays.next_backoff().unwrap_or_default();
                    warn!("Summarization failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Trace plumbing
    // -----------------------------------------------------------------------

    fn record_observation(
        &mut self,
        state: &mut AgentState,
        source: ObservationSource,
        raw: String,
        salient_facts: Vec<String>,
    ) -> u64 {
        let now = self.clock.now();
        let seq = state.observe(source, raw, salient_facts, now);
        if let Some(observation) = state.last_observation().cloned() {
            self.emit(TraceEvent::Observation { observation });
        }
        seq
    }

    fn emit(&mut self, event: TraceEvent) {
        self.trace_seq += 1;
        let record = TraceRecord {
            seq: self.trace_seq,
            run_id: self.run_id,
            timestamp: self.clock.now(),
            event,
        };
        if let Err(e) = self.trace.append(&record) {
            warn!("Trace append failed: {}", e);
        }
    }

    fn finish_run(
        mut self,
        state: AgentState,
        reason: StopReason,
        final_summary: Option<String>,
    ) -> RunResult {
        let duration_seconds = self
            .clock
            .now()
            .signed_duration_since(state.wall_clock_start)
            .num_milliseconds() as f64
            / 1000.0;
        let success = reason.is_success();
        let total_cost = self
            .config
            .cost_per_1k_tokens
            .map(|_| state.total_cost)
            .or_else(|| (state.total_cost > 0.0).then_some(state.total_cost));

        info!(
            run_id = %self.run_id,
            "Run stopped: reason={}, success={}, steps={}, duration={:.2}s",
            reason, success, state.steps, duration_seconds
        );

        self.emit(TraceEvent::Stop {
            reason,
            success,
            steps: state.steps,
            duration_seconds,
            total_cost,
            final_summary: final_summary.clone(),
        });
        if let Err(e) = self.trace.close() {
            warn!("Trace close failed: {}", e);
        }

        RunResult {
            success,
            stop_reason: reason,
            steps: state.steps,
            duration_seconds,
            final_summary,
            trace_id: self.run_id,
        }
    }
}

/// What the action-selection phase decided.
enum NextAction {
    /// Execute this action now.
    Execute(Action),
    /// The planner declared the goal achieved.
    Finished(String),
    /// Terminate with this reason.
    Stop(StopReason, String),
}

/// Reflection synthesized locally when cancellation forbids further LLM calls.
fn synthesized_reflection(result: &ToolResult) -> Reflection {
    if result.success {
        Reflection::success("run cancelled; in-flight call completed within the grace window")
    } else {
        Reflection::replan(
            "run cancelled; in-flight call failed within the grace window",
            result
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".into()),
        )
    }
}

/// Exponential delay sequence for retries, without jitter.
fn exponential_delays(initial: Duration) -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: initial,
        current_interval: initial,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Extract short facts from a tool result for fingerprinting and retrieval.
fn salient_facts(action: &Action, result: &ToolResult) -> Vec<String> {
    if !result.success {
        return vec![format!(
            "{}: {}",
            action.tool_name,
            result
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "failed".into())
        )];
    }
    match &result.output {
        Value::Object(map) => map
            .iter()
            .take(6)
            .map(|(k, v)| format!("{}: {}", k, short_value(v)))
            .collect(),
        Value::String(s) => vec![format!("{}: {}", action.tool_name, short_str(s))],
        Value::Null => vec![],
        other => vec![format!("{}: {}", action.tool_name, short_str(&other.to_string()))],
    }
}

fn short_value(value: &Value) -> String {
    match value {
        Value::String(s) => short_str(s).to_string(),
        other => short_str(&other.to_string()).to_string(),
    }
}

fn short_str(s: &str) -> &str {
    match s.char_indices().nth(120) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn salient_facts_flatten_object_output() {
        let action = Action::new("file_read", json!({"path": "x"}));
        let result = ToolResult::success(json!({"size": 42, "path": "x"}));
        let facts = salient_facts(&action, &result);
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().any(|f| f.starts_with("size: ")));
    }

    #[test]
    fn salient_facts_mark_failures() {
        let action = Action::new("fetch", json!({}));
        let result = ToolResult::failure(ErrorKind::Transient, "flake");
        let facts = salient_facts(&action, &result);
        assert_eq!(facts, vec!["fetch: transient".to_string()]);
    }

    #[test]
    fn synthesized_reflection_tracks_result() {
        let ok = synthesized_reflection(&ToolResult::success(json!({})));
        assert!(ok.counts_as_success());
        let bad = synthesized_reflection(&ToolResult::failure(ErrorKind::Timeout, "late"));
        assert!(!bad.counts_as_success());
        assert_eq!(bad.failure_type.as_deref(), Some("timeout"));
    }

    #[test]
    fn exponential_delays_double() {
        let mut delays = exponential_delays(Duration::from_millis(100));
        assert_eq!(delays.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(delays.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(delays.next_backoff(), Some(Duration::from_millis(400)));
    }
}
