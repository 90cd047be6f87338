//! Runner configuration
//!
//! Every safety knob of the loop lives here: iteration and wall-clock bounds,
//! retry budgets, stuck-detection thresholds, the kill switch, and history
//! compaction limits. Defaults follow the documented envelope; environment
//! overrides cover the recognized variables (`KILL_SWITCH`, `KILL_FILE`,
//! `COST_PER_1K_TOKENS`, `LLM_TIMEOUT_SECONDS`, `LLM_MAX_RETRIES`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Process-wide cancellation source, checked at every loop boundary and
/// before each suspension point.
#[derive(Debug, Clone, Default)]
pub enum KillSwitch {
    /// No kill switch configured.
    #[default]
    Disabled,
    /// Shared in-process flag; raising it aborts the run.
    Flag(Arc<AtomicBool>),
    /// The file's presence aborts the run.
    File(PathBuf),
}

impl KillSwitch {
    /// Whether the switch is currently engaged.
    pub fn engaged(&self) -> bool {
        match self {
            KillSwitch::Disabled => false,
            KillSwitch::Flag(flag) => flag.load(Ordering::SeqCst),
            KillSwitch::File(path) => path.exists(),
        }
    }
}

/// Configurable limits and policies for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum loop iterations before forced stop.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock bound on the whole run.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Optional cost ceiling; exceeding it stops the run.
    #[serde(default)]
    pub cost_budget: Option<f64>,

    /// Cost per thousand LLM tokens. Cost tracking is disabled when unset.
    #[serde(default)]
    pub cost_per_1k_tokens: Option<f64>,

    /// This many repeated action-signatures inside the sliding window means stuck.
    #[serde(default = "default_loop_repeat_threshold")]
    pub loop_repeat_threshold: usize,

    /// Size of the action-signature sliding window; also the observation
    /// window hashed into the state fingerprint.
    #[serde(default = "default_loop_window")]
    pub loop_window: usize,

    /// Consecutive steps with an identical state fingerprint that mean stuck.
    #[serde(default = "default_no_state_change_threshold")]
    pub no_state_change_threshold: usize,

    /// Consecutive non-success reflections that mean stuck. Strictly
    /// consecutive: any successful step resets the count. `None` disables
    /// the check.
    #[serde(default = "default_no_progress_threshold")]
    pub no_progress_threshold: Option<u32>,

    /// Tool retries beyond the first invocation.
    #[serde(default = "default_tool_max_retries")]
    pub tool_max_retries: u32,

    /// Initial tool retry delay; doubles per attempt.
    #[serde(default = "default_tool_retry_backoff", with = "humantime_serde")]
    pub tool_retry_backoff: Duration,

    /// LLM retries beyond the first invocation, per logical call.
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,

    /// Initial LLM retry delay; doubles per attempt.
    #[serde(default = "default_llm_retry_backoff", with = "humantime_serde")]
    pub llm_retry_backoff: Duration,

    /// Hard per-call LLM timeout.
    #[serde(default = "default_llm_timeout", with = "humantime_serde")]
    pub llm_timeout: Duration,

    /// Hard per-call memory store timeout.
    #[serde(default = "default_memory_timeout", with = "humantime_serde")]
    pub memory_timeout: Duration,

    /// Cancellation source checked at loop boundaries and suspension points.
    #[serde(skip)]
    pub kill_switch: KillSwitch,

    /// Observations beyond this are evicted and folded into the rolling summary.
    #[serde(default = "default_observation_history_limit")]
    pub observation_history_limit: usize,

    /// Maximum memory records recalled per step.
    #[serde(default = "default_memory_recall_k")]
    pub memory_recall_k: usize,

    /// Full candidate plans the plan-first strategy generates and ranks.
    #[serde(default = "default_candidate_plans")]
    pub candidate_plans: usize,

    /// Whether the recovery ladder may fall through to asking the user.
    #[serde(default)]
    pub allow_human_ask: bool,

    /// How long an in-flight call may keep running after cancellation fires.
    #[serde(default = "default_cancellation_grace", with = "humantime_serde")]
    pub cancellation_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            max_steps: default_max_steps(),
            timeout: default_timeout(),
            cost_budget: None,
            cost_per_1k_tokens: None,
            loop_repeat_threshold: default_loop_repeat_threshold(),
            loop_window: default_loop_window(),
            no_state_change_threshold: default_no_state_change_threshold(),
            no_progress_threshold: default_no_progress_threshold(),
            tool_max_retries: default_tool_max_retries(),
            tool_retry_backoff: default_tool_retry_backoff(),
            llm_max_retries: default_llm_max_retries(),
            llm_retry_backoff: default_llm_retry_backoff(),
            llm_timeout: default_llm_timeout(),
            memory_timeout: default_memory_timeout(),
            kill_switch: KillSwitch::Disabled,
            observation_history_limit: default_observation_history_limit(),
            memory_recall_k: default_memory_recall_k(),
            candidate_plans: default_candidate_plans(),
            allow_human_ask: false,
            cancellation_grace: default_cancellation_grace(),
        }
    }
}

fn default_max_steps() -> u32 {
    30
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_loop_repeat_threshold() -> usize {
    3
}

fn default_loop_window() -> usize {
    8
}

fn default_no_state_change_threshold() -> usize {
    3
}

fn default_no_progress_threshold() -> Option<u32> {
    Some(3)
}

fn default_tool_max_retries() -> u32 {
    2
}

fn default_tool_retry_backoff() -> Duration {
    Duration::from_millis(800)
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_llm_retry_backoff() -> Duration {
    Duration::from_millis(1200)
}

fn default_llm_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_memory_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_observation_history_limit() -> usize {
    40
}

fn default_memory_recall_k() -> usize {
    5
}

fn default_candidate_plans() -> usize {
    3
}

fn default_cancellation_grace() -> Duration {
    Duration::from_secs(2)
}

impl RunnerConfig {
    /// Apply the recognized environment variables on top of this config.
    ///
    /// `MEMORY_FAISS_DISABLE`, `MEMORY_EMBED_BACKEND`, and
    /// `MEMORY_EMBED_MODEL` are intentionally not read here; they belong to
    /// the memory collaborator.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("KILL_SWITCH") {
            if v == "1" || v.eq_ignore_ascii_case("true") {
                let flag = Arc::new(AtomicBool::new(true));
                self.kill_switch = KillSwitch::Flag(flag);
            }
        }
        if let Ok(path) = std::env::var("KILL_FILE") {
            if !path.is_empty() {
                self.kill_switch = KillSwitch::File(PathBuf::from(path));
            }
        }
        if let Ok(v) = std::env::var("COST_PER_1K_TOKENS") {
            if let Ok(cost) = v.parse::<f64>() {
                self.cost_per_1k_tokens = Some(cost);
            }
        }
        if let Ok(v) = std::env::var("LLM_TIMEOUT_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                self.llm_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("LLM_MAX_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                self.llm_max_retries = n;
            }
        }
        self
    }
}
