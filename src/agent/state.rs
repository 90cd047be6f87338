//! Mutable working set of a run
//!
//! `AgentState` is the only mutable state the core owns. It is created at run
//! start, mutated exclusively by the runner on a single thread, and discarded
//! at stop. Observation history is bounded; overflow is evicted for the
//! summarizer to fold into the rolling summary.

use chrono::{DateTime, Utc};

use crate::core::memory::MemoryRecord;

use super::types::{Observation, ObservationSource, Plan, Task};

/// Working state threaded through every loop iteration.
#[derive(Debug)]
pub struct AgentState {
    /// The immutable goal.
    pub task: Task,
    /// Bounded observation history, strictly seq-ordered.
    observations: Vec<Observation>,
    /// Deterministic summary of evicted observations.
    pub rolling_summary: String,
    /// The plan currently being consumed, if any.
    pub current_plan: Option<Plan>,
    /// Steps executed so far.
    pub steps: u32,
    /// Consecutive steps whose reflection was not a success.
    pub consecutive_failures: u32,
    /// Accumulated cost, when tracking is enabled.
    pub total_cost: f64,
    /// When the run began.
    pub wall_clock_start: DateTime<Utc>,
    /// Memory records recalled for the upcoming planning call.
    pub recalled: Vec<MemoryRecord>,
    next_seq: u64,
    history_limit: usize,
}

impl AgentState {
    /// Create the state for a new run.
    pub fn new(task: Task, started_at: DateTime<Utc>, history_limit: usize) -> Self {
        AgentState {
            task,
            observations: Vec::new(),
            rolling_summary: String::new(),
            current_plan: None,
            steps: 0,
            consecutive_failures: 0,
            total_cost: 0.0,
            wall_clock_start: started_at,
            recalled: Vec::new(),
            next_seq: 0,
            history_limit,
        }
    }

    /// Record an observation. Returns its sequence number.
    pub fn observe(
        &mut self,
        source: ObservationSource,
        raw: impl Into<String>,
        salient_facts: Vec<String>,
        now: DateTime<Utc>,
    ) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.observations.push(Observation {
            source,
            raw: raw.into(),
            salient_facts,
            seq,
            timestamp: now,
        });
        seq
    }

    /// The retained observation history, oldest first.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// The last recorded observation, if any.
    pub fn last_observation(&self) -> Option<&Observation> {
        self.observations.last()
    }

    /// The most recent `k` observations, oldest first.
    pub fn recent_observations(&self, k: usize) -> Vec<&Observation> {
        let start = self.observations.len().saturating_sub(k);
        self.observations[start..].iter().collect()
    }

    /// Concatenated salient facts of the last `k` observations, the input to
    /// the state fingerprint.
    pub fn fingerprint_input(&self, k: usize) -> String {
        self.recent_observations(k)
            .iter()
            .flat_map(|o| o.salient_facts.iter())
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Salient facts of the last `k` observations, for memory query keys.
    pub fn recent_facts(&self, k: usize) -> Vec<String> {
        self.recent_observations(k)
            .iter()
            .flat_map(|o| o.salient_facts.iter().cloned())
            .collect()
    }

    /// Whether the history has outgrown its limit.
    pub fn needs_compaction(&self) -> bool {
        self.observations.len() > self.history_limit
    }

    /// Remove and return the overflow beyond the history limit, oldest first.
    pub fn evict_overflow(&mut self) -> Vec<Observation> {
        if !self.needs_compaction() {
            return Vec::new();
        }
        let excess = self.observations.len() - self.history_limit;
        self.observations.drain(..excess).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_limit(limit: usize) -> AgentState {
        AgentState::new(Task::new("test goal"), Utc::now(), limit)
    }

    #[test]
    fn observations_are_seq_ordered() {
        let mut state = state_with_limit(10);
        let a = state.observe(ObservationSource::System, "first", vec![], Utc::now());
        let b = state.observe(ObservationSource::Tool, "second", vec![], Utc::now());
        assert!(a < b);
        let seqs: Vec<u64> = state.observations().iter().map(|o| o.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn eviction_keeps_newest() {
        let mut state = state_with_limit(2);
        for i in 0..5 {
            state.observe(ObservationSource::Tool, format!("obs {}", i), vec![], Utc::now());
        }
        assert!(state.needs_compaction());
        let evicted = state.evict_overflow();
        assert_eq!(evicted.len(), 3);
        assert_eq!(evicted[0].raw, "obs 0");
        assert_eq!(state.observations().len(), 2);
        assert_eq!(state.observations()[0].raw, "obs 3");
        // Seq numbering continues past eviction.
        let seq = state.observe(ObservationSource::Tool, "obs 5", vec![], Utc::now());
        assert_eq!(seq, 6);
    }

    #[test]
    fn fingerprint_input_covers_recent_facts_only() {
        let mut state = state_with_limit(10);
        state.observe(
            ObservationSource::Tool,
            "old",
            vec!["stale fact".into()],
            Utc::now(),
        );
        state.observe(
            ObservationSource::Tool,
            "new",
            vec!["fresh fact".into()],
            Utc::now(),
        );
        let input = state.fingerprint_input(1);
        assert!(input.contains("fresh fact"));
        assert!(!input.contains("stale fact"));
    }

    #[test]
    fn no_eviction_under_limit() {
        let mut state = state_with_limit(10);
        state.observe(ObservationSource::System, "only", vec![], Utc::now());
        assert!(!state.needs_compaction());
        assert!(state.evict_overflow().is_empty());
    }
}
