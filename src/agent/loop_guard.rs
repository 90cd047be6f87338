//! Stuck-state detection for the runner
//!
//! Two independent detectors: a sliding window of action signatures (the same
//! call proposed over and over) and a streak counter over state fingerprints
//! (steps that change nothing). The no-progress counter lives on `AgentState`
//! and is checked by the runner directly.

use std::collections::VecDeque;

/// Non-cryptographic stable hash used for action signatures and state
/// fingerprints. Stable across processes, unlike `DefaultHasher`.
pub(crate) fn stable_hash(s: &str) -> u64 {
    let mut h: u64 = 0;
    for b in s.bytes() {
        h = h.wrapping_mul(31).wrapping_add(b as u64);
    }
    h
}

/// Tracks recent action signatures and state fingerprints.
pub struct LoopGuard {
    window: VecDeque<u64>,
    window_size: usize,
    repeat_threshold: usize,
    last_fingerprint: Option<u64>,
    fingerprint_streak: usize,
}

impl LoopGuard {
    /// Create a guard. `window_size` bounds the signature window;
    /// `repeat_threshold` is how many occurrences of one signature inside the
    /// window mean the planner is looping.
    pub fn new(window_size: usize, repeat_threshold: usize) -> Self {
        LoopGuard {
            window: VecDeque::with_capacity(window_size + 1),
            window_size,
            repeat_threshold,
            last_fingerprint: None,
            fingerprint_streak: 0,
        }
    }

    /// Record an executed action's signature. Returns true when any signature
    /// now occurs at least `repeat_threshold` times within the window.
    pub fn record_action(&mut self, signature: u64) -> bool {
        self.window.push_back(signature);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        if self.repeat_threshold == 0 {
            return false;
        }
        self.window
            .iter()
            .filter(|s| **s == signature)
            .count()
            >= self.repeat_threshold
    }

    /// Record the post-step state fingerprint. Returns the length of the
    /// current identical-fingerprint streak.
    pub fn record_fingerprint(&mut self, fingerprint: u64) -> usize {
        if self.last_fingerprint == Some(fingerprint) {
            self.fingerprint_streak += 1;
        } else {
            self.last_fingerprint = Some(fingerprint);
            self.fingerprint_streak = 1;
        }
        self.fingerprint_streak
    }
}
