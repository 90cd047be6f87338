//! Rolling-summary compaction of evicted observations
//!
//! When the observation history outgrows its limit, the oldest entries are
//! folded into a single bounded summary. Folding is concatenative: the prior
//! summary is an input to the next fold, so summaries of summaries are fine.
//! With a fixed seed and identical inputs the fold is deterministic.

use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::core::llm::{schema_for, LlmBackend, LlmOptions};
use crate::error::Result;

use super::prompts;
use super::types::Observation;

/// Upper bound on the stored rolling summary.
const MAX_SUMMARY_CHARS: usize = 2000;

#[derive(Debug, Deserialize, JsonSchema)]
struct SummaryReply {
    summary: String,
}

/// Folds evicted observations into the rolling summary.
pub struct ObservationSummarizer {
    llm: Arc<dyn LlmBackend>,
    options: LlmOptions,
}

impl ObservationSummarizer {
    /// Create a summarizer.
    pub fn new(llm: Arc<dyn LlmBackend>, options: LlmOptions) -> Self {
        ObservationSummarizer { llm, options }
    }

    /// Fold `evicted` into `prior`, returning the new rolling summary.
    pub async fn fold(&self, prior: &str, evicted: &[Observation]) -> Result<String> {
        if evicted.is_empty() {
            return Ok(prior.to_string());
        }

        let prompt = prompts::summary_fold_prompt(prior, evicted);
        let schema = schema_for::<SummaryReply>();
        let reply: SummaryReply = self
            .llm
            .complete_structured(&prompt, &schema, &self.options)
            .await?
            .parse()?;

        let mut summary = reply.summary;
        if summary.len() > MAX_SUMMARY_CHARS {
            summary.truncate(
                summary
                    .char_indices()
                    .nth(MAX_SUMMARY_CHARS)
                    .map(|(i, _)| i)
                    .unwrap_or(summary.len()),
            );
        }
        debug!(
            "Folded {} evicted observations into a {}-char summary",
            evicted.len(),
            summary.len()
        );
        Ok(summary)
    }
}
