//! LLM backend trait - Abstract interface for language-model collaborators
//!
//! The core never depends on a specific model or vendor. Everything it needs
//! from an LLM is a single structured completion: a prompt, a JSON Schema the
//! reply must satisfy, and options (timeout, seed, temperature). Retry and
//! backoff are applied by the caller, not the backend.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};

/// Options for a structured completion call.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    /// Hard per-call timeout.
    pub timeout: Duration,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: Option<f32>,
    /// Fixed seed for reproducible sampling, when the backend supports it.
    pub seed: Option<u64>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        LlmOptions {
            timeout: Duration::from_secs(120),
            max_tokens: None,
            temperature: None,
            seed: None,
        }
    }
}

impl LlmOptions {
    /// Options for precise, deterministic output (planning, summarization).
    pub fn precise() -> Self {
        LlmOptions {
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    /// Options for balanced output (reflection).
    pub fn balanced() -> Self {
        LlmOptions {
            temperature: Some(0.5),
            ..Default::default()
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a fixed sampling seed.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

/// A parsed structured completion plus token accounting.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    /// The reply, already parsed as JSON and valid against the request schema.
    pub value: Value,
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
}

impl StructuredResponse {
    /// Total tokens consumed by the call.
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Deserialize the reply into a concrete type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| Error::Llm(format!("Structured reply did not match schema: {}", e)))
    }
}

/// Abstract interface for LLM backends.
///
/// Implement this trait to plug in a provider. The backend handles transport,
/// authentication, and coercing the model into schema-conformant JSON; the
/// core handles retries, budgets, and parsing.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Complete a prompt into a JSON value satisfying `schema`.
    async fn complete_structured(
        &self,
        prompt: &str,
        schema: &Value,
        options: &LlmOptions,
    ) -> Result<StructuredResponse>;
}

/// Render the JSON Schema for a type, for use as a `complete_structured` request schema.
pub fn schema_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| Value::Null)
}
