//! Error types for AgentLoop
//!
//! Inside the run loop, failures are values (`ErrorKind` on a `ToolResult`,
//! `StopReason` on the run). This enum is for the collaborator boundary:
//! LLM transport, memory store, trace I/O, and configuration.

use thiserror::Error;

/// Result type alias using AgentLoop's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for AgentLoop
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM backend error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Memory store error
    #[error("Memory error: {0}")]
    Memory(String),

    /// Trace sink error
    #[error("Trace error: {0}")]
    Trace(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Llm(_) | Error::RateLimit(_) | Error::Timeout(_) | Error::Memory(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Timeout("llm call".into()).is_retryable());
        assert!(Error::RateLimit("429".into()).is_retryable());
        assert!(!Error::InvalidInput("bad args".into()).is_retryable());
        assert!(!Error::Internal("repair exhausted".into()).is_retryable());
    }
}
