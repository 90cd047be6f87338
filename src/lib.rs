//! # AgentLoop
//!
//! A closed-loop autonomous agent runner. Give it a natural-language task and
//! pluggable collaborators (an LLM backend, a memory store, a tool registry)
//! and it plans tool calls, executes them, observes the results, reflects,
//! writes lessons to memory, and repeats until the goal is achieved or a
//! safety limit triggers, producing a deterministic execution trace.
//!
//! ## Architecture
//!
//! - **Collaborator traits** (`core`): LLM backend, memory store, trace sink,
//!   clock/randomness; all injected, never ambient
//! - **Agent core** (`agent`): the runner loop, two planner strategies
//!   (reactive and plan-first with repair), the reflector, and stuck detection
//! - **Tools** (`tools`): registry, dispatch contract (validation, approval
//!   gates, retries), and the built-in sentinel tools
//!
//! ## Design Principles
//!
//! 1. **Errors are values inside the loop**: tool failures carry an
//!    `ErrorKind`, runs end with a `StopReason`; crate errors exist only at
//!    collaborator boundaries
//! 2. **Explicit collaborators**: everything the runner touches is a
//!    constructor argument, so runs are reproducible under test
//! 3. **Bounded everything**: steps, wall-clock, cost, retries, history
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentloop::{run, Collaborators, RunnerConfig, Task};
//! use agentloop::core::InMemoryStore;
//! use agentloop::tools::{FinishTool, ToolRegistry};
//!
//! # async fn example(llm: Arc<dyn agentloop::core::LlmBackend>) {
//! let mut tools = ToolRegistry::new();
//! tools.register(FinishTool::new()).unwrap();
//!
//! let collaborators = Collaborators::new(llm, Arc::new(InMemoryStore::new()), Arc::new(tools));
//! let result = run(
//!     Task::new("echo hello"),
//!     RunnerConfig::default().apply_env_overrides(),
//!     collaborators,
//! )
//! .await;
//! println!("stopped: {} after {} steps", result.stop_reason, result.steps);
//! # }
//! ```

// Collaborator abstractions (traits and fundamental types)
pub mod core;

// The agent core: runner, planners, reflector, state
pub mod agent;

// Tool registry, dispatch contract, and built-in tools
pub mod tools;

// Error types
pub mod error;

// Re-export commonly used items
pub use error::{Error, Result};

pub use agent::{
    run, Collaborators, KillSwitch, Planner, Proposal, Reflection, ReflectionStatus, RunResult,
    Runner, RunnerConfig, StopReason, Task,
};

pub use crate::core::{
    Clock, InMemoryStore, JsonlTraceSink, LlmBackend, LlmOptions, MemoryKind, MemoryRecord,
    MemoryStore, RandomSource, StructuredResponse, TraceEvent, TraceRecord, TraceSink,
    VecTraceSink,
};

pub use tools::{ErrorKind, Tool, ToolRegistry, ToolResult, ToolSpec};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
