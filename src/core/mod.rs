//! Collaborator abstractions (traits and fundamental types)
//!
//! Everything the runner needs from the outside world enters through these
//! interfaces: the LLM backend, the long-term memory store, the trace sink,
//! and the clock/randomness pair that makes runs reproducible.

pub mod clock;
pub mod llm;
pub mod memory;
pub mod trace;

pub use clock::{Clock, ManualClock, OsRandom, RandomSource, SeededRandom, SystemClock};
pub use llm::{schema_for, LlmBackend, LlmOptions, StructuredResponse};
pub use memory::{InMemoryStore, MemoryKind, MemoryRecord, MemoryStore};
pub use trace::{JsonlTraceSink, TraceEvent, TraceRecord, TraceSink, VecTraceSink};
