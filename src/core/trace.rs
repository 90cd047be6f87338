//! Execution trace - ordered, append-only log of a run
//!
//! Every run writes a totally ordered sequence of records: observations,
//! memory events, plans, steps, reflections, and exactly one terminal `stop`.
//! Sinks must guarantee append-atomicity: a partially written record is never
//! observable.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent::types::{Observation, Plan, Reflection, Step, StopReason};
use crate::core::memory::MemoryKind;
use crate::error::{Error, Result};

/// Payload of one trace record, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// An observation was recorded.
    Observation { observation: Observation },
    /// Long-term memory was queried.
    MemoryQuery { query: String, hits: usize },
    /// A record was written to long-term memory.
    MemoryWrite {
        kind: MemoryKind,
        key: String,
        /// The write originated from a failed step.
        failed_step: bool,
    },
    /// A plan was adopted.
    Plan { plan: Plan },
    /// A step completed: action, result, observation, and reflection.
    Step { step: Step },
    /// A reflection was produced.
    Reflection { step_index: u32, reflection: Reflection },
    /// The run terminated. Always the final record.
    Stop {
        reason: StopReason,
        success: bool,
        steps: u32,
        duration_seconds: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_cost: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_summary: Option<String>,
    },
}

/// One record in a run's trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Monotonic sequence number within the run.
    pub seq: u64,
    /// The run this record belongs to.
    pub run_id: Uuid,
    /// ISO-8601 wall-clock timestamp.
    pub timestamp: DateTime<Utc>,
    /// The payload.
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Destination for trace records.
///
/// `append` must be atomic per record. One run owns one sink; a sink shared
/// across runs must serialize writers itself.
pub trait TraceSink: Send {
    /// Append one record.
    fn append(&mut self, record: &TraceRecord) -> Result<()>;

    /// Flush and release the sink.
    fn close(&mut self) -> Result<()>;
}

/// In-memory sink; clones share the same record buffer.
#[derive(Clone, Default)]
pub struct VecTraceSink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl VecTraceSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records appended so far.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl TraceSink for VecTraceSink {
    fn append(&mut self, record: &TraceRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Newline-delimited JSON file sink.
///
/// Each record is rendered fully before a single `write_all` of the line, so
/// a reader never sees a partial record.
pub struct JsonlTraceSink {
    file: File,
    path: PathBuf,
}

impl JsonlTraceSink {
    /// Create or append to a JSONL trace file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Trace(format!("open {}: {}", path.display(), e)))?;
        Ok(JsonlTraceSink { file, path })
    }

    /// Path of the trace file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for JsonlTraceSink {
    fn append(&mut self, record: &TraceRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .map_err(|e| Error::Trace(format!("append to {}: {}", self.path.display(), e)))?;
        self.file
            .flush()
            .map_err(|e| Error::Trace(format!("flush {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| Error::Trace(format!("sync {}: {}", self.path.display(), e)))
    }
}
