//! Memory store trait - Abstract interface for long-term memory
//!
//! The core treats memory as an opaque key/value+vector store with two
//! operations: `search` and `store`. Embedding details, persistence, and
//! eviction belong to the collaborator. The store must provide at least
//! read-your-writes within the process: a record stored in step N is
//! retrievable in step N+1.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;

/// Kind of a long-term memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Lessons learned from executing steps.
    Experience,
    /// How-to knowledge: sequences of actions that worked.
    Procedure,
    /// Facts about the world or the user's environment.
    Knowledge,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::Experience => write!(f, "experience"),
            MemoryKind::Procedure => write!(f, "procedure"),
            MemoryKind::Knowledge => write!(f, "knowledge"),
        }
    }
}

/// A record returned from a memory search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier assigned by the store.
    pub id: String,
    /// Record kind.
    pub kind: MemoryKind,
    /// Key the record was stored under.
    pub key: String,
    /// Text content.
    pub content: String,
    /// Relevance score for the query (higher is more relevant).
    pub score: f32,
    /// When the record was stored.
    pub created_at: DateTime<Utc>,
}

/// Abstract interface for the long-term memory collaborator.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Search for the `k` records most relevant to `query`.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<MemoryRecord>>;

    /// Store a record, returning its id.
    async fn store(&self, kind: MemoryKind, key: &str, content: &str) -> Result<String>;
}

/// In-process memory store with token-overlap relevance scoring.
///
/// Good enough to run and test the loop without an external vector store.
/// Scoring counts query tokens appearing in the record (key + content), with
/// recency as the tiebreak.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn overlap_score(query: &str, record: &MemoryRecord) -> f32 {
        let haystack = format!("{} {}", record.key, record.content).to_lowercase();
        let tokens: Vec<&str> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .collect();
        if tokens.is_empty() {
            return 0.0;
        }
        let hits = tokens
            .iter()
            .filter(|t| haystack.contains(&t.to_lowercase()))
            .count();
        hits as f32 / tokens.len() as f32
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<MemoryRecord>> {
        let entries = self.entries.read().unwrap();
        let mut scored: Vec<MemoryRecord> = entries
            .iter()
            .map(|e| {
                let mut rec = e.clone();
                rec.score = Self::overlap_score(query, e);
                rec
            })
            .filter(|r| r.score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn store(&self, kind: MemoryKind, key: &str, content: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let record = MemoryRecord {
            id: id.clone(),
            kind,
            key: key.to_string(),
            content: content.to_string(),
            score: 0.0,
            created_at: Utc::now(),
        };
        self.entries.write().unwrap().push(record);
        Ok(id)
    }
}
