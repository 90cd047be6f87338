//! Reflector - classifies each step's outcome
//!
//! Converts an action, its tool result, and the resulting observation into a
//! `Reflection`. Hard deterministic failures and the finish sentinel are
//! classified locally; everything else goes to the LLM with a bounded tail of
//! history. Given identical inputs and a fixed seed, reflections are stable.

use std::sync::Arc;

use crate::core::llm::{schema_for, LlmBackend, LlmOptions};
use crate::error::Result;
use crate::tools::{ErrorKind, ToolResult, FINISH_TOOL};

use super::prompts;
use super::state::AgentState;
use super::types::{Action, Observation, Reflection};

/// How many trailing observations the reflector sees.
const REFLECTION_TAIL: usize = 6;

/// Classifies step outcomes and extracts lessons.
pub struct Reflector {
    llm: Arc<dyn LlmBackend>,
    options: LlmOptions,
}

impl Reflector {
    /// Create a reflector.
    pub fn new(llm: Arc<dyn LlmBackend>, options: LlmOptions) -> Self {
        Reflector { llm, options }
    }

    /// Classify the most recent step.
    pub async fn reflect(
        &self,
        action: &Action,
        result: &ToolResult,
        observation: &Observation,
        state: &AgentState,
    ) -> Result<Reflection> {
        if let Some(reflection) = Self::classify_locally(action, result) {
            return Ok(reflection);
        }

        let tail = state.recent_observations(REFLECTION_TAIL);
        let prompt =
            prompts::reflection_prompt(action, result, observation, &tail, &state.rolling_summary);
        let schema = schema_for::<Reflection>();

        let mut reflection: Reflection = self
            .llm
            .complete_structured(&prompt, &schema, &self.options)
            .await?
            .parse()?;
        normalize(&mut reflection);
        Ok(reflection)
    }

    /// Verdicts that need no model: the finish sentinel succeeding, and hard
    /// failure kinds whose classification could not be anything but replan.
    fn classify_locally(action: &Action, result: &ToolResult) -> Option<Reflection> {
        if action.tool_name == FINISH_TOOL && result.success {
            let summary = result.output.get("summary").and_then(|v| v.as_str());
            return Some(Reflection::success(
                summary.unwrap_or("task declared complete").to_string(),
            ));
        }
        if !result.success {
            let kind = result.error_kind.unwrap_or(ErrorKind::Unrecoverable);
            let hard = matches!(
                kind,
                ErrorKind::UnknownTool
                    | ErrorKind::InvalidArgs
                    | ErrorKind::SafetyBlocked
                    | ErrorKind::ApprovalRequired
                    | ErrorKind::Unrecoverable
            );
            if hard {
                let detail = result.error_detail.as_deref().unwrap_or("tool failed");
                return Some(Reflection::replan(detail.to_string(), kind.to_string()));
            }
        }
        None
    }
}

/// Empty strings from the model mean "no value".
fn normalize(reflection: &mut Reflection) {
    for field in [
        &mut reflection.next_hint,
        &mut reflection.failure_type,
        &mut reflection.lesson,
    ] {
        if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
            *field = None;
        }
    }
    if reflection
        .memory_write
        .as_ref()
        .is_some_and(|w| w.content.trim().is_empty())
    {
        reflection.memory_write = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{ObservationSource, ReflectionStatus, Task};
    use crate::core::llm::StructuredResponse;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct CannedLlm {
        replies: Mutex<Vec<Value>>,
        calls: Mutex<u32>,
    }

    impl CannedLlm {
        fn new(replies: Vec<Value>) -> Arc<Self> {
            Arc::new(CannedLlm {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for CannedLlm {
        async fn complete_structured(
            &self,
            _prompt: &str,
            _schema: &Value,
            _options: &LlmOptions,
        ) -> Result<StructuredResponse> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(crate::error::Error::Llm("script exhausted".into()));
            }
            Ok(StructuredResponse {
                value: replies.remove(0),
                prompt_tokens: 10,
                completion_tokens: 10,
            })
        }
    }

    fn observation(raw: &str) -> Observation {
        Observation {
            source: ObservationSource::Tool,
            raw: raw.into(),
            salient_facts: vec![],
            seq: 1,
            timestamp: Utc::now(),
        }
    }

    fn state() -> AgentState {
        AgentState::new(Task::new("test"), Utc::now(), 20)
    }

    #[tokio::test]
    async fn finish_success_classifies_without_llm() {
        let llm = CannedLlm::new(vec![]);
        let reflector = Reflector::new(llm.clone(), LlmOptions::balanced());
        let action = Action::new(FINISH_TOOL, json!({"summary": "all done"}));
        let result = ToolResult::success(json!({"summary": "all done"}));

        let reflection = reflector
            .reflect(&action, &result, &observation("done"), &state())
            .await
            .unwrap();
        assert_eq!(reflection.status, ReflectionStatus::Success);
        assert_eq!(reflection.explanation, "all done");
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_classifies_replan_without_llm() {
        let llm = CannedLlm::new(vec![]);
        let reflector = Reflector::new(llm.clone(), LlmOptions::balanced());
        let action = Action::new("do_magic", json!({}));
        let result = ToolResult::failure(ErrorKind::UnknownTool, "no tool 'do_magic'");

        let reflection = reflector
            .reflect(&action, &result, &observation("failed"), &state())
            .await
            .unwrap();
        assert_eq!(reflection.status, ReflectionStatus::Replan);
        assert_eq!(reflection.failure_type.as_deref(), Some("unknown_tool"));
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn ordinary_success_goes_to_llm() {
        let llm = CannedLlm::new(vec![json!({
            "status": "success",
            "explanation": "file content retrieved",
            "lesson": "",
            "next_hint": null
        })]);
        let reflector = Reflector::new(llm.clone(), LlmOptions::balanced());
        let action = Action::new("file_read", json!({"path": "x"}));
        let result = ToolResult::success(json!({"content": "hi"}));

        let reflection = reflector
            .reflect(&action, &result, &observation("read ok"), &state())
            .await
            .unwrap();
        assert_eq!(reflection.status, ReflectionStatus::Success);
        // Empty lesson is normalized away.
        assert!(reflection.lesson.is_none());
        assert_eq!(*llm.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn transient_failure_goes_to_llm() {
        let llm = CannedLlm::new(vec![json!({
            "status": "replan",
            "explanation": "network flaked twice",
            "failure_type": "transient"
        })]);
        let reflector = Reflector::new(llm, LlmOptions::balanced());
        let action = Action::new("fetch", json!({"url": "http://x"}));
        let result = ToolResult::failure(ErrorKind::Transient, "socket reset");

        let reflection = reflector
            .reflect(&action, &result, &observation("failed"), &state())
            .await
            .unwrap();
        assert_eq!(reflection.status, ReflectionStatus::Replan);
    }
}
