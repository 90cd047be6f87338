//! Localized recovery ladder
//!
//! Ordered attempts made before a failure is surfaced: dismiss a modal,
//! search for the missing target, scroll it into view, re-snapshot the UI,
//! wait and retry, and finally ask the user. The concrete tool names come
//! from the registry; a rung whose tool is absent is skipped.

use serde_json::json;

use crate::tools::{ToolRegistry, HUMAN_ASK_TOOL};

use super::types::Action;

/// One rung of the ladder: a tool name and how to build its arguments from
/// the failure detail.
struct RecoveryRung {
    tool: &'static str,
    build_args: fn(&str) -> serde_json::Value,
}

const LADDER: &[RecoveryRung] = &[
    RecoveryRung {
        tool: "dismiss_dialog",
        build_args: |_| json!({}),
    },
    RecoveryRung {
        tool: "find_target",
        build_args: |detail| json!({ "query": detail }),
    },
    RecoveryRung {
        tool: "scroll",
        build_args: |_| json!({ "direction": "down" }),
    },
    RecoveryRung {
        tool: "snapshot_ui",
        build_args: |_| json!({}),
    },
    RecoveryRung {
        tool: "wait",
        build_args: |_| json!({ "seconds": 1 }),
    },
];

/// Pick the first applicable recovery action for a failure. Returns `None`
/// when no recovery tool is registered (or asking the user is disallowed).
pub fn recovery_action(
    registry: &ToolRegistry,
    allow_human_ask: bool,
    failure_detail: &str,
) -> Option<Action> {
    for rung in LADDER {
        if registry.contains(rung.tool) {
            let mut action = Action::new(rung.tool, (rung.build_args)(failure_detail));
            action.rationale = Some(format!("recovery after: {}", failure_detail));
            return Some(action);
        }
    }
    if allow_human_ask && registry.contains(HUMAN_ASK_TOOL) {
        let mut action = Action::new(
            HUMAN_ASK_TOOL,
            json!({ "prompt": format!("I'm stuck: {}. How should I proceed?", failure_detail) }),
        );
        action.rationale = Some("recovery exhausted, asking the user".into());
        return Some(action);
    }
    None
}
