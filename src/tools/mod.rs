//! Tool registry, dispatch contract, and built-in tools

mod builtin;
mod registry;
mod schema;
mod traits;

pub use builtin::{
    AskChannel, FinishTool, HumanAskTool, MemorySearchTool, MemoryStoreTool, FINISH_TOOL,
    HUMAN_ASK_TOOL, MEMORY_SEARCH_TOOL, MEMORY_STORE_TOOL,
};
pub use registry::{DispatchOutcome, RetryPolicy, ToolRegistry};
pub use schema::validate_args;
pub use traits::{
    AllowAllPolicy, ApprovalHandler, CallContext, ErrorKind, SafetyPolicy, SafetyVerdict, Tool,
    ToolCall, ToolResult, ToolSpec,
};
