//! Tool types and the dependency-aware tool orchestrator (C4).

mod orchestrator;

pub use orchestrator::ToolOrchestrator;

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// A schema describing a tool's name, description, and JSON input schema,
/// suitable for handing to a provider as part of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// A single requested tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub depends_on: HashSet<String>,
}

/// Outcome of executing one [`ToolCall`].
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub output: Result<String, String>,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub duration: Duration,
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        self.output.is_ok()
    }
}

/// A tool the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name; must match the name used in [`ToolCall::name`].
    fn name(&self) -> &str;

    /// Description and input schema handed to providers.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool. Implementations should respect `args` validated
    /// against `spec().input_schema` and return plain text output.
    async fn call(&self, args: Value) -> Result<String, AgentError>;
}

/// A registry of tools addressable by name, used by the tool loop (C6),
/// ReAct loop (C7), and tool orchestrator (C4).
///
/// Stores `Arc<dyn Tool>` (not `Box`) so the orchestrator's per-call lookup
/// closure can hand out an owned, independently-droppable handle per call
/// without the registry outliving the call.
#[derive(Default)]
pub struct ToolRegistry {
    tools: std::collections::HashMap<String, std::sync::Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let tool: std::sync::Arc<dyn Tool> = std::sync::Arc::from(tool);
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A tool used across unit tests: echoes its `value` arg, optionally
    /// sleeping first and/or returning an error.
    pub struct EchoTool {
        pub name: String,
        pub delay: Option<Duration>,
        pub fail: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: Some("echoes its input".into()),
                input_schema: serde_json::json!({}),
            }
        }

        async fn call(&self, args: Value) -> Result<String, AgentError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                return Err(AgentError::ToolExecutionFailed(format!("{} failed", self.name)));
            }
            Ok(args.get("value").cloned().unwrap_or(Value::Null).to_string())
        }
    }

    /// A tool that panics unconditionally, used to exercise the orchestrator's
    /// panic barrier.
    pub struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic_tool"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "panic_tool".into(),
                description: None,
                input_schema: serde_json::json!({}),
            }
        }

        async fn call(&self, _args: Value) -> Result<String, AgentError> {
            panic!("boom");
        }
    }
}
