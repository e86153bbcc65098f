//! Protocol-level event types: wire shape for one stream event (type + payload).
//! The envelope (session_id, node_id, event_id) is applied separately, see [`crate::envelope`].

use serde::Serialize;
use serde_json::Value;

/// Protocol event: wire shape for one stream event (type + payload).
///
/// Covers the ReAct event stream (`start`/`thought`/`action`/`observation`/
/// `final`/`complete`/`error`) and the plan executor timeline
/// (`task_started`/`task_completed`/`task_failed`/`strategy_initialized`/
/// `strategy_switched`/`goal_checked`/`goal_achieved`).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// ReAct loop started.
    Start { iteration: u32 },
    /// Model emitted a THOUGHT step.
    Thought { content: String, iteration: u32 },
    /// Model emitted an ACTION step.
    Action {
        tool: String,
        args: Value,
        iteration: u32,
    },
    /// Tool execution produced an OBSERVATION step.
    Observation { content: String, iteration: u32 },
    /// Model emitted a FINAL step; terminal.
    Final { content: String, iteration: u32 },
    /// Loop finished (success or failure already reported separately).
    Complete { iteration: u32 },
    /// An error terminated the loop.
    Error { message: String, iteration: u32 },

    /// A plan task started execution.
    TaskStarted { task_id: String },
    /// A plan task completed successfully.
    TaskCompleted { task_id: String, duration_ms: u64 },
    /// A plan task failed.
    TaskFailed { task_id: String, error: String },
    /// The executor picked its initial strategy for the plan.
    StrategyInitialized { strategy: String },
    /// The executor switched strategy between levels.
    StrategySwitched {
        from: String,
        to: String,
        parallel_efficiency: f64,
        threshold: f64,
    },
    /// A periodic goal-criteria evaluation ran.
    GoalChecked { tasks_completed: usize, satisfied: bool },
    /// Goal criteria were satisfied; execution may stop early.
    GoalAchieved { tasks_completed: usize },
}

impl ProtocolEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
