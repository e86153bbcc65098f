//! Error taxonomy for the agent runtime (kinds, not per-component types).
//!
//! Retryability is a property of the *kind*, not the call site: see
//! [`AgentError::is_retryable`]. Chained causes are preserved via
//! `#[source]`/`#[from]` so callers keep the full diagnostic chain.

use thiserror::Error;

/// Errors produced anywhere in the request pipeline, tool loop, ReAct loop,
/// plan decomposer/executor, or dispatcher.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing credential: {0}")]
    CredentialMissing(String),

    #[error("rate limit exceeded for key {key:?}")]
    RateLimitExceeded { key: String },

    #[error("timed out waiting for a rate-limit token for key {key:?}")]
    RateLimitWaitTimeout { key: String },

    #[error("provider error (transient): {0}")]
    ProviderTransient(String),

    #[error("provider error (permanent): {0}")]
    ProviderPermanent(String),

    #[error("operation canceled")]
    Canceled,

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("tool timed out after {0:?}")]
    ToolTimeout(std::time::Duration),

    #[error("tool handler panicked: {0}")]
    ToolPanicked(String),

    #[error("max tool rounds ({0}) exceeded without a terminal response")]
    MaxToolRoundsExceeded(u32),

    #[error("ReAct loop exceeded its iteration limit ({0})")]
    ReActIterationLimit(u32),

    #[error("ReAct loop exceeded its wall-clock timeout ({0:?})")]
    ReActTimeout(std::time::Duration),

    #[error("failed to parse model output: {0}")]
    ParseError(String),

    #[error("task validation failed: {0}")]
    TaskValidationError(String),

    #[error("plan execution deadlocked: no task could make progress")]
    DependencyDeadlock,

    #[error("no healthy or degraded providers available")]
    NoProvidersAvailable,

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Whether a bounded retry loop (§7) should attempt this error again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::RateLimitExceeded { .. }
                | AgentError::RateLimitWaitTimeout { .. }
                | AgentError::ProviderTransient(_)
        )
    }

    /// A short machine-readable kind name, for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidConfig(_) => "invalid_config",
            AgentError::CredentialMissing(_) => "credential_missing",
            AgentError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AgentError::RateLimitWaitTimeout { .. } => "rate_limit_wait_timeout",
            AgentError::ProviderTransient(_) => "provider_transient",
            AgentError::ProviderPermanent(_) => "provider_permanent",
            AgentError::Canceled => "canceled",
            AgentError::ToolNotFound(_) => "tool_not_found",
            AgentError::ToolExecutionFailed(_) => "tool_execution_failed",
            AgentError::ToolTimeout(_) => "tool_timeout",
            AgentError::ToolPanicked(_) => "tool_panicked",
            AgentError::MaxToolRoundsExceeded(_) => "max_tool_rounds_exceeded",
            AgentError::ReActIterationLimit(_) => "react_iteration_limit",
            AgentError::ReActTimeout(_) => "react_timeout",
            AgentError::ParseError(_) => "parse_error",
            AgentError::TaskValidationError(_) => "task_validation_error",
            AgentError::DependencyDeadlock => "dependency_deadlock",
            AgentError::NoProvidersAvailable => "no_providers_available",
            AgentError::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_are_exactly_the_taxonomy_rows_marked_yes() {
        assert!(AgentError::ProviderTransient("x".into()).is_retryable());
        assert!(AgentError::RateLimitExceeded { key: "k".into() }.is_retryable());
        assert!(AgentError::RateLimitWaitTimeout { key: "k".into() }.is_retryable());
        assert!(!AgentError::ProviderPermanent("x".into()).is_retryable());
        assert!(!AgentError::ToolTimeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(!AgentError::Canceled.is_retryable());
    }
}
