//! Agent configuration.
//!
//! One config concern, one sub-struct; no god object with forty optional
//! fields. `AgentConfig` is built once via [`AgentConfig::new`] and is
//! immutable thereafter — the pipeline's behaviour is fully determined by
//! this value plus conversation state (§9 redesign note: no fluent builder).

use std::time::Duration;

use crate::error::AgentError;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub per_key: bool,
    pub key_timeout: Duration,
    pub wait_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 10.0,
            burst_size: 10,
            per_key: false,
            key_timeout: Duration::from_secs(300),
            wait_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 1000,
            default_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub min_score: f64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: 3,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    pub auto_execute: bool,
    pub max_rounds: u32,
    pub parallel: bool,
    pub max_workers: usize,
    pub default_tool_timeout: Duration,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            auto_execute: false,
            max_rounds: 10,
            parallel: true,
            max_workers: 4,
            default_tool_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReActConfig {
    pub max_iterations: u32,
    pub timeout: Duration,
    pub strict: bool,
    pub event_buffer: usize,
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout: Duration::from_secs(60),
            strict: false,
            event_buffer: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub max_depth: u32,
    pub max_subtasks: u32,
    pub min_subtasks: u32,
    pub max_parallel: usize,
    pub adaptive_threshold: f64,
    pub goal_check_interval: u32,
    /// Complexity-score threshold below which the decomposer returns a
    /// single-task plan without calling the model.
    pub min_subtask_split: u32,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_subtasks: 10,
            min_subtasks: 2,
            max_parallel: 4,
            adaptive_threshold: 0.3,
            goal_check_interval: 3,
            min_subtask_split: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            exponential: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub sticky_sessions: bool,
    pub max_concurrency: i64,
    pub response_window: usize,
    pub min_samples_for_downgrade: u64,
    pub session_map_soft_ceiling: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sticky_sessions: false,
            max_concurrency: 0,
            response_window: 100,
            min_samples_for_downgrade: 5,
            session_map_soft_ceiling: 1000,
        }
    }
}

/// Top-level, immutable agent configuration. Constructed once via `new`;
/// every field is a sum type for one concern.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_history: Option<usize>,
    pub auto_memory: bool,
    pub request_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub rag: RagConfig,
    pub tool_loop: ToolLoopConfig,
    pub react: ReActConfig,
    pub plan: PlanConfig,
    pub retry: RetryConfig,
    pub dispatcher: DispatcherConfig,
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            temperature: None,
            max_history: None,
            auto_memory: true,
            request_timeout: Duration::from_secs(60),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            rag: RagConfig::default(),
            tool_loop: ToolLoopConfig::default(),
            react: ReActConfig::default(),
            plan: PlanConfig::default(),
            retry: RetryConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }

    /// Validates composite configuration that can't be checked field-by-field
    /// (e.g. a dependent component is enabled without its prerequisite).
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::InvalidConfig("model must not be empty".into()));
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_second <= 0.0 {
            return Err(AgentError::InvalidConfig(
                "rate_limit.requests_per_second must be > 0".into(),
            ));
        }
        if self.rate_limit.enabled && self.rate_limit.burst_size < 1 {
            return Err(AgentError::InvalidConfig(
                "rate_limit.burst_size must be >= 1".into(),
            ));
        }
        if self.plan.max_depth == 0 {
            return Err(AgentError::InvalidConfig("plan.max_depth must be >= 1".into()));
        }
        Ok(())
    }
}
