//! # agent-runtime
//!
//! Core request-execution engine for a language-model agent: rate limiting,
//! response caching, retrieval augmentation, tool orchestration, ReAct
//! reasoning loops, DAG-based plan execution, and multi-provider dispatch.
//!
//! ## Design principles
//!
//! - **One concern, one module**: rate limiting, caching, and dispatch are
//!   independent collaborators composed by [`Agent`], not a single god
//!   object.
//! - **Everything external is a trait**: [`provider::ProviderAdapter`],
//!   [`tools::Tool`], [`cache::Cache`], [`rag::VectorStore`],
//!   [`memory::MemoryBackend`] are all injectable trait objects so tests run
//!   against fakes and production wires in real backends.
//! - **Cooperative cancellation**: every suspension point takes a
//!   `tokio_util::sync::CancellationToken`; there is no forced-kill path.
//! - **Frozen configuration**: [`config::AgentConfig`] is built once and
//!   never mutated; behaviour is a pure function of config + conversation
//!   state.
//!
//! ## Main modules
//!
//! - [`config`]: [`config::AgentConfig`] and its per-concern sub-configs.
//! - [`error`]: [`error::AgentError`], the single error type threaded through
//!   the whole crate.
//! - [`message`]: [`message::Message`], [`message::Conversation`].
//! - [`rate_limiter`]: token-bucket rate limiting ([`rate_limiter::RateLimiter`]).
//! - [`cache`]: response cache ([`cache::Cache`], [`cache::InMemoryCache`]).
//! - [`provider`]: [`provider::ProviderAdapter`] trait and [`provider::MockProvider`].
//! - [`tools`]: [`tools::Tool`], [`tools::ToolRegistry`], [`tools::ToolOrchestrator`].
//! - [`rag`]: [`rag::VectorStore`], [`rag::EmbeddingProvider`], context augmentation.
//! - [`memory`]: [`memory::MemoryBackend`] for long-term conversation persistence.
//! - [`pipeline`]: [`pipeline::RequestPipeline`], the single-turn orchestration core.
//! - [`tool_loop`]: [`tool_loop::ToolLoop`], the auto tool-call cycle.
//! - [`react`]: [`react::ReActLoop`], the Thought/Action/Observation/Final state machine.
//! - [`plan`]: [`plan::PlanDecomposer`], [`plan::PlanExecutor`], the task DAG engine.
//! - [`dispatcher`]: [`dispatcher::Dispatcher`], health-scored multi-provider selection.
//!
//! Key types are re-exported at crate root.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod message;
pub mod pipeline;
pub mod provider;
pub mod rag;
pub mod rate_limiter;
pub mod react;
pub mod tool_loop;
pub mod tools;

pub mod plan;

mod agent;

pub use agent::Agent;
pub use cache::{Cache, InMemoryCache};
pub use config::AgentConfig;
pub use dispatcher::{Dispatcher, DispatchHandle, ProviderStatus};
pub use error::AgentError;
pub use message::{Conversation, Message, Role};
pub use plan::{Plan, PlanDecomposer, PlanExecutor, PlanResult, PlanStatus, Strategy, Task};
pub use provider::{CompletionRequest, CompletionResponse, ProviderAdapter};
pub use react::{ReActLoop, ReActOutcome};
pub use tool_loop::ToolLoop;
pub use tools::{Tool, ToolCall, ToolRegistry, ToolResult};
