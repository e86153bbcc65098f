//! Provider Adapter (C3): pure I/O to a remote LLM. The runtime treats the
//! wire protocol to concrete vendors as opaque — this module only defines the
//! contract and a mock used by tests and the dispatcher (C10).
//!
//! Grounded on the teacher's `LlmClient` trait, generalized from a single
//! fixed client to one of several interchangeable named providers.

pub mod mock;

pub use mock::MockProvider;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::Message;

/// A request to complete one conversational turn.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub seed: Option<u64>,
    pub stop: Option<Vec<String>>,
    pub tools: Option<Vec<Value>>,
    pub response_format: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub content: String,
    pub finish_reason: String,
    pub tool_calls: Vec<crate::tools::ToolCall>,
    pub refusal: Option<String>,
    pub usage: Usage,
}

/// A streamed textual delta handed to the caller's chunk callback, in wire
/// order.
pub type StreamChunk = String;

/// Health state a dispatcher (C10) reads to decide candidacy. Providers
/// report it via [`ProviderAdapter::health`]; the dispatcher is the
/// authority that derives and stores the *tracked* status from outcomes —
/// this is the provider's own self-reported signal, independent of that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfReportedHealth {
    Available,
    Unavailable,
}

/// Abstract interface consumed by the request pipeline (C5) and, indirectly,
/// by the multi-provider dispatcher (C10). Implementations perform pure I/O;
/// this crate never speaks a vendor wire protocol directly.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Unique provider name, used by the dispatcher for selection and
    /// sticky-session bookkeeping.
    fn name(&self) -> &str;

    /// Single synchronous completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AgentError>;

    /// Server-sent chunks; `on_chunk` is invoked per textual delta in wire
    /// order. Returns the aggregated response once the stream ends.
    async fn stream(
        &self,
        request: CompletionRequest,
        on_chunk: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, AgentError>;

    /// Cheap self-reported liveness check; does not replace the dispatcher's
    /// measured health tracking.
    fn health(&self) -> SelfReportedHealth {
        SelfReportedHealth::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_completes_with_configured_content() {
        let provider = MockProvider::new("mock-a", "hello");
        let resp = provider
            .complete(CompletionRequest {
                model: "m".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(provider.name(), "mock-a");
    }
}
