use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::tools::ToolCall;

use super::{CompletionRequest, CompletionResponse, ProviderAdapter, SelfReportedHealth, Usage};

/// A scripted response the mock provider returns in sequence; the last
/// scripted response repeats once the queue is exhausted.
#[derive(Clone)]
pub struct ScriptedResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub fail: Option<String>,
    pub delay: Option<Duration>,
}

impl ScriptedResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            fail: None,
            delay: None,
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![call],
            fail: None,
            delay: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            tool_calls: Vec::new(),
            fail: Some(message.into()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A fixed/scripted provider used across unit and integration tests; never
/// speaks a real wire protocol.
pub struct MockProvider {
    name: String,
    script: Mutex<Vec<ScriptedResponse>>,
    cursor: Mutex<usize>,
    calls: std::sync::atomic::AtomicU64,
    health: Mutex<SelfReportedHealth>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::scripted(name, vec![ScriptedResponse::text(content)])
    }

    pub fn scripted(name: impl Into<String>, script: Vec<ScriptedResponse>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script),
            cursor: Mutex::new(0),
            calls: Default::default(),
            health: Mutex::new(SelfReportedHealth::Available),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_health(&self, health: SelfReportedHealth) {
        *self.health.lock().expect("health mutex poisoned") = health;
    }

    fn next(&self) -> ScriptedResponse {
        let script = self.script.lock().expect("script mutex poisoned");
        let mut cursor = self.cursor.lock().expect("cursor mutex poisoned");
        let idx = (*cursor).min(script.len() - 1);
        if idx + 1 < script.len() {
            *cursor = idx + 1;
        }
        script[idx].clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, AgentError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let scripted = self.next();
        if let Some(d) = scripted.delay {
            tokio::time::sleep(d).await;
        }
        if let Some(msg) = scripted.fail {
            return Err(AgentError::ProviderTransient(msg));
        }
        Ok(CompletionResponse {
            id: format!("mock-{}", self.calls()),
            content: scripted.content,
            finish_reason: if scripted.tool_calls.is_empty() { "stop".into() } else { "tool_calls".into() },
            tool_calls: scripted.tool_calls,
            refusal: None,
            usage: Usage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            },
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        on_chunk: mpsc::Sender<String>,
    ) -> Result<CompletionResponse, AgentError> {
        let resp = self.complete(request).await?;
        if !resp.content.is_empty() {
            let _ = on_chunk.send(resp.content.clone()).await;
        }
        Ok(resp)
    }

    fn health(&self) -> SelfReportedHealth {
        *self.health.lock().expect("health mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_are_returned_in_order_then_repeat_last() {
        let provider = MockProvider::scripted(
            "p",
            vec![ScriptedResponse::text("first"), ScriptedResponse::text("second")],
        );
        let req = CompletionRequest::default();
        assert_eq!(provider.complete(req.clone()).await.unwrap().content, "first");
        assert_eq!(provider.complete(req.clone()).await.unwrap().content, "second");
        assert_eq!(provider.complete(req).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn failing_script_entry_surfaces_as_provider_transient() {
        let provider = MockProvider::scripted("p", vec![ScriptedResponse::failing("boom")]);
        let err = provider.complete(CompletionRequest::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderTransient(_)));
    }
}
