//! Request Pipeline (C5): orchestrates C1 -> C2 -> (RAG) -> C3 -> C2-write ->
//! history-append for a single conversational turn.

pub mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cache::{fingerprint, Cache};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::memory::{persist_detached, MemoryBackend};
use crate::message::{Conversation, Message};
use crate::provider::{CompletionRequest, CompletionResponse, ProviderAdapter};
use crate::rag::{augment_with_context, EmbeddingProvider, VectorStore};
use crate::rate_limiter::RateLimiter;
use crate::tool_loop::ToolLoop;
use crate::tools::ToolRegistry;

/// Optional collaborators the pipeline consults when configured. Each is an
/// external black box per spec §6.
#[derive(Default, Clone)]
pub struct Collaborators {
    pub cache: Option<Arc<dyn Cache>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub memory_backend: Option<Arc<dyn MemoryBackend>>,
    pub rag_collection: String,
}

/// Orchestrates a single conversational turn against one provider.
pub struct RequestPipeline {
    config: AgentConfig,
    provider: Arc<dyn ProviderAdapter>,
    tools: Arc<ToolRegistry>,
    collaborators: Collaborators,
}

impl RequestPipeline {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn ProviderAdapter>,
        tools: Arc<ToolRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            provider,
            tools,
            collaborators,
        }
    }

    fn rate_limit_key(&self) -> &str {
        if self.config.rate_limit.per_key {
            &self.config.model
        } else {
            ""
        }
    }

    /// Runs pre-flight gating (rate limit, cache lookup) shared by `ask`,
    /// `ask_multiple`, and `stream`. Returns `Some(cached_text)` on a cache
    /// hit, `None` to proceed to the provider.
    async fn preflight(
        &self,
        conversation: &Conversation,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AgentError> {
        if self.config.rate_limit.enabled {
            if let Some(limiter) = &self.collaborators.rate_limiter {
                limiter.wait(self.rate_limit_key(), cancel).await?;
            }
        }

        self.config.validate()?;

        if self.config.cache.enabled {
            if let Some(cache) = &self.collaborators.cache {
                let key = fingerprint(
                    &self.config.model,
                    message,
                    self.config.temperature,
                    conversation.system_prompt(),
                );
                if let Some(cached) = cache.get(&key).await {
                    return Ok(Some(cached));
                }
            }
        }

        Ok(None)
    }

    async fn maybe_augment(&self, message: &str) -> Result<String, AgentError> {
        if !self.config.rag.enabled {
            return Ok(message.to_string());
        }
        match (&self.collaborators.vector_store, &self.collaborators.embedder) {
            (Some(store), Some(embedder)) => {
                augment_with_context(
                    store.as_ref(),
                    embedder.as_ref(),
                    &self.collaborators.rag_collection,
                    message,
                    self.config.rag.top_k,
                    self.config.rag.min_score,
                )
                .await
            }
            _ => Ok(message.to_string()),
        }
    }

    fn assemble(&self, conversation: &Conversation, user_message: &str) -> Vec<Message> {
        let mut messages = conversation.render();
        messages.push(Message::user(user_message));
        messages
    }

    /// Single-turn completion. See §4.4 for the full contract.
    #[instrument(skip(self, conversation, cancel))]
    pub async fn ask(
        &self,
        conversation: &mut Conversation,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<String, AgentError> {
        if let Some(cached) = self.preflight(conversation, message, &cancel).await? {
            // Deliberate idempotence choice (§9): a cache hit short-circuits
            // the entire turn, including history append and usage tracking.
            return Ok(cached);
        }

        if self.config.tool_loop.auto_execute && !self.tools.is_empty() {
            let tool_loop = ToolLoop::new(self.config.clone(), self.provider.clone(), self.tools.clone());
            return tool_loop.run(conversation, message, cancel).await;
        }

        let augmented = self.maybe_augment(message).await?;
        let messages = self.assemble(conversation, &augmented);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages,
            system: conversation.system_prompt().map(str::to_string),
            temperature: self.config.temperature,
            ..Default::default()
        };

        let deadline = Instant::now() + self.config.request_timeout;
        let provider = self.provider.clone();
        let response = retry::with_retry(&self.config.retry, deadline, &cancel, || {
            let provider = provider.clone();
            let request = request.clone();
            async move { provider.complete(request).await }
        })
        .await?;

        self.post_flight(conversation, message, &response).await;
        Ok(response.content)
    }

    /// Requests N choices from the provider; appends only the first to
    /// history.
    pub async fn ask_multiple(
        &self,
        conversation: &mut Conversation,
        message: &str,
        n: u32,
        cancel: CancellationToken,
    ) -> Result<Vec<String>, AgentError> {
        self.config.validate()?;
        let augmented = self.maybe_augment(message).await?;
        let messages = self.assemble(conversation, &augmented);

        let mut choices = Vec::with_capacity(n.max(1) as usize);
        let deadline = Instant::now() + self.config.request_timeout;
        for _ in 0..n.max(1) {
            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                system: conversation.system_prompt().map(str::to_string),
                temperature: self.config.temperature,
                ..Default::default()
            };
            let provider = self.provider.clone();
            let response = retry::with_retry(&self.config.retry, deadline, &cancel, || {
                let provider = provider.clone();
                let request = request.clone();
                async move { provider.complete(request).await }
            })
            .await?;
            choices.push(response.content);
        }

        if let Some(first) = choices.first() {
            if self.config.auto_memory {
                conversation.push_turn(vec![Message::user(message), Message::assistant(first.clone())]);
            }
        }

        Ok(choices)
    }

    /// Identical to `ask` except the provider is driven via `Stream` and
    /// deltas are forwarded to `on_chunk` as they arrive.
    pub async fn stream(
        &self,
        conversation: &mut Conversation,
        message: &str,
        on_chunk: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, AgentError> {
        if let Some(cached) = self.preflight(conversation, message, &cancel).await? {
            return Ok(cached);
        }

        let augmented = self.maybe_augment(message).await?;
        let messages = self.assemble(conversation, &augmented);
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages,
            system: conversation.system_prompt().map(str::to_string),
            temperature: self.config.temperature,
            ..Default::default()
        };

        let response = self.provider.stream(request, on_chunk).await?;
        self.post_flight(conversation, message, &response).await;
        Ok(response.content)
    }

    async fn post_flight(&self, conversation: &mut Conversation, message: &str, response: &CompletionResponse) {
        if self.config.cache.enabled {
            if let Some(cache) = &self.collaborators.cache {
                let key = fingerprint(
                    &self.config.model,
                    message,
                    self.config.temperature,
                    conversation.system_prompt(),
                );
                cache.set(&key, response.content.clone(), self.config.cache.default_ttl).await;
            }
        }

        if self.config.auto_memory {
            conversation.push_turn(vec![Message::user(message), Message::assistant(response.content.clone())]);
        }

        if let Some(backend) = &self.collaborators.memory_backend {
            persist_detached(
                backend.clone(),
                self.config.model.clone(),
                conversation.render(),
                Duration::from_secs(5),
            );
        }
    }
}
