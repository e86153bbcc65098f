//! Top-level `Agent`: wires the rate limiter, cache, provider(s), tools, RAG,
//! tool loop, ReAct loop, and plan engine together behind one entry point.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::dispatcher::{DispatchHandle, Dispatcher};
use crate::error::AgentError;
use crate::message::Conversation;
use crate::pipeline::{Collaborators, RequestPipeline};
use crate::plan::{AgentExecutor, Plan, PlanDecomposer, PlanExecutor, PlanModel, PlanResult, Strategy};
use crate::provider::ProviderAdapter;
use crate::react::{ReActLoop, ReActOutcome};
use crate::tools::ToolRegistry;

/// Where an `Agent` gets a provider for a given call: a single fixed
/// provider, or a [`Dispatcher`] choosing among several per request.
enum ProviderSource {
    Fixed(Arc<dyn ProviderAdapter>),
    Dispatched(Arc<Dispatcher>),
}

/// The agent: a frozen [`AgentConfig`] plus the collaborators it was built
/// with. Cheap to call concurrently — each call builds a short-lived
/// [`RequestPipeline`] around the resolved provider rather than holding
/// mutable shared state.
pub struct Agent {
    config: AgentConfig,
    tools: Arc<ToolRegistry>,
    collaborators: Collaborators,
    providers: ProviderSource,
    plan_model: Option<Arc<dyn PlanModel>>,
}

impl Agent {
    /// Builds an agent backed by a single provider.
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn ProviderAdapter>,
        tools: Arc<ToolRegistry>,
        collaborators: Collaborators,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            config,
            tools,
            collaborators,
            providers: ProviderSource::Fixed(provider),
            plan_model: None,
        })
    }

    /// Builds an agent backed by a multi-provider [`Dispatcher`] (C10):
    /// every call selects a provider by health and load before running.
    pub fn with_dispatcher(
        config: AgentConfig,
        dispatcher: Arc<Dispatcher>,
        tools: Arc<ToolRegistry>,
        collaborators: Collaborators,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            config,
            tools,
            collaborators,
            providers: ProviderSource::Dispatched(dispatcher),
            plan_model: None,
        })
    }

    /// Attaches a [`PlanModel`] so [`Agent::plan`] can decompose goals.
    pub fn with_plan_model(mut self, model: Arc<dyn PlanModel>) -> Self {
        self.plan_model = Some(model);
        self
    }

    fn resolve_provider(&self, session_id: Option<&str>) -> Result<(Arc<dyn ProviderAdapter>, Option<DispatchHandle>), AgentError> {
        match &self.providers {
            ProviderSource::Fixed(provider) => Ok((provider.clone(), None)),
            ProviderSource::Dispatched(dispatcher) => {
                let handle = dispatcher.select(session_id)?;
                let provider = handle.provider();
                Ok((provider, Some(handle)))
            }
        }
    }

    fn pipeline_for(&self, session_id: Option<&str>) -> Result<(RequestPipeline, Option<DispatchHandle>), AgentError> {
        let (provider, handle) = self.resolve_provider(session_id)?;
        let pipeline = RequestPipeline::new(self.config.clone(), provider, self.tools.clone(), self.collaborators.clone());
        Ok((pipeline, handle))
    }

    /// Single-turn completion (C5). See [`RequestPipeline::ask`].
    pub async fn ask(&self, conversation: &mut Conversation, message: &str, cancel: CancellationToken) -> Result<String, AgentError> {
        let (pipeline, handle) = self.pipeline_for(None)?;
        let result = pipeline.ask(conversation, message, cancel).await;
        if let Some(handle) = handle {
            handle.complete(result.is_ok());
        }
        result
    }

    /// Single-turn completion pinned to a dispatcher sticky session.
    pub async fn ask_with_session(
        &self,
        conversation: &mut Conversation,
        message: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<String, AgentError> {
        let (pipeline, handle) = self.pipeline_for(Some(session_id))?;
        let result = pipeline.ask(conversation, message, cancel).await;
        if let Some(handle) = handle {
            handle.complete(result.is_ok());
        }
        result
    }

    pub async fn ask_multiple(
        &self,
        conversation: &mut Conversation,
        message: &str,
        n: u32,
        cancel: CancellationToken,
    ) -> Result<Vec<String>, AgentError> {
        let (pipeline, handle) = self.pipeline_for(None)?;
        let result = pipeline.ask_multiple(conversation, message, n, cancel).await;
        if let Some(handle) = handle {
            handle.complete(result.is_ok());
        }
        result
    }

    pub async fn stream(
        &self,
        conversation: &mut Conversation,
        message: &str,
        on_chunk: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, AgentError> {
        let (pipeline, handle) = self.pipeline_for(None)?;
        let result = pipeline.stream(conversation, message, on_chunk, cancel).await;
        if let Some(handle) = handle {
            handle.complete(result.is_ok());
        }
        result
    }

    /// Drives a ReAct reasoning loop (C7) toward `goal`.
    pub async fn react(
        &self,
        conversation: &mut Conversation,
        goal: &str,
        events: Option<mpsc::Sender<serde_json::Value>>,
        cancel: CancellationToken,
    ) -> Result<ReActOutcome, AgentError> {
        let (provider, handle) = self.resolve_provider(None)?;
        let react_loop = ReActLoop::new(self.config.clone(), provider, self.tools.clone());
        let result = react_loop.run(conversation, goal, events, cancel).await;
        if let Some(handle) = handle {
            handle.complete(result.is_ok());
        }
        result
    }

    /// Decomposes `goal` into a task DAG (C8) and drives it to completion
    /// (C9). Requires a plan model set via [`Agent::with_plan_model`].
    pub async fn plan(&self, goal: &str, strategy: Strategy, cancel: CancellationToken) -> Result<PlanResult, AgentError> {
        let model = self
            .plan_model
            .clone()
            .ok_or_else(|| AgentError::InvalidConfig("agent has no plan model configured".into()))?;

        let decomposer = PlanDecomposer::new(self.config.plan.clone(), model, strategy);
        let plan: Plan = decomposer.decompose(goal).await?;

        let (pipeline, handle) = self.pipeline_for(None)?;
        let executor = PlanExecutor::new(self.config.plan.clone(), Arc::new(PipelineExecutor(Arc::new(pipeline))));
        let result = executor.execute(plan, cancel).await;
        if let Some(handle) = handle {
            handle.complete(result.status == crate::plan::PlanStatus::Completed);
        }
        Ok(result)
    }
}

/// Adapts [`RequestPipeline::ask`] to the [`AgentExecutor`] contract the plan
/// executor drives: each task is an independent, stateless turn.
struct PipelineExecutor(Arc<RequestPipeline>);

#[async_trait]
impl AgentExecutor for PipelineExecutor {
    async fn chat(&self, message: &str) -> Result<String, AgentError> {
        let mut conversation = Conversation::new(None, None);
        self.0.ask(&mut conversation, message, CancellationToken::new()).await
    }
}
