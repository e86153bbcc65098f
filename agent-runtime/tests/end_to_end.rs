//! Cross-module scenarios exercising the full request path: pipeline, tool
//! loop, ReAct, and plan execution wired together the way `Agent` wires them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_runtime::{
    cache::{fingerprint, InMemoryCache},
    config::AgentConfig,
    error::AgentError,
    message::Conversation,
    pipeline::Collaborators,
    plan::{PlanModel, PlanStatus, Strategy},
    provider::{mock::ScriptedResponse, MockProvider},
    tools::{Tool, ToolCall, ToolRegistry, ToolSpec},
    Agent, ProviderAdapter,
};

/// Echoes its `value` arg; a minimal fixture standing in for a real tool
/// integration since the crate's internal test doubles are `cfg(test)`-only
/// and not visible from this external integration test.
struct EchoTool {
    name: String,
}

#[async_trait::async_trait]
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

    async fn call(&self, args: serde_json::Value) -> Result<String, AgentError> {
        Ok(args.get("value").cloned().unwrap_or(serde_json::Value::Null).to_string())
    }
}

#[tokio::test]
async fn cache_hit_is_idempotent_across_repeated_asks() {
    let provider: Arc<dyn ProviderAdapter> = Arc::new(MockProvider::new("p", "fresh"));
    let cache: Arc<dyn agent_runtime::cache::Cache> = Arc::new(InMemoryCache::new(10));
    let key = fingerprint("gpt-4", "hi", None, None);
    cache.set(&key, "cached answer".into(), Duration::from_secs(60)).await;

    let mut config = AgentConfig::new("gpt-4");
    config.cache.enabled = true;
    let agent = Agent::new(
        config,
        provider,
        Arc::new(ToolRegistry::new()),
        Collaborators { cache: Some(cache), ..Default::default() },
    )
    .unwrap();

    let mut conversation = Conversation::new(None, None);
    let first = agent.ask(&mut conversation, "hi", CancellationToken::new()).await.unwrap();
    let second = agent.ask(&mut conversation, "hi", CancellationToken::new()).await.unwrap();
    assert_eq!(first, "cached answer");
    assert_eq!(second, "cached answer");
    // a cache hit never appends to history (§9 idempotence decision)
    assert_eq!(conversation.len(), 0);
}

#[tokio::test]
async fn tool_loop_auto_executes_until_plain_content() {
    let call = ToolCall {
        id: "1".into(),
        name: "lookup".into(),
        args: serde_json::json!({"value": "answer"}),
        timeout: None,
        depends_on: Default::default(),
    };
    let provider: Arc<dyn ProviderAdapter> = Arc::new(MockProvider::scripted(
        "p",
        vec![ScriptedResponse::tool_call(call), ScriptedResponse::text("the answer is 42")],
    ));

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool { name: "lookup".into() }));

    let mut config = AgentConfig::new("gpt-4");
    config.tool_loop.auto_execute = true;
    let agent = Agent::new(config, provider, Arc::new(registry), Collaborators::default()).unwrap();

    let mut conversation = Conversation::new(None, None);
    let result = agent.ask(&mut conversation, "look it up", CancellationToken::new()).await.unwrap();
    assert_eq!(result, "the answer is 42");
    // user, assistant-with-tool-calls, tool-result, assistant
    assert_eq!(conversation.len(), 4);
}

#[tokio::test]
async fn react_terminates_early_on_a_direct_final_answer() {
    let provider: Arc<dyn ProviderAdapter> = Arc::new(MockProvider::scripted(
        "p",
        vec![ScriptedResponse::text("THOUGHT: this is simple\nFINAL: 7")],
    ));
    let agent = Agent::new(AgentConfig::new("gpt-4"), provider, Arc::new(ToolRegistry::new()), Collaborators::default()).unwrap();

    let mut conversation = Conversation::new(None, None);
    let outcome = agent.react(&mut conversation, "what is 3+4", None, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.final_answer, "7");
    assert_eq!(outcome.iterations, 1);
}

struct DiamondPlanModel;

#[async_trait]
impl PlanModel for DiamondPlanModel {
    async fn generate(&self, _goal: &str, _max_depth: u32, _min: u32, _max: u32) -> Result<String, AgentError> {
        Ok(r#"{
            "tasks": [
                {"id": "a", "description": "gather requirements", "type": "action", "dependencies": []},
                {"id": "b", "description": "draft design", "type": "action", "dependencies": ["a"]},
                {"id": "c", "description": "draft tests", "type": "action", "dependencies": ["a"]},
                {"id": "d", "description": "merge results", "type": "aggregate", "dependencies": ["b", "c"]}
            ]
        }"#
        .into())
    }
}

#[tokio::test]
async fn plan_parallel_diamond_executes_all_tasks_and_completes() {
    let provider: Arc<dyn ProviderAdapter> = Arc::new(MockProvider::new("p", "done"));
    let agent = Agent::new(AgentConfig::new("gpt-4"), provider, Arc::new(ToolRegistry::new()), Collaborators::default())
        .unwrap()
        .with_plan_model(Arc::new(DiamondPlanModel));

    let goal = "first, gather requirements thoroughly, then draft a design and tests in parallel, finally merge everything";
    let result = agent.plan(goal, Strategy::Parallel, CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(result.tasks.len(), 4);
    assert!(result.tasks.iter().all(|t| t.status == agent_runtime::plan::TaskStatus::Completed));
}

#[tokio::test]
async fn rate_limit_burst_then_denies_until_refill() {
    use agent_runtime::rate_limiter::RateLimiter;

    let mut config = AgentConfig::new("gpt-4");
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 1000.0;
    config.rate_limit.burst_size = 1;
    config.rate_limit.per_key = false;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()).unwrap());
    assert!(limiter.allow(""));
    assert!(!limiter.allow(""));
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(limiter.allow(""));
}
