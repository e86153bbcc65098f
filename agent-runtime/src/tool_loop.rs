//! Tool-Call Loop (C6): alternates model turns and tool executions via the
//! tool orchestrator (C4) until the model returns content without tool
//! calls, bounded by `max_rounds`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::message::{Conversation, Message};
use crate::provider::{CompletionRequest, ProviderAdapter};
use crate::tools::{ToolOrchestrator, ToolRegistry};

pub struct ToolLoop {
    config: AgentConfig,
    provider: Arc<dyn ProviderAdapter>,
    tools: Arc<ToolRegistry>,
}

impl ToolLoop {
    pub fn new(config: AgentConfig, provider: Arc<dyn ProviderAdapter>, tools: Arc<ToolRegistry>) -> Self {
        Self { config, provider, tools }
    }

    /// Drives the loop for one user turn; returns the terminal assistant
    /// content. History is appended for every round, matching §5's ordering
    /// guarantee (`user, assistant[, tool-results, assistant…]`).
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<String, AgentError> {
        let orchestrator = ToolOrchestrator::new(
            self.config.tool_loop.max_workers,
            self.config.tool_loop.default_tool_timeout,
        );

        conversation.push(Message::user(message));

        for _round in 0..=self.config.tool_loop.max_rounds {
            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: conversation.render(),
                system: conversation.system_prompt().map(str::to_string),
                temperature: self.config.temperature,
                tools: if self.tools.is_empty() { None } else { Some(self.tools.specs().into_iter().map(|s| serde_json::to_value(s).unwrap_or_default()).collect()) },
                ..Default::default()
            };

            let response = self.provider.complete(request).await?;

            if response.tool_calls.is_empty() {
                conversation.push(Message::assistant(response.content.clone()));
                return Ok(response.content);
            }

            let calls = response.tool_calls.clone();
            conversation.push(Message::assistant_with_tool_calls(response.content.clone(), calls.clone()));

            let tools = self.tools.clone();
            let results = if self.config.tool_loop.parallel && calls.len() > 1 {
                orchestrator
                    .execute(calls, |name| tools.get(name), cancel.clone())
                    .await
            } else {
                // Sequential: execute one at a time, preserving order.
                let mut out = Vec::with_capacity(calls.len());
                for call in calls {
                    let single = orchestrator
                        .execute(vec![call], |name| tools.get(name), cancel.clone())
                        .await;
                    out.extend(single);
                }
                out
            };

            // One tool-result message per tool-call, matched by id, in the
            // canonical order the provider expects.
            let tool_messages: Vec<Message> = results
                .into_iter()
                .map(|r| {
                    let content = match r.output {
                        Ok(ok) => ok,
                        Err(err) => err,
                    };
                    Message::tool_result(r.id, r.name, content)
                })
                .collect();
            conversation.push_turn(tool_messages);
        }

        Err(AgentError::MaxToolRoundsExceeded(self.config.tool_loop.max_rounds))
    }
}
