//! ReAct Loop (C7): parses model output into Thought/Action/Observation/
//! Final steps, drives the iterative cycle, streams events.
//!
//! Grounded on the teacher's think/act/observe node split (`ThinkNode`,
//! `ActNode`, `ObserveNode`), collapsed into one state machine since this
//! crate does not carry the teacher's graph-node scheduler.

mod parse;

pub use parse::{ReActStep, StepKind};

use std::sync::Arc;
use std::time::Instant;

use stream_event::{EnvelopeState, ProtocolEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::message::{Conversation, Message};
use crate::provider::{CompletionRequest, ProviderAdapter};
use crate::tools::ToolRegistry;

/// System prompt fragment instructing the model to emit labeled
/// `THOUGHT:`/`ACTION:`/`OBSERVATION:`/`FINAL:` lines.
pub const REACT_INSTRUCTIONS: &str = "\
Respond using labeled lines: THOUGHT: <reasoning>, ACTION: <tool>(<json args>), \
OBSERVATION: <result>, FINAL: <answer>. Emit exactly one THOUGHT per turn, \
followed by either one ACTION or one FINAL.";

pub struct ReActLoop {
    config: AgentConfig,
    provider: Arc<dyn ProviderAdapter>,
    tools: Arc<ToolRegistry>,
}

/// Outcome of a completed ReAct run.
#[derive(Debug)]
pub struct ReActOutcome {
    pub steps: Vec<ReActStep>,
    pub final_answer: String,
    pub iterations: u32,
}

impl ReActLoop {
    pub fn new(config: AgentConfig, provider: Arc<dyn ProviderAdapter>, tools: Arc<ToolRegistry>) -> Self {
        Self { config, provider, tools }
    }

    /// Drives the state machine to completion, emitting protocol events on
    /// `events` as they occur. The channel is dropped (closed) on return,
    /// signalling completion to any receiver.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        goal: &str,
        events: Option<mpsc::Sender<serde_json::Value>>,
        cancel: CancellationToken,
    ) -> Result<ReActOutcome, AgentError> {
        let mut envelope = EnvelopeState::new("react-run".into(), "react".into());
        let deadline = Instant::now() + self.config.react.timeout;
        let mut steps = Vec::new();

        conversation.push(Message::system(REACT_INSTRUCTIONS));
        conversation.push(Message::user(goal));

        let emit = |events: &Option<mpsc::Sender<serde_json::Value>>, envelope: &mut EnvelopeState, event: ProtocolEvent| {
            if let Some(tx) = events {
                if let Ok(value) = stream_event::to_json(&event, envelope) {
                    let _ = tx.try_send(value);
                }
            }
        };

        emit(&events, &mut envelope, ProtocolEvent::Start { iteration: 0 });

        for iteration in 0..self.config.react.max_iterations {
            if Instant::now() >= deadline {
                emit(&events, &mut envelope, ProtocolEvent::Error { message: "timed out".into(), iteration });
                return Err(AgentError::ReActTimeout(self.config.react.timeout));
            }
            if cancel.is_cancelled() {
                return Err(AgentError::Canceled);
            }

            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: conversation.render(),
                system: conversation.system_prompt().map(str::to_string),
                temperature: self.config.temperature,
                ..Default::default()
            };
            let response = self.provider.complete(request).await?;
            conversation.push(Message::assistant(response.content.clone()));

            let parsed = match parse::parse_steps(&response.content) {
                Ok(steps) => steps,
                Err(e) => {
                    if self.config.react.strict {
                        emit(&events, &mut envelope, ProtocolEvent::Error { message: e.to_string(), iteration });
                        return Err(e);
                    }
                    continue;
                }
            };

            for step in parsed {
                match step.kind {
                    StepKind::Thought => {
                        emit(&events, &mut envelope, ProtocolEvent::Thought { content: step.content.clone(), iteration });
                    }
                    StepKind::Final => {
                        emit(&events, &mut envelope, ProtocolEvent::Final { content: step.content.clone(), iteration });
                        steps.push(step.clone());
                        emit(&events, &mut envelope, ProtocolEvent::Complete { iteration });
                        return Ok(ReActOutcome {
                            final_answer: step.content,
                            steps,
                            iterations: iteration + 1,
                        });
                    }
                    StepKind::Action => {
                        let tool_name = step.tool.clone().unwrap_or_default();
                        emit(
                            &events,
                            &mut envelope,
                            ProtocolEvent::Action {
                                tool: tool_name.clone(),
                                args: step.args.clone().unwrap_or(serde_json::Value::Null),
                                iteration,
                            },
                        );
                        let observation = match self.tools.get(&tool_name) {
                            Some(tool) => match tool.call(step.args.clone().unwrap_or(serde_json::Value::Null)).await {
                                Ok(out) => out,
                                Err(err) => format!("error: {err}"),
                            },
                            None => format!("error: tool not found: {tool_name}"),
                        };
                        emit(&events, &mut envelope, ProtocolEvent::Observation { content: observation.clone(), iteration });
                        conversation.push(Message::user(format!("OBSERVATION: {observation}")));
                    }
                    StepKind::Observation => {
                        emit(&events, &mut envelope, ProtocolEvent::Observation { content: step.content.clone(), iteration });
                    }
                }
                steps.push(step);
            }
        }

        emit(&events, &mut envelope, ProtocolEvent::Error { message: "iteration limit reached".into(), iteration: self.config.react.max_iterations });
        Err(AgentError::ReActIterationLimit(self.config.react.max_iterations))
    }
}

/// Default event channel depth when a caller wants a stream but hasn't sized
/// one explicitly — §5 mandates depth >= 10.
pub const DEFAULT_EVENT_BUFFER: usize = 16;
