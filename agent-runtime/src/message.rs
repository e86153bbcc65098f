//! Message and Conversation data model (spec §3).

use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// Role of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message. `tool_call_id`/`name` are set for `Role::Tool` messages
/// so a tool result can be matched back to the call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Present on assistant messages that carry tool invocations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: Some(tool_calls),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            tool_calls: None,
        }
    }
}

/// An ordered sequence of messages with an optional leading system prompt and
/// a `max_history` bound (FIFO eviction of the oldest non-system message).
///
/// Invariant: an assistant turn that carries tool calls is immediately
/// followed, in order, by the matching tool-result messages before the next
/// user/assistant turn. This type centralizes every mutation so the
/// invariant cannot be broken by a caller appending directly to a `Vec`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    system_prompt: Option<String>,
    messages: Vec<Message>,
    max_history: Option<usize>,
}

impl Conversation {
    pub fn new(system_prompt: Option<String>, max_history: Option<usize>) -> Self {
        Self {
            system_prompt,
            messages: Vec::new(),
            max_history,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Full message list as sent to a provider: leading system prompt (if
    /// any) followed by history.
    pub fn render(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(sp) = &self.system_prompt {
            out.push(Message::system(sp.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends a single message, then evicts oldest non-system messages if
    /// `max_history` is exceeded. The system prompt (stored separately) is
    /// never evicted.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.evict_if_needed();
    }

    /// Appends a batch of messages atomically (used for an assistant turn
    /// plus its matching tool results) so the ordering invariant holds even
    /// under eviction.
    pub fn push_turn(&mut self, turn: Vec<Message>) {
        self.messages.extend(turn);
        self.evict_if_needed();
    }

    fn evict_if_needed(&mut self) {
        if let Some(max) = self.max_history {
            while self.messages.len() > max {
                self.messages.remove(0);
            }
        }
    }
}
