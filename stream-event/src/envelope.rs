//! Envelope (session_id, node_id, event_id). `EnvelopeState` tracks the
//! current run and injects a monotonically increasing `event_id` into each
//! event so that consumers can detect gaps or reordering.

use crate::event::ProtocolEvent;
use serde_json::Value;

/// Envelope fields attached to each emitted event.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Session/run id; constant within a run.
    pub session_id: Option<String>,
    /// Identifier for the current logical node (e.g. `"react"`, `"plan"`).
    pub node_id: Option<String>,
    /// Per-event sequence number; monotonically increasing within a stream.
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.session_id {
            obj.entry("session_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.node_id {
            obj.entry("node_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
    }
}

/// Envelope state for one run: session_id, current node, next event_id.
pub struct EnvelopeState {
    pub session_id: String,
    pub node_id: String,
    pub next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(session_id: String, node_id: String) -> Self {
        Self {
            session_id,
            node_id,
            next_event_id: 1,
        }
    }

    /// Injects envelope into the event value and advances the sequence counter.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_session_id(&self.session_id)
            .with_node_id(&self.node_id)
            .with_event_id(self.next_event_id);
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

/// Converts a protocol event to JSON and injects the envelope using the given state.
pub fn to_json(
    event: &ProtocolEvent,
    state: &mut EnvelopeState,
) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_sets_fields_without_overwriting() {
        let mut obj = serde_json::json!({"type": "start", "iteration": 0});
        let env = Envelope::new()
            .with_session_id("sess-1")
            .with_node_id("react")
            .with_event_id(1);
        env.inject_into(&mut obj);
        assert_eq!(obj["session_id"], "sess-1");
        assert_eq!(obj["node_id"], "react");
        assert_eq!(obj["event_id"], 1);
        assert_eq!(obj["type"], "start");
    }

    #[test]
    fn to_json_increments_event_id_monotonically() {
        let ev = ProtocolEvent::Thought {
            content: "thinking".into(),
            iteration: 0,
        };
        let mut state = EnvelopeState::new("run-1".into(), "react".into());
        let first = to_json(&ev, &mut state).unwrap();
        let second = to_json(&ev, &mut state).unwrap();
        assert_eq!(first["event_id"], 1);
        assert_eq!(second["event_id"], 2);
        assert_eq!(first["session_id"], "run-1");
    }
}
