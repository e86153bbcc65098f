//! Long-term memory backend (external collaborator) plus the detached
//! best-effort persistence helper the pipeline (C5) uses after a turn.
//!
//! Grounded on the teacher's `Store`/`Checkpointer` split: this crate treats
//! the backend as a black box and only owns the scheduling policy around it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::AgentError;
use crate::message::Message;

/// External long-term memory contract. `load` of a nonexistent id returns an
/// empty list, never an error.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn load(&self, id: &str) -> Result<Vec<Message>, AgentError>;
    async fn save(&self, id: &str, messages: Vec<Message>) -> Result<(), AgentError>;
    async fn delete(&self, id: &str) -> Result<(), AgentError>;
    async fn list(&self) -> Result<Vec<String>, AgentError>;
}

/// Persists `messages` on a detached task with its own timeout. Failures are
/// logged, never surfaced to the caller — §7 propagation policy.
pub fn persist_detached(backend: Arc<dyn MemoryBackend>, id: String, messages: Vec<Message>, timeout: Duration) {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, backend.save(&id, messages)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(conversation_id = %id, %err, "long-term memory persistence failed"),
            Err(_) => warn!(conversation_id = %id, "long-term memory persistence timed out"),
        }
    });
}
