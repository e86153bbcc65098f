use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{Tool, ToolCall, ToolResult};

/// Executes a batch of [`ToolCall`]s honouring `depends_on`, bounded by a
/// worker pool, with per-call timeouts and panic isolation.
///
/// Grounded on the teacher's `ToolRegistry`/`AggregateToolSource` dispatch
/// shape, generalized with dependency-batched scheduling (spec §4.9).
pub struct ToolOrchestrator {
    max_workers: usize,
    default_timeout: Duration,
}

impl ToolOrchestrator {
    pub fn new(max_workers: usize, default_timeout: Duration) -> Self {
        Self {
            max_workers: max_workers.max(1),
            default_timeout,
        }
    }

    /// Runs `calls` to completion, returning results in the same order as
    /// `calls` regardless of execution order.
    pub async fn execute(
        &self,
        calls: Vec<ToolCall>,
        lookup: impl Fn(&str) -> Option<Arc<dyn Tool>>,
        cancel: CancellationToken,
    ) -> Vec<ToolResult> {
        let n = calls.len();
        let mut results: Vec<Option<ToolResult>> = (0..n).map(|_| None).collect();
        let id_to_index: HashMap<String, usize> =
            calls.iter().enumerate().map(|(i, c)| (c.id.clone(), i)).collect();

        let batches = batch_by_dependency(&calls);
        let semaphore = Arc::new(Semaphore::new(self.max_workers.min(n.max(1))));

        'batches: for batch in batches {
            if cancel.is_cancelled() {
                break 'batches;
            }
            let mut handles = Vec::with_capacity(batch.len());
            for idx in batch {
                let call = calls[idx].clone();
                let tool = lookup(&call.name);
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let timeout = call.timeout.unwrap_or(self.default_timeout);
                let cancel = cancel.clone();
                handles.push((idx, call.id.clone(), call.name.clone(), tokio::spawn(async move {
                    let _permit = permit;
                    let start = SystemTime::now();
                    let output = run_one(tool, call, timeout, cancel).await;
                    let end = SystemTime::now();
                    (output, start, end)
                })));
            }
            for (idx, id, name, handle) in handles {
                let (output, start, end) = match handle.await {
                    Ok(v) => v,
                    Err(join_err) => {
                        warn!(tool = %name, "tool handler panicked: {join_err}");
                        let now = SystemTime::now();
                        (Err(format!("tool handler panicked: {join_err}")), now, now)
                    }
                };
                let end = end.max(start);
                results[idx] = Some(ToolResult {
                    id,
                    name,
                    output,
                    start_time: start,
                    end_time: end,
                    duration: end.duration_since(start).unwrap_or_default(),
                });
            }
        }

        // Any call left unexecuted (cancellation broke out early) gets a
        // synthetic "not executed" error, per spec §5 cancellation semantics.
        for (idx, call) in calls.iter().enumerate() {
            if results[idx].is_none() {
                let now = SystemTime::now();
                results[idx] = Some(ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: Err("not executed: canceled before this batch ran".into()),
                    start_time: now,
                    end_time: now,
                    duration: Duration::ZERO,
                });
            }
        }

        let _ = &id_to_index;
        results.into_iter().map(|r| r.expect("filled above")).collect()
    }
}

async fn run_one(
    tool: Option<Arc<dyn Tool>>,
    call: ToolCall,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<String, String> {
    let Some(tool) = tool else {
        return Err(format!("tool not found: {}", call.name));
    };
    tokio::select! {
        _ = cancel.cancelled() => Err("canceled".to_string()),
        res = tokio::time::timeout(timeout, tool.call(call.args)) => match res {
            Ok(Ok(s)) => Ok(s),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("tool timed out after {timeout:?}")),
        },
    }
}

/// Groups call indices into ordered batches: batch 0 contains every call
/// whose `depends_on` set is empty; batch k contains every remaining call
/// whose deps are all in batches `< k`. If a round finds no eligible call but
/// unexecuted calls remain (a cycle), the remainder is placed in one final
/// batch so something still completes, each surfacing a diagnosable error if
/// its dependency's result was never produced.
fn batch_by_dependency(calls: &[ToolCall]) -> Vec<Vec<usize>> {
    let ids: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut remaining: HashSet<usize> = (0..calls.len()).collect();
    let mut batches = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| calls[i].depends_on.iter().all(|d| done.contains(d.as_str())))
            .collect();

        if ready.is_empty() {
            // Circular dependency: flush the rest as one final batch.
            let mut rest: Vec<usize> = remaining.into_iter().collect();
            rest.sort_unstable();
            batches.push(rest.clone());
            for i in &rest {
                done.insert(ids[*i]);
            }
            break;
        }

        let mut sorted_ready = ready.clone();
        sorted_ready.sort_unstable();
        for &i in &sorted_ready {
            remaining.remove(&i);
            done.insert(ids[i]);
        }
        batches.push(sorted_ready);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{EchoTool, PanicTool};
    use std::collections::HashMap as Map;

    fn lookup_map(tools: Vec<Arc<dyn Tool>>) -> impl Fn(&str) -> Option<Arc<dyn Tool>> {
        let map: Map<String, Arc<dyn Tool>> =
            tools.into_iter().map(|t| (t.name().to_string(), t)).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[tokio::test]
    async fn runs_independent_calls_and_preserves_input_order() {
        let orch = ToolOrchestrator::new(4, Duration::from_secs(1));
        let tool: Arc<dyn Tool> = Arc::new(EchoTool { name: "echo".into(), delay: None, fail: false });
        let calls = vec![
            ToolCall { id: "b".into(), name: "echo".into(), args: serde_json::json!({"value": "B"}), timeout: None, depends_on: Default::default() },
            ToolCall { id: "a".into(), name: "echo".into(), args: serde_json::json!({"value": "A"}), timeout: None, depends_on: Default::default() },
        ];
        let results = orch.execute(calls, lookup_map(vec![tool]), CancellationToken::new()).await;
        assert_eq!(results[0].id, "b");
        assert_eq!(results[1].id, "a");
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn respects_depends_on_ordering_via_batches() {
        let orch = ToolOrchestrator::new(4, Duration::from_secs(1));
        let tool: Arc<dyn Tool> = Arc::new(EchoTool { name: "echo".into(), delay: None, fail: false });
        let mut deps = HashSet::new();
        deps.insert("first".to_string());
        let calls = vec![
            ToolCall { id: "first".into(), name: "echo".into(), args: serde_json::json!({"value": 1}), timeout: None, depends_on: Default::default() },
            ToolCall { id: "second".into(), name: "echo".into(), args: serde_json::json!({"value": 2}), timeout: None, depends_on: deps },
        ];
        let batches = batch_by_dependency(&calls);
        assert_eq!(batches, vec![vec![0], vec![1]]);
        let results = orch.execute(calls, lookup_map(vec![tool]), CancellationToken::new()).await;
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn circular_dependency_flushes_remainder_as_one_batch() {
        let mut a_deps = HashSet::new();
        a_deps.insert("b".to_string());
        let mut b_deps = HashSet::new();
        b_deps.insert("a".to_string());
        let calls = vec![
            ToolCall { id: "a".into(), name: "echo".into(), args: serde_json::json!({}), timeout: None, depends_on: a_deps },
            ToolCall { id: "b".into(), name: "echo".into(), args: serde_json::json!({}), timeout: None, depends_on: b_deps },
        ];
        let batches = batch_by_dependency(&calls);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![0, 1]);
    }

    #[tokio::test]
    async fn panic_in_handler_is_isolated_as_an_error_result() {
        let orch = ToolOrchestrator::new(4, Duration::from_secs(1));
        let tool: Arc<dyn Tool> = Arc::new(PanicTool);
        let calls = vec![ToolCall {
            id: "p".into(),
            name: "panic_tool".into(),
            args: serde_json::json!({}),
            timeout: None,
            depends_on: Default::default(),
        }];
        let results = orch.execute(calls, lookup_map(vec![tool]), CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].output.is_err());
    }

    #[tokio::test]
    async fn per_call_timeout_surfaces_as_error_without_blocking_others() {
        let orch = ToolOrchestrator::new(4, Duration::from_millis(20));
        let slow: Arc<dyn Tool> = Arc::new(EchoTool { name: "slow".into(), delay: Some(Duration::from_millis(200)), fail: false });
        let fast: Arc<dyn Tool> = Arc::new(EchoTool { name: "fast".into(), delay: None, fail: false });
        let calls = vec![
            ToolCall { id: "s".into(), name: "slow".into(), args: serde_json::json!({}), timeout: None, depends_on: Default::default() },
            ToolCall { id: "f".into(), name: "fast".into(), args: serde_json::json!({}), timeout: None, depends_on: Default::default() },
        ];
        let results = orch.execute(calls, lookup_map(vec![slow, fast]), CancellationToken::new()).await;
        assert!(results[0].output.is_err());
        assert!(results[1].output.is_ok());
    }
}
