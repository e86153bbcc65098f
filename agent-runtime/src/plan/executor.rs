//! Plan Executor (C9): runs a task DAG sequentially, parallel-by-level, or
//! adaptively; tracks performance metrics; checks goal criteria.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use stream_event::{EnvelopeState, ProtocolEvent};

use super::{Plan, Strategy, Task, TaskStatus};
use crate::config::PlanConfig;
use crate::error::AgentError;

/// Anything that can execute one task's description and return a textual
/// result — usually the agent's own request pipeline (C5).
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn chat(&self, message: &str) -> Result<String, AgentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanMetrics {
    pub task_count: usize,
    pub execution_time: Duration,
    pub avg_task_duration: Duration,
    pub success_rate: f64,
    pub goal_achieved: bool,
}

#[derive(Debug)]
pub struct PlanResult {
    pub plan_id: String,
    pub goal: String,
    pub tasks: Vec<Task>,
    pub status: PlanStatus,
    pub started_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub duration: Duration,
    pub final_result: Option<String>,
    pub error: Option<String>,
    pub metrics: PlanMetrics,
    pub timeline: Vec<serde_json::Value>,
}

struct Timeline {
    events: Mutex<Vec<serde_json::Value>>,
    envelope: Mutex<EnvelopeState>,
}

impl Timeline {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            envelope: Mutex::new(EnvelopeState::new("plan-run".into(), "plan".into())),
        }
    }

    fn push(&self, event: ProtocolEvent) {
        let mut envelope = self.envelope.lock().expect("envelope mutex poisoned");
        if let Ok(value) = stream_event::to_json(&event, &mut envelope) {
            self.events.lock().expect("events mutex poisoned").push(value);
        }
    }

    fn into_events(self) -> Vec<serde_json::Value> {
        self.events.into_inner().expect("events mutex poisoned")
    }
}

pub struct PlanExecutor {
    config: PlanConfig,
    executor: Arc<dyn AgentExecutor>,
}

impl PlanExecutor {
    pub fn new(config: PlanConfig, executor: Arc<dyn AgentExecutor>) -> Self {
        Self { config, executor }
    }

    #[instrument(skip(self, plan, cancel))]
    pub async fn execute(&self, plan: Plan, cancel: CancellationToken) -> PlanResult {
        let started_at = SystemTime::now();
        let start_instant = Instant::now();
        let timeline = Timeline::new();
        timeline.push(ProtocolEvent::StrategyInitialized { strategy: strategy_name(plan.strategy).into() });

        let mut tasks = plan.tasks;
        let total_task_count = count_tasks(&tasks);
        // Adaptive starts sequential (§4.8); `strategy` tracks the current
        // effective mode and is always concretely Sequential or Parallel.
        let mut strategy = match plan.strategy {
            Strategy::Adaptive => Strategy::Sequential,
            other => other,
        };
        let mut completed_count = 0usize;
        let mut any_failed = false;
        let mut goal_achieved = false;

        let levels = match compute_levels(&tasks) {
            Ok(levels) => levels,
            Err(err) => {
                return PlanResult {
                    plan_id: plan.id,
                    goal: plan.goal,
                    tasks,
                    status: PlanStatus::Failed,
                    started_at,
                    completed_at: Some(SystemTime::now()),
                    duration: start_instant.elapsed(),
                    final_result: None,
                    error: Some(err.to_string()),
                    metrics: PlanMetrics::default(),
                    timeline: timeline.into_events(),
                };
            }
        };

        'levels: for level in levels.iter() {
            if cancel.is_cancelled() {
                return self.finish(plan.id, plan.goal, tasks, PlanStatus::Canceled, started_at, start_instant, None, timeline);
            }

            let use_parallel = strategy == Strategy::Parallel;

            let level_start = Instant::now();
            let results = if use_parallel {
                self.run_level_parallel(&mut tasks, level, &timeline, &cancel).await
            } else {
                self.run_level_sequential(&mut tasks, level, &timeline, &cancel).await
            };
            let level_wall = level_start.elapsed();

            let level_failed = results.iter().any(|ok| !ok);
            if level_failed {
                any_failed = true;
                if use_parallel {
                    // §4.8: any task failure marks the level (and the plan) failed in parallel mode.
                    break 'levels;
                }
            }
            completed_count += results.iter().filter(|ok| **ok).count();

            if let Strategy::Adaptive = plan.strategy {
                // §4.8: parallelEfficiency = sumOfTaskDurations / (wallTime *
                // taskCount), instrumented per batch regardless of the mode
                // that batch ran in, so either switch direction can trigger.
                let work: Duration = level
                    .iter()
                    .filter_map(|&idx| task_duration(&tasks[idx]))
                    .sum();
                let efficiency = if level_wall.as_secs_f64() > 0.0 && !level.is_empty() {
                    work.as_secs_f64() / (level_wall.as_secs_f64() * level.len() as f64)
                } else {
                    1.0
                };
                if strategy == Strategy::Parallel && efficiency < self.config.adaptive_threshold {
                    timeline.push(ProtocolEvent::StrategySwitched {
                        from: "parallel".into(),
                        to: "sequential".into(),
                        parallel_efficiency: efficiency,
                        threshold: self.config.adaptive_threshold,
                    });
                    strategy = Strategy::Sequential;
                } else if strategy == Strategy::Sequential && efficiency >= self.config.adaptive_threshold {
                    // Reverse switching by the same symmetric rule (§4.8).
                    timeline.push(ProtocolEvent::StrategySwitched {
                        from: "sequential".into(),
                        to: "parallel".into(),
                        parallel_efficiency: efficiency,
                        threshold: self.config.adaptive_threshold,
                    });
                    strategy = Strategy::Parallel;
                }
            }

            let interval = self.config.goal_check_interval.max(1) as usize;
            if completed_count > 0 && completed_count % interval == 0 {
                let completed_refs: Vec<&Task> = tasks.iter().filter(|t| t.status == TaskStatus::Completed).collect();
                let satisfied = evaluate_goal(&plan.goal_state, &completed_refs, total_task_count);
                timeline.push(ProtocolEvent::GoalChecked { tasks_completed: completed_count, satisfied });
                if satisfied {
                    goal_achieved = true;
                    timeline.push(ProtocolEvent::GoalAchieved { tasks_completed: completed_count });
                    break 'levels;
                }
            }
        }

        let completed_refs: Vec<&Task> = tasks.iter().filter(|t| t.status == TaskStatus::Completed).collect();
        if !goal_achieved {
            goal_achieved = evaluate_goal(&plan.goal_state, &completed_refs, total_task_count);
        }

        let status = if any_failed && !goal_achieved {
            PlanStatus::Failed
        } else {
            PlanStatus::Completed
        };

        let final_result = tasks.iter().rev().find_map(|t| t.result.clone());
        self.finish(plan.id, plan.goal, tasks, status, started_at, start_instant, final_result, timeline)
    }

    fn finish(
        &self,
        plan_id: String,
        goal: String,
        tasks: Vec<Task>,
        status: PlanStatus,
        started_at: SystemTime,
        start_instant: Instant,
        final_result: Option<String>,
        timeline: Timeline,
    ) -> PlanResult {
        let durations: Vec<Duration> = tasks.iter().filter_map(task_duration).collect();
        let task_count = count_tasks(&tasks);
        let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
        let avg = if durations.is_empty() {
            Duration::ZERO
        } else {
            durations.iter().sum::<Duration>() / durations.len() as u32
        };
        let metrics = PlanMetrics {
            task_count,
            execution_time: start_instant.elapsed(),
            avg_task_duration: avg,
            success_rate: if task_count == 0 { 0.0 } else { completed as f64 / task_count as f64 },
            goal_achieved: status == PlanStatus::Completed,
        };
        PlanResult {
            plan_id,
            goal,
            tasks,
            status,
            started_at,
            completed_at: Some(SystemTime::now()),
            duration: start_instant.elapsed(),
            final_result,
            error: if status == PlanStatus::Failed { Some("one or more tasks failed".into()) } else { None },
            metrics,
            timeline: timeline.into_events(),
        }
    }

    async fn run_one(&self, task: &mut Task, timeline: &Timeline) -> bool {
        timeline.push(ProtocolEvent::TaskStarted { task_id: task.id.clone() });
        task.status = TaskStatus::Running;
        let start = Instant::now();
        task.started_at = Some(SystemTime::now());

        let outcome = self.executor.chat(&task.description).await;
        task.completed_at = Some(SystemTime::now());
        let duration_ms = start.elapsed().as_millis() as u64;

        let ok = match outcome {
            Ok(result) => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                timeline.push(ProtocolEvent::TaskCompleted { task_id: task.id.clone(), duration_ms });
                true
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err.to_string());
                timeline.push(ProtocolEvent::TaskFailed { task_id: task.id.clone(), error: err.to_string() });
                false
            }
        };

        self.run_subtasks(task, timeline).await;
        ok
    }

    /// Subtasks run recursively after their parent completes, sequentially
    /// among siblings (§4.8 simplification).
    fn run_subtasks<'a>(
        &'a self,
        task: &'a mut Task,
        timeline: &'a Timeline,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if task.status != TaskStatus::Completed {
                return;
            }
            for subtask in task.subtasks.iter_mut() {
                self.run_one_boxed(subtask, timeline).await;
            }
        })
    }

    fn run_one_boxed<'a>(
        &'a self,
        task: &'a mut Task,
        timeline: &'a Timeline,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(self.run_one(task, timeline))
    }

    async fn run_level_sequential(&self, tasks: &mut [Task], level: &[usize], timeline: &Timeline, cancel: &CancellationToken) -> Vec<bool> {
        let mut results = Vec::with_capacity(level.len());
        for &idx in level {
            if cancel.is_cancelled() {
                results.push(false);
                continue;
            }
            let ok = self.run_one(&mut tasks[idx], timeline).await;
            results.push(ok);
        }
        results
    }

    async fn run_level_parallel(&self, tasks: &mut [Task], level: &[usize], timeline: &Timeline, cancel: &CancellationToken) -> Vec<bool> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut handles = Vec::with_capacity(level.len());

        for &idx in level {
            let description = tasks[idx].description.clone();
            let task_id = tasks[idx].id.clone();
            let executor = self.executor.clone();
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let cancel = cancel.clone();
            handles.push((idx, task_id, tokio::spawn(async move {
                let _permit = permit;
                let start = Instant::now();
                if cancel.is_cancelled() {
                    return (Err(AgentError::Canceled), start.elapsed());
                }
                (executor.chat(&description).await, start.elapsed())
            })));
        }

        let mut results = vec![false; level.len()];
        for (pos, (idx, task_id, handle)) in handles.into_iter().enumerate() {
            timeline.push(ProtocolEvent::TaskStarted { task_id: task_id.clone() });
            let (outcome, elapsed) = handle.await.unwrap_or_else(|e| (Err(AgentError::Other(e.to_string())), Duration::ZERO));
            tasks[idx].started_at = Some(SystemTime::now() - elapsed);
            tasks[idx].completed_at = Some(SystemTime::now());
            match outcome {
                Ok(result) => {
                    tasks[idx].status = TaskStatus::Completed;
                    tasks[idx].result = Some(result);
                    timeline.push(ProtocolEvent::TaskCompleted { task_id, duration_ms: elapsed.as_millis() as u64 });
                    results[pos] = true;
                }
                Err(err) => {
                    tasks[idx].status = TaskStatus::Failed;
                    tasks[idx].error = Some(err.to_string());
                    timeline.push(ProtocolEvent::TaskFailed { task_id, error: err.to_string() });
                }
            }
        }

        for &idx in level {
            self.run_subtasks(&mut tasks[idx], timeline).await;
        }

        results
    }
}

fn strategy_name(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Sequential => "sequential",
        Strategy::Parallel => "parallel",
        Strategy::Adaptive => "adaptive",
    }
}

fn task_duration(task: &Task) -> Option<Duration> {
    match (task.started_at, task.completed_at) {
        (Some(s), Some(e)) => e.duration_since(s).ok(),
        _ => None,
    }
}

fn count_tasks(tasks: &[Task]) -> usize {
    tasks.iter().map(|t| 1 + count_tasks(&t.subtasks)).sum()
}

fn evaluate_goal(criteria: &[Box<dyn super::GoalCriterion>], completed: &[&Task], total_task_count: usize) -> bool {
    if criteria.is_empty() {
        return completed.len() >= total_task_count;
    }
    criteria.iter().all(|c| c.is_satisfied(completed))
}

/// Computes dependency levels over the top-level tasks via BFS (level 0 = no
/// deps; level k = all deps at level < k), pre-validating via Kahn's
/// algorithm (cycle detection).
fn compute_levels(tasks: &[Task]) -> Result<Vec<Vec<usize>>, AgentError> {
    let n = tasks.len();
    let id_to_idx: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, t) in tasks.iter().enumerate() {
        for dep in &t.dependencies {
            if let Some(&dep_idx) = id_to_idx.get(dep.as_str()) {
                indegree[i] += 1;
                dependents[dep_idx].push(i);
            }
        }
    }

    let mut levels = Vec::new();
    let mut remaining: HashSet<usize> = (0..n).collect();
    let mut current: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();

    while !current.is_empty() {
        current.sort_unstable();
        for &i in &current {
            remaining.remove(&i);
        }
        let mut next = Vec::new();
        for &i in &current {
            for &dep_idx in &dependents[i] {
                indegree[dep_idx] -= 1;
                if indegree[dep_idx] == 0 {
                    next.push(dep_idx);
                }
            }
        }
        levels.push(current);
        current = next;
    }

    if !remaining.is_empty() {
        return Err(AgentError::TaskValidationError("dependency cycle detected among top-level tasks".into()));
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Task, TaskType};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SleepyExecutor {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentExecutor for SleepyExecutor {
        async fn chat(&self, message: &str) -> Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(format!("done: {message}"))
        }
    }

    fn diamond() -> Vec<Task> {
        vec![
            Task::new("a", "a", TaskType::Action),
            Task::new("b", "b", TaskType::Action).with_dependencies(["a".to_string()]),
            Task::new("c", "c", TaskType::Action).with_dependencies(["a".to_string()]),
            Task::new("d", "d", TaskType::Action).with_dependencies(["b".to_string(), "c".to_string()]),
        ]
    }

    #[tokio::test]
    async fn parallel_diamond_respects_levels_and_completes() {
        let executor = Arc::new(SleepyExecutor { delay: Duration::from_millis(20), calls: AtomicU32::new(0) });
        let plan_executor = PlanExecutor::new(PlanConfig::default(), executor.clone());
        let plan = Plan::new("p1", "diamond", Strategy::Parallel, diamond());

        let start = Instant::now();
        let result = plan_executor.execute(plan, CancellationToken::new()).await;
        let wall = start.elapsed();

        assert_eq!(result.status, PlanStatus::Completed);
        assert!(result.tasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert!(wall >= Duration::from_millis(40), "wall={wall:?}");
        assert!(wall < Duration::from_millis(200), "wall={wall:?}");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn sequential_strategy_runs_tasks_one_at_a_time() {
        let executor = Arc::new(SleepyExecutor { delay: Duration::from_millis(5), calls: AtomicU32::new(0) });
        let plan_executor = PlanExecutor::new(PlanConfig::default(), executor);
        let plan = Plan::new("p1", "diamond", Strategy::Sequential, diamond());
        let result = plan_executor.execute(plan, CancellationToken::new()).await;
        assert_eq!(result.status, PlanStatus::Completed);
    }

    struct FailingExecutor;

    #[async_trait]
    impl AgentExecutor for FailingExecutor {
        async fn chat(&self, _message: &str) -> Result<String, AgentError> {
            Err(AgentError::Other("boom".into()))
        }
    }

    #[tokio::test]
    async fn parallel_task_failure_marks_the_plan_failed() {
        let plan_executor = PlanExecutor::new(PlanConfig::default(), Arc::new(FailingExecutor));
        let plan = Plan::new("p1", "diamond", Strategy::Parallel, diamond());
        let result = plan_executor.execute(plan, CancellationToken::new()).await;
        assert_eq!(result.status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn adaptive_starts_sequential_and_switches_to_parallel_when_efficient() {
        // A single level of two independent tasks: Adaptive starts sequential
        // (§4.8), measures parallelEfficiency for that batch, and — since two
        // 5ms tasks run back to back are plenty efficient relative to the
        // default 0.3 threshold — switches to parallel via the symmetric
        // reverse rule, emitting a strategy_switched event.
        let executor = Arc::new(SleepyExecutor { delay: Duration::from_millis(5), calls: AtomicU32::new(0) });
        let plan_executor = PlanExecutor::new(PlanConfig::default(), executor);
        let tasks = vec![
            Task::new("a", "a", TaskType::Action),
            Task::new("b", "b", TaskType::Action),
        ];
        let plan = Plan::new("p1", "goal", Strategy::Adaptive, tasks);
        let result = plan_executor.execute(plan, CancellationToken::new()).await;
        assert_eq!(result.status, PlanStatus::Completed);

        let switched = result
            .timeline
            .iter()
            .any(|e| e["type"] == "strategy_switched" && e["from"] == "sequential" && e["to"] == "parallel");
        assert!(switched, "expected a sequential -> parallel switch: {:?}", result.timeline);
    }

    #[test]
    fn compute_levels_orders_diamond_correctly() {
        let tasks = diamond();
        let levels = compute_levels(&tasks).unwrap();
        assert_eq!(levels, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn compute_levels_detects_cycles() {
        let tasks = vec![
            Task::new("a", "a", TaskType::Action).with_dependencies(["b".to_string()]),
            Task::new("b", "b", TaskType::Action).with_dependencies(["a".to_string()]),
        ];
        assert!(compute_levels(&tasks).is_err());
    }
}
