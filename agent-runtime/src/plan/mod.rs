//! Task/Plan data model shared by the Plan Decomposer (C8) and Plan Executor
//! (C9).

pub mod decomposer;
pub mod executor;

pub use decomposer::PlanDecomposer;
pub use executor::{AgentExecutor, PlanExecutor, PlanMetrics, PlanResult, PlanStatus};

use std::collections::HashSet;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Action,
    Observation,
    Decision,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub parent_id: Option<String>,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub dependencies: HashSet<String>,
    #[serde(default)]
    pub subtasks: Vec<Task>,
    pub depth: u32,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(skip, default)]
    pub started_at: Option<SystemTime>,
    #[serde(skip, default)]
    pub completed_at: Option<SystemTime>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            description: description.into(),
            task_type,
            dependencies: HashSet::new(),
            subtasks: Vec::new(),
            depth: 0,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Parallel,
    Adaptive,
}

/// A goal-completion criterion, evaluated against completed task results.
/// Declared as a predicate over the set of completed tasks; "all tasks
/// completed" is used when no criteria are declared (§4.8).
pub trait GoalCriterion: Send + Sync {
    fn is_satisfied(&self, completed: &[&Task]) -> bool;
    fn name(&self) -> &str;
}

/// Criterion satisfied once at least `count` tasks have completed.
pub struct MinCompletedCount {
    pub name: String,
    pub count: usize,
}

impl GoalCriterion for MinCompletedCount {
    fn is_satisfied(&self, completed: &[&Task]) -> bool {
        completed.len() >= self.count
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct Plan {
    pub id: String,
    pub goal: String,
    pub strategy: Strategy,
    pub tasks: Vec<Task>,
    pub goal_state: Vec<Box<dyn GoalCriterion>>,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("id", &self.id)
            .field("goal", &self.goal)
            .field("strategy", &self.strategy)
            .field("tasks", &self.tasks)
            .field("goal_state", &self.goal_state.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Plan {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, strategy: Strategy, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            strategy,
            tasks,
            goal_state: Vec::new(),
        }
    }

    /// Flattened view of every task in the tree, top-level first, depth-first
    /// through subtasks.
    pub fn all_tasks(&self) -> Vec<&Task> {
        fn walk<'a>(tasks: &'a [Task], out: &mut Vec<&'a Task>) {
            for t in tasks {
                out.push(t);
                walk(&t.subtasks, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.tasks, &mut out);
        out
    }
}

/// Validates structural invariants (§3/§8): unique ids, dependencies
/// referencing existing ids, no cycles, depth and fan-out bounds.
pub fn validate_plan(tasks: &[Task], max_depth: u32, max_subtasks: u32) -> Result<(), AgentError> {
    let mut ids = HashSet::new();
    let mut all = Vec::new();
    collect(tasks, &mut all);

    for t in &all {
        if !ids.insert(t.id.clone()) {
            return Err(AgentError::TaskValidationError(format!("duplicate task id: {}", t.id)));
        }
    }

    for t in &all {
        if t.depth > max_depth {
            return Err(AgentError::TaskValidationError(format!(
                "task {} exceeds max depth {max_depth}",
                t.id
            )));
        }
        for dep in &t.dependencies {
            if !ids.contains(dep) {
                return Err(AgentError::TaskValidationError(format!(
                    "task {} depends on unknown id {dep}",
                    t.id
                )));
            }
        }
    }

    if tasks.len() as u32 > max_subtasks {
        return Err(AgentError::TaskValidationError(format!(
            "top-level fan-out {} exceeds max_subtasks {max_subtasks}",
            tasks.len()
        )));
    }
    for t in &all {
        if t.subtasks.len() as u32 > max_subtasks {
            return Err(AgentError::TaskValidationError(format!(
                "task {} fan-out {} exceeds max_subtasks {max_subtasks}",
                t.id,
                t.subtasks.len()
            )));
        }
    }

    detect_cycle(&all)?;
    Ok(())
}

fn collect<'a>(tasks: &'a [Task], out: &mut Vec<&'a Task>) {
    for t in tasks {
        out.push(t);
        collect(&t.subtasks, out);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// DFS with grey/black coloring over the dependency graph.
fn detect_cycle(all: &[&Task]) -> Result<(), AgentError> {
    use std::collections::HashMap;
    let index: HashMap<&str, &Task> = all.iter().map(|t| (t.id.as_str(), *t)).collect();
    let mut colors: HashMap<&str, Color> = all.iter().map(|t| (t.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a Task>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<(), AgentError> {
        match colors.get(id) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Grey) => {
                return Err(AgentError::TaskValidationError(format!(
                    "dependency cycle detected involving task {id}"
                )))
            }
            _ => {}
        }
        colors.insert(id, Color::Grey);
        if let Some(task) = index.get(id) {
            for dep in &task.dependencies {
                visit(dep, index, colors)?;
            }
        }
        colors.insert(id, Color::Black);
        Ok(())
    }

    for t in all {
        visit(&t.id, &index, &mut colors)?;
    }
    Ok(())
}

#[async_trait]
pub trait PlanModel: Send + Sync {
    /// Generates a raw JSON plan description for `goal`, given constraints.
    async fn generate(&self, goal: &str, max_depth: u32, min_subtasks: u32, max_subtasks: u32) -> Result<String, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_plan_detects_duplicate_ids() {
        let tasks = vec![
            Task::new("a", "first", TaskType::Action),
            Task::new("a", "dup", TaskType::Action),
        ];
        assert!(validate_plan(&tasks, 5, 10).is_err());
    }

    #[test]
    fn validate_plan_detects_unknown_dependency() {
        let tasks = vec![Task::new("a", "first", TaskType::Action).with_dependencies(["missing".to_string()])];
        assert!(validate_plan(&tasks, 5, 10).is_err());
    }

    #[test]
    fn validate_plan_detects_cycle() {
        let tasks = vec![
            Task::new("a", "first", TaskType::Action).with_dependencies(["b".to_string()]),
            Task::new("b", "second", TaskType::Action).with_dependencies(["a".to_string()]),
        ];
        assert!(validate_plan(&tasks, 5, 10).is_err());
    }

    #[test]
    fn validate_plan_accepts_a_valid_diamond() {
        let tasks = vec![
            Task::new("a", "a", TaskType::Action),
            Task::new("b", "b", TaskType::Action).with_dependencies(["a".to_string()]),
            Task::new("c", "c", TaskType::Action).with_dependencies(["a".to_string()]),
            Task::new("d", "d", TaskType::Action).with_dependencies(["b".to_string(), "c".to_string()]),
        ];
        assert!(validate_plan(&tasks, 5, 10).is_ok());
    }
}
