//! Plan Decomposer (C8): converts a goal into a task DAG via the model, or
//! skips the model call for trivially simple goals.

use std::sync::Arc;

use serde::Deserialize;

use super::{validate_plan, PlanModel, Strategy, Task, TaskStatus, TaskType};
use crate::config::PlanConfig;
use crate::error::AgentError;
use crate::plan::Plan;

const ENUMERATIVE_KEYWORDS: &[&str] = &["first", "then", "next", "finally", "and then", "after that", "also"];

/// Heuristic complexity score: word-count buckets + enumerative keyword
/// presence + comma count.
fn complexity_score(goal: &str) -> u32 {
    let words = goal.split_whitespace().count() as u32;
    let word_bucket = match words {
        0..=5 => 0,
        6..=12 => 3,
        13..=25 => 6,
        _ => 9,
    };
    let lower = goal.to_lowercase();
    let keyword_hits = ENUMERATIVE_KEYWORDS.iter().filter(|k| lower.contains(**k)).count() as u32;
    let commas = goal.matches(',').count() as u32;
    word_bucket + keyword_hits * 2 + commas
}

#[derive(Deserialize)]
struct RawTask {
    id: String,
    description: String,
    #[serde(rename = "type", default = "default_task_type")]
    task_type: TaskType,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    subtasks: Vec<RawTask>,
}

fn default_task_type() -> TaskType {
    TaskType::Action
}

#[derive(Deserialize)]
struct RawPlan {
    tasks: Vec<RawTask>,
}

fn into_task(raw: RawTask, parent_id: Option<String>, depth: u32) -> Task {
    let subtasks = raw
        .subtasks
        .into_iter()
        .map(|s| into_task(s, Some(raw.id.clone()), depth + 1))
        .collect();
    Task {
        id: raw.id,
        parent_id,
        description: raw.description,
        task_type: raw.task_type,
        dependencies: raw.dependencies.into_iter().collect(),
        subtasks,
        depth,
        status: TaskStatus::Pending,
        result: None,
        error: None,
        started_at: None,
        completed_at: None,
    }
}

/// Strips a leading/trailing Markdown code fence (```json ... ``` or ``` ... ```).
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches('\n');
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub struct PlanDecomposer {
    config: PlanConfig,
    model: Arc<dyn PlanModel>,
    strategy: Strategy,
}

impl PlanDecomposer {
    pub fn new(config: PlanConfig, model: Arc<dyn PlanModel>, strategy: Strategy) -> Self {
        Self { config, model, strategy }
    }

    pub async fn decompose(&self, goal: &str) -> Result<Plan, AgentError> {
        if complexity_score(goal) < self.config.min_subtask_split {
            let task = Task::new("task-1", goal, TaskType::Action);
            return Ok(Plan::new("plan-1", goal, self.strategy, vec![task]));
        }

        let raw_output = self
            .model
            .generate(goal, self.config.max_depth, self.config.min_subtasks, self.config.max_subtasks)
            .await?;
        let stripped = strip_code_fences(&raw_output);
        let raw_plan: RawPlan = serde_json::from_str(stripped)
            .map_err(|e| AgentError::ParseError(format!("failed to parse plan JSON: {e}")))?;

        let tasks: Vec<Task> = raw_plan.tasks.into_iter().map(|t| into_task(t, None, 0)).collect();
        validate_plan(&tasks, self.config.max_depth, self.config.max_subtasks)?;

        Ok(Plan::new("plan-1", goal, self.strategy, tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedModel(String);

    #[async_trait]
    impl PlanModel for FixedModel {
        async fn generate(&self, _goal: &str, _max_depth: u32, _min: u32, _max: u32) -> Result<String, AgentError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn short_goal_returns_single_task_plan_without_calling_model() {
        let model = Arc::new(FixedModel("should not be used".into()));
        let decomposer = PlanDecomposer::new(PlanConfig::default(), model, Strategy::Sequential);
        let plan = decomposer.decompose("do the thing").await.unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].description, "do the thing");
    }

    #[tokio::test]
    async fn complex_goal_parses_model_json_stripping_code_fences() {
        let json = r#"```json
        {"tasks": [
            {"id": "a", "description": "first, do research", "type": "action", "dependencies": []},
            {"id": "b", "description": "then write it up", "type": "aggregate", "dependencies": ["a"]}
        ]}
        ```"#;
        let model = Arc::new(FixedModel(json.into()));
        let decomposer = PlanDecomposer::new(PlanConfig::default(), model, Strategy::Sequential);
        let goal = "first, research the topic thoroughly, then write a detailed summary, finally publish it";
        let plan = decomposer.decompose(goal).await.unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].dependencies.len(), 1);
    }

    #[tokio::test]
    async fn invalid_plan_json_surfaces_task_validation_error() {
        let json = r#"{"tasks": [
            {"id": "a", "description": "x", "type": "action", "dependencies": ["missing"]}
        ]}"#;
        let model = Arc::new(FixedModel(json.into()));
        let decomposer = PlanDecomposer::new(PlanConfig::default(), model, Strategy::Sequential);
        let goal = "first, research the topic thoroughly, then write a detailed summary, finally publish it";
        let err = decomposer.decompose(goal).await.unwrap_err();
        assert!(matches!(err, AgentError::TaskValidationError(_)));
    }
}
