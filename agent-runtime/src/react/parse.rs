//! Parses labeled `THOUGHT:`/`ACTION:`/`OBSERVATION:`/`FINAL:` lines from raw
//! model output into [`ReActStep`]s.

use serde_json::Value;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Thought,
    Action,
    Observation,
    Final,
}

#[derive(Debug, Clone)]
pub struct ReActStep {
    pub kind: StepKind,
    pub content: String,
    pub tool: Option<String>,
    pub args: Option<Value>,
}

/// Parses every labeled line in `text` into a [`ReActStep`]. Unlabeled lines
/// are ignored. Fails with `ParseError` if the text contains no recognized
/// label at all — callers decide whether that's fatal (`strict`) or a cue to
/// retry next iteration.
pub fn parse_steps(text: &str) -> Result<Vec<ReActStep>, AgentError> {
    let mut steps = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("THOUGHT:") {
            steps.push(ReActStep { kind: StepKind::Thought, content: rest.trim().to_string(), tool: None, args: None });
        } else if let Some(rest) = line.strip_prefix("OBSERVATION:") {
            steps.push(ReActStep { kind: StepKind::Observation, content: rest.trim().to_string(), tool: None, args: None });
        } else if let Some(rest) = line.strip_prefix("FINAL:") {
            steps.push(ReActStep { kind: StepKind::Final, content: rest.trim().to_string(), tool: None, args: None });
        } else if let Some(rest) = line.strip_prefix("ACTION:") {
            let (tool, args) = parse_action(rest.trim())?;
            steps.push(ReActStep { kind: StepKind::Action, content: rest.trim().to_string(), tool: Some(tool), args });
        }
    }

    if steps.is_empty() {
        return Err(AgentError::ParseError(format!("no recognized ReAct step label in: {text:?}")));
    }

    Ok(steps)
}

/// Parses `tool(json-args)` into `(tool, Some(args))`, or `tool` alone into
/// `(tool, None)`.
fn parse_action(rest: &str) -> Result<(String, Option<Value>), AgentError> {
    match rest.find('(') {
        None => Ok((rest.to_string(), None)),
        Some(open) => {
            if !rest.ends_with(')') {
                return Err(AgentError::ParseError(format!("malformed ACTION (unbalanced parens): {rest:?}")));
            }
            let tool = rest[..open].trim().to_string();
            let args_str = &rest[open + 1..rest.len() - 1];
            if args_str.trim().is_empty() {
                return Ok((tool, None));
            }
            let args: Value = serde_json::from_str(args_str)
                .map_err(|e| AgentError::ParseError(format!("invalid ACTION args json: {e}")))?;
            Ok((tool, Some(args)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thought_and_final() {
        let steps = parse_steps("THOUGHT: reasoning here\nFINAL: the answer").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, StepKind::Thought);
        assert_eq!(steps[0].content, "reasoning here");
        assert_eq!(steps[1].kind, StepKind::Final);
        assert_eq!(steps[1].content, "the answer");
    }

    #[test]
    fn parses_action_with_json_args() {
        let steps = parse_steps("ACTION: search({\"q\": \"rust\"})").unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool.as_deref(), Some("search"));
        assert_eq!(steps[0].args, Some(serde_json::json!({"q": "rust"})));
    }

    #[test]
    fn parses_action_with_no_args() {
        let steps = parse_steps("ACTION: get_time()").unwrap();
        assert_eq!(steps[0].tool.as_deref(), Some("get_time"));
        assert_eq!(steps[0].args, None);
    }

    #[test]
    fn unrecognized_text_is_a_parse_error() {
        assert!(parse_steps("just some prose with no labels").is_err());
    }

    #[test]
    fn malformed_action_parens_is_a_parse_error() {
        assert!(parse_steps("ACTION: search(\"q\": \"rust\"").is_err());
    }
}
