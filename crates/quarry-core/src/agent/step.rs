//! Agent run trace model.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Thought,
    Action,
    Observation,
    Answer,
    Error,
}

/// One entry in an agent run's append-only trace. The trace is the agent's
/// only working memory; every model call sees the full sequence.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub index: usize,
    pub kind: StepKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<String>,
}

impl AgentStep {
    #[must_use]
    pub fn thought(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            kind: StepKind::Thought,
            content: content.into(),
            tool_name: None,
            tool_input: None,
        }
    }

    #[must_use]
    pub fn action(index: usize, tool: impl Into<String>, input: impl Into<String>) -> Self {
        let tool = tool.into();
        let input = input.into();
        Self {
            index,
            kind: StepKind::Action,
            content: format!("{tool}({input})"),
            tool_name: Some(tool),
            tool_input: Some(input),
        }
    }

    #[must_use]
    pub fn observation(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            kind: StepKind::Observation,
            content: content.into(),
            tool_name: None,
            tool_input: None,
        }
    }

    #[must_use]
    pub fn answer(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            kind: StepKind::Answer,
            content: content.into(),
            tool_name: None,
            tool_input: None,
        }
    }

    #[must_use]
    pub fn error(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            kind: StepKind::Error,
            content: content.into(),
            tool_name: None,
            tool_input: None,
        }
    }
}

/// Terminal state of a completed run. Step-budget exhaustion is distinct
/// from an error so callers can tell truncation from failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Answered,
    Errored,
    MaxStepsExceeded,
}

/// A finished agent run: the full trace plus its terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    pub steps: Vec<AgentStep>,
    pub state: RunState,
    pub answer: Option<String>,
}
