//! ReAct agent loop: Thought → Action → Observation, bounded and
//! self-correcting.
//!
//! The loop never aborts on a malformed model turn. Formatting errors become
//! corrective observations and recoverable tool failures become error
//! observations; only an exhausted retry budget, an exhausted step budget, a
//! dead provider, or a tool failure no later turn can recover from terminates
//! a run without an answer.

pub mod parser;
pub mod step;
pub mod tools;

use std::sync::Arc;

use quarry_llm::provider::Message;
use quarry_llm::LlmProvider;
use tokio::sync::mpsc;

use crate::config::AgentConfig;
use crate::error::ToolError;
use parser::{ParsedOutput, parse_model_output};
use step::{AgentRun, AgentStep, RunState, StepKind};
use tools::{Tool, Toolbox};

const FORMAT_CORRECTION: &str = "Your reply did not follow the required format. Respond with \
either `Thought: ...` followed by `Action: tool(\"input\")`, or `Answer: ...` when you are done.";

const ACTION_NUDGE: &str = "You have been thinking without acting. Choose a tool and issue an \
`Action: tool(\"input\")` line, or give your `Answer:` if you already know it.";

fn system_prompt() -> String {
    format!(
        "You answer questions about an indexed document collection by reasoning step by step.\n\
         Available tools:\n{}\n\n\
         Respond in exactly one of two forms:\n\
         Thought: <your reasoning>\n\
         Action: <tool>(\"<input>\")\n\n\
         or, when you can answer:\n\
         Answer: <final answer>",
        Tool::catalogue()
    )
}

/// Emits each step to `sink` as it is appended. Delivery is lossless: a full
/// buffer waits for the receiver, so no step is ever dropped mid-run. A
/// dropped receiver stops streaming but never stops the run; the trace stays
/// authoritative.
async fn emit(steps: &mut Vec<AgentStep>, sink: Option<&mpsc::Sender<AgentStep>>, step: AgentStep) {
    if let Some(sink) = sink {
        let _ = sink.send(step.clone()).await;
    }
    steps.push(step);
}

fn render_trace(steps: &[AgentStep]) -> String {
    let mut out = String::new();
    for step in steps {
        let label = match step.kind {
            StepKind::Thought => "Thought",
            StepKind::Action => "Action",
            StepKind::Observation | StepKind::Error => "Observation",
            StepKind::Answer => "Answer",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&step.content);
        out.push('\n');
    }
    out
}

pub struct Agent<P: LlmProvider> {
    provider: Arc<P>,
    toolbox: Toolbox<P>,
    config: AgentConfig,
}

impl<P: LlmProvider + 'static> Agent<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, toolbox: Toolbox<P>, config: AgentConfig) -> Self {
        Self {
            provider,
            toolbox,
            config,
        }
    }

    /// Run the loop to completion for one question, optionally streaming
    /// steps to `sink`. Streaming applies backpressure rather than dropping
    /// steps, so a sink with less capacity than the trace must be consumed
    /// concurrently. Always returns a finished run; failures are terminal
    /// states in the trace, not panics or early errors.
    pub async fn run(&self, question: &str, sink: Option<mpsc::Sender<AgentStep>>) -> AgentRun {
        let sink = sink.as_ref();
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut format_retries = 0u32;
        let mut consecutive_thoughts = 0u32;

        for turn in 0..self.config.max_steps {
            let reply = match self.prompt_model(question, &steps).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(turn, "model call failed: {e}");
                    let index = steps.len();
                    emit(&mut steps, sink, AgentStep::error(index, e.to_string())).await;
                    return AgentRun {
                        steps,
                        state: RunState::Errored,
                        answer: None,
                    };
                }
            };

            match parse_model_output(&reply) {
                ParsedOutput::Answer(answer) => {
                    let index = steps.len();
                    emit(&mut steps, sink, AgentStep::answer(index, answer.clone())).await;
                    return AgentRun {
                        steps,
                        state: RunState::Answered,
                        answer: Some(answer),
                    };
                }
                ParsedOutput::Action {
                    thought,
                    tool,
                    input,
                } => {
                    format_retries = 0;
                    consecutive_thoughts = 0;
                    if let Some(thought) = thought {
                        let index = steps.len();
                        emit(&mut steps, sink, AgentStep::thought(index, thought)).await;
                    }
                    let index = steps.len();
                    emit(&mut steps, sink, AgentStep::action(index, &tool, &input)).await;
                    let observation = match self.execute(&tool, &input).await {
                        Ok(observation) => observation,
                        Err(e) if e.is_fatal() => {
                            tracing::warn!(tool = %tool, "fatal tool failure: {e}");
                            let index = steps.len();
                            emit(&mut steps, sink, AgentStep::error(index, e.to_string())).await;
                            return AgentRun {
                                steps,
                                state: RunState::Errored,
                                answer: None,
                            };
                        }
                        Err(e @ ToolError::UnknownTool(_)) => {
                            format!("Error: {e}. Available tools:\n{}", Tool::catalogue())
                        }
                        Err(e) => {
                            tracing::warn!(tool = %tool, "tool call failed: {e}");
                            format!("Error: {e}")
                        }
                    };
                    let index = steps.len();
                    emit(&mut steps, sink, AgentStep::observation(index, observation)).await;
                }
                ParsedOutput::Thought(thought) => {
                    format_retries = 0;
                    consecutive_thoughts += 1;
                    let index = steps.len();
                    emit(&mut steps, sink, AgentStep::thought(index, thought)).await;
                    if consecutive_thoughts >= 2 {
                        consecutive_thoughts = 0;
                        let index = steps.len();
                        emit(&mut steps, sink, AgentStep::observation(index, ACTION_NUDGE)).await;
                    }
                }
                ParsedOutput::Unparseable => {
                    format_retries += 1;
                    if format_retries > self.config.max_format_retries {
                        let index = steps.len();
                        emit(
                            &mut steps,
                            sink,
                            AgentStep::error(
                                index,
                                format!(
                                    "model output unparseable after {format_retries} attempts"
                                ),
                            ),
                        )
                        .await;
                        return AgentRun {
                            steps,
                            state: RunState::Errored,
                            answer: None,
                        };
                    }
                    tracing::debug!(turn, format_retries, "unparseable model turn");
                    let index = steps.len();
                    emit(
                        &mut steps,
                        sink,
                        AgentStep::observation(index, FORMAT_CORRECTION),
                    )
                    .await;
                }
            }
        }

        let index = steps.len();
        emit(
            &mut steps,
            sink,
            AgentStep::error(
                index,
                format!("step budget of {} exhausted", self.config.max_steps),
            ),
        )
        .await;
        AgentRun {
            steps,
            state: RunState::MaxStepsExceeded,
            answer: None,
        }
    }

    async fn prompt_model(
        &self,
        question: &str,
        steps: &[AgentStep],
    ) -> quarry_llm::error::Result<String> {
        let mut user = format!("Question: {question}\n");
        if !steps.is_empty() {
            user.push('\n');
            user.push_str(&render_trace(steps));
        }
        self.provider
            .chat(&[Message::system(system_prompt()), Message::user(user)])
            .await
    }

    /// Dispatch one parsed action. The caller decides whether a failure is
    /// an observation or the end of the run.
    async fn execute(&self, tool_name: &str, input: &str) -> Result<String, ToolError> {
        let Some(tool) = Tool::parse(tool_name) else {
            return Err(ToolError::UnknownTool(tool_name.to_owned()));
        };
        self.toolbox.dispatch(tool, input).await
    }
}
