//! Parsing of raw model output into structured agent moves.
//!
//! Models drift from the requested format constantly, so parsing is lenient:
//! the canonical `Action: tool("input")` form is tried first, then a bare
//! backticked call anywhere in the text. Anything still unmatched is reported
//! as unparseable so the loop can issue a corrective observation.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOutput {
    /// Final answer; terminates the run.
    Answer(String),
    /// A tool invocation, with the thought that preceded it when present.
    Action {
        thought: Option<String>,
        tool: String,
        input: String,
    },
    /// A thought with no accompanying action.
    Thought(String),
    Unparseable,
}

fn answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)(?:Final\s+)?Answer:\s*(.+)").unwrap_or_else(|_| unreachable!())
    })
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"Action:\s*`?([A-Za-z_][A-Za-z0-9_]*)`?\s*\(\s*"?([^"\n)]*)"?\s*\)"#)
            .unwrap_or_else(|_| unreachable!())
    })
}

// Bare `tool("input")` form some models emit without the Action: prefix.
fn bare_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"`?([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*"([^"\n]*)"\s*\)`?"#)
            .unwrap_or_else(|_| unreachable!())
    })
}

fn thought_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Thought:\s*(.+)").unwrap_or_else(|_| unreachable!()))
}

/// Extract the thought line preceding an action, if any.
fn leading_thought(text: &str) -> Option<String> {
    thought_re()
        .captures(text)
        .map(|c| c[1].trim().to_owned())
        .filter(|t| !t.is_empty())
}

/// Parse one model turn into a structured move.
///
/// An answer takes precedence over an action only when it appears first in
/// the text, so a model that reasons about answering but then acts is treated
/// as acting.
#[must_use]
pub fn parse_model_output(text: &str) -> ParsedOutput {
    let answer_at = answer_re().find(text).map(|m| m.start());
    let action_at = action_re().find(text).map(|m| m.start());

    if let Some(a) = answer_at
        && action_at.is_none_or(|b| a < b)
        && let Some(captures) = answer_re().captures(text)
    {
        let answer = captures[1].trim();
        if !answer.is_empty() {
            return ParsedOutput::Answer(answer.to_owned());
        }
    }

    if let Some(captures) = action_re().captures(text) {
        let input = captures[2].trim().trim_matches('"').trim();
        return ParsedOutput::Action {
            thought: leading_thought(text),
            tool: captures[1].to_owned(),
            input: input.to_owned(),
        };
    }

    if let Some(captures) = bare_call_re().captures(text) {
        return ParsedOutput::Action {
            thought: leading_thought(text),
            tool: captures[1].to_owned(),
            input: captures[2].trim().to_owned(),
        };
    }

    if let Some(thought) = leading_thought(text) {
        return ParsedOutput::Thought(thought);
    }

    ParsedOutput::Unparseable
}
