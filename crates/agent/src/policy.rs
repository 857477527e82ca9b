//! Turn policy: when to stop, what to tell the model, and what to show the
//! user when the model leaves us with nothing usable.

use std::time::Duration;

use forgepilot_config::AgentConfig;
use forgepilot_core::message::{Message, truncate_chars};
use forgepilot_core::tool::{EntityCandidate, TOOL_FAILURE_MARKER, ToolResult};

/// Characters of each tool result quoted in a fallback answer.
const RESULT_QUOTE_CHARS: usize = 500;

/// Tool results quoted when the iteration cap is hit.
const CAP_RESULTS: usize = 3;

pub const ANALYZE_RESULTS_NOTE: &str = "You returned an empty response after a tool result. \
You must analyze the tool results above and answer the user's request now.";

pub const CONTINUE_NOTE: &str = "Keep going: use the available tools to gather what you still \
need before giving your final answer.";

pub const EMPTY_ANSWER: &str = "I wasn't able to produce an answer to that. Could you rephrase \
or give me a bit more detail?";

/// Knobs of the agentic loop.
#[derive(Debug, Clone)]
pub struct LoopPolicy {
    pub max_iterations: u32,
    pub min_iterations: u32,
    pub turn_timeout: Duration,
    pub single_tool_per_step: bool,
    pub retry_empty_after_tool: bool,
    pub completion: CompletionDetector,
}

impl LoopPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations.max(1),
            min_iterations: config.min_iterations,
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            single_tool_per_step: config.single_tool_per_step,
            retry_empty_after_tool: config.retry_empty_after_tool,
            completion: CompletionDetector::new(&config.completion_phrases),
        }
    }
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// Case-insensitive phrase match on the model's text.
#[derive(Debug, Clone, Default)]
pub struct CompletionDetector {
    phrases: Vec<String>,
}

impl CompletionDetector {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_complete(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

/// Note appended when several calls arrive in one step.
pub fn single_tool_note(executed: &str, skipped: &[String]) -> String {
    format!(
        "Only the first tool call ({executed}) was executed. Request one tool at a time; \
         the following calls were skipped: {}.",
        skipped.join(", ")
    )
}

/// Note appended when the model asks for a tool that does not exist.
pub fn unknown_tool_note(requested: &str, valid: &[&str]) -> String {
    format!(
        "There is no tool named \"{requested}\". Pick a valid tool from the catalogue: {}.",
        valid.join(", ")
    )
}

/// The single candidate the answer refers to, if exactly one is mentioned.
pub fn select_entity<'a>(
    answer: &str,
    candidates: &'a [EntityCandidate],
) -> Option<&'a EntityCandidate> {
    let answer = answer.to_lowercase();
    let mut mentioned = candidates
        .iter()
        .filter(|c| mentions(&answer, &c.label.to_lowercase()));
    let first = mentioned.next()?;
    // Several candidates can describe the same entity
    if mentioned.all(|c| c.key == first.key && c.value == first.value) {
        Some(first)
    } else {
        None
    }
}

/// Whole-word containment; `haystack` and `word` already lowercased.
fn mentions(haystack: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_word_char = |c: char| c.is_alphanumeric() || c == '_' || c == '-';
    haystack.match_indices(word).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + word.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

/// Answer built from this turn's tool messages when the model produced
/// nothing after being asked to analyze them.
pub fn fallback_summary(tool_messages: &[Message]) -> String {
    if tool_messages.is_empty() {
        return EMPTY_ANSWER.to_string();
    }
    let mut out = String::from("Here is what I found:\n");
    for m in tool_messages {
        out.push_str(&quote_result(m));
    }
    out.trim_end().to_string()
}

/// Best-effort answer when the iteration cap ends the turn.
pub fn cap_answer(partial: &str, tool_messages: &[Message]) -> String {
    let mut out = String::new();
    let partial = partial.trim();
    if !partial.is_empty() {
        out.push_str(partial);
        out.push_str("\n\n");
    }
    out.push_str("I reached the step limit for this request before finishing.");
    let recent = &tool_messages[tool_messages.len().saturating_sub(CAP_RESULTS)..];
    if !recent.is_empty() {
        out.push_str(" The latest results were:\n");
        for m in recent {
            out.push_str(&quote_result(m));
        }
    }
    out.trim_end().to_string()
}

/// Partial answer persisted when the turn runs out of time.
pub fn timeout_answer(partial: &str, tool_messages: &[Message]) -> Option<String> {
    let partial = partial.trim();
    if partial.is_empty() && tool_messages.is_empty() {
        return None;
    }
    let mut out = String::new();
    if !partial.is_empty() {
        out.push_str(partial);
        out.push_str("\n\n");
    }
    out.push_str("(This request timed out before the answer was complete.)");
    if !tool_messages.is_empty() && partial.is_empty() {
        out.push_str(" Results gathered so far:\n");
        for m in &tool_messages[tool_messages.len().saturating_sub(CAP_RESULTS)..] {
            out.push_str(&quote_result(m));
        }
    }
    Some(out.trim_end().to_string())
}

fn quote_result(message: &Message) -> String {
    let content = message.content.as_str();
    if ToolResult::is_failure_content(content) {
        let detail = content.trim_start_matches(TOOL_FAILURE_MARKER);
        format!("- (failed) {}\n", truncate_chars(detail, RESULT_QUOTE_CHARS))
    } else {
        format!("- {}\n", truncate_chars(content, RESULT_QUOTE_CHARS))
    }
}
