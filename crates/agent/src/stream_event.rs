//! Turn progress events.
//!
//! `StreamEvent` is what the loop reports while it works; the gateway
//! forwards each one as a named SSE event whose data is [`StreamEvent::payload`].
//!
//! - `status`: transient progress narration
//! - `thinking`: the model's stated intent before acting
//! - `tool`: a tool call finished
//! - `start`: final-answer rendering begins
//! - `chunk`: a slice of the final answer
//! - `complete`: the final answer with performance metadata
//! - `done`: the turn is finished
//! - `error`: unrecoverable failure

use forgepilot_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Placeholder carried by the `start` event.
pub const START_MARKER: &str = "[answer]";

/// Summary of one tool execution, as sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEventSummary {
    pub name: String,
    /// 1-based position of this call within the turn
    pub ordinal: usize,
    pub success: bool,
    /// Output (or error), truncated for display
    pub output: String,
}

/// Performance metadata attached to `complete`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub total_ms: u64,
    /// Time spent waiting on the model
    pub thinking_ms: u64,
    /// Time spent in tools
    pub tool_ms: u64,
    pub tool_calls: usize,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { message: String },
    Thinking { message: String },
    Tool(ToolEventSummary),
    Start { marker: String },
    Chunk { content: String },
    Complete { answer: String, metrics: TurnMetrics },
    Done,
    Error { message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Thinking { .. } => "thinking",
            Self::Tool(_) => "tool",
            Self::Start { .. } => "start",
            Self::Chunk { .. } => "chunk",
            Self::Complete { .. } => "complete",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Wire payload of the event: a single-line JSON object, or empty for
    /// `done`.
    ///
    /// Text is always JSON-encoded so that line breaks (including a bare
    /// `\r`) survive SSE framing byte for byte.
    pub fn payload(&self) -> String {
        let value = match self {
            Self::Status { message } | Self::Thinking { message } | Self::Error { message } => {
                serde_json::json!({ "message": message })
            }
            Self::Tool(summary) => serde_json::to_value(summary).unwrap_or_default(),
            Self::Start { marker } => serde_json::json!({ "marker": marker }),
            Self::Chunk { content } => serde_json::json!({ "content": content }),
            Self::Complete { answer, metrics } => {
                serde_json::json!({ "answer": answer, "metrics": metrics })
            }
            Self::Done => return String::new(),
        };
        value.to_string()
    }

    /// Whether this event ends the turn's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}
