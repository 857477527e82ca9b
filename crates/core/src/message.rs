//! Message and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! User sends a message → the loop builds context → the model answers or
//! asks for a tool → results are appended → the transcript is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::working_context::WorkingContext;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message in the stored transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The final answer of a turn
    Assistant,
    /// Tool execution result
    Tool,
    /// A user-visible failure notice
    Error,
    /// Transient progress narration
    Status,
    /// The model's stated intent before acting
    Thinking,
    /// A multi-step plan announced by the model
    Plan,
    /// An instruction the engine appends for the model
    System,
}

impl Role {
    /// Narration roles that carry no information once they are stale.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, Role::Status | Role::Thinking | Role::System)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Error => "error",
            Role::Status => "status",
            Role::Thinking => "thinking",
            Role::Plan => "plan",
            Role::System => "system",
        }
    }
}

/// A single message in a conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// The conversation this message belongs to
    pub conversation_id: ConversationId,

    /// Who produced this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// The tool that produced this message (role = tool only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with the given role.
    pub fn new(conversation_id: &ConversationId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            role,
            content: content.into(),
            tool_name: None,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(conversation_id: &ConversationId, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(conversation_id: &ConversationId, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, content)
    }

    /// Create an engine note addressed to the model.
    pub fn system(conversation_id: &ConversationId, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(
        conversation_id: &ConversationId,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(conversation_id, Role::Tool, content);
        msg.tool_name = Some(tool_name.into());
        msg
    }

    /// First line of the content, cut to at most `max_chars` characters.
    pub fn summary(&self, max_chars: usize) -> String {
        let first_line = self.content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        truncate_chars(first_line.trim(), max_chars)
    }
}

/// A conversation: ownership, title, and the working context the loop
/// maintains. Messages live in the store, keyed by conversation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// The user who owns this conversation
    pub user_id: String,

    /// Optional title (auto-generated from the first user message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Entities the conversation has discovered
    #[serde(default)]
    pub working_context: WorkingContext,

    /// One-line summary of the last message of the last turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_summary: Option<String>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the conversation was last touched by a turn
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation owned by `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            user_id: user_id.into(),
            title: None,
            working_context: WorkingContext::default(),
            last_message_summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the conversation as modified.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Derive a title from the first user message, cut at a word boundary.
    pub fn title_from(text: &str, max_chars: usize) -> String {
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.chars().count() <= max_chars {
            return text;
        }
        let cut = truncate_chars(&text, max_chars);
        let cut = cut.trim_end_matches('…');
        match cut.rfind(' ') {
            Some(idx) if idx > 0 => format!("{}…", &cut[..idx]),
            _ => format!("{cut}…"),
        }
    }
}

/// Cut `text` to `max_chars` characters, appending `…` when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let conv = ConversationId::from("c1");
        let msg = Message::user(&conv, "Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert_eq!(msg.conversation_id, conv);
        assert!(msg.tool_name.is_none());
    }

    #[test]
    fn tool_message_carries_tool_name() {
        let msg = Message::tool_result(&ConversationId::from("c1"), "list_repos", "list_repos: ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_name.as_deref(), Some("list_repos"));
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Thinking).unwrap();
        assert_eq!(json, r#""thinking""#);
        let role: Role = serde_json::from_str(r#""error""#).unwrap();
        assert_eq!(role, Role::Error);
    }

    #[test]
    fn ephemeral_roles() {
        assert!(Role::Status.is_ephemeral());
        assert!(Role::Thinking.is_ephemeral());
        assert!(!Role::Plan.is_ephemeral());
        assert!(!Role::Tool.is_ephemeral());
    }

    #[test]
    fn title_is_cut_at_word_boundary() {
        let title = Conversation::title_from("please list   every repository I own right now", 20);
        assert_eq!(title, "please list every…");
        assert_eq!(Conversation::title_from("short one", 20), "short one");
    }

    #[test]
    fn summary_uses_first_non_empty_line() {
        let msg = Message::assistant(&ConversationId::from("c"), "\n\nFound two repos.\nalpha\nbeta");
        assert_eq!(msg.summary(100), "Found two repos.");
        assert_eq!(msg.summary(6), "Found…");
    }
}
