//! Context window assembly.
//!
//! Every model call gets `[system prompt, working-context snapshot,
//! ...trimmed history]`. The stored transcript is never modified; trimming
//! and compression only shape what the model sees.
//!
//! # Determinism
//!
//! Identical transcripts and working context produce identical windows.

use forgepilot_config::ContextConfig;
use forgepilot_core::message::{Message, Role};
use forgepilot_core::provider::{ChatMessage, ChatRole};
use forgepilot_core::tool::ToolRegistry;
use forgepilot_core::working_context::WorkingContext;

use crate::context::compress::ToolOutputCompressor;

pub const DEFAULT_PREAMBLE: &str = "You are Forgepilot, an assistant that works on the user's code \
repositories through tools. Use tools to look things up instead of guessing, and answer in \
plain language once you have what you need.";

const CALL_CONVENTION: &str = "## Calling tools\n\
If your reply cannot use native function calling, request a tool with a fenced block:\n\n\
```tool_call\n{\"tool\": \"<name>\", \"parameters\": {\"<param>\": \"<value>\"}}\n```\n\n\
Request one tool at a time and wait for its result before deciding the next step. \
When you have enough information, answer the user directly without a tool block.";

/// History shaping knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSettings {
    pub history_limit: usize,
    pub ephemeral_window: usize,
    pub tool_output_limit: usize,
    pub list_preview_items: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl ContextSettings {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            ephemeral_window: config.ephemeral_window,
            tool_output_limit: config.tool_output_limit,
            list_preview_items: config.list_preview_items,
        }
    }
}

/// Builds the message list for each model call. Stateless once built.
pub struct ContextWindowBuilder {
    settings: ContextSettings,
    compressor: ToolOutputCompressor,
    system_prompt: String,
}

impl ContextWindowBuilder {
    pub fn new(settings: ContextSettings, registry: &ToolRegistry) -> Self {
        Self::with_prompt(settings, registry, DEFAULT_PREAMBLE, None)
    }

    /// Builder with a custom preamble and an optional project document.
    pub fn with_prompt(
        settings: ContextSettings,
        registry: &ToolRegistry,
        preamble: &str,
        project_context: Option<&str>,
    ) -> Self {
        let mut system_prompt = format!(
            "{preamble}\n\n{}\n{CALL_CONVENTION}",
            registry.describe_all()
        );
        if let Some(doc) = project_context.map(str::trim).filter(|d| !d.is_empty()) {
            system_prompt.push_str("\n\n## Project context\n");
            system_prompt.push_str(doc);
        }
        Self {
            settings,
            compressor: ToolOutputCompressor::new(
                settings.tool_output_limit,
                settings.list_preview_items,
            ),
            system_prompt,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn settings(&self) -> ContextSettings {
        self.settings
    }

    /// Assemble the window for one model call.
    pub fn build(&self, history: &[Message], working: &WorkingContext) -> Vec<ChatMessage> {
        let mut window = Vec::with_capacity(self.settings.history_limit + 2);
        window.push(ChatMessage::system(self.system_prompt.clone()));
        window.push(ChatMessage::system(format!(
            "Working context (entities discovered so far): {}",
            working.snapshot()
        )));
        window.extend(self.trim(history).into_iter().map(|m| self.project(m)));
        window
    }

    /// Drop stale narration, then keep the most recent `history_limit`.
    fn trim<'a>(&self, history: &'a [Message]) -> Vec<&'a Message> {
        let fresh_from = history.len().saturating_sub(self.settings.ephemeral_window);
        let kept: Vec<&Message> = history
            .iter()
            .enumerate()
            .filter(|(i, m)| !m.role.is_ephemeral() || *i >= fresh_from)
            .map(|(_, m)| m)
            .collect();
        let skip = kept.len().saturating_sub(self.settings.history_limit);
        kept.into_iter().skip(skip).collect()
    }

    fn project(&self, message: &Message) -> ChatMessage {
        let role = match message.role {
            Role::User => ChatRole::User,
            Role::Tool => ChatRole::Tool,
            Role::System => ChatRole::System,
            Role::Assistant | Role::Error | Role::Status | Role::Thinking | Role::Plan => {
                ChatRole::Assistant
            }
        };
        let content = if message.role == Role::Tool {
            self.compressor.compress(&message.content)
        } else {
            message.content.clone()
        };
        ChatMessage {
            role,
            content,
            tool_name: message.tool_name.clone(),
        }
    }
}
