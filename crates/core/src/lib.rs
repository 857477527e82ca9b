//! # Forgepilot Core
//!
//! Domain types, traits, and error definitions for the Forgepilot
//! tool-calling engine. This crate has **no framework dependencies**; it
//! defines the model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here: the model backend, the tools, the
//! conversation store. Implementations live in their own crates, which
//! keeps the loop testable with scripted doubles and keeps the
//! dependency graph pointing inward.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;
pub mod working_context;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{ChatMessage, ChatRequest, ChatResponse, ChatRole, ModelBackend};
pub use store::ConversationStore;
pub use tool::{CallerIdentity, Tool, ToolCall, ToolDescriptor, ToolRegistry, ToolResult};
pub use working_context::WorkingContext;
