//! The agentic loop that drives a turn.
//!
//! A turn follows a **Call → Parse → Act → Observe** cycle:
//!
//! 1. **Build context** (system prompt + working context + trimmed history)
//! 2. **Call the model** through the backend's circuit breaker
//! 3. **Parse** native or text-embedded tool calls
//! 4. **If tool calls**: run the first one through its own breaker, persist
//!    the result, loop back to step 1
//! 5. **If text**: stream it to the client as the final answer
//!
//! The loop also stops on the iteration cap, the turn's wall-clock budget,
//! a backend failure, or cancellation. Progress is reported as
//! [`StreamEvent`]s through a [`StreamingResponder`].

pub mod context;
pub mod loop_runner;
pub mod parser;
pub mod policy;
pub mod responder;
pub mod stream_event;
pub mod turn_lock;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{ContextSettings, ContextWindowBuilder, ToolOutputCompressor};
pub use loop_runner::{AgentLoop, TurnOutcome, TurnReport, TurnRequest, breakers_from_config};
pub use parser::{ParsedResponse, ToolCallParser};
pub use policy::{CompletionDetector, LoopPolicy};
pub use responder::{StreamSettings, StreamingResponder};
pub use stream_event::{StreamEvent, ToolEventSummary, TurnMetrics};
pub use turn_lock::ConversationLocks;
