//! Domain event system: decoupled communication between bounded contexts.
//!
//! The loop and the breakers publish here; the gateway and the CLI
//! subscribe to log or expose what happened without being wired into the
//! turn itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool was executed
    ToolExecuted {
        conversation_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A circuit breaker changed state
    BreakerStateChanged {
        breaker: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn produced its final answer
    TurnCompleted {
        conversation_id: String,
        iterations: u32,
        tools_used: Vec<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A turn ended without a normal answer (backend failure, timeout,
    /// cancellation)
    TurnAborted {
        conversation_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
