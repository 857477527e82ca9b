//! # Forgepilot Resilience
//!
//! Circuit breakers for every unreliable dependency the engine talks to:
//! one for the model backend, one per tool. See [`CircuitBreaker`] for the
//! state machine and [`BreakerManager`] for the shared registry.

pub mod breaker;
pub mod manager;

pub use breaker::{
    BreakerConfig, BreakerError, BreakerState, BreakerStats, CircuitBreaker, Permit,
    TransitionCallback,
};
pub use manager::{BreakerManager, MODEL_BACKEND, tool_breaker_name};
