//! Model backend implementations for Forgepilot.
//!
//! All backends implement the `forgepilot_core::ModelBackend` trait.
//! [`build_from_config`] picks one from the `[backend]` section.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatBackend;

use forgepilot_config::BackendConfig;
use forgepilot_core::error::BackendError;

/// Build the configured backend.
///
/// Every supported endpoint speaks the OpenAI chat-completions dialect;
/// `name` only selects defaults (e.g. no key required for `ollama`).
pub fn build_from_config(config: &BackendConfig) -> Result<OpenAiCompatBackend, BackendError> {
    if config.api_key.is_none() && config.name != "ollama" {
        tracing::warn!(backend = %config.name, "No API key configured");
    }
    OpenAiCompatBackend::from_config(config)
}
