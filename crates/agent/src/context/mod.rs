//! Context window shaping.
//!
//! | Part | Source | Trim strategy |
//! |------|--------|---------------|
//! | System prompt | preamble + tool catalogue + project document | never trimmed |
//! | Working context | conversation's discovered entities | never trimmed |
//! | History | stored transcript | stale narration dropped, oldest dropped, tool output compressed |

pub mod compress;
pub mod window;

pub use compress::ToolOutputCompressor;
pub use window::{ContextSettings, ContextWindowBuilder, DEFAULT_PREAMBLE};
