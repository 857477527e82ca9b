//! Ordered delivery of a turn's progress to one client.
//!
//! The responder owns the sending half of the event channel for exactly one
//! turn and guarantees the stream ends with exactly one terminal: either
//! `complete` + `done` or `error`. A client that goes away is not an error;
//! events are simply no longer sent.

use std::time::Duration;

use forgepilot_config::StreamingConfig;
use forgepilot_core::message::truncate_chars;
use tokio::sync::mpsc;

use crate::stream_event::{START_MARKER, StreamEvent, ToolEventSummary, TurnMetrics};

/// Characters of tool output shown in a `tool` event.
const TOOL_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl StreamSettings {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
        }
    }

    /// No inter-chunk delay; used by non-interactive callers and tests.
    pub fn immediate(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_delay: Duration::ZERO,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from_config(&StreamingConfig::default())
    }
}

pub struct StreamingResponder {
    tx: mpsc::Sender<StreamEvent>,
    settings: StreamSettings,
    connected: bool,
    finished: bool,
}

impl StreamingResponder {
    pub fn new(tx: mpsc::Sender<StreamEvent>, settings: StreamSettings) -> Self {
        Self {
            tx,
            settings,
            connected: true,
            finished: false,
        }
    }

    /// A responder plus the receiving end of its channel.
    pub fn channel(
        settings: StreamSettings,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, settings), rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.tx.is_closed()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn status(&mut self, message: impl Into<String>) {
        self.emit(StreamEvent::Status {
            message: message.into(),
        })
        .await;
    }

    pub async fn thinking(&mut self, message: impl Into<String>) {
        self.emit(StreamEvent::Thinking {
            message: message.into(),
        })
        .await;
    }

    pub async fn tool(&mut self, name: &str, ordinal: usize, success: bool, output: &str) {
        self.emit(StreamEvent::Tool(ToolEventSummary {
            name: name.to_string(),
            ordinal,
            success,
            output: truncate_chars(output, TOOL_PREVIEW_CHARS),
        }))
        .await;
    }

    /// Stream the final answer: `start`, `chunk`s, `complete`, `done`.
    pub async fn finish(&mut self, answer: &str, metrics: TurnMetrics) {
        if self.finished {
            tracing::warn!("Turn already finished, dropping second final answer");
            return;
        }
        self.finished = true;

        self.emit(StreamEvent::Start {
            marker: START_MARKER.into(),
        })
        .await;
        let chunks = chunk_text(answer, self.settings.chunk_size);
        let last = chunks.len().saturating_sub(1);
        for (i, content) in chunks.into_iter().enumerate() {
            self.emit(StreamEvent::Chunk { content }).await;
            if i < last && !self.settings.chunk_delay.is_zero() && self.is_connected() {
                tokio::time::sleep(self.settings.chunk_delay).await;
            }
        }
        self.emit(StreamEvent::Complete {
            answer: answer.to_string(),
            metrics,
        })
        .await;
        self.emit(StreamEvent::Done).await;
    }

    /// End the turn with an `error` event.
    pub async fn fail(&mut self, message: impl Into<String>) {
        if self.finished {
            tracing::warn!("Turn already finished, dropping error");
            return;
        }
        self.finished = true;
        self.emit(StreamEvent::Error {
            message: message.into(),
        })
        .await;
    }

    async fn emit(&mut self, event: StreamEvent) {
        if !self.connected {
            return;
        }
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Stream receiver dropped, suppressing further events");
            self.connected = false;
        }
    }
}

impl Drop for StreamingResponder {
    fn drop(&mut self) {
        // A turn torn down mid-flight still ends its stream
        if !self.finished && self.connected {
            let _ = self.tx.try_send(StreamEvent::Error {
                message: "The request was interrupted.".into(),
            });
        }
    }
}

/// Split `text` into slices of at most `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}
