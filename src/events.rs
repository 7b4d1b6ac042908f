//! Client-facing pipeline events and their SSE wire encoding.
//!
//! Each event serializes to one `event: <kind>\ndata: <json>\n\n` frame,
//! written in emission order and flushed per event. The JSON payloads carry a
//! `type` discriminator; non-ASCII text goes over the wire unescaped.

use serde::Serialize;

/// An event emitted by the pipeline toward the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Stream opened; generation is starting.
    Start { message: String },
    /// One incremental text delta.
    Content { content: String },
    /// Terminal success: carries the full accumulated text.
    Done {
        message: String,
        full_content: String,
    },
    /// Terminal failure after the stream was committed. No content events
    /// follow this.
    Error { message: String },
}

impl PipelineEvent {
    pub fn start() -> Self {
        PipelineEvent::Start {
            message: "开始生成响应...".to_string(),
        }
    }

    pub fn content(delta: impl Into<String>) -> Self {
        PipelineEvent::Content {
            content: delta.into(),
        }
    }

    pub fn done(full_content: impl Into<String>) -> Self {
        PipelineEvent::Done {
            message: "响应生成完成".to_string(),
            full_content: full_content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PipelineEvent::Error {
            message: message.into(),
        }
    }

    /// The SSE `event:` name. Content deltas go out as `message`.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Start { .. } => "start",
            PipelineEvent::Content { .. } => "message",
            PipelineEvent::Done { .. } => "done",
            PipelineEvent::Error { .. } => "error",
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::Done { .. } | PipelineEvent::Error { .. }
        )
    }

    /// Render one SSE frame: `event: <kind>\ndata: <json>\n\n`.
    pub fn to_frame(&self) -> String {
        let data = serde_json::to_string(self).expect("event serialization cannot fail");
        format!("event: {}\ndata: {}\n\n", self.kind(), data)
    }
}
