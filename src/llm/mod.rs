//! Backend trait and normalized chat call/response types.
//!
//! The [`ChatBackend`] trait abstracts over the outbound model API: the
//! pipeline builds a [`ChatCall`] from resolved configuration and the backend
//! translates it into the provider's HTTP protocol. One implementation talks
//! to any OpenAI-compatible endpoint ([`OpenAiCompatBackend`]); a
//! [`MockBackend`] keeps pipeline tests deterministic.

pub mod mock;
pub mod openai;
pub mod sse;

pub use mock::{MockBackend, MockReply};
pub use openai::OpenAiCompatBackend;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::Result;

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A fully resolved model call: endpoint, credential, and request body fields.
///
/// The credential is the decrypted form — resolution happens before the call
/// is built, never inside a backend.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub api_base: String,
    /// Decrypted bearer credential; empty for unauthenticated endpoints.
    pub api_key: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    /// Whole-request deadline. Set for blocking (non-streaming) stages only;
    /// streaming stages are open-ended.
    pub timeout: Option<Duration>,
}

/// A normalized model response.
#[derive(Debug)]
pub struct ChatResponse {
    /// The generated text (accumulated across deltas for streaming calls).
    pub text: String,
    /// HTTP status code, for diagnostics.
    pub status: u16,
    /// Token-usage object reported by the provider, when present.
    /// For streaming calls this comes from the trailing frame and is logged,
    /// never forwarded to the client.
    pub usage: Option<Value>,
}

/// Callback receiving each streamed delta in arrival order.
///
/// Returning `false` aborts the read loop without an error — used when the
/// downstream client has disconnected and the partial text is still wanted.
pub type DeltaSink<'a> = &'a mut (dyn FnMut(&str) -> bool + Send);

/// Abstraction over the outbound chat-completion API.
///
/// Object-safe; shared as `Arc<dyn ChatBackend>` so tests can swap in a mock.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Execute a non-streaming call, blocking until the full text returns.
    async fn complete(&self, client: &Client, call: &ChatCall) -> Result<ChatResponse>;

    /// Execute a streaming call, forwarding each delta to `on_delta` as it
    /// arrives. The accumulated text is returned when the stream ends or the
    /// sink asks to stop.
    async fn complete_streaming(
        &self,
        client: &Client,
        call: &ChatCall,
        on_delta: DeltaSink<'_>,
    ) -> Result<ChatResponse>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}
