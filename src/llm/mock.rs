//! Mock backend for testing without a live model endpoint.
//!
//! Replies are consumed in order (cycling when exhausted) and every call is
//! recorded, so tests can assert on the exact messages a stage sent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;

use super::{ChatBackend, ChatCall, ChatResponse, DeltaSink};
use crate::error::{PipelineError, Result};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Full text, streamed as a single delta.
    Text(String),
    /// Text streamed delta-by-delta; the final text is the concatenation.
    Chunks(Vec<String>),
    /// Stream these deltas, then fail mid-flight with the message.
    ChunksThenFail(Vec<String>, String),
    /// Fail the call with this message.
    Fail(String),
}

/// A test backend that returns canned replies in order.
#[derive(Debug)]
pub struct MockBackend {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    calls: Mutex<Vec<ChatCall>>,
}

impl MockBackend {
    /// Create a mock with the given scripted replies.
    ///
    /// Replies cycle from the beginning when exhausted.
    pub fn new(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "MockBackend requires at least one reply");
        Self {
            replies,
            index: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A mock that always returns the same text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(text.into())])
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    fn next_reply(&self) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        self.replies[idx].clone()
    }

    fn record(&self, call: &ChatCall) {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(call.clone());
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn complete(&self, _client: &Client, call: &ChatCall) -> Result<ChatResponse> {
        self.record(call);
        match self.next_reply() {
            MockReply::Text(text) => Ok(ChatResponse {
                text,
                status: 200,
                usage: None,
            }),
            MockReply::Chunks(chunks) => Ok(ChatResponse {
                text: chunks.concat(),
                status: 200,
                usage: None,
            }),
            MockReply::ChunksThenFail(_, message) | MockReply::Fail(message) => {
                Err(PipelineError::Other(message))
            }
        }
    }

    async fn complete_streaming(
        &self,
        _client: &Client,
        call: &ChatCall,
        on_delta: DeltaSink<'_>,
    ) -> Result<ChatResponse> {
        self.record(call);
        let (chunks, failure) = match self.next_reply() {
            MockReply::Text(text) => (vec![text], None),
            MockReply::Chunks(chunks) => (chunks, None),
            MockReply::ChunksThenFail(chunks, message) => (chunks, Some(message)),
            MockReply::Fail(message) => return Err(PipelineError::Other(message)),
        };

        let mut accumulated = String::new();
        for chunk in &chunks {
            accumulated.push_str(chunk);
            if !on_delta(chunk) {
                break;
            }
        }

        if let Some(message) = failure {
            return Err(PipelineError::Other(message));
        }

        Ok(ChatResponse {
            text: accumulated,
            status: 200,
            usage: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
