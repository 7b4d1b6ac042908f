//! Client for OpenAI-compatible chat-completion endpoints.
//!
//! Every configured provider in this service speaks the same protocol:
//! `POST {api_base}/chat/completions`, bearer auth, SSE streaming with
//! `data: {"choices":[{"delta":{"content":"token"}}]}` frames terminated by
//! `data: [DONE]`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use super::sse::SseDecoder;
use super::{ChatBackend, ChatCall, ChatResponse, DeltaSink};
use crate::error::{PipelineError, Result};

/// Backend for any OpenAI-compatible API (vLLM, llama.cpp server, LM Studio,
/// hosted vendors with a compat layer, ...).
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatBackend;

impl OpenAiCompatBackend {
    pub fn new() -> Self {
        Self
    }

    fn endpoint(api_base: &str) -> String {
        format!("{}/chat/completions", api_base.trim_end_matches('/'))
    }

    fn build_body(call: &ChatCall, stream: bool) -> Value {
        let messages: Vec<Value> = call
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        json!({
            "model": call.model,
            "messages": messages,
            "temperature": call.temperature,
            "stream": stream,
        })
    }

    fn build_http_request(
        &self,
        client: &Client,
        call: &ChatCall,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut req = client.post(Self::endpoint(&call.api_base)).json(body);
        if !call.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", call.api_key));
        }
        if let Some(timeout) = call.timeout {
            req = req.timeout(timeout);
        }
        req
    }

    fn extract_delta(frame: &Value) -> Option<&str> {
        frame
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(|v| v.as_str())
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    async fn complete(&self, client: &Client, call: &ChatCall) -> Result<ChatResponse> {
        let url = Self::endpoint(&call.api_base);
        let body = Self::build_body(call, false);

        let resp = self
            .build_http_request(client, call, &body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Other(format!("failed to reach model endpoint {}: {}", url, e))
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Other(format!(
                "model endpoint returned {}: {}",
                status, text
            )));
        }

        let json_resp: Value = resp.json().await?;
        let choice = json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| {
                PipelineError::Other("model response carries no choices".to_string())
            })?;
        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let usage = json_resp.get("usage").filter(|u| !u.is_null()).cloned();

        Ok(ChatResponse {
            text,
            status,
            usage,
        })
    }

    async fn complete_streaming(
        &self,
        client: &Client,
        call: &ChatCall,
        on_delta: DeltaSink<'_>,
    ) -> Result<ChatResponse> {
        let url = Self::endpoint(&call.api_base);
        let body = Self::build_body(call, true);

        let resp = self
            .build_http_request(client, call, &body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Other(format!("failed to reach model endpoint {}: {}", url, e))
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Other(format!(
                "model endpoint returned {}: {}",
                status, text
            )));
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut accumulated = String::new();
        let mut stopped = false;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(PipelineError::Request)?;
            for frame in decoder.decode(&chunk) {
                if let Some(content) = Self::extract_delta(&frame) {
                    if content.is_empty() {
                        continue;
                    }
                    accumulated.push_str(content);
                    if !on_delta(content) {
                        // Downstream is gone; dropping the stream aborts the
                        // upstream request while keeping the partial text.
                        stopped = true;
                        break 'outer;
                    }
                }
            }
        }

        if !stopped {
            for frame in decoder.flush() {
                if let Some(content) = Self::extract_delta(&frame) {
                    if content.is_empty() {
                        continue;
                    }
                    accumulated.push_str(content);
                    if !on_delta(content) {
                        break;
                    }
                }
            }
        }

        Ok(ChatResponse {
            text: accumulated,
            status,
            usage: decoder.take_usage(),
        })
    }

    fn name(&self) -> &'static str {
        "openai-compat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use std::time::Duration;

    fn call() -> ChatCall {
        ChatCall {
            api_base: "http://localhost:8000/v1".to_string(),
            api_key: "sk-test123".to_string(),
            model: "qwen-72b".to_string(),
            messages: vec![
                ChatMessage::system("You are helpful."),
                ChatMessage::user("hello"),
            ],
            temperature: 0.3,
            timeout: None,
        }
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(
            OpenAiCompatBackend::endpoint("http://localhost:8000/v1/"),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            OpenAiCompatBackend::endpoint("http://localhost:8000/v1"),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_body_shape() {
        let body = OpenAiCompatBackend::build_body(&call(), false);
        assert_eq!(body["model"], "qwen-72b");
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["stream"], false);
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are helpful.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hello");
    }

    #[test]
    fn test_streaming_body_sets_stream_flag() {
        let body = OpenAiCompatBackend::build_body(&call(), true);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_bearer_header_applied() {
        let backend = OpenAiCompatBackend::new();
        let client = Client::new();
        let c = call();
        let body = OpenAiCompatBackend::build_body(&c, false);
        let req = backend
            .build_http_request(&client, &c, &body)
            .build()
            .expect("build request");
        let auth = req.headers().get("Authorization").expect("auth header");
        assert_eq!(auth, "Bearer sk-test123");
    }

    #[test]
    fn test_empty_key_sends_no_auth_header() {
        let backend = OpenAiCompatBackend::new();
        let client = Client::new();
        let mut c = call();
        c.api_key = String::new();
        let body = OpenAiCompatBackend::build_body(&c, false);
        let req = backend
            .build_http_request(&client, &c, &body)
            .build()
            .expect("build request");
        assert!(req.headers().get("Authorization").is_none());
    }

    #[test]
    fn test_timeout_applied_to_request() {
        let backend = OpenAiCompatBackend::new();
        let client = Client::new();
        let mut c = call();
        c.timeout = Some(Duration::from_secs(120));
        let body = OpenAiCompatBackend::build_body(&c, false);
        let req = backend
            .build_http_request(&client, &c, &body)
            .build()
            .expect("build request");
        assert_eq!(req.timeout(), Some(&Duration::from_secs(120)));
    }

    #[test]
    fn test_extract_delta() {
        let frame = serde_json::json!({"choices":[{"delta":{"content":" there"}}]});
        assert_eq!(OpenAiCompatBackend::extract_delta(&frame), Some(" there"));
        let empty = serde_json::json!({"choices":[{"delta":{}}]});
        assert_eq!(OpenAiCompatBackend::extract_delta(&empty), None);
    }
}
