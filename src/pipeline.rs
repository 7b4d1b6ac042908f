//! The chat-orchestration pipeline.
//!
//! A request resolves a workflow, the prompt and provider for each stage the
//! workflow requires, and the decrypted provider credential, then executes
//! one or two model calls:
//!
//! ```text
//! "proprietary"            professional model ──► streamed to client
//! "proprietary->general"   professional model (blocking)
//!                              └─► output into general prompt ──► streamed
//! ```
//!
//! Resolution failures are raised before any model call (the HTTP layer can
//! still choose a status code); once the stream is committed, failures travel
//! in-band as `error` events. One usage record per invocation is submitted
//! fire-and-forget after the terminal event, success or not.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::crypto::CredentialCodec;
use crate::error::{PipelineError, Result};
use crate::events::PipelineEvent;
use crate::llm::{ChatBackend, ChatCall, ChatMessage};
use crate::store::{ConfigStore, LlmProvider, Prompt, Workflow};
use crate::styles::{self, StyleInfo};
use crate::usage::{UsageLogger, UsageRecord};

/// Workflow type running a single streamed professional-model stage.
pub const WORKFLOW_PROPRIETARY: &str = "proprietary";
/// Workflow type chaining the professional model into the general model.
pub const WORKFLOW_PROPRIETARY_TO_GENERAL: &str = "proprietary->general";

const MODEL_TYPE_PROPRIETARY: &str = "proprietary";
const MODEL_TYPE_GENERAL: &str = "general";
const CATEGORY_PROFESSIONAL: &str = "professional";
const CATEGORY_GENERAL: &str = "general";

/// Inbound body of the stream endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamRequest {
    pub user_message: String,
    /// Workflow selector, matched against `Workflow::backend_id`.
    #[serde(rename = "workflowId", default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub writing_style: Option<String>,
}

/// A fully resolved model stage.
#[derive(Debug, Clone)]
struct StagePlan {
    call: ChatCall,
    /// The stage parameters recorded in the usage log.
    params: Value,
}

/// Everything resolved before the response stream is committed.
///
/// For a chained workflow this includes the completed stage-1 exchange; the
/// remaining work is always exactly one streamed call.
#[derive(Debug)]
pub struct PreparedRun {
    terminal: StagePlan,
    record: UsageRecord,
    two_stage: bool,
    started: Instant,
}

/// The pipeline orchestrator. One instance serves all invocations; per-call
/// state lives in [`PreparedRun`].
pub struct ChatPipeline {
    store: Arc<ConfigStore>,
    codec: Arc<CredentialCodec>,
    backend: Arc<dyn ChatBackend>,
    client: Client,
    usage: UsageLogger,
    /// Deadline for blocking (non-streaming) stage calls.
    stage_timeout: Duration,
}

impl ChatPipeline {
    pub fn new(
        store: Arc<ConfigStore>,
        codec: Arc<CredentialCodec>,
        backend: Arc<dyn ChatBackend>,
        client: Client,
        usage: UsageLogger,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            backend,
            client,
            usage,
            stage_timeout,
        }
    }

    /// Resolve configuration and run everything that must precede the
    /// response stream. Fails fast: no bytes have been sent when this errors.
    pub async fn prepare(&self, request: ChatStreamRequest) -> Result<PreparedRun> {
        let started = Instant::now();
        let input_params = serde_json::to_value(&request)?;

        let (user_message, style_info) = self.apply_writing_style(&request);

        let workflow = self.resolve_workflow(request.workflow_id.as_deref())?;
        info!(
            workflow = %workflow.name,
            workflow_type = %workflow.workflow_type,
            "workflow resolved"
        );

        match workflow.workflow_type.as_str() {
            WORKFLOW_PROPRIETARY => {
                let (prompt, provider) =
                    self.resolve_stage(MODEL_TYPE_PROPRIETARY, CATEGORY_PROFESSIONAL)?;
                let mut plan = self.build_stage(&prompt, &provider, &user_message, None)?;
                attach_style(&mut plan.params, style_info.as_ref());

                let record = UsageRecord {
                    input_params,
                    proprietary_params: Some(plan.params.clone()),
                    ..Default::default()
                };
                Ok(PreparedRun {
                    terminal: plan,
                    record,
                    two_stage: false,
                    started,
                })
            }
            WORKFLOW_PROPRIETARY_TO_GENERAL => {
                // Resolve both stages up front so a missing row 404s before
                // any model call is attempted.
                let (stage1_prompt, stage1_provider) =
                    self.resolve_stage(MODEL_TYPE_PROPRIETARY, CATEGORY_PROFESSIONAL)?;
                let (stage2_prompt, stage2_provider) =
                    self.resolve_stage(MODEL_TYPE_GENERAL, CATEGORY_GENERAL)?;

                let stage1 = self.build_stage(
                    &stage1_prompt,
                    &stage1_provider,
                    &user_message,
                    Some(self.stage_timeout),
                )?;

                let stage1_response = self
                    .backend
                    .complete(&self.client, &stage1.call)
                    .await
                    .map_err(|e| PipelineError::Upstream {
                        stage: MODEL_TYPE_PROPRIETARY.to_string(),
                        message: e.to_string(),
                    })?;
                info!(
                    chars = stage1_response.text.len(),
                    "professional stage returned"
                );

                // Stage 2's input is stage 1's complete output, verbatim.
                let mut stage2 =
                    self.build_stage(&stage2_prompt, &stage2_provider, &stage1_response.text, None)?;
                attach_style(&mut stage2.params, style_info.as_ref());

                let record = UsageRecord {
                    input_params,
                    proprietary_params: Some(stage1.params),
                    proprietary_response: Some(stage1_response.text),
                    general_params: Some(stage2.params.clone()),
                    ..Default::default()
                };
                Ok(PreparedRun {
                    terminal: stage2,
                    record,
                    two_stage: true,
                    started,
                })
            }
            other => Err(PipelineError::InvalidArgument(other.to_string())),
        }
    }

    /// Run the terminal (streaming) stage, emitting events into `tx`.
    ///
    /// The stream is already committed when this runs: failures go out as
    /// in-band `error` events, a dropped receiver (client disconnect) aborts
    /// the upstream read, and the usage record is submitted in every case
    /// with whatever content had accumulated.
    pub async fn stream(&self, prepared: PreparedRun, tx: UnboundedSender<PipelineEvent>) {
        let PreparedRun {
            terminal,
            mut record,
            two_stage,
            started,
        } = prepared;

        let _ = tx.send(PipelineEvent::start());

        let mut accumulated = String::new();
        let mut disconnected = false;
        let mut on_delta = |delta: &str| -> bool {
            accumulated.push_str(delta);
            if tx.send(PipelineEvent::content(delta)).is_err() {
                disconnected = true;
                false
            } else {
                true
            }
        };

        let result = self
            .backend
            .complete_streaming(&self.client, &terminal.call, &mut on_delta)
            .await;

        match result {
            Ok(response) => {
                if let Some(usage) = &response.usage {
                    info!(
                        total_tokens = usage.get("total_tokens").and_then(serde_json::Value::as_u64),
                        "streaming stage reported usage"
                    );
                }
                if disconnected {
                    info!(
                        chars = response.text.len(),
                        "client disconnected; stream aborted"
                    );
                } else {
                    let _ = tx.send(PipelineEvent::done(response.text.clone()));
                }
                set_terminal_response(&mut record, two_stage, response.text);
            }
            Err(e) => {
                error!(error = %e, "streaming stage failed");
                let _ = tx.send(PipelineEvent::error(format!("生成响应失败: {e}")));
                set_terminal_response(&mut record, two_stage, accumulated);
            }
        }

        record.duration = started.elapsed().as_secs_f64();
        self.usage.submit(record);
    }

    /// Style augmentation: a provided selector appends the catalog suffix; an
    /// unknown selector is logged and skipped; with no selector, a suffix an
    /// older client baked into the message is parsed out for logging only.
    fn apply_writing_style(&self, request: &ChatStreamRequest) -> (String, Option<StyleInfo>) {
        let message = request.user_message.clone();
        match request.writing_style.as_deref().filter(|s| !s.is_empty()) {
            Some(style) => match styles::augment(&message, style) {
                Some((augmented, info)) => {
                    info!(style = %info.style, "writing style applied");
                    (augmented, Some(info))
                }
                None => {
                    warn!(style, "writing style not in catalog; message left as-is");
                    (message, None)
                }
            },
            None => {
                let info = styles::parse_style_suffix(&message);
                if let Some(ref info) = info {
                    info!(style = %info.style, "writing style parsed from message");
                }
                (message, info)
            }
        }
    }

    fn resolve_workflow(&self, selector: Option<&str>) -> Result<Workflow> {
        let workflow = match selector.filter(|s| !s.is_empty()) {
            Some(backend_id) => match self.store.workflow_by_backend_id(backend_id) {
                Some(workflow) => Some(workflow),
                None => {
                    warn!(backend_id, "workflow not found; falling back to first");
                    self.store.first_workflow()
                }
            },
            None => self.store.first_workflow(),
        };
        workflow.ok_or_else(|| PipelineError::NotFound("no workflow configured".to_string()))
    }

    fn resolve_stage(&self, model_type: &str, category: &str) -> Result<(Prompt, LlmProvider)> {
        let prompt = self.store.prompt_for_model_type(model_type).ok_or_else(|| {
            PipelineError::NotFound(format!("no prompt configured for model_type={model_type}"))
        })?;
        let provider = self.store.provider_for_category(category).ok_or_else(|| {
            PipelineError::NotFound(format!("no provider configured for category={category}"))
        })?;
        Ok((prompt, provider))
    }

    fn build_stage(
        &self,
        prompt: &Prompt,
        provider: &LlmProvider,
        message: &str,
        timeout: Option<Duration>,
    ) -> Result<StagePlan> {
        let mut messages = Vec::new();
        if let Some(system) = prompt.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt.render_user(message)));

        let api_key = self.codec.decrypt(&provider.api_key)?;
        let temperature = provider.temperature();
        let params = json!({
            "model": provider.default_model_name,
            "temperature": temperature,
            "api_base": provider.api_base,
        });

        Ok(StagePlan {
            call: ChatCall {
                api_base: provider.api_base.clone(),
                api_key,
                model: provider.default_model_name.clone(),
                messages,
                temperature,
                timeout,
            },
            params,
        })
    }
}

fn attach_style(params: &mut Value, style: Option<&StyleInfo>) {
    if let (Value::Object(map), Some(info)) = (params, style) {
        map.insert("writing_style".to_string(), json!(info.style));
        map.insert("writing_features".to_string(), json!(info.features));
    }
}

fn set_terminal_response(record: &mut UsageRecord, two_stage: bool, text: String) {
    if two_stage {
        record.general_response = Some(text);
    } else {
        record.proprietary_response = Some(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockBackend, MockReply};
    use crate::store::STATUS_ACTIVE;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn store_with(workflow_type: &str) -> Arc<ConfigStore> {
        let store = Arc::new(ConfigStore::new());
        store.upsert_workflow(Workflow {
            id: 1,
            external_key: 1,
            backend_id: Some("wf-uuid-1".to_string()),
            name: "default".to_string(),
            description: None,
            workflow_type: workflow_type.to_string(),
            config: Value::Null,
            status: STATUS_ACTIVE.to_string(),
        });
        store.upsert_prompt(Prompt {
            id: 1,
            title: "professional draft".to_string(),
            system_prompt: Some("You are helpful.".to_string()),
            user_prompt: Some("{user_message}".to_string()),
            model_type: MODEL_TYPE_PROPRIETARY.to_string(),
        });
        store.upsert_prompt(Prompt {
            id: 2,
            title: "general polish".to_string(),
            system_prompt: None,
            user_prompt: Some("润色：{user_message}".to_string()),
            model_type: MODEL_TYPE_GENERAL.to_string(),
        });
        store.upsert_provider(LlmProvider {
            id: 1,
            name: "domain".to_string(),
            provider_kind: "custom".to_string(),
            api_key: String::new(),
            api_base: "http://stage1:8000/v1".to_string(),
            api_version: None,
            custom_config: HashMap::new(),
            default_model_name: "domain-72b".to_string(),
            category: CATEGORY_PROFESSIONAL.to_string(),
            is_default_provider: true,
            is_default_vision_provider: false,
        });
        store.upsert_provider(LlmProvider {
            id: 2,
            name: "writer".to_string(),
            provider_kind: "custom".to_string(),
            api_key: String::new(),
            api_base: "http://stage2:8000/v1".to_string(),
            api_version: None,
            custom_config: HashMap::from([("temperature".to_string(), "0.2".to_string())]),
            default_model_name: "writer-7b".to_string(),
            category: CATEGORY_GENERAL.to_string(),
            is_default_provider: false,
            is_default_vision_provider: false,
        });
        store
    }

    fn pipeline_with(
        store: Arc<ConfigStore>,
        backend: Arc<MockBackend>,
        usage: UsageLogger,
    ) -> ChatPipeline {
        ChatPipeline::new(
            store,
            Arc::new(CredentialCodec::new("test-secret")),
            backend,
            Client::new(),
            usage,
            Duration::from_secs(120),
        )
    }

    fn request(message: &str) -> ChatStreamRequest {
        ChatStreamRequest {
            user_message: message.to_string(),
            workflow_id: None,
            writing_style: None,
        }
    }

    async fn run_to_events(
        pipeline: &ChatPipeline,
        req: ChatStreamRequest,
    ) -> Vec<PipelineEvent> {
        let prepared = pipeline.prepare(req).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pipeline.stream(prepared, tx).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_proprietary_flow_streams_and_finishes() {
        let backend = Arc::new(MockBackend::new(vec![MockReply::Chunks(vec![
            "Hi".to_string(),
            " there".to_string(),
        ])]));
        let (usage, mut usage_rx) = UsageLogger::capture();
        let pipeline = pipeline_with(store_with(WORKFLOW_PROPRIETARY), backend.clone(), usage);

        let events = run_to_events(&pipeline, request("hello")).await;
        assert_eq!(
            events,
            vec![
                PipelineEvent::start(),
                PipelineEvent::content("Hi"),
                PipelineEvent::content(" there"),
                PipelineEvent::done("Hi there"),
            ]
        );

        // The single streamed call carries the system prompt and the message.
        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages[0].content, "You are helpful.");
        assert_eq!(calls[0].messages[1].content, "hello");
        assert_eq!(calls[0].model, "domain-72b");

        let record = usage_rx.recv().await.unwrap();
        assert_eq!(record.proprietary_response.as_deref(), Some("Hi there"));
        assert!(record.general_response.is_none());
        assert!(record.duration >= 0.0);
    }

    #[tokio::test]
    async fn test_content_concatenation_equals_full_content() {
        let backend = Arc::new(MockBackend::new(vec![MockReply::Chunks(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ])]));
        let pipeline = pipeline_with(
            store_with(WORKFLOW_PROPRIETARY),
            backend,
            UsageLogger::disabled(),
        );

        let events = run_to_events(&pipeline, request("x")).await;
        let mut concatenated = String::new();
        let mut full = None;
        for event in &events {
            match event {
                PipelineEvent::Content { content } => concatenated.push_str(content),
                PipelineEvent::Done { full_content, .. } => full = Some(full_content.clone()),
                _ => {}
            }
        }
        assert_eq!(Some(concatenated), full);
    }

    #[tokio::test]
    async fn test_chained_flow_feeds_stage1_output_into_stage2() {
        let backend = Arc::new(MockBackend::new(vec![
            MockReply::Text("史料梳理结果".to_string()),
            MockReply::Chunks(vec!["成".to_string(), "稿".to_string()]),
        ]));
        let (usage, mut usage_rx) = UsageLogger::capture();
        let pipeline = pipeline_with(
            store_with(WORKFLOW_PROPRIETARY_TO_GENERAL),
            backend.clone(),
            usage,
        );

        let events = run_to_events(&pipeline, request("原始输入")).await;
        assert_eq!(events.last(), Some(&PipelineEvent::done("成稿")));

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        // Stage 1 sees the user's message; stage 2 sees stage 1's verbatim
        // output through the general template — not the original input.
        assert_eq!(calls[0].messages[1].content, "原始输入");
        assert_eq!(calls[1].messages[0].content, "润色：史料梳理结果");
        assert_eq!(calls[1].model, "writer-7b");
        assert_eq!(calls[1].temperature, 0.2);

        let record = usage_rx.recv().await.unwrap();
        assert_eq!(record.proprietary_response.as_deref(), Some("史料梳理结果"));
        assert_eq!(record.general_response.as_deref(), Some("成稿"));
        assert_eq!(record.general_params.as_ref().unwrap()["model"], "writer-7b");
    }

    #[tokio::test]
    async fn test_stage1_failure_aborts_before_stage2() {
        let backend = Arc::new(MockBackend::new(vec![MockReply::Fail("boom".to_string())]));
        let pipeline = pipeline_with(
            store_with(WORKFLOW_PROPRIETARY_TO_GENERAL),
            backend.clone(),
            UsageLogger::disabled(),
        );

        let err = pipeline.prepare(request("hello")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { .. }));
        // The streaming stage was never called.
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_failure_emits_error_and_logs_partial() {
        let backend = Arc::new(MockBackend::new(vec![MockReply::ChunksThenFail(
            vec!["部分".to_string()],
            "connection reset".to_string(),
        )]));
        let (usage, mut usage_rx) = UsageLogger::capture();
        let pipeline = pipeline_with(store_with(WORKFLOW_PROPRIETARY), backend, usage);

        let events = run_to_events(&pipeline, request("hello")).await;
        assert_eq!(events[0], PipelineEvent::start());
        assert_eq!(events[1], PipelineEvent::content("部分"));
        assert!(matches!(events[2], PipelineEvent::Error { .. }));
        assert_eq!(events.len(), 3); // nothing after the error event

        let record = usage_rx.recv().await.unwrap();
        assert_eq!(record.proprietary_response.as_deref(), Some("部分"));
    }

    #[tokio::test]
    async fn test_client_disconnect_aborts_and_still_logs() {
        let backend = Arc::new(MockBackend::new(vec![MockReply::Chunks(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ])]));
        let (usage, mut usage_rx) = UsageLogger::capture();
        let pipeline = pipeline_with(store_with(WORKFLOW_PROPRIETARY), backend, usage);

        let prepared = pipeline.prepare(request("hello")).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx); // client gone before the first delta
        pipeline.stream(prepared, tx).await;

        let record = usage_rx.recv().await.unwrap();
        // The first delta is accumulated before the send failure is observed.
        assert_eq!(record.proprietary_response.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_no_workflow_is_not_found() {
        let backend = Arc::new(MockBackend::fixed("unused"));
        let pipeline = pipeline_with(
            Arc::new(ConfigStore::new()),
            backend.clone(),
            UsageLogger::disabled(),
        );
        let err = pipeline.prepare(request("hello")).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_prompt_is_not_found_before_any_call() {
        let store = Arc::new(ConfigStore::new());
        store.upsert_workflow(Workflow {
            id: 1,
            external_key: 1,
            backend_id: None,
            name: "wf".to_string(),
            description: None,
            workflow_type: WORKFLOW_PROPRIETARY.to_string(),
            config: Value::Null,
            status: STATUS_ACTIVE.to_string(),
        });
        let backend = Arc::new(MockBackend::fixed("unused"));
        let pipeline = pipeline_with(store, backend.clone(), UsageLogger::disabled());

        let err = pipeline.prepare(request("hello")).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_workflow_type_is_invalid_argument() {
        let backend = Arc::new(MockBackend::fixed("unused"));
        let pipeline = pipeline_with(
            store_with("general"),
            backend,
            UsageLogger::disabled(),
        );
        match pipeline.prepare(request("hello")).await.unwrap_err() {
            PipelineError::InvalidArgument(kind) => assert_eq!(kind, "general"),
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_selector_falls_back_to_first_workflow() {
        let backend = Arc::new(MockBackend::fixed("ok"));
        let pipeline = pipeline_with(
            store_with(WORKFLOW_PROPRIETARY),
            backend,
            UsageLogger::disabled(),
        );
        let mut req = request("hello");
        req.workflow_id = Some("no-such-workflow".to_string());
        assert!(pipeline.prepare(req).await.is_ok());
    }

    #[tokio::test]
    async fn test_writing_style_augments_message_and_params() {
        let backend = Arc::new(MockBackend::fixed("ok"));
        let (usage, mut usage_rx) = UsageLogger::capture();
        let pipeline = pipeline_with(store_with(WORKFLOW_PROPRIETARY), backend.clone(), usage);

        let mut req = request("hello");
        req.writing_style = Some("政务通报/汇报体".to_string());
        let prepared = pipeline.prepare(req).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline.stream(prepared, tx).await;

        let calls = backend.calls();
        assert_eq!(
            calls[0].messages[1].content,
            "hello,| 政务通报/汇报体 | 核心特点：语言严谨、结构规范、逻辑清晰、用词精准、客观陈述"
        );
        let record = usage_rx.recv().await.unwrap();
        let params = record.proprietary_params.unwrap();
        assert_eq!(params["writing_style"], "政务通报/汇报体");
        assert!(params["writing_features"]
            .as_str()
            .unwrap()
            .starts_with("语言严谨"));
    }

    #[tokio::test]
    async fn test_unknown_writing_style_proceeds_unaugmented() {
        let backend = Arc::new(MockBackend::fixed("ok"));
        let pipeline = pipeline_with(
            store_with(WORKFLOW_PROPRIETARY),
            backend.clone(),
            UsageLogger::disabled(),
        );
        let mut req = request("hello");
        req.writing_style = Some("不存在的文风".to_string());
        let prepared = pipeline.prepare(req).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline.stream(prepared, tx).await;
        assert_eq!(backend.calls()[0].messages[1].content, "hello");
    }

    #[tokio::test]
    async fn test_legacy_suffix_parsed_for_logging_only() {
        let backend = Arc::new(MockBackend::fixed("ok"));
        let (usage, mut usage_rx) = UsageLogger::capture();
        let pipeline = pipeline_with(store_with(WORKFLOW_PROPRIETARY), backend.clone(), usage);

        let message = "hello,| 标准消息/通稿体 | 核心特点：要素齐全";
        let prepared = pipeline.prepare(request(message)).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline.stream(prepared, tx).await;

        // No re-augmentation: the message goes through untouched.
        assert_eq!(backend.calls()[0].messages[1].content, message);
        let record = usage_rx.recv().await.unwrap();
        assert_eq!(
            record.proprietary_params.unwrap()["writing_style"],
            "标准消息/通稿体"
        );
    }

    #[tokio::test]
    async fn test_provider_credential_is_decrypted_for_the_call() {
        let codec = CredentialCodec::new("test-secret");
        let store = store_with(WORKFLOW_PROPRIETARY);
        let mut provider = store.provider_for_category(CATEGORY_PROFESSIONAL).unwrap();
        provider.api_key = codec.encrypt("sk-plain-key").unwrap();
        store.upsert_provider(provider);

        let backend = Arc::new(MockBackend::fixed("ok"));
        let pipeline = pipeline_with(store, backend.clone(), UsageLogger::disabled());
        let prepared = pipeline.prepare(request("hello")).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline.stream(prepared, tx).await;

        assert_eq!(backend.calls()[0].api_key, "sk-plain-key");
    }

    #[tokio::test]
    async fn test_stage1_call_is_bounded_and_stage2_is_not() {
        let backend = Arc::new(MockBackend::new(vec![
            MockReply::Text("draft".to_string()),
            MockReply::Text("final".to_string()),
        ]));
        let pipeline = pipeline_with(
            store_with(WORKFLOW_PROPRIETARY_TO_GENERAL),
            backend.clone(),
            UsageLogger::disabled(),
        );
        let prepared = pipeline.prepare(request("hello")).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline.stream(prepared, tx).await;

        let calls = backend.calls();
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(120)));
        assert_eq!(calls[1].timeout, None);
    }
}
