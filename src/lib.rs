//! # workflow-ctl
//!
//! Chat-orchestration control service. Mirrors workflow, prompt, provider,
//! and API-key configuration written by an upstream admin system, and serves
//! a streaming chat endpoint that joins that configuration at request time:
//!
//! ```text
//! POST /api/chat/stream
//!        │
//!        ▼
//!   ChatPipeline ──► ConfigStore (workflow + prompts + providers)
//!        │                │
//!        │           CredentialCodec (decrypt provider secret)
//!        │
//!        ├─ "proprietary"           professional model ──► SSE to client
//!        └─ "proprietary->general"  professional model (blocking)
//!                                       └─► general model ──► SSE to client
//!        │
//!        └─► UsageLogger (fire-and-forget, after the terminal event)
//! ```
//!
//! ## Core pieces
//!
//! - **[`ChatPipeline`]** — resolves configuration, runs one or two model
//!   stages, emits [`PipelineEvent`]s.
//! - **[`ConfigStore`]** — in-memory mirror rows with first-match lookups.
//! - **[`CredentialCodec`]** — reversible secret codec plus display masking.
//! - **[`ChatBackend`](llm::ChatBackend)** — outbound model abstraction with
//!   an OpenAI-compatible implementation and a test mock.
//! - **[`UsageLogger`]** — best-effort usage-record delivery.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use workflow_ctl::llm::OpenAiCompatBackend;
//! use workflow_ctl::{
//!     ChatPipeline, ChatStreamRequest, ConfigStore, CredentialCodec, UsageLogger,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(ConfigStore::new());
//!     let pipeline = ChatPipeline::new(
//!         store,
//!         Arc::new(CredentialCodec::new("secret")),
//!         Arc::new(OpenAiCompatBackend::new()),
//!         reqwest::Client::new(),
//!         UsageLogger::disabled(),
//!         Duration::from_secs(120),
//!     );
//!
//!     let request = ChatStreamRequest {
//!         user_message: "写一篇通稿".to_string(),
//!         workflow_id: None,
//!         writing_style: None,
//!     };
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     if let Ok(prepared) = pipeline.prepare(request).await {
//!         pipeline.stream(prepared, tx).await;
//!         while let Some(event) = rx.recv().await {
//!             print!("{}", event.to_frame());
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod styles;
pub mod usage;

pub use config::AppConfig;
pub use crypto::{CredentialCodec, KeyUpdate};
pub use error::{PipelineError, Result};
pub use events::PipelineEvent;
pub use llm::{ChatBackend, MockBackend, OpenAiCompatBackend};
pub use pipeline::{ChatPipeline, ChatStreamRequest};
pub use server::{router, AppState};
pub use store::{ConfigStore, Snapshot};
pub use styles::StyleInfo;
pub use usage::{UsageLogger, UsageRecord};
