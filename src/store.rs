//! In-memory configuration store.
//!
//! Holds the mirror rows (prompts, providers, workflows, API keys) written by
//! the external replication mechanism and read by the pipeline. The dataset
//! is tens of rows, so every lookup is a linear scan with a documented
//! "first match wins" policy: retrieval order is insertion order, upserts
//! replace in place, and ties between duplicate rows resolve to the earliest
//! inserted one.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Temperature used when a provider's `custom_config` has no usable override.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Row status marking an entity as usable.
pub const STATUS_ACTIVE: &str = "active";

fn default_status() -> String {
    STATUS_ACTIVE.to_string()
}

/// A prompt template bound to a stage role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Externally assigned identifier (the replication key).
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// User template; `{user_message}` is replaced at call time.
    #[serde(default)]
    pub user_prompt: Option<String>,
    /// Stage role: `"proprietary"` or `"general"`.
    pub model_type: String,
}

impl Prompt {
    /// Render the user template, substituting `{user_message}`.
    ///
    /// A missing template degrades to the bare placeholder, i.e. the message
    /// passes through unchanged.
    pub fn render_user(&self, message: &str) -> String {
        self.user_prompt
            .as_deref()
            .unwrap_or("{user_message}")
            .replace("{user_message}", message)
    }
}

/// A configured LLM endpoint, credential, and default model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProvider {
    pub id: i64,
    pub name: String,
    /// Vendor family (openai, azure, custom, ...) — informational here.
    pub provider_kind: String,
    /// Credential ciphertext, or empty when the endpoint is unauthenticated.
    #[serde(default)]
    pub api_key: String,
    pub api_base: String,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Free-form overrides; `"temperature"` is the one the pipeline reads.
    #[serde(default)]
    pub custom_config: HashMap<String, String>,
    pub default_model_name: String,
    /// Stage binding: `"professional"` or `"general"`.
    pub category: String,
    #[serde(default)]
    pub is_default_provider: bool,
    #[serde(default)]
    pub is_default_vision_provider: bool,
}

impl LlmProvider {
    /// Effective sampling temperature: the `custom_config` override when it
    /// parses as a float, otherwise [`DEFAULT_TEMPERATURE`].
    pub fn temperature(&self) -> f64 {
        self.custom_config
            .get("temperature")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// A named pipeline definition selecting one or two LLM stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    /// Numeric replication key.
    pub external_key: i64,
    /// Opaque passthrough identifier callers select workflows by.
    #[serde(default)]
    pub backend_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Kept as a free string; the pipeline validates it at run time so an
    /// unsupported value surfaces as a 400, not a replication failure.
    pub workflow_type: String,
    /// Full upstream definition — opaque to the pipeline.
    #[serde(default)]
    pub config: Value,
    #[serde(default = "default_status")]
    pub status: String,
}

/// An inbound bearer credential row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    pub external_key: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub key: String,
    #[serde(default = "default_status")]
    pub status: String,
}

/// Full store contents, used for boot-time seeding.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub providers: Vec<LlmProvider>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

/// Read-mostly table set shared by all pipeline invocations.
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: RwLock<Snapshot>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire contents (boot-time seed).
    pub fn load_snapshot(&self, snapshot: Snapshot) {
        *self.inner.write().expect("store lock poisoned") = snapshot;
    }

    /// Insert or replace a prompt, keyed by its external id.
    /// Replacement keeps the row's position, preserving first-match order.
    pub fn upsert_prompt(&self, row: Prompt) {
        let mut tables = self.inner.write().expect("store lock poisoned");
        match tables.prompts.iter_mut().find(|p| p.id == row.id) {
            Some(existing) => *existing = row,
            None => tables.prompts.push(row),
        }
    }

    /// Insert or replace a provider, keyed by its external id.
    ///
    /// A different row carrying the same name is left in place but logged:
    /// replication precedence between external-key and natural-key matches is
    /// ambiguous upstream, so the collision is surfaced rather than resolved.
    pub fn upsert_provider(&self, row: LlmProvider) {
        let mut tables = self.inner.write().expect("store lock poisoned");
        if let Some(shadowed) = tables
            .providers
            .iter()
            .find(|p| p.id != row.id && p.name == row.name)
        {
            warn!(
                provider = %row.name,
                existing_id = shadowed.id,
                incoming_id = row.id,
                "provider upsert shadows a row with the same name"
            );
        }
        match tables.providers.iter_mut().find(|p| p.id == row.id) {
            Some(existing) => *existing = row,
            None => tables.providers.push(row),
        }
    }

    /// Insert or replace a workflow, keyed by its external key.
    pub fn upsert_workflow(&self, row: Workflow) {
        let mut tables = self.inner.write().expect("store lock poisoned");
        match tables
            .workflows
            .iter_mut()
            .find(|w| w.external_key == row.external_key)
        {
            Some(existing) => *existing = row,
            None => tables.workflows.push(row),
        }
    }

    /// Insert or replace an API key, keyed by its external key.
    pub fn upsert_api_key(&self, row: ApiKey) {
        let mut tables = self.inner.write().expect("store lock poisoned");
        if let Some(shadowed) = tables
            .api_keys
            .iter()
            .find(|k| k.external_key != row.external_key && k.key == row.key)
        {
            warn!(
                existing_id = shadowed.id,
                incoming_id = row.id,
                "api-key upsert shadows a row with the same bearer value"
            );
        }
        match tables
            .api_keys
            .iter_mut()
            .find(|k| k.external_key == row.external_key)
        {
            Some(existing) => *existing = row,
            None => tables.api_keys.push(row),
        }
    }

    /// First workflow whose `backend_id` matches the selector.
    pub fn workflow_by_backend_id(&self, backend_id: &str) -> Option<Workflow> {
        let tables = self.inner.read().expect("store lock poisoned");
        tables
            .workflows
            .iter()
            .find(|w| w.backend_id.as_deref() == Some(backend_id))
            .cloned()
    }

    /// The fallback workflow: the first row in insertion order.
    pub fn first_workflow(&self) -> Option<Workflow> {
        let tables = self.inner.read().expect("store lock poisoned");
        tables.workflows.first().cloned()
    }

    /// First prompt for a stage role (`"proprietary"` / `"general"`).
    pub fn prompt_for_model_type(&self, model_type: &str) -> Option<Prompt> {
        let tables = self.inner.read().expect("store lock poisoned");
        tables
            .prompts
            .iter()
            .find(|p| p.model_type == model_type)
            .cloned()
    }

    /// First provider for a category (`"professional"` / `"general"`).
    pub fn provider_for_category(&self, category: &str) -> Option<LlmProvider> {
        let tables = self.inner.read().expect("store lock poisoned");
        tables
            .providers
            .iter()
            .find(|p| p.category == category)
            .cloned()
    }

    /// Look up an active API key by its bearer value.
    pub fn authenticate(&self, key: &str) -> Option<ApiKey> {
        let tables = self.inner.read().expect("store lock poisoned");
        tables
            .api_keys
            .iter()
            .find(|k| k.key == key && k.status == STATUS_ACTIVE)
            .cloned()
    }
}
