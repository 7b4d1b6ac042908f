//! Service configuration, read from the environment.
//!
//! Every knob has a default suitable for local runs; nothing panics on an
//! absent or malformed variable (malformed values fall back with a warning).

use tracing::warn;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8889";
const DEFAULT_ENCRYPTION_SECRET: &str = "workflow-ctl-default-secret-change-in-production";
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 120;

/// Runtime configuration for the service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen address, `WORKFLOW_CTL_BIND`.
    pub bind_addr: String,
    /// Secret the credential codec derives its key from, `ENCRYPTION_KEY`.
    pub encryption_secret: String,
    /// Usage-log ingestion endpoint, `CHAT_LOG_URL`. Unset disables logging.
    pub usage_log_url: Option<String>,
    /// Deadline for blocking stage calls in seconds, `STAGE_TIMEOUT_SECS`.
    pub stage_timeout_secs: u64,
    /// Optional JSON snapshot seeding the config store, `CONFIG_SEED_FILE`.
    pub seed_file: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let stage_timeout_secs = match get("STAGE_TIMEOUT_SECS").map(|v| v.parse::<u64>()) {
            Some(Ok(secs)) => secs,
            Some(Err(_)) => {
                warn!("STAGE_TIMEOUT_SECS is not a number; using default");
                DEFAULT_STAGE_TIMEOUT_SECS
            }
            None => DEFAULT_STAGE_TIMEOUT_SECS,
        };

        Self {
            bind_addr: get("WORKFLOW_CTL_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            encryption_secret: get("ENCRYPTION_KEY")
                .unwrap_or_else(|| DEFAULT_ENCRYPTION_SECRET.to_string()),
            usage_log_url: get("CHAT_LOG_URL").filter(|v| !v.is_empty()),
            stage_timeout_secs,
            seed_file: get("CONFIG_SEED_FILE").filter(|v| !v.is_empty()),
        }
    }
}
