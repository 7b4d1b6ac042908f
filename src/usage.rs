//! Fire-and-forget usage-log client.
//!
//! One record per pipeline invocation is handed to a bounded queue drained by
//! a single worker task that POSTs it to the ingestion endpoint. The contract
//! is best-effort with no retry: a full queue or a failed delivery is logged
//! and the record dropped — the request path never blocks on logging and
//! never observes its outcome.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

const QUEUE_DEPTH: usize = 256;

/// One full-exchange usage record.
///
/// `proprietary_*` describes stage 1 (or the only stage of a single-stage
/// run); `general_*` describes the second stage of a chained run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageRecord {
    pub input_params: Value,
    pub proprietary_params: Option<Value>,
    pub proprietary_response: Option<String>,
    pub general_params: Option<Value>,
    pub general_response: Option<String>,
    /// Wall-clock seconds from request arrival to terminal event.
    pub duration: f64,
}

/// Handle for submitting usage records.
///
/// Cheap to clone; all clones feed the same worker.
#[derive(Clone)]
pub struct UsageLogger {
    tx: Option<mpsc::Sender<UsageRecord>>,
}

impl UsageLogger {
    /// Spawn the delivery worker posting records to `endpoint`.
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let (tx, mut rx) = mpsc::channel::<UsageRecord>(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match client.post(&endpoint).json(&record).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => {
                        warn!(status = %resp.status(), "usage-log endpoint rejected record")
                    }
                    Err(e) => warn!(error = %e, "usage-log delivery failed"),
                }
            }
        });
        Self { tx: Some(tx) }
    }

    /// A logger that drops everything (no endpoint configured).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Capture submissions in a channel instead of delivering them.
    #[cfg(test)]
    pub(crate) fn capture() -> (Self, mpsc::Receiver<UsageRecord>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        (Self { tx: Some(tx) }, rx)
    }

    /// Submit a record. Never blocks and never fails the caller.
    pub fn submit(&self, record: UsageRecord) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("usage-log queue full; record dropped")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("usage-log worker gone; record dropped")
            }
        }
    }
}
