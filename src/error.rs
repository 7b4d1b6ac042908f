use thiserror::Error;

/// Errors produced by the pipeline and its components.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required configuration row (workflow, prompt, provider) is missing.
    ///
    /// Surfaced as HTTP 404 — always raised before any bytes are streamed.
    #[error("{0}")]
    NotFound(String),

    /// The resolved workflow carries a `workflow_type` the pipeline does not
    /// support. Surfaced as HTTP 400 before streaming begins.
    #[error("unsupported workflow_type: {0}")]
    InvalidArgument(String),

    /// A model call failed before the response stream was committed
    /// (the non-streaming stage-1 call, or a streaming call that failed to
    /// connect). Surfaced as HTTP 500.
    #[error("stage '{stage}' failed: {message}")]
    Upstream { stage: String, message: String },

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Credential encryption or decryption failed.
    #[error("credential codec failed: {0}")]
    Crypto(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
