use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A convenience `Result` alias using [`PressroomError`].
pub type PressroomResult<T> = Result<T, PressroomError>;

/// Top-level error type for the Pressroom workspace.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum PressroomError {
    /// A failed call to the model endpoint, after any retries.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A cache computation failed. The failure is shared with every caller
    /// that was waiting on the same fingerprint and is never cached.
    #[error("cache compute failed for {fingerprint}: {source}")]
    CacheCompute {
        /// Fingerprint of the entry that could not be computed.
        fingerprint: String,
        /// The underlying failure.
        #[source]
        source: Arc<PressroomError>,
    },

    /// A cache bookkeeping error (abandoned compute, snapshot I/O).
    #[error("Cache error: {0}")]
    Cache(String),

    /// A pipeline step failed for a document.
    #[error(transparent)]
    Step(#[from] StepError),

    /// Text extraction from a source document failed.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Prompt rendering or response parsing failed.
    #[error("Template error: {0}")]
    Template(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the workflow orchestrator.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PressroomError {
    /// Find the innermost [`ApiError`] in this error's chain, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            PressroomError::Api(e) => Some(e),
            PressroomError::CacheCompute { source, .. } => source.api_error(),
            PressroomError::Step(e) => e.cause.api_error(),
            _ => None,
        }
    }
}

/// Classification of a model API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// Expected to succeed on retry (timeout, rate limit, server error).
    Transient,
    /// Not expected to change on retry (auth failure, malformed request).
    Fatal,
    /// A transient failure that persisted through every allowed attempt.
    ExhaustedRetries,
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiErrorKind::Transient => write!(f, "transient"),
            ApiErrorKind::Fatal => write!(f, "fatal"),
            ApiErrorKind::ExhaustedRetries => write!(f, "exhausted_retries"),
        }
    }
}

/// An error returned by the model endpoint or the transport in front of it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind} API error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct ApiError {
    /// Retry classification.
    pub kind: ApiErrorKind,
    /// HTTP status code, when the failure came from a response.
    pub status: Option<u16>,
    /// Human-readable description.
    pub message: String,
    /// Server-requested delay before the next attempt, in milliseconds.
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
    /// Number of attempts made before this error surfaced.
    #[serde(default)]
    pub attempts: u32,
}

impl ApiError {
    /// A retryable failure.
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Transient,
            status,
            message: message.into(),
            retry_after_ms: None,
            attempts: 0,
        }
    }

    /// A non-retryable failure.
    pub fn fatal(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Fatal,
            status,
            message: message.into(),
            retry_after_ms: None,
            attempts: 0,
        }
    }

    /// A call that did not complete within the configured timeout.
    pub fn timeout(limit: Duration) -> Self {
        Self::transient(None, format!("request timed out after {}ms", limit.as_millis()))
    }

    /// Classify an HTTP status code.
    ///
    /// 408, 429 and every 5xx are transient; all other non-success codes are
    /// fatal (400 malformed request, 401/403 auth, 404, 422, ...).
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        if status == 408 || status == 429 || (500..600).contains(&status) {
            Self::transient(Some(status), message)
        } else {
            Self::fatal(Some(status), message)
        }
    }

    /// Attach a server-provided retry delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Wrap the last transient failure once every attempt is used up.
    pub fn exhausted(last: ApiError, attempts: u32) -> Self {
        Self {
            kind: ApiErrorKind::ExhaustedRetries,
            status: last.status,
            message: format!("gave up after {attempts} attempts: {}", last.message),
            retry_after_ms: None,
            attempts,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind == ApiErrorKind::Transient
    }

    /// Authentication or authorization failure.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }

    /// The status code as a metric tag value.
    pub fn status_tag(&self) -> String {
        match self.status {
            Some(code) => code.to_string(),
            None => "none".to_string(),
        }
    }
}

/// A pipeline step failed while processing one document.
#[derive(Debug, thiserror::Error)]
#[error("step '{step_name}' failed for document '{document_id}': {cause}")]
pub struct StepError {
    /// Name of the failing step.
    pub step_name: String,
    /// Document the step was processing.
    pub document_id: String,
    /// The underlying failure, wrapped without modification.
    #[source]
    pub cause: Box<PressroomError>,
}

impl StepError {
    /// Wrap `cause` as a failure of `step_name` on `document_id`.
    pub fn new(
        step_name: impl Into<String>,
        document_id: impl Into<String>,
        cause: impl Into<PressroomError>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            document_id: document_id.into(),
            cause: Box::new(cause.into()),
        }
    }
}

/// Collect the display strings of `err` and every error in its source chain.
pub fn cause_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}
