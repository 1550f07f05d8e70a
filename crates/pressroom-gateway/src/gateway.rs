use crate::backend::{Completion, CompletionBackend, PromptPayload, TokenUsage};
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use pressroom_core::{ApiError, EngineConfig, ModelParams};
use pressroom_metrics::MetricsRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Result of a successful gateway invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    /// Generated text.
    pub content: String,
    /// Model that produced it.
    pub model: String,
    /// Token usage, when reported.
    pub usage: Option<TokenUsage>,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
}

/// Single entry point for model calls.
///
/// Owns the per-call timeout, the retry loop, and call metrics. Holds no
/// cache state.
pub struct ModelGateway {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    call_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    /// Injectable sleep function for testing (allows skipping real delays).
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl ModelGateway {
    /// Create a gateway around `backend`.
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        policy: RetryPolicy,
        call_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            backend,
            policy,
            call_timeout,
            metrics,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    /// Create a gateway with retry and timeout settings from `config`.
    pub fn from_config(
        backend: Arc<dyn CompletionBackend>,
        config: &EngineConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::new(
            backend,
            RetryPolicy::from_config(config),
            config.call_timeout(),
            metrics,
        )
    }

    /// The retry policy in force.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Perform a sleep for the given duration.
    async fn do_sleep(&self, delay: Duration) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(delay).await;
            return;
        }
        tokio::time::sleep(delay).await;
    }

    async fn attempt(
        &self,
        prompt: &PromptPayload,
        params: &ModelParams,
    ) -> Result<Completion, ApiError> {
        match tokio::time::timeout(self.call_timeout, self.backend.complete(prompt, params)).await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::timeout(self.call_timeout)),
        }
    }

    /// Call the model for `step_name`, retrying transient failures.
    ///
    /// Fatal errors return after one attempt. Transient errors are retried
    /// with capped exponential backoff; once attempts run out the error is
    /// [`ApiErrorKind::ExhaustedRetries`](pressroom_core::ApiErrorKind)
    /// carrying the last cause.
    pub async fn invoke(
        &self,
        step_name: &str,
        prompt: &PromptPayload,
        params: &ModelParams,
    ) -> Result<ModelResult, ApiError> {
        let model = params.model.as_str();
        self.metrics
            .increment("gateway.calls", &[("model", model), ("step", step_name)]);

        let mut state = RetryState::new(self.policy.clone());
        loop {
            let attempt = state.begin_attempt();
            let started = Instant::now();
            let result = self.attempt(prompt, params).await;
            let elapsed = started.elapsed();

            match result {
                Ok(completion) => {
                    let status = completion.status.to_string();
                    self.metrics.observe_duration(
                        "gateway.response_time_ms",
                        &[("model", model), ("status_code", status.as_str())],
                        elapsed,
                    );
                    if let Some(usage) = completion.usage {
                        self.record_usage(model, usage);
                    }
                    debug!(
                        step = step_name,
                        model,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Model call succeeded"
                    );
                    return Ok(ModelResult {
                        content: completion.content,
                        model: model.to_string(),
                        usage: completion.usage,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    let status = err.status_tag();
                    let attempt_tag = attempt.to_string();
                    self.metrics.observe_duration(
                        "gateway.response_time_ms",
                        &[("model", model), ("status_code", status.as_str())],
                        elapsed,
                    );
                    self.metrics.increment(
                        "gateway.attempt_errors",
                        &[("status_code", status.as_str()), ("attempt", attempt_tag.as_str())],
                    );

                    match state.on_failure(err) {
                        RetryDecision::Retry { next_attempt, delay } => {
                            info!(
                                step = step_name,
                                model,
                                attempt,
                                next_attempt,
                                delay_ms = delay.as_millis() as u64,
                                status_code = %status,
                                "Transient model API error, backing off"
                            );
                            self.do_sleep(delay).await;
                        }
                        RetryDecision::GiveUp(err) => {
                            let kind = err.kind.to_string();
                            self.metrics.increment(
                                "gateway.failures",
                                &[("model", model), ("kind", kind.as_str())],
                            );
                            warn!(
                                step = step_name,
                                model,
                                attempts = err.attempts,
                                error = %err,
                                "Model call failed"
                            );
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    fn record_usage(&self, model: &str, usage: TokenUsage) {
        let tags = [("model", model)];
        self.metrics
            .observe("gateway.tokens.prompt", &tags, usage.prompt_tokens as f64);
        self.metrics
            .observe("gateway.tokens.completion", &tags, usage.completion_tokens as f64);
        self.metrics
            .observe("gateway.tokens.total", &tags, usage.total_tokens as f64);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
