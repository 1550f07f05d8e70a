use crate::backend::{Completion, CompletionBackend, PromptPayload, TokenUsage};
use crate::config::{LlmProvider, ModelConfig};
use async_trait::async_trait;
use pressroom_core::{ApiError, ModelParams};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the `/v1/chat/completions` API.
pub struct OpenAiCompatBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a backend for `config`.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url())
    }

    fn build_body(&self, prompt: &PromptPayload, params: &ModelParams) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &prompt.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt.user}));

        let mut body = serde_json::json!({
            "model": params.model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        if let Some(top_p) = params.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        body
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        // OpenRouter attributes traffic through these headers.
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request
                .header("HTTP-Referer", "https://github.com/pressroom-dev/pressroom")
                .header("X-Title", "Pressroom")
        } else {
            request
        }
    }
}

/// Parse a `Retry-After` header given in whole seconds.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::transient(None, format!("request timed out: {err}"))
    } else if err.is_connect() || err.is_request() {
        ApiError::transient(None, format!("network error: {err}"))
    } else {
        ApiError::fatal(None, format!("request could not be sent: {err}"))
    }
}

/// Extract the first choice's content and the usage block.
pub fn parse_chat_response(status: u16, body: &serde_json::Value) -> Result<Completion, ApiError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            ApiError::fatal(Some(status), "malformed response: missing choices[0].message.content")
        })?
        .to_string();

    let usage = body
        .get("usage")
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

    Ok(Completion {
        content,
        usage,
        status,
    })
}

#[async_trait]
impl CompletionBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn complete(
        &self,
        prompt: &PromptPayload,
        params: &ModelParams,
    ) -> Result<Completion, ApiError> {
        let url = self.endpoint();
        let body = self.build_body(prompt, params);

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let delay = retry_after(resp.headers());
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let err = ApiError::from_status(status.as_u16(), text);
            return Err(match delay {
                Some(d) => err.with_retry_after(d),
                None => err,
            });
        }

        let resp_body: serde_json::Value = resp.json().await.map_err(|e| {
            ApiError::fatal(Some(status.as_u16()), format!("malformed response body: {e}"))
        })?;
        debug!(model = %params.model, status = status.as_u16(), "Completion received");

        parse_chat_response(status.as_u16(), &resp_body)
    }
}
