use async_trait::async_trait;
use pressroom_core::{ApiError, ModelParams};
use serde::{Deserialize, Serialize};

/// Prompt sent to the model: an optional system message plus the user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPayload {
    /// System instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// User message.
    pub user: String,
}

impl PromptPayload {
    /// A prompt with only a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            system: None,
            user: text.into(),
        }
    }

    /// Attach system instructions.
    pub fn with_system(mut self, text: impl Into<String>) -> Self {
        self.system = Some(text.into());
        self
    }
}

/// Token accounting reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Sum reported by the provider.
    #[serde(default)]
    pub total_tokens: u64,
}

/// A successful completion from one backend attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text.
    pub content: String,
    /// Token usage, when reported.
    pub usage: Option<TokenUsage>,
    /// HTTP status of the response.
    pub status: u16,
}

/// Transport to a model endpoint.
///
/// A backend performs exactly one attempt per call and classifies its own
/// failures; retries, timeouts and metrics belong to
/// [`ModelGateway`](crate::ModelGateway).
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Run one completion attempt.
    async fn complete(
        &self,
        prompt: &PromptPayload,
        params: &ModelParams,
    ) -> Result<Completion, ApiError>;
}
