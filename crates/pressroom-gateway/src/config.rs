use pressroom_core::ModelParams;
use serde::{Deserialize, Serialize};

/// Model API providers speaking the OpenAI chat completions protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI.
    OpenAi,
    /// OpenRouter, a multi-model router.
    #[default]
    OpenRouter,
    /// Groq cloud inference.
    Groq,
    /// A local Ollama server.
    Ollama,
}

/// Connection and sampling settings for the model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which provider to talk to.
    #[serde(default)]
    pub provider: LlmProvider,
    /// Provider-specific model identifier.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Bearer token. Usually supplied through the environment.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Overrides the provider's default base URL.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Nucleus sampling parameter.
    #[serde(default = "default_top_p")]
    pub top_p: Option<f32>,
}

fn default_model_id() -> String {
    "qwen/qwen3-coder".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_top_p() -> Option<f32> {
    Some(0.9)
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

impl ModelConfig {
    /// Base URL, without the `/v1/chat/completions` suffix.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Ollama => "http://localhost:11434",
            }
        }
    }

    /// Whether the provider rejects unauthenticated calls.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self.provider, LlmProvider::Ollama)
    }

    /// Parameters that affect what the model returns.
    pub fn params(&self) -> ModelParams {
        ModelParams {
            model: self.model_id.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_table() {
        let config: ModelConfig = toml_like("{}");
        assert_eq!(config.provider, LlmProvider::OpenRouter);
        assert_eq!(config.model_id, "qwen/qwen3-coder");
        assert_eq!(config.max_tokens, 4000);
        assert_eq!(config.top_p, Some(0.9));
        assert_eq!(config.base_url(), "https://openrouter.ai/api");
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let config = ModelConfig {
            api_base_url: Some("http://127.0.0.1:9000/".into()),
            ..ModelConfig::default()
        };
        assert_eq!(config.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_api_key_never_serialized() {
        let config = ModelConfig {
            api_key: "sk-secret".into(),
            ..ModelConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_params_mirror_sampling_settings() {
        let config = ModelConfig {
            model_id: "m1".into(),
            temperature: 0.2,
            ..ModelConfig::default()
        };
        let params = config.params();
        assert_eq!(params.model, "m1");
        assert_eq!(params.temperature, 0.2);
        assert_eq!(params.max_tokens, 4000);
    }

    #[test]
    fn test_provider_serialization() {
        assert_eq!(serde_json::to_string(&LlmProvider::OpenRouter).unwrap(), "\"openrouter\"");
        assert_eq!(serde_json::to_string(&LlmProvider::OpenAi).unwrap(), "\"openai\"");
        assert!(!ModelConfig { provider: LlmProvider::Ollama, ..ModelConfig::default() }.requires_api_key());
    }

    fn toml_like(json: &str) -> ModelConfig {
        serde_json::from_str(json).unwrap()
    }
}
