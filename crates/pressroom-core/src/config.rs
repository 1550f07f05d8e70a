use crate::error::{PressroomError, PressroomResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables consumed by the orchestration engine.
///
/// Every field has a default so that a partial `[engine]` table is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of a cache entry.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Upper bound on settled cache entries before eviction kicks in.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Documents processed at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Extra attempts allowed after a transient model API failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every subsequent attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cap applied to the backoff delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Timeout for a single model API call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Period between two metrics exports.
    #[serde(default = "default_metrics_export_interval_seconds")]
    pub metrics_export_interval_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    86_400
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_metrics_export_interval_seconds() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_max_entries: default_cache_max_entries(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            metrics_export_interval_seconds: default_metrics_export_interval_seconds(),
        }
    }
}

impl EngineConfig {
    /// Cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Per-call timeout as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Export period as a [`Duration`].
    pub fn metrics_export_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_export_interval_seconds)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> PressroomResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(PressroomError::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(PressroomError::Config(
                "cache_max_entries must be at least 1".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(PressroomError::Config(
                "call_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.metrics_export_interval_seconds == 0 {
            return Err(PressroomError::Config(
                "metrics_export_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(PressroomError::Config(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        Ok(())
    }
}

/// The subset of model settings that changes what a call returns.
///
/// Included in cache keys; credentials and endpoints are deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Provider-specific model identifier, e.g. `qwen/qwen3-coder`.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl ModelParams {
    /// Params for `model` with the usual sampling defaults.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_tokens: 4000,
            top_p: Some(0.9),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl_seconds, 86_400);
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.metrics_export_interval_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_concurrent_jobs": 5}"#).unwrap();
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.cache_ttl_seconds, 86_400);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = EngineConfig {
            max_concurrent_jobs: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_jobs"));
    }

    #[test]
    fn test_base_delay_above_cap_rejected() {
        let config = EngineConfig {
            retry_base_delay_ms: 10_000,
            retry_max_delay_ms: 1_000,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_params_skip_absent_top_p() {
        let params = ModelParams {
            top_p: None,
            ..ModelParams::new("gpt-4o")
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("top_p"));
    }
}
