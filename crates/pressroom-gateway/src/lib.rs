//! Model API gateway for Pressroom.
//!
//! Every model call made by a pipeline step goes through [`ModelGateway::invoke`],
//! which applies the per-call timeout, classifies failures as transient or
//! fatal, retries transient ones with capped exponential backoff (honouring
//! `Retry-After`), and records call, latency, error and token metrics.
//!
//! # Main types
//!
//! - [`ModelGateway`]: Retrying, instrumented entry point for model calls.
//! - [`CompletionBackend`]: Single-attempt transport trait.
//! - [`OpenAiCompatBackend`]: `/v1/chat/completions` backend over `reqwest`.
//! - [`RetryState`] / [`RetryPolicy`]: The retry state machine and its settings.
//! - [`ModelConfig`]: Provider, model and sampling configuration.

/// Backend trait and request/response types.
pub mod backend;
/// Provider and model configuration.
pub mod config;
/// The retrying gateway.
pub mod gateway;
/// OpenAI-compatible HTTP backend.
pub mod openai;
/// Retry policy and state machine.
pub mod retry;

pub use backend::{Completion, CompletionBackend, PromptPayload, TokenUsage};
pub use config::{LlmProvider, ModelConfig};
pub use gateway::{ModelGateway, ModelResult};
pub use openai::{parse_chat_response, OpenAiCompatBackend};
pub use retry::{compute_backoff, RetryDecision, RetryPolicy, RetryState};
