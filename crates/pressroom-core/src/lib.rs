//! Core types, configuration, and error definitions for Pressroom.
//!
//! This crate provides the foundational types shared across all Pressroom crates:
//! the error taxonomy of the content pipeline, the engine configuration surface,
//! and the document/artifact descriptors that flow between the orchestrator and
//! its collaborators.
//!
//! # Main types
//!
//! - [`PressroomError`]: Unified error enum for all Pressroom subsystems.
//! - [`PressroomResult`]: Convenience alias for `Result<T, PressroomError>`.
//! - [`ApiError`]: Classified model API failure (transient, fatal, exhausted).
//! - [`StepError`]: A pipeline step failure bound to a document.
//! - [`EngineConfig`]: Cache, concurrency, retry, and export tunables.
//! - [`ModelParams`]: Model settings that participate in cache keys.
//! - [`DocumentRef`] / [`Artifact`]: Pipeline inputs and outputs.

/// Engine configuration and model parameters.
pub mod config;
/// Document descriptors and produced artifacts.
pub mod document;
/// Error taxonomy.
pub mod error;

pub use config::{EngineConfig, ModelParams};
pub use document::{Artifact, ArtifactKind, DocumentRef};
pub use error::{
    cause_chain, ApiError, ApiErrorKind, PressroomError, PressroomResult, StepError,
};
