use pressroom_core::{Artifact, DocumentRef, ModelParams, PressroomError, PressroomResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Theme coverage across the documents processed so far, at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSnapshot {
    /// Incremented every time coverage changes.
    pub version: u64,
    /// Keyword to number of documents that covered it.
    pub coverage: BTreeMap<String, u32>,
}

impl ThemeSnapshot {
    /// The `n` most covered themes, most frequent first, ties by name.
    pub fn top_themes(&self, n: usize) -> Vec<(&str, u32)> {
        let mut themes: Vec<(&str, u32)> = self
            .coverage
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        themes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        themes.truncate(n);
        themes
    }

    /// True when no theme has been recorded.
    pub fn is_empty(&self) -> bool {
        self.coverage.is_empty()
    }
}

/// Shared context handed to every step of one document job.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Identifier of the current run.
    pub run_id: String,
    /// Document being processed.
    pub document: DocumentRef,
    /// Model parameters for model-backed steps.
    pub params: ModelParams,
    /// Theme coverage observed when the job was admitted.
    pub theme: Arc<ThemeSnapshot>,
}

impl StepContext {
    /// Build a context with an empty theme snapshot.
    pub fn new(run_id: impl Into<String>, document: DocumentRef, params: ModelParams) -> Self {
        Self {
            run_id: run_id.into(),
            document,
            params,
            theme: Arc::new(ThemeSnapshot::default()),
        }
    }

    /// Attach the theme snapshot current at admission.
    pub fn with_theme(mut self, theme: Arc<ThemeSnapshot>) -> Self {
        self.theme = theme;
        self
    }
}

/// What a step produced: structured data for later steps plus artifacts to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Structured result consumed by downstream steps.
    pub data: Value,
    /// Files to write for this document.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl StepOutput {
    /// Output with data and no artifacts.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            artifacts: Vec::new(),
        }
    }

    /// Add an artifact.
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// A top-level string field of `data`.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Length of a top-level array field of `data`, 0 when absent.
    pub fn array_len(&self, key: &str) -> usize {
        self.data
            .get(key)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

/// Outputs of the prior steps a step declared it requires.
#[derive(Debug, Clone, Default)]
pub struct StepInputs {
    outputs: BTreeMap<String, StepOutput>,
}

impl StepInputs {
    /// Empty inputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the output of `step`.
    pub fn insert(&mut self, step: impl Into<String>, output: StepOutput) {
        self.outputs.insert(step.into(), output);
    }

    /// Output of `step`, if present.
    pub fn get(&self, step: &str) -> Option<&StepOutput> {
        self.outputs.get(step)
    }

    /// Output of `step`, or an error naming the missing input.
    pub fn require(&self, step: &str) -> PressroomResult<&StepOutput> {
        self.outputs.get(step).ok_or_else(|| {
            PressroomError::Template(format!("required input '{step}' is not available"))
        })
    }

    /// Names of the available inputs, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.outputs.keys().map(String::as_str).collect()
    }

    /// Input data keyed by step name, as used in cache keys.
    pub fn normalized(&self) -> Value {
        Value::Object(
            self.outputs
                .iter()
                .map(|(name, out)| (name.clone(), out.data.clone()))
                .collect(),
        )
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// True when there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
