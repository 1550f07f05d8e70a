use crate::context::{StepContext, StepInputs, StepOutput};
use async_trait::async_trait;
use pressroom_core::PressroomResult;
use serde::{Deserialize, Serialize};

/// Whether a step's results go through the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CachePolicy {
    /// Memoize under the step's key. Bump `version` when the output format
    /// or the prompt changes so stale entries stop matching.
    Cacheable {
        /// Format version included in the key.
        version: u32,
    },
    /// Always run the step.
    Bypass,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Cacheable { version: 1 }
    }
}

/// One named stage of the content pipeline.
///
/// Steps receive the outputs of the prior steps they require plus the shared
/// job context, and never retry on their own. A cacheable step must be a pure
/// function of its cache key: step name, document id, required inputs, model
/// parameters, cache version, and the theme snapshot version when
/// [`reads_shared_state`](PipelineStep::reads_shared_state) is true.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Unique step name within a pipeline.
    fn name(&self) -> &str;

    /// Caching behaviour.
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::default()
    }

    /// Whether the step reads the cross-document theme snapshot.
    fn reads_shared_state(&self) -> bool {
        false
    }

    /// Produce this step's output.
    async fn run(&self, ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<StepOutput>;
}
