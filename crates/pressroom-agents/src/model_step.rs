use crate::context::{StepContext, StepInputs, StepOutput};
use crate::step::{CachePolicy, PipelineStep};
use crate::template::PromptTemplate;
use async_trait::async_trait;
use pressroom_core::PressroomResult;
use pressroom_gateway::ModelGateway;
use std::sync::Arc;
use tracing::{debug, info};

/// A pipeline step that renders a prompt, calls the model, and parses the reply.
pub struct ModelStep {
    name: String,
    template: Arc<dyn PromptTemplate>,
    gateway: Arc<ModelGateway>,
    reads_theme: bool,
    cache_version: u32,
}

impl ModelStep {
    /// Create a cacheable step at cache version 1.
    pub fn new(
        name: impl Into<String>,
        template: Arc<dyn PromptTemplate>,
        gateway: Arc<ModelGateway>,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            gateway,
            reads_theme: false,
            cache_version: 1,
        }
    }

    /// Mark the step as reading the theme snapshot.
    pub fn with_theme(mut self) -> Self {
        self.reads_theme = true;
        self
    }

    /// Override the cache version.
    pub fn with_cache_version(mut self, version: u32) -> Self {
        self.cache_version = version;
        self
    }
}

#[async_trait]
impl PipelineStep for ModelStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::Cacheable {
            version: self.cache_version,
        }
    }

    fn reads_shared_state(&self) -> bool {
        self.reads_theme
    }

    async fn run(&self, ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<StepOutput> {
        let prompt = self.template.render(ctx, inputs)?;
        debug!(
            step = %self.name,
            document_id = %ctx.document.id,
            prompt_chars = prompt.user.len(),
            "Prompt rendered"
        );

        let result = self.gateway.invoke(&self.name, &prompt, &ctx.params).await?;
        info!(
            step = %self.name,
            document_id = %ctx.document.id,
            attempts = result.attempts,
            "Model responded"
        );

        self.template.parse(ctx, &result.content)
    }
}
