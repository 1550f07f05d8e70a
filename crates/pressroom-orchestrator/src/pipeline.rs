use pressroom_agents::{
    ExtractionStep, Extractor, ModelStep, PipelineStep, SocialTemplate, StrategyTemplate,
    ThemeTemplate, ValidatorTemplate, VisualTemplate, WriterTemplate, EXTRACTION_STEP,
    SOCIAL_STEP, STRATEGY_STEP, THEME_STEP, VALIDATOR_STEP, VISUAL_STEP, WRITER_STEP,
};
use pressroom_core::{PressroomError, PressroomResult};
use pressroom_gateway::ModelGateway;
use std::collections::HashSet;
use std::sync::Arc;

/// A step plus its position in the job's dependency graph.
#[derive(Clone)]
pub struct StepDefinition {
    /// The step itself.
    pub step: Arc<dyn PipelineStep>,
    /// Earlier steps whose outputs this step needs.
    pub requires: Vec<String>,
    /// When true, a failure of this step fails the whole job.
    pub critical: bool,
}

impl StepDefinition {
    /// The step's name.
    pub fn name(&self) -> &str {
        self.step.name()
    }
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name())
            .field("requires", &self.requires)
            .field("critical", &self.critical)
            .finish()
    }
}

/// An ordered, validated list of steps run for every document.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<StepDefinition>,
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(StepDefinition::name).collect()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the pipeline has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<StepDefinition>,
}

impl PipelineBuilder {
    /// Append a non-critical step.
    pub fn step(mut self, step: Arc<dyn PipelineStep>, requires: &[&str]) -> Self {
        self.steps.push(StepDefinition {
            step,
            requires: requires.iter().map(|r| r.to_string()).collect(),
            critical: false,
        });
        self
    }

    /// Append a step whose failure fails the job.
    pub fn critical_step(mut self, step: Arc<dyn PipelineStep>, requires: &[&str]) -> Self {
        self = self.step(step, requires);
        if let Some(last) = self.steps.last_mut() {
            last.critical = true;
        }
        self
    }

    /// Validate and build.
    ///
    /// Step names must be unique and every requirement must name an earlier
    /// step, which keeps the graph acyclic.
    pub fn build(self) -> PressroomResult<Pipeline> {
        if self.steps.is_empty() {
            return Err(PressroomError::Config("pipeline has no steps".into()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for def in &self.steps {
            let name = def.name();
            for req in &def.requires {
                if req == name {
                    return Err(PressroomError::Config(format!(
                        "step '{name}' cannot require itself"
                    )));
                }
                if !seen.contains(req.as_str()) {
                    return Err(PressroomError::Config(format!(
                        "step '{name}' requires '{req}', which is not an earlier step"
                    )));
                }
            }
            if !seen.insert(name) {
                return Err(PressroomError::Config(format!(
                    "duplicate step name '{name}'"
                )));
            }
        }

        Ok(Pipeline { steps: self.steps })
    }
}

/// The standard content pipeline.
///
/// ```text
/// extraction ─► theme ─► strategy ─┬─► writer ─┬─► social
///      └──────────────────┘        │           └─► validator
///                                  └─► visual
/// ```
///
/// Extraction is critical; every other step only takes down its dependents.
pub fn standard_pipeline(
    gateway: Arc<ModelGateway>,
    extractor: Arc<dyn Extractor>,
) -> PressroomResult<Pipeline> {
    let model_step = |name: &str, template: Arc<dyn pressroom_agents::PromptTemplate>| {
        ModelStep::new(name, template, gateway.clone())
    };

    Pipeline::builder()
        .critical_step(Arc::new(ExtractionStep::new(extractor)), &[])
        .step(
            Arc::new(model_step(THEME_STEP, Arc::new(ThemeTemplate)).with_theme()),
            &[EXTRACTION_STEP],
        )
        .step(
            Arc::new(model_step(STRATEGY_STEP, Arc::new(StrategyTemplate))),
            &[EXTRACTION_STEP, THEME_STEP],
        )
        .step(
            Arc::new(model_step(WRITER_STEP, Arc::new(WriterTemplate::default()))),
            &[STRATEGY_STEP],
        )
        .step(
            Arc::new(model_step(SOCIAL_STEP, Arc::new(SocialTemplate))),
            &[WRITER_STEP],
        )
        .step(
            Arc::new(model_step(VISUAL_STEP, Arc::new(VisualTemplate))),
            &[STRATEGY_STEP],
        )
        .step(
            Arc::new(model_step(VALIDATOR_STEP, Arc::new(ValidatorTemplate))),
            &[WRITER_STEP],
        )
        .build()
}
