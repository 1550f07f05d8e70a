use crate::context::{StepContext, StepInputs, StepOutput};
use crate::extract::EXTRACTION_STEP;
use crate::template::{extract_json, string_list, truncate_chars, PromptTemplate};
use pressroom_core::{Artifact, ArtifactKind, PressroomError, PressroomResult};
use pressroom_gateway::PromptPayload;
use serde_json::{json, Value};

/// Step names of the standard pipeline.
pub const THEME_STEP: &str = "theme";
/// Content strategy step.
pub const STRATEGY_STEP: &str = "strategy";
/// Article writing step.
pub const WRITER_STEP: &str = "writer";
/// Social post step.
pub const SOCIAL_STEP: &str = "social";
/// Visual prompt step.
pub const VISUAL_STEP: &str = "visual";
/// Article review step.
pub const VALIDATOR_STEP: &str = "validator";

/// Characters of source text included in prompts.
const SOURCE_EXCERPT_CHARS: usize = 6000;
/// Characters of article text included in downstream prompts.
const ARTICLE_EXCERPT_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You are an editorial assistant turning reference documents \
into accurate, engaging publications. Stay faithful to the source and never invent facts.";

const JSON_ONLY: &str = "Reply with a single JSON object and nothing else.";

fn json_artifact(kind: ArtifactKind, file_name: &str, value: &Value) -> PressroomResult<Artifact> {
    Ok(Artifact::new(kind, serde_json::to_string_pretty(value)?).with_file_name(file_name))
}

fn source_text(inputs: &StepInputs) -> PressroomResult<&str> {
    inputs
        .require(EXTRACTION_STEP)?
        .str_field("text")
        .ok_or_else(|| PressroomError::Template("extraction output has no text".into()))
}

fn required_str(value: &Value, key: &str, step: &str) -> PressroomResult<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PressroomError::Template(format!("{step} reply is missing '{key}'")))
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Objects of the array under `key`, rejecting an empty or missing array.
fn object_list(value: &Value, key: &str, step: &str) -> PressroomResult<Vec<Value>> {
    let items: Vec<Value> = value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter(|v| v.is_object()).cloned().collect())
        .unwrap_or_default();
    if items.is_empty() {
        return Err(PressroomError::Template(format!(
            "{step} reply has no '{key}' entries"
        )));
    }
    Ok(items)
}

// ─── Theme analysis ─────────────────────────────────────────────────────────

/// Finds the document's main theme, avoiding angles already covered by
/// earlier documents in the run.
#[derive(Debug, Default, Clone)]
pub struct ThemeTemplate;

impl PromptTemplate for ThemeTemplate {
    fn render(&self, ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<PromptPayload> {
        let text = source_text(inputs)?;
        let covered = ctx.theme.top_themes(10);
        let covered = if covered.is_empty() {
            "none yet".to_string()
        } else {
            covered
                .iter()
                .map(|(theme, count)| format!("{theme} ({count})"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let user = format!(
            "Identify the themes of the document below.\n\
             Themes already covered in this run (with document counts): {covered}\n\
             Prefer angles that are not yet covered.\n\n\
             Return {{\"main_theme\": string, \"sub_themes\": [string], \
             \"keywords\": [string], \"recommendations\": [string]}}.\n{JSON_ONLY}\n\n\
             Text of the document \"{id}\":\n{excerpt}",
            id = ctx.document.id,
            excerpt = truncate_chars(text, SOURCE_EXCERPT_CHARS),
        );
        Ok(PromptPayload::user(user).with_system(SYSTEM_PROMPT))
    }

    fn parse(&self, _ctx: &StepContext, response: &str) -> PressroomResult<StepOutput> {
        let reply = extract_json(response)?;
        let data = json!({
            "main_theme": required_str(&reply, "main_theme", THEME_STEP)?,
            "sub_themes": string_list(&reply, "sub_themes"),
            "keywords": string_list(&reply, "keywords"),
            "recommendations": string_list(&reply, "recommendations"),
        });
        let artifact = json_artifact(ArtifactKind::Themes, "themes.json", &data)?;
        Ok(StepOutput::new(data).with_artifact(artifact))
    }
}

// ─── Strategy ───────────────────────────────────────────────────────────────

/// Plans the article: title, audience, key points and follow-up topics.
#[derive(Debug, Default, Clone)]
pub struct StrategyTemplate;

impl PromptTemplate for StrategyTemplate {
    fn render(&self, ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<PromptPayload> {
        let text = source_text(inputs)?;
        let themes = inputs.require(THEME_STEP)?;
        let main_theme = themes.str_field("main_theme").unwrap_or("unspecified");
        let keywords = string_list(&themes.data, "keywords").join(", ");

        let user = format!(
            "Design a content strategy for an article based on the document \"{id}\".\n\
             Main theme: {main_theme}\nKeywords: {keywords}\n\n\
             Return {{\"title\": string, \"target_audience\": string, \
             \"key_points\": [string], \"topics\": [string]}} where topics are \
             ideas for future publications.\n{JSON_ONLY}\n\n\
             Source:\n{excerpt}",
            id = ctx.document.id,
            excerpt = truncate_chars(text, SOURCE_EXCERPT_CHARS),
        );
        Ok(PromptPayload::user(user).with_system(SYSTEM_PROMPT))
    }

    fn parse(&self, _ctx: &StepContext, response: &str) -> PressroomResult<StepOutput> {
        let reply = extract_json(response)?;
        let key_points = string_list(&reply, "key_points");
        if key_points.is_empty() {
            return Err(PressroomError::Template(
                "strategy reply has no key points".into(),
            ));
        }
        let data = json!({
            "title": required_str(&reply, "title", STRATEGY_STEP)?,
            "target_audience": reply
                .get("target_audience")
                .and_then(Value::as_str)
                .unwrap_or("general readers"),
            "key_points": key_points,
            "topics": string_list(&reply, "topics"),
        });
        let artifact = json_artifact(ArtifactKind::Strategy, "strategy.json", &data)?;
        Ok(StepOutput::new(data).with_artifact(artifact))
    }
}

// ─── Writer ─────────────────────────────────────────────────────────────────

/// Writes the long-form Markdown article from the strategy.
#[derive(Debug, Clone)]
pub struct WriterTemplate {
    target_words: usize,
}

impl Default for WriterTemplate {
    fn default() -> Self {
        Self { target_words: 1500 }
    }
}

impl WriterTemplate {
    /// Ask for articles of roughly `words` words.
    pub fn with_target_words(words: usize) -> Self {
        Self {
            target_words: words,
        }
    }
}

/// Strip a surrounding ```markdown fence, if any.
fn unfence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

impl PromptTemplate for WriterTemplate {
    fn render(&self, _ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<PromptPayload> {
        let strategy = inputs.require(STRATEGY_STEP)?;
        let title = strategy.str_field("title").unwrap_or("Untitled");
        let audience = strategy
            .str_field("target_audience")
            .unwrap_or("general readers");
        let key_points = bullet_list(&string_list(&strategy.data, "key_points"));

        let user = format!(
            "Write a blog article in Markdown of about {words} words.\n\
             Title: {title}\nAudience: {audience}\nCover these points:\n{key_points}\n\n\
             Start with the title as a level-one heading. Use level-two headings \
             for sections and end with a short conclusion. Reply with the article only.",
            words = self.target_words,
        );
        Ok(PromptPayload::user(user).with_system(SYSTEM_PROMPT))
    }

    fn parse(&self, _ctx: &StepContext, response: &str) -> PressroomResult<StepOutput> {
        let markdown = unfence(response);
        if markdown.is_empty() {
            return Err(PressroomError::Template("writer reply is empty".into()));
        }
        let title = markdown
            .lines()
            .find_map(|line| line.trim().strip_prefix("# "))
            .map(str::trim)
            .unwrap_or("Untitled");

        let data = json!({
            "title": title,
            "markdown": markdown,
            "word_count": markdown.split_whitespace().count(),
        });
        let artifact = Artifact::new(ArtifactKind::Article, markdown).with_file_name("article.md");
        Ok(StepOutput::new(data).with_artifact(artifact))
    }
}

// ─── Social ─────────────────────────────────────────────────────────────────

/// Derives short social network posts from the article.
#[derive(Debug, Default, Clone)]
pub struct SocialTemplate;

impl PromptTemplate for SocialTemplate {
    fn render(&self, _ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<PromptPayload> {
        let article = inputs.require(WRITER_STEP)?;
        let title = article.str_field("title").unwrap_or("Untitled");
        let markdown = article.str_field("markdown").unwrap_or_default();

        let user = format!(
            "Write three social network posts promoting the article \"{title}\": \
             one for facebook, one for instagram and one for linkedin.\n\
             Return {{\"posts\": [{{\"platform\": string, \"text\": string, \
             \"hashtags\": [string]}}]}}.\n{JSON_ONLY}\n\n\
             Article:\n{excerpt}",
            excerpt = truncate_chars(markdown, ARTICLE_EXCERPT_CHARS),
        );
        Ok(PromptPayload::user(user).with_system(SYSTEM_PROMPT))
    }

    fn parse(&self, _ctx: &StepContext, response: &str) -> PressroomResult<StepOutput> {
        let reply = extract_json(response)?;
        let posts = object_list(&reply, "posts", SOCIAL_STEP)?;
        let data = json!({ "count": posts.len(), "posts": posts });
        let artifact = json_artifact(ArtifactKind::SocialPost, "social_posts.json", &data)?;
        Ok(StepOutput::new(data).with_artifact(artifact))
    }
}

// ─── Visual ─────────────────────────────────────────────────────────────────

/// Produces image-generation prompts illustrating the strategy's key points.
#[derive(Debug, Default, Clone)]
pub struct VisualTemplate;

impl PromptTemplate for VisualTemplate {
    fn render(&self, _ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<PromptPayload> {
        let strategy = inputs.require(STRATEGY_STEP)?;
        let title = strategy.str_field("title").unwrap_or("Untitled");
        let key_points = bullet_list(&string_list(&strategy.data, "key_points"));

        let user = format!(
            "Propose two illustrations for the article \"{title}\" covering:\n{key_points}\n\n\
             Return {{\"visuals\": [{{\"title\": string, \"prompt\": string, \
             \"alt_text\": string, \"style\": string}}]}} where prompt is a detailed \
             instruction for an image generator.\n{JSON_ONLY}"
        );
        Ok(PromptPayload::user(user).with_system(SYSTEM_PROMPT))
    }

    fn parse(&self, _ctx: &StepContext, response: &str) -> PressroomResult<StepOutput> {
        let reply = extract_json(response)?;
        let visuals = object_list(&reply, "visuals", VISUAL_STEP)?;
        if visuals.iter().any(|v| v.get("prompt").and_then(Value::as_str).is_none()) {
            return Err(PressroomError::Template(
                "visual entry without a prompt".into(),
            ));
        }
        let data = json!({ "count": visuals.len(), "visuals": visuals });
        let artifact = json_artifact(ArtifactKind::VisualPrompt, "visual_prompts.json", &data)?;
        Ok(StepOutput::new(data).with_artifact(artifact))
    }
}

// ─── Validator ──────────────────────────────────────────────────────────────

/// Reviews the article and returns a verdict with a 0-100 score.
#[derive(Debug, Default, Clone)]
pub struct ValidatorTemplate;

impl PromptTemplate for ValidatorTemplate {
    fn render(&self, ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<PromptPayload> {
        let article = inputs.require(WRITER_STEP)?;
        let markdown = article.str_field("markdown").unwrap_or_default();

        let user = format!(
            "Review the article generated from document \"{id}\" for accuracy, \
             structure, tone and readability.\n\
             Return {{\"approved\": bool, \"score\": number from 0 to 100, \
             \"issues\": [string], \"suggestions\": [string]}}.\n{JSON_ONLY}\n\n\
             Article:\n{markdown}",
            id = ctx.document.id,
        );
        Ok(PromptPayload::user(user).with_system(SYSTEM_PROMPT))
    }

    fn parse(&self, _ctx: &StepContext, response: &str) -> PressroomResult<StepOutput> {
        let reply = extract_json(response)?;
        let approved = reply
            .get("approved")
            .and_then(Value::as_bool)
            .ok_or_else(|| PressroomError::Template("validator reply is missing 'approved'".into()))?;
        let score = reply
            .get("score")
            .and_then(Value::as_f64)
            .map_or(0, |s| s.clamp(0.0, 100.0).round() as u64);

        let data = json!({
            "approved": approved,
            "score": score,
            "issues": string_list(&reply, "issues"),
            "suggestions": string_list(&reply, "suggestions"),
        });
        let artifact = json_artifact(ArtifactKind::Validation, "validation.json", &data)?;
        Ok(StepOutput::new(data).with_artifact(artifact))
    }
}
