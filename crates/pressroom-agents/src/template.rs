use crate::context::{StepContext, StepInputs, StepOutput};
use pressroom_core::{PressroomError, PressroomResult};
use pressroom_gateway::PromptPayload;
use serde_json::Value;

/// Renders a step's prompt and parses the model's reply.
pub trait PromptTemplate: Send + Sync {
    /// Build the prompt from the job context and required inputs.
    fn render(&self, ctx: &StepContext, inputs: &StepInputs) -> PressroomResult<PromptPayload>;

    /// Turn the raw model reply into the step output.
    fn parse(&self, ctx: &StepContext, response: &str) -> PressroomResult<StepOutput>;
}

/// Pull a JSON object out of a model reply.
///
/// Accepts bare JSON, fenced ```json blocks, and objects surrounded by prose.
pub fn extract_json(response: &str) -> PressroomResult<Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(PressroomError::Template(format!(
            "no JSON object in model reply: {}",
            preview(trimmed)
        )));
    };
    if end <= start {
        return Err(PressroomError::Template(format!(
            "no JSON object in model reply: {}",
            preview(trimmed)
        )));
    }

    serde_json::from_str(&trimmed[start..=end]).map_err(|e| {
        PressroomError::Template(format!("invalid JSON in model reply ({e}): {}", preview(trimmed)))
    })
}

/// Array of strings under `key`, skipping non-string items.
pub fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// At most `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn preview(text: &str) -> String {
    let cut = truncate_chars(text, 200);
    if cut.len() < text.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}
