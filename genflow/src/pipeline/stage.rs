//! Stage trait and helpers.
//!
//! A stage turns the run input plus the previous stage's outcome into a
//! [`GenerationTask`]. What the task asks for is the stage's business; the
//! runner only forwards payloads.

use crate::core::StageOutcome;
use crate::dispatch::ExecutionMode;
use crate::providers::GenerationTask;
use serde_json::Value;
use std::fmt;

const SUMMARY_LIMIT: usize = 160;

/// What a stage sees when building its task.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// The run id.
    pub run_id: &'a str,
    /// The 1-based stage number.
    pub stage: u8,
    /// The execution mode of the run.
    pub mode: ExecutionMode,
    /// The caller's original input.
    pub input: &'a Value,
    /// Outcomes recorded so far, in stage order.
    pub outcomes: &'a [StageOutcome],
}

impl<'a> StageContext<'a> {
    /// Returns the previous stage's outcome.
    #[must_use]
    pub fn previous(&self) -> Option<&'a StageOutcome> {
        self.outcomes.last()
    }

    /// Returns the previous payload, or the run input for the first stage.
    #[must_use]
    pub fn upstream(&self) -> &'a Value {
        self.previous().map_or(self.input, |o| &o.payload)
    }
}

/// One step of the five-stage pipeline.
pub trait Stage: Send + Sync + fmt::Debug {
    /// Returns the stage name.
    fn name(&self) -> &str;

    /// Builds the generation task for this stage.
    fn build_task(&self, ctx: &StageContext<'_>) -> GenerationTask;

    /// Checks the payload's shape. Advisory only: a `false` is recorded,
    /// the run carries on.
    fn validate(&self, _payload: &Value) -> bool {
        true
    }

    /// Produces the short summary carried by `stage_complete`.
    fn summarize(&self, payload: &Value) -> String {
        summarize_value(payload)
    }
}

/// Renders a payload as prompt text: strings verbatim, anything else as JSON.
#[must_use]
pub fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncates a payload's text form for progress events.
#[must_use]
pub fn summarize_value(payload: &Value) -> String {
    let text = payload_text(payload);
    if text.chars().count() <= SUMMARY_LIMIT {
        return text;
    }
    let mut cut: String = text.chars().take(SUMMARY_LIMIT).collect();
    cut.push('…');
    cut
}

/// Validator requiring a JSON object with the named, non-null keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    /// Creates a validator for `fields`.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the first missing field, if any.
    #[must_use]
    pub fn missing<'a>(&'a self, payload: &Value) -> Option<&'a str> {
        let Some(object) = payload.as_object() else {
            return self.fields.first().map(String::as_str);
        };
        self.fields
            .iter()
            .find(|f| object.get(f.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
    }

    /// Returns true if every field is present.
    #[must_use]
    pub fn check(&self, payload: &Value) -> bool {
        self.missing(payload).is_none()
    }
}

type TaskBuilder = Box<dyn Fn(&StageContext<'_>) -> GenerationTask + Send + Sync>;

/// A stage assembled from a closure.
pub struct FnStage {
    name: String,
    builder: TaskBuilder,
    validator: Option<RequiredFields>,
}

impl FnStage {
    /// Creates a stage from a task-building closure.
    pub fn new<F>(name: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&StageContext<'_>) -> GenerationTask + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            builder: Box::new(builder),
            validator: None,
        }
    }

    /// A stage that forwards the upstream payload as its prompt.
    #[must_use]
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(name, |ctx| {
            GenerationTask::new(payload_text(ctx.upstream()))
                .with_metadata("stage", serde_json::json!(ctx.stage))
        })
    }

    /// Attaches a required-fields validator.
    #[must_use]
    pub fn with_validator(mut self, validator: RequiredFields) -> Self {
        self.validator = Some(validator);
        self
    }
}

impl fmt::Debug for FnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_task(&self, ctx: &StageContext<'_>) -> GenerationTask {
        (self.builder)(ctx)
    }

    fn validate(&self, payload: &Value) -> bool {
        self.validator.as_ref().map_or(true, |v| v.check(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(input: &'a Value, outcomes: &'a [StageOutcome]) -> StageContext<'a> {
        StageContext {
            run_id: "r1",
            stage: u8::try_from(outcomes.len() + 1).unwrap(),
            mode: ExecutionMode::Balanced,
            input,
            outcomes,
        }
    }

    #[test]
    fn test_upstream_feeds_forward() {
        let input = serde_json::json!("topic");
        assert_eq!(ctx(&input, &[]).upstream(), &input);

        let outcomes = vec![StageOutcome::succeeded(1, serde_json::json!({"outline": 1}), "p")];
        let c = ctx(&input, &outcomes);
        assert_eq!(c.upstream(), &serde_json::json!({"outline": 1}));
        assert_eq!(c.stage, 2);
    }

    #[test]
    fn test_required_fields() {
        let v = RequiredFields::new(["title", "body"]);
        assert!(v.check(&serde_json::json!({"title": "t", "body": "b", "extra": 1})));
        assert_eq!(v.missing(&serde_json::json!({"title": "t", "body": null})), Some("body"));
        assert_eq!(v.missing(&serde_json::json!("plain text")), Some("title"));
        assert!(RequiredFields::default().check(&serde_json::json!(null)));
    }

    #[test]
    fn test_fn_stage_builds_and_validates() {
        let stage = FnStage::new("outline", |c| GenerationTask::new(format!("outline {}", c.input)))
            .with_validator(RequiredFields::new(["sections"]));
        let input = serde_json::json!("rust");

        assert_eq!(stage.build_task(&ctx(&input, &[])).prompt, "outline \"rust\"");
        assert!(!stage.validate(&serde_json::json!({})));
        assert!(stage.validate(&serde_json::json!({"sections": []})));
        assert!(format!("{stage:?}").contains("outline"));
    }

    #[test]
    fn test_summary_truncates() {
        let long = Value::String("x".repeat(500));
        let summary = summarize_value(&long);
        assert_eq!(summary.chars().count(), SUMMARY_LIMIT + 1);
        assert_eq!(summarize_value(&serde_json::json!({"a": 1})), "{\"a\":1}");
    }

    #[test]
    fn test_passthrough_prompt_is_untruncated() {
        let long = "y".repeat(SUMMARY_LIMIT * 4);
        let input = Value::String(long.clone());
        let stage = FnStage::passthrough("s1");

        assert_eq!(stage.build_task(&ctx(&input, &[])).prompt, long);

        let object = serde_json::json!({"body": long});
        let outcomes = vec![StageOutcome::succeeded(1, object.clone(), "p")];
        assert_eq!(stage.build_task(&ctx(&input, &outcomes)).prompt, object.to_string());
    }
}
