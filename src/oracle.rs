//! Oracle client: one schema-validated JSON answer per stage call.
//!
//! Wraps a `ChatGateway` with the JSON contract every stage relies on:
//! - the system prompt always carries a JSON-only directive
//! - markdown fences and stray prose around the JSON value are stripped
//! - the parsed value goes through a stage-supplied validator
//! - an unusable answer is retried exactly once with a stricter directive
//!
//! Transport failures are not retried here; the gateway already did.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::CodingError;
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::{PromptInstance, JSON_ONLY_DIRECTIVE, STRICT_JSON_DIRECTIVE};
use crate::trace::{now_epoch_ms, prompt_hash, StageTrace, StageTraceSink, TraceOutcome};
use crate::types::Stage;

/// Attempts per call: the original plus one strict-JSON retry.
pub const MAX_ATTEMPTS: u32 = 2;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*)```").expect("Invalid fence regex")
});

/// Why a response was rejected by a stage validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Schema(String),
    Cardinality { expected: usize, actual: usize },
}

impl Violation {
    pub fn schema(detail: impl Into<String>) -> Self {
        Self::Schema(detail.into())
    }

    fn into_error(self, stage: Stage) -> CodingError {
        match self {
            Violation::Schema(detail) => CodingError::schema(stage, detail),
            Violation::Cardinality { expected, actual } => CodingError::CardinalityMismatch {
                stage,
                expected,
                actual,
            },
        }
    }

    fn describe(&self) -> String {
        match self {
            Violation::Schema(detail) => detail.clone(),
            Violation::Cardinality { expected, actual } => {
                format!("expected {expected} results, got {actual}")
            }
        }
    }
}

impl From<serde_json::Error> for Violation {
    fn from(e: serde_json::Error) -> Self {
        Violation::Schema(e.to_string())
    }
}

/// One stage request.
#[derive(Debug, Clone)]
pub struct OracleCall<'a> {
    pub stage: Stage,
    /// Question the call is made for; used only for attribution.
    pub question: &'a str,
    pub prompt: PromptInstance,
    pub temperature: f32,
}

impl<'a> OracleCall<'a> {
    pub fn new(stage: Stage, question: &'a str, prompt: PromptInstance) -> Self {
        Self {
            stage,
            question,
            prompt,
            temperature: 0.0,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }
}

#[derive(Clone)]
pub struct OracleClient {
    gateway: Arc<dyn ChatGateway>,
    model: String,
    call_timeout: Duration,
    max_output_tokens: u32,
    run_id: Option<Uuid>,
    trace: Option<Arc<dyn StageTraceSink>>,
}

impl OracleClient {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: &PipelineConfig) -> Self {
        Self {
            gateway,
            model: config.model.clone(),
            call_timeout: config.call_timeout(),
            max_output_tokens: config.max_output_tokens,
            run_id: None,
            trace: None,
        }
    }

    pub fn with_trace(mut self, sink: Arc<dyn StageTraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    /// Invoke, parse and validate. One network call per attempt, at most
    /// [`MAX_ATTEMPTS`] attempts.
    pub async fn invoke_validated<T, F>(
        &self,
        call: OracleCall<'_>,
        validate: F,
    ) -> Result<T, CodingError>
    where
        F: Fn(Value) -> Result<T, Violation>,
    {
        let base = call.prompt.with_directive(JSON_ONLY_DIRECTIVE);
        let mut last_violation = Violation::schema("no attempt made");

        for attempt in 1..=MAX_ATTEMPTS {
            let prompt = if attempt == 1 {
                base.clone()
            } else {
                base.with_directive(STRICT_JSON_DIRECTIVE)
            };
            let hash = prompt_hash(&prompt.system, &prompt.user);
            let start = Instant::now();

            let response = match self.send(&call, &prompt).await {
                Ok(resp) => resp,
                Err(err) => {
                    self.record(
                        &call,
                        attempt,
                        &hash,
                        start,
                        (0, 0),
                        TraceOutcome::Unavailable,
                        Some(err.to_string()),
                    );
                    return Err(CodingError::OracleUnavailable(err));
                }
            };
            let tokens = (response.input_tokens, response.output_tokens);

            let checked = parse_json_payload(&response.content)
                .map_err(Violation::Schema)
                .and_then(&validate);

            match checked {
                Ok(value) => {
                    self.record(&call, attempt, &hash, start, tokens, TraceOutcome::Ok, None);
                    debug!(
                        stage = %call.stage,
                        attempt,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "oracle call validated"
                    );
                    return Ok(value);
                }
                Err(violation) => {
                    let detail = violation.describe();
                    self.record(
                        &call,
                        attempt,
                        &hash,
                        start,
                        tokens,
                        TraceOutcome::SchemaViolation,
                        Some(detail.clone()),
                    );
                    warn!(
                        stage = %call.stage,
                        question = %call.question,
                        attempt,
                        error = %detail,
                        "oracle response rejected"
                    );
                    last_violation = violation;
                }
            }
        }

        Err(last_violation.into_error(call.stage))
    }

    async fn send(
        &self,
        call: &OracleCall<'_>,
        prompt: &PromptInstance,
    ) -> Result<crate::gateway::ChatResponse, ProviderError> {
        let attribution = Attribution::new(caller(call.stage));
        let attribution = match self.run_id {
            Some(id) => attribution.with_run(id),
            None => attribution,
        };
        let req = ChatRequest::new(
            ChatModel::anthropic(&self.model),
            prompt.to_messages(),
            attribution,
        )
        .temperature(call.temperature)
        .max_tokens(self.max_output_tokens);

        match tokio::time::timeout(self.call_timeout, self.gateway.chat(req)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.call_timeout, None)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        call: &OracleCall<'_>,
        attempt: u32,
        hash: &str,
        start: Instant,
        tokens: (u32, u32),
        outcome: TraceOutcome,
        error: Option<String>,
    ) {
        let Some(sink) = &self.trace else {
            return;
        };
        let event = StageTrace {
            timestamp_ms: now_epoch_ms(),
            run_id: self.run_id.map(|id| id.to_string()),
            question: call.question.to_string(),
            stage: call.stage.as_str().to_string(),
            attempt,
            prompt_hash: hash.to_string(),
            model: self.model.clone(),
            temperature: call.temperature,
            input_tokens: tokens.0,
            output_tokens: tokens.1,
            latency_ms: start.elapsed().as_millis() as u64,
            outcome,
            error,
        };
        if let Err(e) = sink.record(event) {
            warn!(error = %e, "failed to record stage trace");
        }
    }
}

fn caller(stage: Stage) -> &'static str {
    match stage {
        Stage::ClassifyQuestion => "stages::classify_question",
        Stage::ExtractCodes => "stages::extract_codes",
        Stage::NormalizeCodes => "stages::normalize_codes",
        Stage::GenerateNets => "stages::generate_nets",
        Stage::ClassifyAnswers => "stages::classify_answers",
        Stage::Summarize => "stages::summarize",
        Stage::NetOptions => "stages::net_options",
    }
}

// =============================================================================
// JSON recovery
// =============================================================================

/// Parse the single JSON value in a raw model response.
///
/// The response is tried as-is first, so fence markers inside JSON strings
/// are never treated as fences.
pub fn parse_json_payload(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let unfenced = strip_fence(raw);
    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }
    serde_json::from_str::<Value>(extract_json(unfenced))
        .or_else(|_| serde_json::from_str::<Value>(extract_json(trimmed)))
        .map_err(|e| format!("invalid JSON: {e}"))
}

/// Content between the opening fence and the last closing fence, or the
/// trimmed input.
pub fn strip_fence(raw: &str) -> &str {
    FENCE_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| raw.trim())
}

/// Slice out the first balanced `{...}` or `[...]` value.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find(['{', '[']) {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_close(remainder) {
            return &remainder[..end];
        }
    }
    trimmed
}

/// Byte offset just past the bracket closing the first one, ignoring
/// brackets inside JSON strings.
fn find_matching_close(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"question\":\"Q\",\"type\":\"OPINION\"}\n```";
        let v = parse_json_payload(raw).unwrap();
        assert_eq!(v["type"], "OPINION");

        let bare_fence = "```\n[1, 2]\n```";
        assert_eq!(parse_json_payload(bare_fence).unwrap()[1], 2);
    }

    #[test]
    fn fence_markers_inside_json_strings_are_kept() {
        let raw = r#"{"answers":[{"answer":"uso ```codigo``` a veces","nets":[]}]}"#;
        let v = parse_json_payload(raw).unwrap();
        assert_eq!(v["answers"][0]["answer"], "uso ```codigo``` a veces");
    }

    #[test]
    fn fenced_reply_with_inner_fence_runs_to_the_last_marker() {
        let raw = "Result:\n```json\n{\"answer\": \"see ```x``` here\"}\n```\n";
        assert_eq!(strip_fence(raw), "{\"answer\": \"see ```x``` here\"}");
        let v = parse_json_payload(raw).unwrap();
        assert_eq!(v["answer"], "see ```x``` here");
    }

    #[test]
    fn prose_around_json_is_ignored() {
        let raw = "Here you go: {\"a\": \"b}\"} hope it helps";
        let v = parse_json_payload(raw).unwrap();
        assert_eq!(v["a"], "b}");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_json_payload("not json at all").is_err());
        assert!(parse_json_payload("{\"a\": ").is_err());
    }

    #[test]
    fn violations_map_to_stage_errors() {
        let err = Violation::Cardinality {
            expected: 2,
            actual: 1,
        }
        .into_error(Stage::ClassifyAnswers);
        assert!(matches!(
            err,
            CodingError::CardinalityMismatch {
                stage: Stage::ClassifyAnswers,
                expected: 2,
                actual: 1
            }
        ));
    }
}
