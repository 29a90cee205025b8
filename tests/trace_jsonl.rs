use thematic_coder::trace::{prompt_hash, TraceOutcome};
use thematic_coder::{JsonlTraceSink, StageTrace, StageTraceSink};
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct TraceRow {
    stage: String,
    attempt: u32,
    outcome: String,
    error: Option<String>,
}

fn make_trace(attempt: u32, outcome: TraceOutcome) -> StageTrace {
    StageTrace {
        timestamp_ms: 0,
        run_id: Some("run-1".to_string()),
        question: "¿Qué opinas del sabor?".to_string(),
        stage: "extract_codes".to_string(),
        attempt,
        prompt_hash: prompt_hash("system", "user"),
        model: "claude-sonnet-4-20250514".to_string(),
        temperature: 0.0,
        input_tokens: 10,
        output_tokens: 5,
        latency_ms: 12,
        outcome,
        error: (outcome != TraceOutcome::Ok).then(|| "missing `categories` array".to_string()),
    }
}

#[test]
fn jsonl_trace_sink_writes_events_and_flushes_on_join() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    sink.record(make_trace(1, TraceOutcome::SchemaViolation))
        .unwrap();
    sink.record(make_trace(2, TraceOutcome::Ok)).unwrap();

    drop(sink);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: TraceRow = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first.stage, "extract_codes");
    assert_eq!(first.attempt, 1);
    assert_eq!(first.outcome, "schema_violation");
    assert!(first.error.is_some());

    let second: TraceRow = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second.attempt, 2);
    assert_eq!(second.outcome, "ok");
    assert!(second.error.is_none());
}

#[test]
fn prompt_hash_is_stable_and_sensitive_to_both_parts() {
    let a = prompt_hash("system", "user");
    assert_eq!(a, prompt_hash("system", "user"));
    assert_eq!(a.len(), 16);
    assert_ne!(a, prompt_hash("system", "user2"));
    assert_ne!(a, prompt_hash("system2", "user"));
}
