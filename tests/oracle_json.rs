use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use thematic_coder::gateway::anthropic::{AnthropicAdapter, DEFAULT_API_VERSION};
use thematic_coder::gateway::{GatewayConfig, NoopUsageSink, ProviderError, ProviderGateway};
use thematic_coder::prompts::STRICT_JSON_DIRECTIVE;
use thematic_coder::stages;
use thematic_coder::trace::TraceOutcome;
use thematic_coder::{
    CodingError, OracleClient, PipelineConfig, ProjectContext, QuestionType, Stage, StageTrace,
    StageTraceSink, TraceError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn text_response(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "content": [{ "type": "text", "text": text }],
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 5, "output_tokens": 5 }
    }))
}

fn oracle(server: &MockServer, config: &PipelineConfig) -> OracleClient {
    let adapter = AnthropicAdapter::with_config(
        "sk-test",
        server.uri(),
        Duration::from_secs(5),
        DEFAULT_API_VERSION,
    )
    .unwrap();
    let gateway = ProviderGateway::with_config(
        adapter,
        Arc::new(NoopUsageSink),
        GatewayConfig {
            max_retries: 0,
            retry_base_delay: Duration::from_millis(0),
        },
    );
    OracleClient::new(Arc::new(gateway), config)
}

#[derive(Default)]
struct CollectingTrace {
    events: Mutex<Vec<StageTrace>>,
}

impl StageTraceSink for CollectingTrace {
    fn record(&self, event: StageTrace) -> Result<(), TraceError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[tokio::test]
async fn fenced_json_parses_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(text_response(
            "```json\n{\"question\": \"¿Qué opinas del sabor?\", \"type\": \"OPINION\"}\n```",
        ))
        .mount(&server)
        .await;

    let oracle = oracle(&server, &PipelineConfig::default());
    let kind = stages::classify_question(&oracle, "¿Qué opinas del sabor?", &ProjectContext::default())
        .await
        .unwrap();

    assert_eq!(kind, QuestionType::Opinion);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_json_twice_is_a_schema_violation_after_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(text_response("Sure! The question is an opinion question."))
        .mount(&server)
        .await;

    let trace = Arc::new(CollectingTrace::default());
    let oracle = oracle(&server, &PipelineConfig::default()).with_trace(trace.clone());
    let err = stages::classify_question(&oracle, "Q", &ProjectContext::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CodingError::SchemaViolation {
            stage: Stage::ClassifyQuestion,
            ..
        }
    ));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    let first: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let second: serde_json::Value = serde_json::from_slice(&received[1].body).unwrap();
    let first_system = first["system"].as_str().unwrap();
    let second_system = second["system"].as_str().unwrap();
    assert!(first_system.contains("valid JSON only"));
    assert!(!first_system.contains(STRICT_JSON_DIRECTIVE));
    assert!(second_system.ends_with(STRICT_JSON_DIRECTIVE));
    assert_eq!(first["temperature"], 0.0);

    let events = trace.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].attempt, 1);
    assert_eq!(events[1].attempt, 2);
    assert!(events
        .iter()
        .all(|e| e.outcome == TraceOutcome::SchemaViolation && e.stage == "classify_question"));
    assert_ne!(events[0].prompt_hash, events[1].prompt_hash);
}

#[tokio::test]
async fn transport_failure_is_oracle_unavailable_not_schema_violation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "type": "error",
            "error": { "type": "api_error", "message": "down" }
        })))
        .mount(&server)
        .await;

    let oracle = oracle(&server, &PipelineConfig::default());
    let err = stages::classify_question(&oracle, "Q", &ProjectContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CodingError::OracleUnavailable(ProviderError::Provider { .. })));
    assert!(!err.is_schema_violation());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn slow_oracle_call_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(
            text_response("{\"question\":\"Q\",\"type\":\"OPINION\"}")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = PipelineConfig {
        call_timeout_secs: 1,
        ..Default::default()
    };
    let oracle = oracle(&server, &config);
    let err = stages::classify_question(&oracle, "Q", &ProjectContext::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CodingError::OracleUnavailable(ProviderError::Timeout(..))
    ));
}

#[tokio::test]
async fn net_options_use_exploratory_temperature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(text_response(
            &json!({"options": [{
                "id": "option_b", "name": "Simplified", "description": "", "netCount": 1,
                "nets": [{"net": "Producto", "description": "", "codes": ["Buen sabor", "Precio alto"]}]
            }]})
            .to_string(),
        ))
        .mount(&server)
        .await;

    let codes = vec![
        thematic_coder::Code::new("Buen sabor", thematic_coder::Sentiment::Positive),
        thematic_coder::Code::new("Precio alto", thematic_coder::Sentiment::Negative),
    ];
    let oracle = oracle(&server, &PipelineConfig::default());
    let options = stages::generate_net_options(
        &oracle,
        "Q",
        &codes,
        thematic_coder::Language::Es,
        &ProjectContext::default(),
    )
    .await
    .unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].net_count, 1);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let temperature = body["temperature"].as_f64().unwrap();
    assert!((temperature - 0.3).abs() < 1e-6);
}
