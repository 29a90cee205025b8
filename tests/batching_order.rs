use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thematic_coder::gateway::{ChatRequest, ChatResponse, ProviderError, Role};
use thematic_coder::stages;
use thematic_coder::{
    process_in_batches, Answer, ChatGateway, CodeLabel, CodingError, Net, OracleClient,
    PipelineConfig, Sentiment, Stage,
};

/// Answers "answer-N": even N → "Buen sabor", odd N → "Precio alto".
/// Earlier batches respond more slowly so completion order is reversed.
#[derive(Default)]
struct ParityClassifier {
    batch_sizes: Mutex<Vec<usize>>,
    calls: AtomicUsize,
}

#[async_trait]
impl ChatGateway for ParityClassifier {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let user = req
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let answers: Vec<String> = serde_json::from_str(&user).unwrap();
        self.batch_sizes.lock().unwrap().push(answers.len());

        let first: u64 = answers[0].trim_start_matches("answer-").parse().unwrap();
        tokio::time::sleep(Duration::from_millis(120u64.saturating_sub(first))).await;

        let rows: Vec<_> = answers
            .iter()
            .map(|a| {
                let n: u64 = a.trim_start_matches("answer-").parse().unwrap();
                let (net, code) = if n % 2 == 0 {
                    ("Sabor", "Buen sabor")
                } else {
                    ("Precio", "Precio alto")
                };
                json!({"answer": a, "nets": [{"net": net, "codes": [{"code": code, "sentiment": "Neutral"}]}]})
            })
            .collect();
        Ok(ChatResponse::text(json!({ "answers": rows }).to_string()))
    }
}

fn nets() -> Vec<Net> {
    vec![
        Net::new("Sabor", vec![CodeLabel::new("Buen sabor", Sentiment::Positive)]),
        Net::new("Precio", vec![CodeLabel::new("Precio alto", Sentiment::Negative)]),
        Net::new(
            "Sin categorizar",
            vec![CodeLabel::new("Sin categorizar", Sentiment::Neutral)],
        ),
    ]
}

fn answers(n: usize) -> Vec<Answer> {
    (0..n)
        .map(|i| Answer::new(format!("r{i}"), format!("answer-{i}")))
        .collect()
}

#[tokio::test]
async fn one_hundred_twenty_answers_make_three_ordered_calls() {
    let fake = Arc::new(ParityClassifier::default());
    let oracle = OracleClient::new(fake.clone(), &PipelineConfig::default());
    let input = answers(120);

    let out = stages::classify_answers(&oracle, "Q", &input, &nets(), 50, 3)
        .await
        .unwrap();

    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    let mut sizes = fake.batch_sizes.lock().unwrap().clone();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![20, 50, 50]);

    assert_eq!(out.len(), 120);
    for (i, classified) in out.iter().enumerate() {
        assert_eq!(classified.respondent_id, format!("r{i}"));
        assert_eq!(classified.answer, format!("answer-{i}"));
        let expected = if i % 2 == 0 { "Buen sabor" } else { "Precio alto" };
        assert_eq!(classified.nets.len(), 1);
        assert_eq!(classified.nets[0].codes[0].code, expected);
    }
}

#[tokio::test]
async fn order_and_cardinality_hold_for_edge_batch_sizes() {
    let items: Vec<usize> = (0..7).collect();
    for batch_size in [1, items.len(), items.len() + 1] {
        let calls = AtomicUsize::new(0);
        let out = process_in_batches(&items, batch_size, 4, Stage::ClassifyAnswers, |idx, chunk| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10 * (7 - idx as u64))).await;
                Ok::<_, CodingError>(chunk.iter().map(|n| n * 10).collect::<Vec<_>>())
            }
        })
        .await
        .unwrap();

        assert_eq!(out, (0..7).map(|n| n * 10).collect::<Vec<_>>(), "batch_size {batch_size}");
        assert_eq!(calls.load(Ordering::SeqCst), items.len().div_ceil(batch_size));
    }
}

#[tokio::test]
async fn any_chunk_failure_fails_the_whole_operation() {
    let items: Vec<usize> = (0..10).collect();
    let err = process_in_batches(&items, 3, 2, Stage::ClassifyAnswers, |idx, chunk| async move {
        if idx == 2 {
            Err(CodingError::SchemaViolation {
                stage: Stage::ClassifyAnswers,
                detail: "bad batch".into(),
            })
        } else {
            Ok(chunk.to_vec())
        }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, CodingError::SchemaViolation { .. }));
}
