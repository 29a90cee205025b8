//! The coding stages.
//!
//! Each stage renders its prompt, calls the oracle and validates the answer
//! against the typed wire shape. Validation is also where oracle drift is
//! reconciled against what the stage was given: names are mapped back to the
//! canonical input spelling, invented codes are dropped, and the fallback net
//! is enforced structurally rather than trusted.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::batching::process_in_batches;
use crate::dedup::{code_key, dedupe_codes};
use crate::error::CodingError;
use crate::language::{is_fallback_label, Language};
use crate::oracle::{OracleCall, OracleClient, Violation};
use crate::prompts;
use crate::types::{
    Answer, ClassifiedAnswer, Code, CodeLabel, Net, NetAssignment, ProjectContext, QuestionType,
    Sentiment, Stage,
};

/// Temperature for the exploratory net-options stage.
pub const NET_OPTIONS_TEMPERATURE: f32 = 0.3;

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct QuestionTypeWire {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CodeWire {
    name: String,
    sentiment: String,
}

#[derive(Debug, Deserialize)]
struct LabelWire {
    code: String,
    #[serde(default)]
    sentiment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetWire {
    net: String,
    #[serde(default)]
    codes: Vec<LabelWire>,
}

#[derive(Debug, Deserialize)]
struct AnswerWire {
    #[serde(default)]
    nets: Vec<NetWire>,
}

#[derive(Debug, Deserialize)]
struct SummaryWire {
    #[serde(rename = "Summary", alias = "summary")]
    summary: Vec<String>,
}

/// One alternative grouping proposed by the net-options stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetOption {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub net_count: usize,
    pub nets: Vec<OptionNet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionNet {
    pub net: String,
    #[serde(default)]
    pub description: String,
    pub codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NetOptionsWire {
    options: Vec<NetOption>,
}

/// The array under `key`, or the value itself when the oracle returned a
/// bare array.
fn array_field(value: Value, key: &str) -> Result<Value, Violation> {
    match value {
        Value::Array(_) => Ok(value),
        Value::Object(mut map) => map
            .remove(key)
            .filter(Value::is_array)
            .ok_or_else(|| Violation::schema(format!("missing `{key}` array"))),
        _ => Err(Violation::schema(format!("expected object with `{key}`"))),
    }
}

fn parse_sentiment(raw: &str, code: &str) -> Result<Sentiment, Violation> {
    Sentiment::parse(raw)
        .ok_or_else(|| Violation::schema(format!("invalid sentiment `{raw}` for code `{code}`")))
}

// =============================================================================
// Validators
// =============================================================================

/// `{question, type}` → question type.
pub fn parse_question_type(value: Value) -> Result<QuestionType, Violation> {
    let wire: QuestionTypeWire = serde_json::from_value(value)?;
    QuestionType::parse(&wire.kind)
        .ok_or_else(|| Violation::schema(format!("unknown question type `{}`", wire.kind)))
}

/// `{categories: [{name, sentiment}]}` → codes, fallback labels removed,
/// near-duplicates collapsed, capped.
pub fn parse_extracted_codes(value: Value, cap: usize) -> Result<Vec<Code>, Violation> {
    let wire: Vec<CodeWire> = serde_json::from_value(array_field(value, "categories")?)?;
    let mut codes = Vec::with_capacity(wire.len());
    for c in wire {
        let name = c.name.trim();
        if name.is_empty() || is_fallback_label(name) {
            continue;
        }
        codes.push(Code::new(name, parse_sentiment(&c.sentiment, name)?));
    }
    Ok(dedupe_codes(codes, cap))
}

/// Keep only survivors that exist in `input`, with the input's name and
/// sentiment.
pub fn reconcile_normalized(
    input: &[Code],
    value: Value,
    cap: usize,
) -> Result<Vec<Code>, Violation> {
    let wire: Vec<CodeWire> = serde_json::from_value(array_field(value, "categories")?)?;
    let by_key: HashMap<String, &Code> = input.iter().map(|c| (code_key(&c.name), c)).collect();

    let mut kept = Vec::new();
    for c in wire {
        match by_key.get(&code_key(&c.name)) {
            Some(code) => kept.push((*code).clone()),
            None => warn!(code = %c.name, "normalization returned a code not in its input; dropped"),
        }
    }
    let kept = dedupe_codes(kept, cap);
    if kept.is_empty() && !input.is_empty() {
        return Err(Violation::schema("normalization kept none of the input codes"));
    }
    Ok(kept)
}

/// The reserved net every net set ends with.
pub fn fallback_net(language: Language) -> Net {
    let label = language.fallback_label();
    Net::new(label, vec![CodeLabel::new(label, Sentiment::Neutral)])
}

/// Partition `codes` into the oracle's nets.
///
/// Invented and repeated codes are dropped, same-named nets merged, empty
/// nets removed, and exactly one fallback net (with its single neutral
/// placeholder) is appended last. A code the oracle left out is a violation.
pub fn reconcile_nets(
    codes: &[Code],
    value: Value,
    language: Language,
) -> Result<Vec<Net>, Violation> {
    let wire: Vec<NetWire> = serde_json::from_value(array_field(value, "nets")?)?;
    let by_key: HashMap<String, &Code> = codes.iter().map(|c| (code_key(&c.name), c)).collect();

    let mut nets: Vec<Net> = Vec::new();
    let mut net_index: HashMap<String, usize> = HashMap::new();
    let mut assigned: HashSet<String> = HashSet::new();

    for wire_net in wire {
        let name = wire_net.net.trim();
        if name.is_empty() || is_fallback_label(name) {
            continue;
        }
        let idx = *net_index.entry(name.to_lowercase()).or_insert_with(|| {
            nets.push(Net::new(name, Vec::new()));
            nets.len() - 1
        });
        for label in wire_net.codes {
            let key = code_key(&label.code);
            let Some(code) = by_key.get(&key) else {
                if !is_fallback_label(&label.code) {
                    debug!(code = %label.code, net = %name, "dropping code not in input");
                }
                continue;
            };
            if assigned.insert(key) {
                nets[idx].codes.push(code.label());
            }
        }
    }

    let missing: Vec<&str> = codes
        .iter()
        .filter(|c| !assigned.contains(&code_key(&c.name)))
        .map(|c| c.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(Violation::schema(format!(
            "codes missing from nets: {}",
            missing.join(", ")
        )));
    }

    nets.retain(|n| !n.codes.is_empty());
    nets.push(fallback_net(language));
    Ok(nets)
}

/// Reconcile one batch of classified answers against `batch` and `nets`.
///
/// The result has one entry per input answer, in input order, carrying the
/// input's respondent id and text. Labels are resolved by code: a code filed
/// under the wrong net moves to its owning net; unknown codes are dropped.
/// Answers left with nothing get the fallback pair; the fallback never
/// accompanies real codes.
pub fn reconcile_answers(
    batch: &[Answer],
    nets: &[Net],
    value: Value,
) -> Result<Vec<ClassifiedAnswer>, Violation> {
    let wire: Vec<AnswerWire> = serde_json::from_value(array_field(value, "answers")?)?;
    if wire.len() != batch.len() {
        return Err(Violation::Cardinality {
            expected: batch.len(),
            actual: wire.len(),
        });
    }

    let fallback_idx = nets
        .iter()
        .rposition(|n| is_fallback_label(&n.name))
        .unwrap_or(nets.len().saturating_sub(1));
    let mut owner: HashMap<String, (usize, &CodeLabel)> = HashMap::new();
    for (idx, net) in nets.iter().enumerate() {
        for label in &net.codes {
            owner.entry(code_key(&label.code)).or_insert((idx, label));
        }
    }

    Ok(batch
        .iter()
        .zip(wire)
        .map(|(answer, wire_answer)| {
            let mut seen: HashSet<(usize, String)> = HashSet::new();
            let mut pairs: Vec<(usize, CodeLabel)> = Vec::new();
            for label in wire_answer.nets.iter().flat_map(|n| n.codes.iter()) {
                let key = code_key(&label.code);
                if let Some((idx, canonical)) = owner.get(&key) {
                    if seen.insert((*idx, key)) {
                        pairs.push((*idx, (*canonical).clone()));
                    }
                }
            }
            if pairs.iter().any(|(idx, _)| *idx != fallback_idx) {
                pairs.retain(|(idx, _)| *idx != fallback_idx);
            }
            if pairs.is_empty() {
                if let Some(label) = nets.get(fallback_idx).and_then(|n| n.codes.first()) {
                    pairs.push((fallback_idx, label.clone()));
                }
            }
            ClassifiedAnswer {
                respondent_id: answer.respondent_id.clone(),
                answer: answer.text.clone(),
                nets: group_pairs(nets, pairs),
            }
        })
        .collect())
}

/// Group (net index, label) pairs into assignments, in net order.
fn group_pairs(nets: &[Net], mut pairs: Vec<(usize, CodeLabel)>) -> Vec<NetAssignment> {
    pairs.sort_by_key(|(idx, _)| *idx);
    let mut out: Vec<NetAssignment> = Vec::new();
    let mut current: Option<usize> = None;
    for (idx, label) in pairs {
        if current != Some(idx) {
            out.push(NetAssignment {
                net: nets[idx].name.clone(),
                codes: Vec::new(),
            });
            current = Some(idx);
        }
        if let Some(last) = out.last_mut() {
            last.codes.push(label);
        }
    }
    out
}

/// Every answer of `batch` assigned to the fallback net.
pub fn fallback_answers(batch: &[Answer], nets: &[Net]) -> Vec<ClassifiedAnswer> {
    let fallback = nets.last();
    batch
        .iter()
        .map(|a| ClassifiedAnswer {
            respondent_id: a.respondent_id.clone(),
            answer: a.text.clone(),
            nets: fallback
                .map(|n| {
                    vec![NetAssignment {
                        net: n.name.clone(),
                        codes: n.codes.iter().take(1).cloned().collect(),
                    }]
                })
                .unwrap_or_default(),
        })
        .collect()
}

/// `{Summary: [string]}` with exactly one non-empty string.
pub fn parse_summary(value: Value) -> Result<String, Violation> {
    let wire: SummaryWire = serde_json::from_value(value)?;
    match wire.summary.as_slice() {
        [text] if !text.trim().is_empty() => Ok(text.trim().to_string()),
        other => Err(Violation::schema(format!(
            "expected one non-empty summary string, got {}",
            other.len()
        ))),
    }
}

/// Options must reference only known codes and each cover all of them.
pub fn reconcile_net_options(codes: &[Code], value: Value) -> Result<Vec<NetOption>, Violation> {
    let wire: NetOptionsWire = serde_json::from_value(value)?;
    if wire.options.is_empty() {
        return Err(Violation::schema("no grouping options returned"));
    }
    let by_key: HashMap<String, &Code> = codes.iter().map(|c| (code_key(&c.name), c)).collect();

    let mut options = Vec::with_capacity(wire.options.len());
    for mut option in wire.options {
        let mut covered = HashSet::new();
        for net in &mut option.nets {
            let mut canonical = Vec::with_capacity(net.codes.len());
            for raw in &net.codes {
                let key = code_key(raw);
                let code = by_key.get(&key).ok_or_else(|| {
                    Violation::schema(format!("option `{}` uses unknown code `{raw}`", option.id))
                })?;
                if covered.insert(key) {
                    canonical.push(code.name.clone());
                }
            }
            net.codes = canonical;
        }
        option.nets.retain(|n| !n.codes.is_empty());
        if covered.len() != by_key.len() {
            return Err(Violation::schema(format!(
                "option `{}` covers {} of {} codes",
                option.id,
                covered.len(),
                by_key.len()
            )));
        }
        option.net_count = option.nets.len();
        options.push(option);
    }
    Ok(options)
}

// =============================================================================
// Stage calls
// =============================================================================

pub async fn classify_question(
    oracle: &OracleClient,
    question: &str,
    ctx: &ProjectContext,
) -> Result<QuestionType, CodingError> {
    let prompt = prompts::classify_question(question, ctx);
    let kind = oracle
        .invoke_validated(
            OracleCall::new(Stage::ClassifyQuestion, question, prompt),
            parse_question_type,
        )
        .await?;
    info!(question = %question, kind = kind.as_str(), "question classified");
    Ok(kind)
}

pub async fn extract_codes(
    oracle: &OracleClient,
    question: &str,
    answers: &[String],
    language: Language,
    ctx: &ProjectContext,
    cap: usize,
) -> Result<Vec<Code>, CodingError> {
    if answers.is_empty() {
        return Err(CodingError::input("no answers to extract codes from"));
    }
    let prompt = prompts::extract_codes(question, answers, language, ctx, cap);
    let codes = oracle
        .invoke_validated(OracleCall::new(Stage::ExtractCodes, question, prompt), |v| {
            parse_extracted_codes(v, cap)
        })
        .await?;
    info!(question = %question, codes = codes.len(), "codes extracted");
    Ok(codes)
}

pub async fn normalize_codes(
    oracle: &OracleClient,
    question: &str,
    codes: &[Code],
    cap: usize,
) -> Result<Vec<Code>, CodingError> {
    if codes.is_empty() {
        return Ok(Vec::new());
    }
    let prompt = prompts::normalize_codes(question, codes, cap);
    let normalized = oracle
        .invoke_validated(
            OracleCall::new(Stage::NormalizeCodes, question, prompt),
            |v| reconcile_normalized(codes, v, cap),
        )
        .await?;
    info!(
        question = %question,
        before = codes.len(),
        after = normalized.len(),
        "codes normalized"
    );
    Ok(normalized)
}

pub async fn generate_nets(
    oracle: &OracleClient,
    question: &str,
    codes: &[Code],
    language: Language,
    ctx: &ProjectContext,
) -> Result<Vec<Net>, CodingError> {
    if codes.is_empty() {
        return Ok(vec![fallback_net(language)]);
    }
    let prompt = prompts::generate_nets(question, codes, language, ctx);
    let nets = oracle
        .invoke_validated(OracleCall::new(Stage::GenerateNets, question, prompt), |v| {
            reconcile_nets(codes, v, language)
        })
        .await?;
    info!(question = %question, nets = nets.len(), "nets generated");
    Ok(nets)
}

/// Classify all answers of one question, `batch_size` answers per call.
pub async fn classify_answers(
    oracle: &OracleClient,
    question: &str,
    answers: &[Answer],
    nets: &[Net],
    batch_size: usize,
    concurrency: usize,
) -> Result<Vec<ClassifiedAnswer>, CodingError> {
    if nets.is_empty() {
        return Err(CodingError::input("net set is empty"));
    }
    let only_fallback = nets.iter().all(|n| is_fallback_label(&n.name));

    let classified = process_in_batches(
        answers,
        batch_size,
        concurrency,
        Stage::ClassifyAnswers,
        |index, batch| async move {
            if only_fallback {
                return Ok(fallback_answers(batch, nets));
            }
            let texts: Vec<String> = batch.iter().map(|a| a.text.clone()).collect();
            let prompt = prompts::classify_answers(question, &texts, nets);
            debug!(question = %question, batch = index, size = batch.len(), "classifying batch");
            oracle
                .invoke_validated(
                    OracleCall::new(Stage::ClassifyAnswers, question, prompt),
                    |v| reconcile_answers(batch, nets, v),
                )
                .await
        },
    )
    .await?;
    info!(question = %question, answers = classified.len(), "answers classified");
    Ok(classified)
}

pub async fn summarize(
    oracle: &OracleClient,
    question: &str,
    answers: &[String],
    language: Language,
) -> Result<String, CodingError> {
    if answers.is_empty() {
        return Err(CodingError::input("no answers to summarize"));
    }
    let prompt = prompts::summarize(question, answers, language);
    oracle
        .invoke_validated(
            OracleCall::new(Stage::Summarize, question, prompt),
            parse_summary,
        )
        .await
}

/// Three alternative groupings of `codes` for analyst review.
pub async fn generate_net_options(
    oracle: &OracleClient,
    question: &str,
    codes: &[Code],
    language: Language,
    ctx: &ProjectContext,
) -> Result<Vec<NetOption>, CodingError> {
    if codes.is_empty() {
        return Err(CodingError::input("no codes to group"));
    }
    if question.trim().is_empty() {
        return Err(CodingError::input("question text is blank"));
    }
    let prompt = prompts::net_options(question, codes, language, ctx);
    oracle
        .invoke_validated(
            OracleCall::new(Stage::NetOptions, question, prompt).temperature(NET_OPTIONS_TEMPERATURE),
            |v| reconcile_net_options(codes, v),
        )
        .await
}
