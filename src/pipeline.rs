//! Per-question coding pipeline and survey-level runner.
//!
//! Each question moves through an explicit state machine:
//!
//! ```text
//! Pending ─classify─▶ Classified ─extract─▶ Extracted ─normalize─▶ Normalized
//!    │                                                                 │
//!    └─(REFERENCE)─▶ Done                                           nets
//!                                                                      ▼
//!              Done ◀─(summary)─ AnswersClassified ◀─classify answers─ Netted
//! ```
//!
//! A failed or cancelled question reports the last completed state as a
//! checkpoint, and [`CodingPipeline::resume`] re-enters the machine from it
//! without redoing earlier stages. Questions never share state.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::CodingError;
use crate::language::{self, Language};
use crate::oracle::OracleClient;
use crate::stages::{self, NetOption};
use crate::types::{
    Answer, ClassifiedAnswer, Code, Net, ProjectContext, QuestionInput, QuestionType, Stage,
};

// =============================================================================
// Types
// =============================================================================

/// Last completed state of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuestionState {
    Pending,
    /// OPINION question with its detected language.
    Classified { language: Language },
    Extracted {
        language: Language,
        codes: Vec<Code>,
    },
    Normalized {
        language: Language,
        codes: Vec<Code>,
    },
    Netted {
        language: Language,
        codes: Vec<Code>,
        nets: Vec<Net>,
    },
    AnswersClassified {
        language: Language,
        codes: Vec<Code>,
        nets: Vec<Net>,
        classified_answers: Vec<ClassifiedAnswer>,
    },
    Done { outcome: QuestionOutcome },
}

impl QuestionState {
    /// Stage the next transition runs, `None` once done. From
    /// `AnswersClassified` the summary only runs when enabled.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            QuestionState::Pending => Some(Stage::ClassifyQuestion),
            QuestionState::Classified { .. } => Some(Stage::ExtractCodes),
            QuestionState::Extracted { .. } => Some(Stage::NormalizeCodes),
            QuestionState::Normalized { .. } => Some(Stage::GenerateNets),
            QuestionState::Netted { .. } => Some(Stage::ClassifyAnswers),
            QuestionState::AnswersClassified { .. } => Some(Stage::Summarize),
            QuestionState::Done { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuestionState::Pending => "pending",
            QuestionState::Classified { .. } => "classified",
            QuestionState::Extracted { .. } => "extracted",
            QuestionState::Normalized { .. } => "normalized",
            QuestionState::Netted { .. } => "netted",
            QuestionState::AnswersClassified { .. } => "answers_classified",
            QuestionState::Done { .. } => "done",
        }
    }
}

/// Final per-question result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionOutcome {
    /// Factual question: answers pass through verbatim.
    #[serde(rename_all = "camelCase")]
    Reference {
        question: String,
        language: Language,
        answers: Vec<Answer>,
    },
    #[serde(rename_all = "camelCase")]
    Opinion {
        question: String,
        language: Language,
        codes: Vec<Code>,
        nets: Vec<Net>,
        classified_answers: Vec<ClassifiedAnswer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl QuestionOutcome {
    pub fn question(&self) -> &str {
        match self {
            QuestionOutcome::Reference { question, .. } => question,
            QuestionOutcome::Opinion { question, .. } => question,
        }
    }

    pub fn kind(&self) -> QuestionType {
        match self {
            QuestionOutcome::Reference { .. } => QuestionType::Reference,
            QuestionOutcome::Opinion { .. } => QuestionType::Opinion,
        }
    }

    pub fn language(&self) -> Language {
        match self {
            QuestionOutcome::Reference { language, .. } => *language,
            QuestionOutcome::Opinion { language, .. } => *language,
        }
    }
}

/// A question plus its last completed state; enough to resume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionCheckpoint {
    pub question: QuestionInput,
    pub state: QuestionState,
}

// =============================================================================
// Pipeline errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("question `{question}` failed at {stage}: {source}")]
    Stage {
        question: String,
        stage: Stage,
        checkpoint: Box<QuestionCheckpoint>,
        source: CodingError,
    },
    #[error("question `{question}` cancelled before {stage}")]
    Cancelled {
        question: String,
        stage: Stage,
        checkpoint: Box<QuestionCheckpoint>,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Stage { stage, .. } | PipelineError::Cancelled { stage, .. } => *stage,
        }
    }

    pub fn into_checkpoint(self) -> QuestionCheckpoint {
        match self {
            PipelineError::Stage { checkpoint, .. }
            | PipelineError::Cancelled { checkpoint, .. } => *checkpoint,
        }
    }
}

// =============================================================================
// Survey report
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuestionReport {
    Completed {
        outcome: QuestionOutcome,
    },
    Failed {
        question: String,
        stage: Stage,
        error_code: String,
        error: String,
        checkpoint: QuestionCheckpoint,
    },
    Cancelled {
        question: String,
        stage: Stage,
        checkpoint: QuestionCheckpoint,
    },
}

impl QuestionReport {
    fn from_result(result: Result<QuestionOutcome, PipelineError>) -> Self {
        match result {
            Ok(outcome) => QuestionReport::Completed { outcome },
            Err(PipelineError::Stage {
                question,
                stage,
                checkpoint,
                source,
            }) => QuestionReport::Failed {
                question,
                stage,
                error_code: source.code().to_string(),
                error: source.to_string(),
                checkpoint: *checkpoint,
            },
            Err(PipelineError::Cancelled {
                question,
                stage,
                checkpoint,
            }) => QuestionReport::Cancelled {
                question,
                stage,
                checkpoint: *checkpoint,
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, QuestionReport::Completed { .. })
    }
}

/// Result of coding every question of one survey.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyReport {
    pub run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Respondent ids in first-seen order across questions.
    pub respondent_ids: Vec<String>,
    /// One entry per input question, in input order.
    pub questions: Vec<QuestionReport>,
}

impl SurveyReport {
    pub fn completed(&self) -> usize {
        self.questions.iter().filter(|q| q.is_completed()).count()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Reject input no stage could work with.
pub fn validate_question(question: &QuestionInput) -> Result<(), CodingError> {
    if question.question_text.trim().is_empty() {
        return Err(CodingError::input("question text is blank"));
    }
    if question.answers.is_empty() {
        return Err(CodingError::input(format!(
            "question `{}` has no answers",
            question.question_text
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CodingPipeline {
    oracle: OracleClient,
    config: PipelineConfig,
}

impl CodingPipeline {
    pub fn new(oracle: OracleClient, config: PipelineConfig) -> Self {
        Self { oracle, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn oracle(&self) -> &OracleClient {
        &self.oracle
    }

    /// Run one transition from `state`.
    pub async fn advance(
        &self,
        question: &QuestionInput,
        state: &QuestionState,
        ctx: &ProjectContext,
    ) -> Result<QuestionState, CodingError> {
        let text = question.question_text.as_str();
        let cfg = &self.config;

        let next = match state {
            QuestionState::Pending => {
                validate_question(question)?;
                let kind = stages::classify_question(&self.oracle, text, ctx).await?;
                let language = language::detect_answers(&question.answer_texts());
                match kind {
                    QuestionType::Reference => QuestionState::Done {
                        outcome: QuestionOutcome::Reference {
                            question: text.to_string(),
                            language,
                            answers: question.answers.clone(),
                        },
                    },
                    QuestionType::Opinion => QuestionState::Classified { language },
                }
            }
            QuestionState::Classified { language } => {
                let codes = stages::extract_codes(
                    &self.oracle,
                    text,
                    &question.answer_texts(),
                    *language,
                    ctx,
                    cfg.max_extracted_codes,
                )
                .await?;
                QuestionState::Extracted {
                    language: *language,
                    codes,
                }
            }
            QuestionState::Extracted { language, codes } => {
                let codes =
                    stages::normalize_codes(&self.oracle, text, codes, cfg.max_normalized_codes)
                        .await?;
                QuestionState::Normalized {
                    language: *language,
                    codes,
                }
            }
            QuestionState::Normalized { language, codes } => {
                let nets =
                    stages::generate_nets(&self.oracle, text, codes, *language, ctx).await?;
                QuestionState::Netted {
                    language: *language,
                    codes: codes.clone(),
                    nets,
                }
            }
            QuestionState::Netted {
                language,
                codes,
                nets,
            } => {
                let classified_answers = stages::classify_answers(
                    &self.oracle,
                    text,
                    &question.answers,
                    nets,
                    cfg.answer_batch_size,
                    cfg.batch_concurrency,
                )
                .await?;
                QuestionState::AnswersClassified {
                    language: *language,
                    codes: codes.clone(),
                    nets: nets.clone(),
                    classified_answers,
                }
            }
            QuestionState::AnswersClassified {
                language,
                codes,
                nets,
                classified_answers,
            } => {
                let summary = if cfg.summarize {
                    Some(
                        stages::summarize(&self.oracle, text, &question.answer_texts(), *language)
                            .await?,
                    )
                } else {
                    None
                };
                QuestionState::Done {
                    outcome: QuestionOutcome::Opinion {
                        question: text.to_string(),
                        language: *language,
                        codes: codes.clone(),
                        nets: nets.clone(),
                        classified_answers: classified_answers.clone(),
                        summary,
                    },
                }
            }
            QuestionState::Done { .. } => state.clone(),
        };
        Ok(next)
    }

    /// Run one question from scratch.
    pub async fn run_question(
        &self,
        question: QuestionInput,
        ctx: &ProjectContext,
        cancel: Option<&AtomicBool>,
    ) -> Result<QuestionOutcome, PipelineError> {
        self.resume(
            QuestionCheckpoint {
                question,
                state: QuestionState::Pending,
            },
            ctx,
            cancel,
        )
        .await
    }

    /// Re-enter the state machine at `checkpoint` and run to completion.
    pub async fn resume(
        &self,
        checkpoint: QuestionCheckpoint,
        ctx: &ProjectContext,
        cancel: Option<&AtomicBool>,
    ) -> Result<QuestionOutcome, PipelineError> {
        let QuestionCheckpoint {
            question,
            mut state,
        } = checkpoint;
        let text = question.question_text.clone();

        loop {
            if let QuestionState::Done { outcome } = state {
                info!(question = %text, kind = outcome.kind().as_str(), "question coded");
                return Ok(outcome);
            }
            // Every state but Done has a next stage.
            let stage = state.next_stage().unwrap_or(Stage::ClassifyQuestion);

            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                info!(question = %text, stage = %stage, "question cancelled");
                return Err(PipelineError::Cancelled {
                    question: text,
                    stage,
                    checkpoint: Box::new(QuestionCheckpoint { question, state }),
                });
            }

            match self.advance(&question, &state, ctx).await {
                Ok(next) => state = next,
                Err(source) => {
                    warn!(
                        question = %text,
                        stage = %stage,
                        state = state.name(),
                        error = %source,
                        "question failed"
                    );
                    return Err(PipelineError::Stage {
                        question: text,
                        stage,
                        checkpoint: Box::new(QuestionCheckpoint { question, state }),
                        source,
                    });
                }
            }
        }
    }

    /// Code every question, up to `question_concurrency` at a time. A failing
    /// question is reported in place and never affects the others.
    pub async fn run_survey(
        &self,
        questions: Vec<QuestionInput>,
        ctx: &ProjectContext,
        cancel: Option<&AtomicBool>,
    ) -> SurveyReport {
        let respondent_ids = collect_respondent_ids(&questions);
        info!(
            questions = questions.len(),
            respondents = respondent_ids.len(),
            "starting survey run"
        );

        let tasks = questions
            .into_iter()
            .map(|question| self.run_question(question, ctx, cancel));
        let results: Vec<Result<QuestionOutcome, PipelineError>> = stream::iter(tasks)
            .buffered(self.config.question_concurrency.max(1))
            .collect()
            .await;

        let report = SurveyReport {
            run_id: self.oracle.run_id(),
            created_at: Utc::now(),
            respondent_ids,
            questions: results.into_iter().map(QuestionReport::from_result).collect(),
        };
        info!(
            completed = report.completed(),
            total = report.questions.len(),
            "survey run finished"
        );
        report
    }

    /// Alternative groupings of a question's codes, for analyst review.
    pub async fn net_options(
        &self,
        question: &str,
        codes: &[Code],
        language: Language,
        ctx: &ProjectContext,
    ) -> Result<Vec<NetOption>, CodingError> {
        stages::generate_net_options(&self.oracle, question, codes, language, ctx).await
    }
}

fn collect_respondent_ids(questions: &[QuestionInput]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    questions
        .iter()
        .flat_map(|q| q.answers.iter())
        .filter(|a| seen.insert(a.respondent_id.clone()))
        .map(|a| a.respondent_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sentiment;

    #[test]
    fn next_stage_follows_the_opinion_path() {
        let codes = vec![Code::new("Buen sabor", Sentiment::Positive)];
        let lang = Language::Es;
        let states = [
            (QuestionState::Pending, Some(Stage::ClassifyQuestion)),
            (
                QuestionState::Classified { language: lang },
                Some(Stage::ExtractCodes),
            ),
            (
                QuestionState::Extracted {
                    language: lang,
                    codes: codes.clone(),
                },
                Some(Stage::NormalizeCodes),
            ),
            (
                QuestionState::Normalized {
                    language: lang,
                    codes: codes.clone(),
                },
                Some(Stage::GenerateNets),
            ),
        ];
        for (state, stage) in states {
            assert_eq!(state.next_stage(), stage, "{}", state.name());
        }
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let checkpoint = QuestionCheckpoint {
            question: QuestionInput::new("Q", vec![Answer::new("r1", "a")]),
            state: QuestionState::Normalized {
                language: Language::Es,
                codes: vec![Code::new("Buen sabor", Sentiment::Positive)],
            },
        };
        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["state"]["state"], "normalized");
        let back: QuestionCheckpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, checkpoint);
    }

    #[test]
    fn validation_rejects_blank_question_and_empty_answers() {
        assert!(validate_question(&QuestionInput::new("  ", vec![Answer::new("r", "a")])).is_err());
        assert!(validate_question(&QuestionInput::new("Q", vec![])).is_err());
        assert!(validate_question(&QuestionInput::new("Q", vec![Answer::new("r", "a")])).is_ok());
    }

    #[test]
    fn respondent_ids_keep_first_seen_order() {
        let questions = vec![
            QuestionInput::new("Q1", vec![Answer::new("b", "x"), Answer::new("a", "y")]),
            QuestionInput::new("Q2", vec![Answer::new("a", "z"), Answer::new("c", "w")]),
        ];
        assert_eq!(collect_respondent_ids(&questions), vec!["b", "a", "c"]);
    }

    #[test]
    fn outcome_serializes_with_type_tag() {
        let outcome = QuestionOutcome::Reference {
            question: "Q".into(),
            language: Language::En,
            answers: vec![Answer::new("r1", "Coke")],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "REFERENCE");
        assert_eq!(json["language"], "en");
        assert_eq!(json["answers"][0]["respondentId"], "r1");
    }
}
