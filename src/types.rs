//! Domain types shared by every pipeline stage.
//!
//! Wire shapes follow the stage JSON contracts: codes serialize as
//! `{name, sentiment}`, net members and classified labels as
//! `{code, sentiment}`, nets as `{net, codes}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::StudyType;

// =============================================================================
// Project context
// =============================================================================

/// Phase of the research programme the survey belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyPhase {
    #[default]
    Exploratory,
    Validation,
    Optimization,
    Tracking,
}

impl StudyPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            StudyPhase::Exploratory => "exploratory",
            StudyPhase::Validation => "validation",
            StudyPhase::Optimization => "optimization",
            StudyPhase::Tracking => "tracking",
        }
    }
}

/// Immutable project-level context threaded by reference into every stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    #[serde(default)]
    pub study_type: StudyType,
    #[serde(default)]
    pub study_phase: StudyPhase,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub competitive_set: Vec<String>,
}

// =============================================================================
// Questions and answers
// =============================================================================

/// Whether a question expects factual enumeration or subjective judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Reference,
    Opinion,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Reference => "REFERENCE",
            QuestionType::Opinion => "OPINION",
        }
    }

    /// Lenient parse of the oracle's label.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REFERENCE" => Some(QuestionType::Reference),
            "OPINION" => Some(QuestionType::Opinion),
            _ => None,
        }
    }
}

/// One respondent's free-text answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub respondent_id: String,
    pub text: String,
}

impl Answer {
    pub fn new(respondent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            respondent_id: respondent_id.into(),
            text: text.into(),
        }
    }
}

/// One question and its answers, as delivered by the upload layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    pub question_text: String,
    pub answers: Vec<Answer>,
}

impl QuestionInput {
    pub fn new(question_text: impl Into<String>, answers: Vec<Answer>) -> Self {
        Self {
            question_text: question_text.into(),
            answers,
        }
    }

    pub fn answer_texts(&self) -> Vec<String> {
        self.answers.iter().map(|a| a.text.clone()).collect()
    }
}

// =============================================================================
// Codes and nets
// =============================================================================

/// Polarity attached to every code. Serialized untranslated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Neutral => "Neutral",
            Sentiment::Negative => "Negative",
        }
    }

    /// Lenient parse: case-insensitive, tolerates labels the oracle
    /// translated despite being told not to.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "positive" | "positivo" | "positiva" | "positif" | "positiv" => {
                Some(Sentiment::Positive)
            }
            "neutral" | "neutro" | "neutra" | "neutre" | "neutrale" => Some(Sentiment::Neutral),
            "negative" | "negativo" | "negativa" | "négatif" | "negatif" | "negativ" => {
                Some(Sentiment::Negative)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sentiment-tagged theme extracted from one question's answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub name: String,
    pub sentiment: Sentiment,
}

impl Code {
    pub fn new(name: impl Into<String>, sentiment: Sentiment) -> Self {
        Self {
            name: name.into(),
            sentiment,
        }
    }

    pub fn label(&self) -> CodeLabel {
        CodeLabel {
            code: self.name.clone(),
            sentiment: self.sentiment,
        }
    }
}

/// A code as it appears inside a net or a classified answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLabel {
    pub code: String,
    pub sentiment: Sentiment,
}

impl CodeLabel {
    pub fn new(code: impl Into<String>, sentiment: Sentiment) -> Self {
        Self {
            code: code.into(),
            sentiment,
        }
    }
}

/// A thematic grouping of codes for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Net {
    #[serde(rename = "net")]
    pub name: String,
    pub codes: Vec<CodeLabel>,
}

impl Net {
    pub fn new(name: impl Into<String>, codes: Vec<CodeLabel>) -> Self {
        Self {
            name: name.into(),
            codes,
        }
    }
}

// =============================================================================
// Classified answers
// =============================================================================

/// Codes of one net matched by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAssignment {
    pub net: String,
    pub codes: Vec<CodeLabel>,
}

/// An original answer annotated with every net/code combination it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedAnswer {
    pub respondent_id: String,
    pub answer: String,
    pub nets: Vec<NetAssignment>,
}

impl ClassifiedAnswer {
    /// Iterate every (net, code) pair of the annotation.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &CodeLabel)> {
        self.nets
            .iter()
            .flat_map(|n| n.codes.iter().map(move |c| (n.net.as_str(), c)))
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Pipeline stage, used to attribute oracle calls and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ClassifyQuestion,
    ExtractCodes,
    NormalizeCodes,
    GenerateNets,
    ClassifyAnswers,
    Summarize,
    NetOptions,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ClassifyQuestion => "classify_question",
            Stage::ExtractCodes => "extract_codes",
            Stage::NormalizeCodes => "normalize_codes",
            Stage::GenerateNets => "generate_nets",
            Stage::ClassifyAnswers => "classify_answers",
            Stage::Summarize => "summarize",
            Stage::NetOptions => "net_options",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [
            Stage::ClassifyQuestion,
            Stage::ExtractCodes,
            Stage::NormalizeCodes,
            Stage::GenerateNets,
            Stage::ClassifyAnswers,
            Stage::Summarize,
            Stage::NetOptions,
        ]
        .into_iter()
        .find(|s| s.as_str() == raw.trim().replace('-', "_"))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_parse_is_lenient() {
        assert_eq!(Sentiment::parse(" positive "), Some(Sentiment::Positive));
        assert_eq!(Sentiment::parse("Negativo"), Some(Sentiment::Negative));
        assert_eq!(Sentiment::parse("NEUTRAL"), Some(Sentiment::Neutral));
        assert_eq!(Sentiment::parse("mixed"), None);
    }

    #[test]
    fn net_uses_wire_field_names() {
        let net = Net::new(
            "Precio",
            vec![CodeLabel::new("Precio alto", Sentiment::Negative)],
        );
        let json = serde_json::to_value(&net).unwrap();
        assert_eq!(json["net"], "Precio");
        assert_eq!(json["codes"][0]["code"], "Precio alto");
        assert_eq!(json["codes"][0]["sentiment"], "Negative");
    }

    #[test]
    fn question_input_reads_upload_shape() {
        let raw = r#"{"questionText":"Q","answers":[{"respondentId":"r1","text":"a"}]}"#;
        let q: QuestionInput = serde_json::from_str(raw).unwrap();
        assert_eq!(q.question_text, "Q");
        assert_eq!(q.answers[0].respondent_id, "r1");
    }

    #[test]
    fn stage_parse_accepts_cli_spelling() {
        assert_eq!(Stage::parse("generate-nets"), Some(Stage::GenerateNets));
        assert_eq!(Stage::parse("classify_answers"), Some(Stage::ClassifyAnswers));
        assert_eq!(Stage::parse("nope"), None);
    }

    #[test]
    fn question_type_parse() {
        assert_eq!(QuestionType::parse("opinion"), Some(QuestionType::Opinion));
        assert_eq!(QuestionType::parse("REFERENCE"), Some(QuestionType::Reference));
        assert_eq!(QuestionType::parse("other"), None);
    }
}
