//! Stage-level errors.

use crate::gateway::ProviderError;
use crate::types::Stage;

/// Failure of one pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum CodingError {
    /// Transport failure after gateway retries, or the call timed out.
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(#[from] ProviderError),

    /// Output was not parseable or lacked required fields, after one retry.
    #[error("{stage}: schema violation: {detail}")]
    SchemaViolation { stage: Stage, detail: String },

    /// Result length differs from input length. Never truncated or padded.
    #[error("{stage}: expected {expected} results, got {actual}")]
    CardinalityMismatch {
        stage: Stage,
        expected: usize,
        actual: usize,
    },

    /// Empty or missing caller input, rejected before any oracle call.
    #[error("invalid input: {0}")]
    InputValidation(String),
}

impl CodingError {
    pub fn schema(stage: Stage, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            stage,
            detail: detail.into(),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::InputValidation(message.into())
    }

    /// Short error code for reports and traces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OracleUnavailable(_) => "oracle_unavailable",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::CardinalityMismatch { .. } => "cardinality_mismatch",
            Self::InputValidation(_) => "input_validation",
        }
    }

    /// Cardinality mismatches are a kind of schema violation.
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            Self::SchemaViolation { .. } | Self::CardinalityMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinality_counts_as_schema_violation() {
        let err = CodingError::CardinalityMismatch {
            stage: Stage::ClassifyAnswers,
            expected: 3,
            actual: 2,
        };
        assert!(err.is_schema_violation());
        assert_eq!(err.code(), "cardinality_mismatch");
        assert_eq!(
            err.to_string(),
            "classify_answers: expected 3 results, got 2"
        );
    }

    #[test]
    fn provider_errors_are_not_schema_violations() {
        let err: CodingError = ProviderError::config("missing key").into();
        assert!(!err.is_schema_violation());
        assert_eq!(err.code(), "oracle_unavailable");
    }
}
