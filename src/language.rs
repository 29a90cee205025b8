//! Dominant-language guess for a question's answers.
//!
//! Deterministic and offline: backed by `whatlang` trigram profiles, collapsed
//! to the six output locales the prompts support. Anything the detector
//! cannot place falls back to Spanish.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Inputs shorter than this (in characters, after trimming) are not analysed.
pub const MIN_DETECTION_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Es,
    En,
    Fr,
    Pt,
    It,
    De,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Es,
        Language::En,
        Language::Fr,
        Language::Pt,
        Language::It,
        Language::De,
    ];

    /// ISO 639-1 code.
    pub fn code(self) -> &'static str {
        match self {
            Language::Es => "es",
            Language::En => "en",
            Language::Fr => "fr",
            Language::Pt => "pt",
            Language::It => "it",
            Language::De => "de",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|l| l.code() == code)
    }

    /// Name of the reserved fallback net and its placeholder code.
    pub fn fallback_label(self) -> &'static str {
        match self {
            Language::Es => "Sin categorizar",
            Language::En => "Uncategorized",
            Language::Fr => "Non catégorisé",
            Language::Pt => "Sem categoria",
            Language::It => "Non categorizzato",
            Language::De => "Nicht kategorisiert",
        }
    }

    /// How prompts name the required output language.
    pub fn prompt_directive(self) -> &'static str {
        match self {
            Language::Es => "SPANISH (español)",
            Language::En => "ENGLISH",
            Language::Fr => "FRENCH (français)",
            Language::Pt => "PORTUGUESE (português)",
            Language::It => "ITALIAN (italiano)",
            Language::De => "GERMAN (Deutsch)",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Guess the dominant language of `sample`.
pub fn detect(sample: &str) -> Language {
    let sample = sample.trim();
    if sample.chars().count() < MIN_DETECTION_CHARS {
        return Language::default();
    }
    match whatlang::detect_lang(sample) {
        Some(whatlang::Lang::Spa) => Language::Es,
        Some(whatlang::Lang::Eng) => Language::En,
        Some(whatlang::Lang::Fra) => Language::Fr,
        Some(whatlang::Lang::Por) => Language::Pt,
        Some(whatlang::Lang::Ita) => Language::It,
        Some(whatlang::Lang::Deu) => Language::De,
        _ => Language::default(),
    }
}

/// Detect over the space-joined answers of one question.
pub fn detect_answers<S: AsRef<str>>(answers: &[S]) -> Language {
    let joined = answers
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ");
    detect(&joined)
}

/// True when `name` is the fallback label in any supported locale.
pub fn is_fallback_label(name: &str) -> bool {
    let name = name.trim();
    name.eq_ignore_ascii_case("uncategorized")
        || Language::ALL
            .iter()
            .any(|l| l.fallback_label().to_lowercase() == name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_or_empty_input_defaults_to_spanish() {
        assert_eq!(detect(""), Language::Es);
        assert_eq!(detect("   ok   "), Language::Es);
        assert_eq!(detect("hello you"), Language::Es);
    }

    #[test]
    fn detects_common_languages() {
        assert_eq!(
            detect("The product works really well and I would buy it again next month"),
            Language::En
        );
        assert_eq!(
            detect("El sabor es muy bueno pero el precio es demasiado alto para mi familia"),
            Language::Es
        );
        assert_eq!(
            detect("Das Produkt ist sehr gut und der Preis ist wirklich angemessen für mich"),
            Language::De
        );
    }

    #[test]
    fn detection_is_idempotent() {
        let text = "Me gusta mucho el empaque nuevo y el color de la botella";
        assert_eq!(detect(text), detect(text));
    }

    #[test]
    fn detect_answers_joins_samples() {
        let answers = ["Muy rico", "Demasiado caro para lo que ofrece la marca"];
        assert_eq!(detect_answers(&answers), Language::Es);
    }

    #[test]
    fn fallback_labels_are_recognised_in_any_locale() {
        assert!(is_fallback_label("Sin categorizar"));
        assert!(is_fallback_label(" uncategorized "));
        assert!(is_fallback_label("Non catégorisé"));
        assert!(!is_fallback_label("Precio"));
    }

    #[test]
    fn language_codes_round_trip() {
        for lang in Language::ALL {
            assert_eq!(Language::from_code(lang.code()), Some(lang));
        }
        assert_eq!(Language::from_code("xx"), None);
    }
}
