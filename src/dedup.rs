//! Deterministic near-duplicate collapsing for codes.
//!
//! Two codes collide when they differ only in case, whitespace, accents or a
//! regular plural suffix. Semantic merging ("Caro" vs "Precio alto") is left
//! to the normalization stage. Singular words are never shortened, so "Plan"
//! and "Plane" stay apart.

use std::collections::HashSet;

use crate::types::Code;

/// Comparison key for a code name.
pub fn code_key(name: &str) -> String {
    name.split_whitespace()
        .map(|word| singular(&fold_accents(&word.to_lowercase())))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_accents(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn singular(word: &str) -> String {
    let len = word.chars().count();
    if len > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if len > 4 && word.ends_with("es") && drops_es(&word[..word.len() - 2]) {
        word[..word.len() - 2].to_string()
    } else if len > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Whether `stem` (the word minus "es") is itself the singular: "sabor",
/// "calidad", "glass", "box". "envas" is not; "envases" only loses its "s".
fn drops_es(stem: &str) -> bool {
    match stem.chars().last() {
        Some('r' | 'l' | 'n' | 'd' | 'j' | 'z' | 'x') => true,
        Some('s') => stem.ends_with("ss"),
        _ => false,
    }
}

/// Drop blank names and near-duplicates (first occurrence wins), then cap.
pub fn dedupe_codes(codes: Vec<Code>, cap: usize) -> Vec<Code> {
    let mut seen = HashSet::new();
    codes
        .into_iter()
        .filter_map(|code| {
            let name = code.name.split_whitespace().collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return None;
            }
            seen.insert(code_key(&name)).then_some(Code {
                name,
                sentiment: code.sentiment,
            })
        })
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sentiment;

    #[test]
    fn case_whitespace_and_plural_variants_collide() {
        assert_eq!(code_key("Precio  alto"), code_key("precio alto"));
        assert_eq!(code_key("Precios altos"), code_key("Precio alto"));
        assert_eq!(code_key("Sabores"), code_key("Sabor"));
        assert_eq!(code_key("Calidades"), code_key("calidad"));
        assert_eq!(code_key("Good flavors"), code_key("good flavor"));
        assert_eq!(code_key("Varieties"), code_key("variety"));
        assert_eq!(code_key("Envase práctico"), code_key("envase practico"));
        assert_eq!(code_key("Envases prácticos"), code_key("Envase práctico"));
        assert_eq!(code_key("Classes"), code_key("class"));
        assert_eq!(code_key("Años"), code_key("año"));
    }

    #[test]
    fn distinct_codes_keep_distinct_keys() {
        assert_ne!(code_key("Sabor"), code_key("Precio"));
        assert_ne!(code_key("Glass"), code_key("Gas"));
        assert_eq!(code_key("Glass"), "glass");
        assert_ne!(code_key("Plan"), code_key("Plane"));
        assert_ne!(code_key("Sal"), code_key("Sale"));
        assert_ne!(code_key("Hat"), code_key("Hate"));
        assert_ne!(code_key("Año"), code_key("Ano"));
    }

    #[test]
    fn dedupe_keeps_first_occurrence_and_caps() {
        let codes = vec![
            Code::new("Buen sabor", Sentiment::Positive),
            Code::new("buen  sabores", Sentiment::Negative),
            Code::new("   ", Sentiment::Neutral),
            Code::new("Precio alto", Sentiment::Negative),
            Code::new("Envase", Sentiment::Neutral),
        ];
        let out = dedupe_codes(codes, 2);
        assert_eq!(
            out,
            vec![
                Code::new("Buen sabor", Sentiment::Positive),
                Code::new("Precio alto", Sentiment::Negative),
            ]
        );
    }
}
