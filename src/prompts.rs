//! Prompt templates for the coding stages.
//!
//! Pure functions: each stage's `(system, user)` pair is rendered from typed
//! inputs plus the project context. Provider-agnostic.

use serde::Serialize;

use crate::catalog::{conceptual_framework, net_templates};
use crate::gateway::Message;
use crate::language::Language;
use crate::types::{Code, Net, ProjectContext};

// =============================================================================
// Prompt instance
// =============================================================================

/// Rendered prompt ready for the oracle.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }

    /// Same prompt with an extra directive appended to the system part.
    pub fn with_directive(&self, directive: &str) -> Self {
        Self {
            template_slug: self.template_slug,
            system: format!("{}\n\n{}", self.system, directive),
            user: self.user.clone(),
        }
    }
}

/// Appended to every system prompt.
pub const JSON_ONLY_DIRECTIVE: &str = "IMPORTANT: You must respond with valid JSON only. \
Do not include any text before or after the JSON object. \
Do not use markdown formatting or code blocks.";

/// Appended on the single retry after an unusable response.
pub const STRICT_JSON_DIRECTIVE: &str = "Your previous reply could not be used. \
Respond with JSON only: one JSON object exactly matching the output schema above, \
with every required field present. No prose, no markdown fences, no comments.";

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

fn study_label(ctx: &ProjectContext) -> String {
    ctx.study_type.as_str().replace('_', " ")
}

// =============================================================================
// Stage prompts
// =============================================================================

/// Stage 1: REFERENCE vs OPINION.
pub fn classify_question(question: &str, ctx: &ProjectContext) -> PromptInstance {
    let audience = ctx
        .target_audience
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("General population");
    let competitors = if ctx.competitive_set.is_empty() {
        String::new()
    } else {
        format!("\n- Competitive set: {}", ctx.competitive_set.join(", "))
    };

    let system = format!(
        r#"You are analyzing responses for a {study} study.

PROJECT CONTEXT:
- Study objective: {objective}
- Brand/Product: {brand}
- Target audience: {audience}
- Study phase: {phase}{competitors}

Classify each user question into exactly one of two types: "REFERENCE" or "OPINION".

Logic (on priority):
1. References
   - If the question asks for one single or list of concrete facts, brands, names, counts or an enumeration (even of one single term), label it "REFERENCE".
   - Triggers: asks which, what (is/are), name, tell me, list, how many, show me, brand, comes to mind.

2. Opinions
   - If the question expects a subjective response (judgment, preference, advice, impression, prediction), label it "OPINION".
   - Triggers: asks what you think, feel, believe, prefer, like, recommend, suggest, or your opinion.

Consider the project context to better understand the intent of each question.

Output:
Return a JSON object with:
- "question": the original text
- "type": either "REFERENCE" or "OPINION""#,
        study = study_label(ctx),
        objective = ctx.objective,
        brand = ctx.brand,
        phase = ctx.study_phase.as_str(),
    );

    PromptInstance {
        template_slug: "classify_question_v1",
        system,
        user: question.to_string(),
    }
}

/// Stage 2: sentiment-tagged codes from raw answers.
pub fn extract_codes(
    question: &str,
    answers: &[String],
    language: Language,
    ctx: &ProjectContext,
    max_codes: usize,
) -> PromptInstance {
    let system = format!(
        r#"Categorize open-ended responses into concise codes with sentiment.

Codes must be descriptive attributes (not nets), because they will later be grouped into broader nets.

Codes are for survey analysis. Minor semantic nuances between them add no value, so ensure codes are meaningful, distinct, and non-overlapping.

## Context
Question → {question}

## PROJECT CONTEXT
Study type: {study}
Objective: {objective}
Brand: {brand}

CONCEPTUAL FRAMEWORK:
{framework}

Generate codes that align with this framework while remaining grounded in actual responses.

## Steps

### 1. Extraction
- Identify main ideas from each answer
- Codes must consider the objective of the question.
- Express each as a phrase of 1–3 words, only first word capitalized.
- Codes must be semantically broad, not micro-fragmented.
- Codes must describe an attribute (e.g., clarity, variety, visibility), never a net label.
- Do not generate more than {max_codes} unique codes, but less is better if no more are really needed.

### 2. Normalization
- Merge obvious duplicates (case, whitespace, plural/singular) and similar codes.
- Each code must be unique after normalization.

### 3. Sentiment
- Assign Positive, Negative, or Neutral. (do not translate)
- Negation flips polarity.

## Language and Style
- **CRITICAL: All codes MUST be in {directive}**
- **Output codes in language locale:** {code}
- **Code format**: Natural phrases, first word capitalized
- **Proper spelling/accents** for target language (e.g., "Sabor único" not "Unique flavor")

## JSON Output Schema
- categories: array of objects:
  - name: canonical code
  - sentiment: Positive | Neutral | Negative (do not translate)"#,
        study = study_label(ctx),
        objective = ctx.objective,
        brand = ctx.brand,
        framework = conceptual_framework(ctx.study_type),
        directive = language.prompt_directive(),
        code = language.code(),
    );

    PromptInstance {
        template_slug: "extract_codes_v1",
        system,
        user: to_json(answers),
    }
}

/// Stage 3: collapse semantically overlapping codes.
pub fn normalize_codes(question: &str, codes: &[Code], max_codes: usize) -> PromptInstance {
    let system = format!(
        r#"Remove those open-ended response codes that semantically overlap with others.

## Context
Question → {question}

## Input Data Structure Expected
Array of codes with their sentiments

## Step

### 1. Semantics
- If two codes express a similar concept within the context of the question objective, keep only one.
- Always keep the most general, inclusive, and neutral version.
- Discard the more specific or redundant variants.
- Keep at max {max_codes} codes.
- Keep same code name and sentiment than input for the remaining list.

## JSON Output Schema
- categories: array of objects:
  - name: canonical code
  - sentiment: Positive | Neutral | Negative"#
    );

    PromptInstance {
        template_slug: "normalize_codes_v1",
        system,
        user: to_json(codes),
    }
}

/// Stage 4: partition codes into nets plus the fallback net.
pub fn generate_nets(
    question: &str,
    codes: &[Code],
    language: Language,
    ctx: &ProjectContext,
) -> PromptInstance {
    let templates = net_templates(ctx.study_type)
        .iter()
        .map(|t| format!("- {}: {}", t.net, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    let fallback = language.fallback_label();

    let system = format!(
        r#"## Context
Group open-ended response codes into broader thematic nets.
Nets must be neutral umbrella categories, not descriptive codes.

**Target language locale:** {code}
**Question:** {question}

RECOMMENDED NET STRUCTURE for {study}:
{templates}

RULES:
1. Use these nets as your PRIMARY structure, translated into the target language
2. You MAY create 1-2 additional nets ONLY if codes clearly don't fit existing ones
3. You MUST still include the "{fallback}" fallback net
4. Distribute codes across nets based on semantic fit

## Input Data Structure Expected
Array of normalized codes with their sentiments.

## Steps

### 1. Create fallback net
- Net name: "{fallback}"
  - Contains code: "{fallback}" with Neutral sentiment
- No other fallback nets.

### 2. Group Codes into Thematic Nets
- Create thematic nets plus the fallback net
- Nets must consider the objective of the question.
- The fallback must always exist but remain empty, except for a single placeholder code with Neutral sentiment.
- Group normalized codes by semantic similarity, not by surface form.
  - Each net should contain at least two codes whenever possible.
    - Avoid single-code nets unless no meaningful semantic fit exists.
    - Do not create vague or residual nets.
  - Nets must group codes that share a clear conceptual domain.
    - Do not combine unrelated topics.
    - Do not force a code into an irrelevant net.
  - Preserve all input codes, with their exact names.

- Net names must be neutral umbrella concepts:
  - Prefer two-word stable concepts.
  - One word is acceptable only if it is a strong, self-contained concept.
  - Never use descriptive phrases, adjectives, evaluative terms, or unrelated pairs joined by conjunctions like "and".
  - All names must be consistent in style and abstraction level.

## Language and Style
- **CRITICAL: All nets and codes MUST be in {directive}**
- Keep sentiments untranslated (always: Positive, Neutral, Negative)
- **Net names**: Broad, non-overlapping categories in {code}
- **Proper spelling/accents** for target language (e.g., "Conexión emocional" not "Emotional connection")

## Required JSON Output
- nets: array of objects (includes the fallback net):
  - net: net label
  - codes: array of objects:
    - code: canonical code
    - sentiment: Positive | Neutral | Negative
- Each code must appear at most once and never as a semantic duplicate."#,
        code = language.code(),
        study = study_label(ctx),
        directive = language.prompt_directive(),
    );

    PromptInstance {
        template_slug: "generate_nets_v1",
        system,
        user: to_json(codes),
    }
}

/// Stage 5: multi-label assignment of one batch of answers.
pub fn classify_answers(question: &str, answers: &[String], nets: &[Net]) -> PromptInstance {
    let fallback = nets
        .last()
        .map(|n| n.name.as_str())
        .unwrap_or("Uncategorized");

    let system = format!(
        r#"Classify each user answer into the provided **nets** and **codes**.

The phrases are responses to the question: "{question}"

---

## Rules
- One object per input answer, same order and count.
- Assign **ALL** nets/codes that the answer **meaningfully covers** (multi-label). No hard cap.
- Each answer must map to ≥1 net and ≥1 code.
- Each code must include sentiment.
- Use only input nets/codes; do not invent.
- If none apply, fallback to **{fallback} / {fallback}**.
- No extra text or fields beyond the schema.
- De-duplicate repeated nets/codes in the same answer.

---

## JSON Output Schema
- **answers**: array of objects:
  - **answer**: original response text
  - **nets**: array of objects:
    - **net**: net label
    - **codes**: array of objects:
      - **code**: assigned code
      - **sentiment**: Positive | Neutral | Negative

Available nets and codes:
{nets}"#,
        nets = to_json_pretty(nets),
    );

    PromptInstance {
        template_slug: "classify_answers_v1",
        system,
        user: to_json(answers),
    }
}

/// Optional paragraph summary of a question's answers.
pub fn summarize(question: &str, answers: &[String], language: Language) -> PromptInstance {
    let system = format!(
        r#"You are a data analyst. Summarize user responses to the question:
{question}

---

## Input Schema
- `answers`: array of string responses (may include empty or off-topic)

---

## Rules
- Produce a **single, concise paragraph** around 200-250 words (no lists, no quotes, no preamble).
- Weight by frequency: prioritize high-volume ideas; mention low-volume points only if they materially change interpretation.
- Focus on the **top ~5 ideas/patterns** after merging synonyms and near-duplicates.
- Reflect the overall **sentiment tilt** if apparent.
- Use calibrated quantifiers ("most", "many", "some", "few") unless exact shares are provided.
- Remove noise/off-topic content.
- Language: {directive}.

---

## JSON Output Schema
- `Summary`: array of strings, containing **one** string with all the summary text in index 0"#,
        directive = language.prompt_directive(),
    );

    PromptInstance {
        template_slug: "summarize_v1",
        system,
        user: to_json(answers),
    }
}

/// Three alternative groupings of the same codes, for analyst review.
pub fn net_options(
    question: &str,
    codes: &[Code],
    language: Language,
    ctx: &ProjectContext,
) -> PromptInstance {
    let system = format!(
        r#"You are an expert market researcher specializing in qualitative data analysis and thematic categorization.

Your task is to generate THREE DIFFERENT valid grouping options for organizing response codes into thematic nets.

Each option should represent a different analytical perspective:
- Option A: DETAILED grouping (4-6 nets), good for deep analysis
- Option B: SIMPLIFIED grouping (2-3 nets), good for executive summaries
- Option C: ALTERNATIVE perspective, a different way to group the themes

Guidelines:
- Each net must have a clear, descriptive name
- Each net should contain 2-10 codes
- Codes should be grouped by semantic similarity
- Each option must use ALL codes (no code left out), spelled exactly as given
- Use {directive} for all names and descriptions

Context:
Study Type: {study}
Brand: {brand}
Objective: {objective}

Output JSON with this structure:
{{
  "options": [
    {{
      "id": "option_a",
      "name": "Detailed Grouping",
      "description": "Deep analysis with 4-6 thematic groups",
      "netCount": 5,
      "nets": [
        {{ "net": "Net Name", "description": "What this group represents", "codes": ["code1", "code2"] }}
      ]
    }}
  ]
}}"#,
        directive = language.prompt_directive(),
        study = ctx.study_type.as_str(),
        brand = ctx.brand,
        objective = ctx.objective,
    );

    let code_list = codes
        .iter()
        .map(|c| format!("- {} ({})", c.name, c.sentiment))
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!(
        "Question: \"{question}\"\n\nExtracted codes:\n{code_list}\n\n\
         Generate 3 different valid grouping options for these codes into thematic nets."
    );

    PromptInstance {
        template_slug: "net_options_v1",
        system,
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StudyType;
    use crate::types::{CodeLabel, Sentiment, StudyPhase};

    fn ctx() -> ProjectContext {
        ProjectContext {
            study_type: StudyType::ProductFeedback,
            study_phase: StudyPhase::Validation,
            brand: "Acme".into(),
            objective: "Understand taste perception".into(),
            target_audience: None,
            competitive_set: vec![],
        }
    }

    #[test]
    fn classify_question_embeds_context_and_default_audience() {
        let p = classify_question("¿Qué opinas del sabor?", &ctx());
        assert!(p.system.contains("product feedback study"));
        assert!(p.system.contains("Target audience: General population"));
        assert!(p.system.contains("Study phase: validation"));
        assert_eq!(p.user, "¿Qué opinas del sabor?");
    }

    #[test]
    fn extract_codes_forces_language_and_framework() {
        let answers = vec!["Muy rico".to_string()];
        let p = extract_codes("Q", &answers, Language::Es, &ctx(), 30);
        assert!(p.system.contains("SPANISH (español)"));
        assert!(p.system.contains("Sensory experience"));
        assert!(p.system.contains("more than 30 unique codes"));
        assert_eq!(p.user, r#"["Muy rico"]"#);
    }

    #[test]
    fn generate_nets_lists_templates_and_localized_fallback() {
        let codes = vec![Code::new("Buen sabor", Sentiment::Positive)];
        let p = generate_nets("Q", &codes, Language::Es, &ctx());
        assert!(p.system.contains("- Price & Value: Cost perception, value for money"));
        assert!(p.system.contains("\"Sin categorizar\""));
        assert!(p.user.contains("\"name\":\"Buen sabor\""));
    }

    #[test]
    fn classify_answers_uses_last_net_as_fallback_hint() {
        let nets = vec![
            Net::new("Sabor", vec![CodeLabel::new("Buen sabor", Sentiment::Positive)]),
            Net::new(
                "Sin categorizar",
                vec![CodeLabel::new("Sin categorizar", Sentiment::Neutral)],
            ),
        ];
        let p = classify_answers("Q", &["a".to_string()], &nets);
        assert!(p.system.contains("**Sin categorizar / Sin categorizar**"));
        assert!(p.system.contains("\"net\": \"Sabor\""));
    }

    #[test]
    fn directive_is_appended_to_system_only() {
        let p = normalize_codes("Q", &[], 15);
        let strict = p.with_directive(STRICT_JSON_DIRECTIVE);
        assert!(strict.system.ends_with(STRICT_JSON_DIRECTIVE));
        assert_eq!(strict.user, p.user);
        assert_eq!(strict.to_messages().len(), 2);
    }
}
