//! Static study-type catalog: suggested net skeletons and the conceptual
//! frameworks that steer code extraction.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyType {
    CommercialEvaluation,
    ProductFeedback,
    ConceptTest,
    BrandHealth,
    UxResearch,
    CustomerSatisfaction,
    #[default]
    Custom,
}

impl StudyType {
    pub const ALL: [StudyType; 7] = [
        StudyType::CommercialEvaluation,
        StudyType::ProductFeedback,
        StudyType::ConceptTest,
        StudyType::BrandHealth,
        StudyType::UxResearch,
        StudyType::CustomerSatisfaction,
        StudyType::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StudyType::CommercialEvaluation => "commercial_evaluation",
            StudyType::ProductFeedback => "product_feedback",
            StudyType::ConceptTest => "concept_test",
            StudyType::BrandHealth => "brand_health",
            StudyType::UxResearch => "ux_research",
            StudyType::CustomerSatisfaction => "customer_satisfaction",
            StudyType::Custom => "custom",
        }
    }
}

impl fmt::Display for StudyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A suggested net with a short description of what it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetTemplate {
    pub net: &'static str,
    pub description: &'static str,
}

const fn t(net: &'static str, description: &'static str) -> NetTemplate {
    NetTemplate { net, description }
}

const COMMERCIAL_EVALUATION: &[NetTemplate] = &[
    t("Message & Communication", "Clarity, understanding, information"),
    t("Emotional Response", "Feelings, reactions, engagement"),
    t("Brand Perception", "Brand fit, recall, credibility"),
    t("Purchase Intent", "Motivation, barriers, likelihood"),
    t("Creative Execution", "Visuals, music, characters, storytelling"),
];

const PRODUCT_FEEDBACK: &[NetTemplate] = &[
    t("Functional Performance", "Efficacy, quality, durability"),
    t("Sensory Experience", "Taste, smell, texture, appearance"),
    t("Price & Value", "Cost perception, value for money"),
    t("Packaging & Presentation", "Design, convenience, info"),
    t("Usage & Context", "Occasions, frequency, barriers"),
];

const CONCEPT_TEST: &[NetTemplate] = &[
    t("Relevance & Need", "Personal relevance, solves a problem"),
    t("Uniqueness", "Differentiation, innovation, newness"),
    t("Believability", "Credibility, trust, feasibility"),
    t("Appeal", "Liking, interest, attraction"),
    t("Purchase Intent", "Willingness to buy, trial intent"),
];

const BRAND_HEALTH: &[NetTemplate] = &[
    t("Awareness & Familiarity", "Knowledge, recognition, experience"),
    t("Brand Image", "Personality, attributes, associations"),
    t("Brand Equity", "Trust, quality perception, preference"),
    t("Loyalty & Advocacy", "Repeat purchase, recommendation"),
    t("Competitive Position", "Comparison, advantages, disadvantages"),
];

const UX_RESEARCH: &[NetTemplate] = &[
    t("Usability", "Ease of use, navigation, learning curve"),
    t("Functionality", "Features, capabilities, performance"),
    t("Visual Design", "Aesthetics, layout, clarity"),
    t("User Satisfaction", "Enjoyment, frustration, expectations"),
    t("Pain Points", "Issues, errors, barriers"),
];

const CUSTOMER_SATISFACTION: &[NetTemplate] = &[
    t("Product/Service Quality", "Performance, reliability, features"),
    t("Customer Service", "Support, responsiveness, helpfulness"),
    t("Value for Money", "Pricing, worth, affordability"),
    t("Experience & Convenience", "Process, ease, accessibility"),
    t("Loyalty & Recommendation", "Return intent, word-of-mouth"),
];

const CUSTOM: &[NetTemplate] = &[
    t("Theme 1", "Custom theme 1"),
    t("Theme 2", "Custom theme 2"),
    t("Theme 3", "Custom theme 3"),
];

/// Suggested net skeleton for a study type.
pub fn net_templates(study: StudyType) -> &'static [NetTemplate] {
    match study {
        StudyType::CommercialEvaluation => COMMERCIAL_EVALUATION,
        StudyType::ProductFeedback => PRODUCT_FEEDBACK,
        StudyType::ConceptTest => CONCEPT_TEST,
        StudyType::BrandHealth => BRAND_HEALTH,
        StudyType::UxResearch => UX_RESEARCH,
        StudyType::CustomerSatisfaction => CUSTOMER_SATISFACTION,
        StudyType::Custom => CUSTOM,
    }
}

/// Evaluation dimensions the extraction prompt asks the oracle to consider.
pub fn conceptual_framework(study: StudyType) -> &'static str {
    match study {
        StudyType::CommercialEvaluation => {
            "Consider standard advertising effectiveness dimensions:\n\
             - Message clarity & comprehension\n\
             - Emotional response & engagement\n\
             - Brand linkage & recall\n\
             - Purchase intent & action\n\
             - Credibility & trust"
        }
        StudyType::ProductFeedback => {
            "Consider product evaluation dimensions:\n\
             - Functional performance & quality\n\
             - Sensory experience (taste, smell, texture, etc.)\n\
             - Value for money\n\
             - Packaging & convenience\n\
             - Usage context & occasions"
        }
        StudyType::ConceptTest => {
            "Consider concept evaluation dimensions:\n\
             - Relevance & need (solves a problem)\n\
             - Uniqueness & differentiation\n\
             - Believability & credibility\n\
             - Appeal & interest\n\
             - Purchase intent"
        }
        StudyType::BrandHealth => {
            "Consider brand health dimensions:\n\
             - Awareness & familiarity\n\
             - Brand image & personality\n\
             - Brand equity & trust\n\
             - Loyalty & advocacy\n\
             - Competitive positioning"
        }
        StudyType::UxResearch => {
            "Consider UX evaluation dimensions:\n\
             - Usability & ease of use\n\
             - Functionality & features\n\
             - Visual design & aesthetics\n\
             - User satisfaction\n\
             - Pain points & barriers"
        }
        StudyType::CustomerSatisfaction => {
            "Consider satisfaction dimensions:\n\
             - Product/service quality\n\
             - Customer service & support\n\
             - Value for money\n\
             - Experience & convenience\n\
             - Loyalty & recommendation likelihood"
        }
        StudyType::Custom => "No specific framework - use general thematic analysis",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_study_type_has_templates() {
        for study in StudyType::ALL {
            let templates = net_templates(study);
            assert!(templates.len() >= 3, "{study} has too few templates");
            assert!(!conceptual_framework(study).is_empty());
        }
        assert_eq!(net_templates(StudyType::ProductFeedback).len(), 5);
    }

    #[test]
    fn study_type_serializes_snake_case() {
        let json = serde_json::to_string(&StudyType::UxResearch).unwrap();
        assert_eq!(json, "\"ux_research\"");
        let parsed: StudyType = serde_json::from_str("\"brand_health\"").unwrap();
        assert_eq!(parsed, StudyType::BrandHealth);
    }
}
