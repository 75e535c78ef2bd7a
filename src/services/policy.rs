//! Prompt safety filter.
//!
//! Every prompt is checked against fixed blocklist categories before a
//! generation request is admitted. Prompts that pass are augmented with two
//! mandatory clauses that the caller cannot override or remove.

use std::sync::Arc;

use crate::models::policy::{EffectivePrompts, PolicyDecision, RejectionReason};

/// Appended to every positive prompt.
pub const ADULT_AGE_CLAUSE: &str =
    "adult subject, clearly over 21 years old, mature adult facial features and proportions";

/// Appended to every negative prompt.
pub const REAL_PERSON_BLOCKER_CLAUSE: &str = "celebrity, famous person, actor, actress, \
influencer, model, real person, known face, instagram face, tiktok face, beauty filter, \
airbrushed skin, plastic skin, anime, illustration, painting, cgi, 3d render, teen, teenage, \
young-looking, childlike, youthful face, school uniform, student, cosplay, distorted face, \
extra fingers, deformed eyes";

const CELEBRITY_TERMS: &[&str] = &[
    "taylor swift",
    "scarlett johansson",
    "emma watson",
    "jennifer lawrence",
    "megan fox",
    "kim kardashian",
    "ariana grande",
    "selena gomez",
    "beyonce",
    "rihanna",
    "angelina jolie",
    "margot robbie",
    "gal gadot",
    "zendaya",
    "billie eilish",
    "actress",
    "actor",
    "famous model",
    "influencer",
    "celebrity",
    "famous person",
];

const AGE_REGRESSION_TERMS: &[&str] = &[
    "younger",
    "teen",
    "teens",
    "teenage",
    "teenager",
    "childlike",
    "loli",
    "shota",
];

const UNDERAGE_CONTEXT_TERMS: &[&str] = &[
    "underage",
    "school",
    "student",
    "school uniform",
    "schoolgirl",
    "schoolboy",
    "cheerleader uniform",
    "college girl uniform",
];

const IDENTITY_TERMS: &[&str] = &[
    "face swap",
    "faceswap",
    "deepfake",
    "my face",
    "her face",
    "his face",
    "real photo of",
    "look like",
    "looks like",
    "resemble",
    "resembles",
    "similar to",
    "based on",
    "inspired by",
];

const ILLEGAL_TERMS: &[&str] = &[
    "child",
    "minor",
    "kid",
    "forced",
    "non-consensual",
    "nonconsensual",
    "non consensual",
    "rape",
];

/// One blocklist category. Terms are stored normalized.
#[derive(Debug, Clone)]
pub struct BlockCategory {
    pub reason: RejectionReason,
    terms: Vec<String>,
}

impl BlockCategory {
    fn new<I, S>(reason: RejectionReason, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| normalize(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        Self { reason, terms }
    }

    fn matches(&self, normalized: &str) -> bool {
        self.terms.iter().any(|term| contains_term(normalized, term))
    }
}

/// Immutable safety configuration, built once at startup and shared.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// When false the blocklist is skipped. Empty prompts are still refused
    /// and both clauses are still applied.
    pub enabled: bool,
    categories: Vec<BlockCategory>,
    pub adult_clause: String,
    pub blocker_clause: String,
}

impl PolicyConfig {
    /// Built-in categories, checked in this order. `extra_terms` are refused
    /// as `other-blocked-term`.
    pub fn builtin(enabled: bool, extra_terms: Vec<String>) -> Self {
        let categories = vec![
            BlockCategory::new(RejectionReason::CelebrityReference, CELEBRITY_TERMS),
            BlockCategory::new(RejectionReason::AgeRegression, AGE_REGRESSION_TERMS),
            BlockCategory::new(RejectionReason::UnderageContext, UNDERAGE_CONTEXT_TERMS),
            BlockCategory::new(RejectionReason::IdentityImpersonation, IDENTITY_TERMS),
            BlockCategory::new(RejectionReason::IllegalContent, ILLEGAL_TERMS),
            BlockCategory::new(RejectionReason::OtherBlockedTerm, extra_terms),
        ];

        Self {
            enabled,
            categories,
            adult_clause: ADULT_AGE_CLAUSE.to_string(),
            blocker_clause: REAL_PERSON_BLOCKER_CLAUSE.to_string(),
        }
    }

    /// Operator-supplied terms in the `other-blocked-term` category.
    pub fn extra_terms(&self) -> &[String] {
        self.categories
            .iter()
            .find(|c| c.reason == RejectionReason::OtherBlockedTerm)
            .map(|c| c.terms.as_slice())
            .unwrap_or(&[])
    }
}

/// Classifies and augments prompts. Stateless apart from its shared config.
#[derive(Debug, Clone)]
pub struct PromptPolicyEngine {
    config: Arc<PolicyConfig>,
}

impl PromptPolicyEngine {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide whether a prompt may be rendered and, if so, build the prompts
    /// actually sent to the backend.
    ///
    /// Only the positive prompt is screened: negative prompts routinely name
    /// the very things they exclude.
    pub fn evaluate(&self, prompt: &str, negative_prompt: Option<&str>) -> PolicyDecision {
        let normalized = normalize(prompt);
        if normalized.is_empty() {
            return PolicyDecision::Rejected(RejectionReason::OtherBlockedTerm);
        }

        if self.config.enabled {
            if let Some(category) = self.config.categories.iter().find(|c| c.matches(&normalized)) {
                return PolicyDecision::Rejected(category.reason);
            }
        }

        PolicyDecision::Allowed(EffectivePrompts {
            positive: append_clause(prompt, &self.config.adult_clause),
            negative: append_clause(negative_prompt.unwrap_or_default(), &self.config.blocker_clause),
        })
    }
}

/// Case-fold and collapse all whitespace runs to single spaces.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Substring match anchored on word boundaries at both ends.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// `text, clause`, with any copies of `clause` already in `text` removed so
/// the result carries it exactly once.
fn append_clause(text: &str, clause: &str) -> String {
    let user_part = strip_clause(text, clause);
    if user_part.is_empty() {
        clause.to_string()
    } else {
        format!("{user_part}, {clause}")
    }
}

fn strip_clause(text: &str, clause: &str) -> String {
    let needle = clause.to_ascii_lowercase();
    let mut current = text.trim().to_string();
    let mut stripped = false;

    // ASCII lowercasing keeps byte offsets aligned with the original text.
    while let Some(pos) = current.to_ascii_lowercase().find(&needle) {
        current.replace_range(pos..pos + needle.len(), "");
        stripped = true;
    }

    if !stripped {
        return current;
    }

    current
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
