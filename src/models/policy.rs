use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Why a prompt was refused by the safety filter.
///
/// The kebab-case names are part of the public API: they appear in error
/// bodies, audit entries, and logs.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, AsRefStr, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RejectionReason {
    CelebrityReference,
    AgeRegression,
    UnderageContext,
    IdentityImpersonation,
    IllegalContent,
    OtherBlockedTerm,
}

/// Prompts as they are sent to the backend, mandatory clauses included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectivePrompts {
    pub positive: String,
    pub negative: String,
}

/// Result of running a prompt through the safety filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed(EffectivePrompts),
    Rejected(RejectionReason),
}

/// Outcome column of an audit entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyOutcome {
    Allowed,
    Rejected,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed(_))
    }
}
