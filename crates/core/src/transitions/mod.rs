pub mod catalog;
pub mod evaluator;

pub use catalog::{RuleCatalog, SavedRule};
pub use evaluator::{audit_rule_set, MatchedRule, RuleAmbiguity, TransitionEvaluator};

use serde::{Deserialize, Serialize};

/// What to do when two or more active rules tie at the top priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Lowest rule id wins; the tie is logged.
    #[default]
    TieBreak,
    Reject,
}

/// What to do when no active rule matches a (management type, state) pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    #[default]
    NoChange,
    Reject,
}

impl std::str::FromStr for AmbiguityPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tie_break" => Ok(Self::TieBreak),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unsupported ambiguity policy `{other}` (expected tie_break|reject)")),
        }
    }
}

impl std::str::FromStr for UnmatchedPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "no_change" => Ok(Self::NoChange),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unsupported unmatched policy `{other}` (expected no_change|reject)")),
        }
    }
}
