use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use crate::domain::rule::{RuleId, TransitionRule};
use crate::domain::state::{DebtStateId, ManagementTypeId};
use crate::errors::DomainError;
use crate::transitions::AmbiguityPolicy;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub rule: TransitionRule,
    pub origin_state_id: DebtStateId,
    pub destination_state_id: DebtStateId,
    /// Other active rules that matched at the same priority and lost on id.
    pub tied_rule_ids: Vec<RuleId>,
}

impl MatchedRule {
    pub fn changes_state(&self) -> bool {
        self.origin_state_id != self.destination_state_id
    }

    /// A rule only gates a move; a rule that keeps the debt in place never
    /// needs a supervisor.
    pub fn requires_authorization(&self) -> bool {
        self.rule.requires_authorization && self.changes_state()
    }

    pub fn is_ambiguous(&self) -> bool {
        !self.tied_rule_ids.is_empty()
    }
}

/// Selects the transition rule for a (management type, current state) pair.
///
/// Candidates are active rules of the management type whose origin is unset
/// or equal to the current state. The highest `priority` wins and equal
/// priorities fall back to the lowest rule id, so the result never depends
/// on the order rules were stored in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionEvaluator {
    ambiguity: AmbiguityPolicy,
}

impl TransitionEvaluator {
    pub fn new(ambiguity: AmbiguityPolicy) -> Self {
        Self { ambiguity }
    }

    pub fn ambiguity_policy(&self) -> AmbiguityPolicy {
        self.ambiguity
    }

    pub fn evaluate(
        &self,
        rules: &[TransitionRule],
        management_type_id: &ManagementTypeId,
        current_state_id: &DebtStateId,
    ) -> Result<Option<MatchedRule>, DomainError> {
        let Some(matched) = select_rule(rules, management_type_id, current_state_id) else {
            return Ok(None);
        };

        if matched.is_ambiguous() {
            let tied = matched.tied_rule_ids.iter().map(ToString::to_string).collect::<Vec<_>>();
            warn!(
                event_name = "transition.rule_ambiguous",
                management_type_id = %management_type_id,
                state_id = %current_state_id,
                winning_rule_id = %matched.rule.id,
                tied_rule_ids = %tied.join(","),
                priority = matched.rule.priority,
                "multiple active transition rules share the top priority"
            );

            if self.ambiguity == AmbiguityPolicy::Reject {
                return Err(DomainError::Conflict(format!(
                    "ambiguous transition rules for management type `{management_type_id}` in state `{current_state_id}`: rule {} ties with [{}] at priority {}",
                    matched.rule.id,
                    tied.join(", "),
                    matched.rule.priority
                )));
            }
        }

        Ok(Some(matched))
    }
}

fn select_rule(
    rules: &[TransitionRule],
    management_type_id: &ManagementTypeId,
    current_state_id: &DebtStateId,
) -> Option<MatchedRule> {
    let mut candidates = rules
        .iter()
        .filter(|rule| rule.matches(management_type_id, current_state_id))
        .collect::<Vec<_>>();

    candidates.sort_by(|left, right| {
        right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id))
    });

    let (winner, rest) = candidates.split_first()?;
    let tied_rule_ids = rest
        .iter()
        .take_while(|rule| rule.priority == winner.priority)
        .map(|rule| rule.id)
        .collect();

    Some(MatchedRule {
        rule: (*winner).clone(),
        origin_state_id: current_state_id.clone(),
        destination_state_id: winner.destination_from(current_state_id),
        tied_rule_ids,
    })
}

/// A (management type, state) pair for which evaluation has to tie-break.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuleAmbiguity {
    pub management_type_id: ManagementTypeId,
    /// `None` when the tie is between rules that apply to any state.
    pub state_id: Option<DebtStateId>,
    pub priority: i32,
    pub rule_ids: Vec<RuleId>,
}

/// Reports every place where the active rule set relies on the id tie-break.
///
/// Each explicit origin is checked together with the any-origin rules of the
/// same management type, since both compete for a debt in that state.
pub fn audit_rule_set(rules: &[TransitionRule]) -> Vec<RuleAmbiguity> {
    let mut origins: BTreeMap<&ManagementTypeId, BTreeSet<Option<&DebtStateId>>> = BTreeMap::new();
    for rule in rules.iter().filter(|rule| rule.active) {
        let entry = origins.entry(&rule.management_type_id).or_default();
        entry.insert(None);
        if let Some(origin) = rule.origin_state_id.as_ref() {
            entry.insert(Some(origin));
        }
    }

    let mut findings = Vec::new();
    for (management_type_id, states) in origins {
        for state in states {
            let mut competing = rules
                .iter()
                .filter(|rule| rule.active && &rule.management_type_id == management_type_id)
                .filter(|rule| match (state, rule.origin_state_id.as_ref()) {
                    (_, None) => true,
                    (Some(state), Some(origin)) => origin == state,
                    (None, Some(_)) => false,
                })
                .collect::<Vec<_>>();
            let Some(top) = competing.iter().map(|rule| rule.priority).max() else {
                continue;
            };
            competing.retain(|rule| rule.priority == top);
            if competing.len() < 2 {
                continue;
            }

            let mut rule_ids = competing.iter().map(|rule| rule.id).collect::<Vec<_>>();
            rule_ids.sort();
            findings.push(RuleAmbiguity {
                management_type_id: management_type_id.clone(),
                state_id: state.cloned(),
                priority: top,
                rule_ids,
            });
        }
    }

    findings
}
