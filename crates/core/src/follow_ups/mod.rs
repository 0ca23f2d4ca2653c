//! Records follow-up interactions and routes their consequences.
//!
//! The follow-up row is written for every accepted submission. What happens
//! to each selected debt depends on the transition rule matched for its
//! current state: an immediate move, a pending authorization request, or
//! nothing. The follow-up and all per-debt consequences are committed as one
//! store transaction.

pub mod validation;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::{AccessPolicy, Actor, Operation};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::authorization::{AuthorizationRequest, AuthorizationRequestId, AuthorizationStatus};
use crate::domain::debt::{Debt, DebtId, PersonaId};
use crate::domain::follow_up::{FollowUp, FollowUpId};
use crate::domain::history::{DebtStateChange, StateChangeCause};
use crate::domain::rule::RuleId;
use crate::domain::state::{DebtStateId, ManagementTypeId};
use crate::errors::{ApplicationError, DomainError};
use crate::store::{
    AuthorizationFilter, CollectionsStore, FollowUpCommit, GuardedStateChange, StoreError,
};
use crate::transitions::{MatchedRule, TransitionEvaluator, UnmatchedPolicy};

pub use validation::{validate_draft, ValidatedDraft, DEFAULT_MAX_OBSERVATION_CHARS};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpDraft {
    pub persona_id: PersonaId,
    pub debt_ids: Vec<DebtId>,
    pub management_type_id: ManagementTypeId,
    pub observation: String,
    pub next_follow_up_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DebtEffect {
    Applied,
    AuthorizationRequested { request_id: AuthorizationRequestId },
    /// The rule needs authorization but the debt already waits on one.
    AlreadyPending { request_id: AuthorizationRequestId },
    Unchanged,
    NoRule,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DebtOutcome {
    pub debt_id: DebtId,
    pub rule_id: Option<RuleId>,
    pub from_state_id: DebtStateId,
    pub to_state_id: DebtStateId,
    pub ui_message: Option<String>,
    pub effect: DebtEffect,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FollowUpReceipt {
    pub follow_up: FollowUp,
    pub outcomes: Vec<DebtOutcome>,
}

/// Result of evaluating a management type against a state without recording anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransitionPreview {
    pub management_type_id: ManagementTypeId,
    pub state_id: DebtStateId,
    pub matched: Option<MatchedRule>,
    pub requires_authorization: bool,
}

pub struct FollowUpRecorder {
    store: Arc<dyn CollectionsStore>,
    audit: Arc<dyn AuditSink>,
    policy: AccessPolicy,
    evaluator: TransitionEvaluator,
    unmatched: UnmatchedPolicy,
    max_observation_chars: usize,
    default_supervisor_id: Option<String>,
}

impl FollowUpRecorder {
    pub fn new(store: Arc<dyn CollectionsStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            policy: AccessPolicy,
            evaluator: TransitionEvaluator::default(),
            unmatched: UnmatchedPolicy::default(),
            max_observation_chars: DEFAULT_MAX_OBSERVATION_CHARS,
            default_supervisor_id: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: TransitionEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_unmatched_policy(mut self, unmatched: UnmatchedPolicy) -> Self {
        self.unmatched = unmatched;
        self
    }

    pub fn with_max_observation_chars(mut self, max_observation_chars: usize) -> Self {
        self.max_observation_chars = max_observation_chars;
        self
    }

    pub fn with_default_supervisor(mut self, supervisor_id: Option<String>) -> Self {
        self.default_supervisor_id = supervisor_id;
        self
    }

    pub async fn record(
        &self,
        actor: &Actor,
        context: &AuditContext,
        draft: FollowUpDraft,
    ) -> Result<FollowUpReceipt, ApplicationError> {
        self.record_at(actor, context, draft, Utc::now()).await
    }

    pub async fn record_at(
        &self,
        actor: &Actor,
        context: &AuditContext,
        draft: FollowUpDraft,
        now: DateTime<Utc>,
    ) -> Result<FollowUpReceipt, ApplicationError> {
        self.policy.authorize(actor, Operation::RecordFollowUp)?;

        let draft = match validate_draft(draft, now.date_naive(), self.max_observation_chars) {
            Ok(draft) => draft,
            Err(error) => {
                self.emit_rejected(context, &error);
                return Err(error.into());
            }
        };

        match self.store.management_type(&draft.management_type_id).await? {
            Some(management_type) if management_type.active => {}
            Some(_) => {
                let error = DomainError::field(
                    "managementTypeId",
                    format!("management type `{}` is inactive", draft.management_type_id),
                );
                self.emit_rejected(context, &error);
                return Err(error.into());
            }
            None => {
                let error = DomainError::field(
                    "managementTypeId",
                    format!("unknown management type `{}`", draft.management_type_id),
                );
                self.emit_rejected(context, &error);
                return Err(error.into());
            }
        }

        let debts = self.load_debts(&draft).await?;
        let rules = self.store.active_rules(&draft.management_type_id).await?;

        let mut by_state: BTreeMap<DebtStateId, Option<MatchedRule>> = BTreeMap::new();
        for debt in &debts {
            if by_state.contains_key(&debt.state_id) {
                continue;
            }
            let matched =
                self.evaluator.evaluate(&rules, &draft.management_type_id, &debt.state_id)?;
            if matched.is_none() {
                self.handle_unmatched(context, &draft.management_type_id, &debt.state_id)?;
            }
            by_state.insert(debt.state_id.clone(), matched);
        }

        let follow_up = FollowUp {
            id: FollowUpId::generate(),
            persona_id: draft.persona_id.clone(),
            manager_id: actor.id.clone(),
            management_type_id: draft.management_type_id.clone(),
            debt_ids: draft.debt_ids.clone(),
            observation: draft.observation.clone(),
            next_follow_up_date: draft.next_follow_up_date,
            created_at: now,
        };

        let mut outcomes = Vec::with_capacity(debts.len());
        let mut state_changes = Vec::new();
        let mut authorization_requests = Vec::new();

        for debt in &debts {
            let matched = by_state.get(&debt.state_id).cloned().flatten();
            let Some(matched) = matched else {
                outcomes.push(DebtOutcome {
                    debt_id: debt.id.clone(),
                    rule_id: None,
                    from_state_id: debt.state_id.clone(),
                    to_state_id: debt.state_id.clone(),
                    ui_message: None,
                    effect: DebtEffect::NoRule,
                });
                continue;
            };

            let effect = if !matched.changes_state() {
                DebtEffect::Unchanged
            } else if matched.requires_authorization() {
                match self.pending_request_for(&debt.id).await? {
                    Some(existing) => DebtEffect::AlreadyPending { request_id: existing },
                    None => {
                        let request = AuthorizationRequest::pending(
                            debt.id.clone(),
                            debt.state_id.clone(),
                            matched.destination_state_id.clone(),
                            actor.id.clone(),
                            follow_up.observation.clone(),
                            Some(follow_up.id.clone()),
                            Some(matched.rule.id),
                            now,
                        )
                        .with_supervisor(self.default_supervisor_id.clone());
                        let request_id = request.id.clone();
                        authorization_requests.push(request);
                        DebtEffect::AuthorizationRequested { request_id }
                    }
                }
            } else {
                state_changes.push(GuardedStateChange {
                    expected_state_id: debt.state_id.clone(),
                    change: DebtStateChange {
                        debt_id: debt.id.clone(),
                        from_state_id: debt.state_id.clone(),
                        to_state_id: matched.destination_state_id.clone(),
                        cause: StateChangeCause::Rule,
                        follow_up_id: Some(follow_up.id.clone()),
                        authorization_request_id: None,
                        changed_by: actor.id.clone(),
                        changed_at: now,
                    },
                });
                DebtEffect::Applied
            };

            outcomes.push(DebtOutcome {
                debt_id: debt.id.clone(),
                rule_id: Some(matched.rule.id),
                from_state_id: debt.state_id.clone(),
                to_state_id: matched.destination_state_id.clone(),
                ui_message: Some(matched.rule.ui_message.clone()),
                effect,
            });
        }

        let follow_up = self
            .store
            .commit_follow_up(FollowUpCommit { follow_up, state_changes, authorization_requests })
            .await
            .map_err(|error| {
                if let StoreError::Conflict(message) = &error {
                    warn!(
                        event_name = "follow_up.commit_conflict",
                        correlation_id = %context.correlation_id,
                        persona_id = %draft.persona_id,
                        reason = %message,
                        "follow-up lost a concurrent write and was not recorded"
                    );
                }
                error
            })?;

        self.emit_recorded(context, &follow_up, &outcomes);
        info!(
            event_name = "follow_up.recorded",
            correlation_id = %context.correlation_id,
            follow_up_id = %follow_up.id.0,
            persona_id = %follow_up.persona_id,
            management_type_id = %follow_up.management_type_id,
            debt_count = follow_up.debt_ids.len(),
            "follow-up recorded"
        );

        Ok(FollowUpReceipt { follow_up, outcomes })
    }

    pub async fn preview(
        &self,
        actor: &Actor,
        management_type_id: &ManagementTypeId,
        state_id: &DebtStateId,
    ) -> Result<TransitionPreview, ApplicationError> {
        self.policy.authorize(actor, Operation::PreviewTransition)?;

        let rules = self.store.active_rules(management_type_id).await?;
        let matched = self.evaluator.evaluate(&rules, management_type_id, state_id)?;
        let requires_authorization =
            matched.as_ref().map(MatchedRule::requires_authorization).unwrap_or(false);

        Ok(TransitionPreview {
            management_type_id: management_type_id.clone(),
            state_id: state_id.clone(),
            matched,
            requires_authorization,
        })
    }

    pub async fn history(
        &self,
        actor: &Actor,
        debt_id: &DebtId,
    ) -> Result<Vec<FollowUp>, ApplicationError> {
        self.policy.authorize(actor, Operation::ViewFollowUps)?;

        if self.store.debt(debt_id).await?.is_none() {
            return Err(DomainError::not_found("debt", debt_id.0.clone()).into());
        }
        Ok(self.store.follow_ups_for_debt(debt_id).await?)
    }

    async fn load_debts(&self, draft: &ValidatedDraft) -> Result<Vec<Debt>, ApplicationError> {
        let mut debts = Vec::with_capacity(draft.debt_ids.len());
        for debt_id in &draft.debt_ids {
            let debt = self
                .store
                .debt(debt_id)
                .await?
                .ok_or_else(|| DomainError::not_found("debt", debt_id.0.clone()))?;
            if debt.persona_id != draft.persona_id {
                return Err(DomainError::field(
                    "debtIds",
                    format!("debt `{}` does not belong to persona `{}`", debt.id, draft.persona_id),
                )
                .into());
            }
            debts.push(debt);
        }
        Ok(debts)
    }

    async fn pending_request_for(
        &self,
        debt_id: &DebtId,
    ) -> Result<Option<AuthorizationRequestId>, ApplicationError> {
        let pending = self
            .store
            .list_authorization_requests(&AuthorizationFilter {
                status: Some(AuthorizationStatus::Pending),
                debt_id: Some(debt_id.clone()),
                limit: Some(1),
                ..AuthorizationFilter::default()
            })
            .await?;
        Ok(pending.into_iter().next().map(|request| request.id))
    }

    fn handle_unmatched(
        &self,
        context: &AuditContext,
        management_type_id: &ManagementTypeId,
        state_id: &DebtStateId,
    ) -> Result<(), DomainError> {
        match self.unmatched {
            UnmatchedPolicy::NoChange => {
                info!(
                    event_name = "transition.no_rule",
                    correlation_id = %context.correlation_id,
                    management_type_id = %management_type_id,
                    state_id = %state_id,
                    "no transition rule matched; debt state left unchanged"
                );
                Ok(())
            }
            UnmatchedPolicy::Reject => {
                warn!(
                    event_name = "transition.no_rule_rejected",
                    correlation_id = %context.correlation_id,
                    management_type_id = %management_type_id,
                    state_id = %state_id,
                    "no transition rule matched and unmatched lookups are rejected"
                );
                Err(DomainError::Conflict(format!(
                    "no active transition rule for management type `{management_type_id}` in state `{state_id}`"
                )))
            }
        }
    }

    fn emit_rejected(&self, context: &AuditContext, error: &DomainError) {
        self.audit.emit(
            AuditEvent::from_context(
                context,
                None,
                "follow_up.rejected",
                AuditCategory::FollowUp,
                AuditOutcome::Rejected,
            )
            .with_metadata("error", error.to_string()),
        );
    }

    fn emit_recorded(&self, context: &AuditContext, follow_up: &FollowUp, outcomes: &[DebtOutcome]) {
        self.audit.emit(
            AuditEvent::from_context(
                context,
                None,
                "follow_up.recorded",
                AuditCategory::FollowUp,
                AuditOutcome::Success,
            )
            .with_metadata("follow_up_id", follow_up.id.0.clone())
            .with_metadata("management_type_id", follow_up.management_type_id.0.clone())
            .with_metadata("debt_count", follow_up.debt_ids.len().to_string()),
        );

        for outcome in outcomes {
            let (event_type, category) = match &outcome.effect {
                DebtEffect::Applied => ("transition.applied", AuditCategory::Transition),
                DebtEffect::AuthorizationRequested { .. } => {
                    ("authorization.requested", AuditCategory::Authorization)
                }
                DebtEffect::AlreadyPending { .. } => {
                    ("authorization.already_pending", AuditCategory::Authorization)
                }
                DebtEffect::Unchanged => ("transition.unchanged", AuditCategory::Transition),
                DebtEffect::NoRule => ("transition.no_rule", AuditCategory::Transition),
            };

            let mut event = AuditEvent::from_context(
                context,
                Some(outcome.debt_id.clone()),
                event_type,
                category,
                AuditOutcome::Success,
            )
            .with_metadata("follow_up_id", follow_up.id.0.clone())
            .with_metadata("from", outcome.from_state_id.0.clone())
            .with_metadata("to", outcome.to_state_id.0.clone());
            if let Some(rule_id) = outcome.rule_id {
                event = event.with_metadata("rule_id", rule_id.to_string());
            }
            match &outcome.effect {
                DebtEffect::AuthorizationRequested { request_id }
                | DebtEffect::AlreadyPending { request_id } => {
                    event = event.with_metadata("request_id", request_id.0.clone());
                }
                _ => {}
            }
            self.audit.emit(event);
        }
    }
}
