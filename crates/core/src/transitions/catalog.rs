use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::access::{AccessPolicy, Actor, Operation};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::rule::{RuleDraft, TransitionRule};
use crate::errors::{ApplicationError, DomainError, FieldError};
use crate::store::CollectionsStore;
use crate::transitions::evaluator::{audit_rule_set, RuleAmbiguity};

pub const MAX_UI_MESSAGE_CHARS: usize = 280;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SavedRule {
    pub rule: TransitionRule,
    /// Ties the rule set has after this save.
    pub ambiguities: Vec<RuleAmbiguity>,
}

/// Administrator-facing maintenance of the transition rule table.
pub struct RuleCatalog {
    store: Arc<dyn CollectionsStore>,
    audit: Arc<dyn AuditSink>,
    policy: AccessPolicy,
}

impl RuleCatalog {
    pub fn new(store: Arc<dyn CollectionsStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit, policy: AccessPolicy }
    }

    pub async fn list(&self, actor: &Actor) -> Result<Vec<TransitionRule>, ApplicationError> {
        self.policy.authorize(actor, Operation::ManageRules)?;
        Ok(self.store.list_rules().await?)
    }

    pub async fn audit(&self, actor: &Actor) -> Result<Vec<RuleAmbiguity>, ApplicationError> {
        self.policy.authorize(actor, Operation::ManageRules)?;
        let rules = self.store.list_rules().await?;
        Ok(audit_rule_set(&rules))
    }

    pub async fn save(
        &self,
        actor: &Actor,
        context: &AuditContext,
        draft: RuleDraft,
    ) -> Result<SavedRule, ApplicationError> {
        self.policy.authorize(actor, Operation::ManageRules)?;

        let draft = self.validate(draft).await?;
        let rule = self.store.save_rule(draft).await?;
        let rules = self.store.list_rules().await?;
        let ambiguities = audit_rule_set(&rules)
            .into_iter()
            .filter(|finding| finding.rule_ids.contains(&rule.id))
            .collect::<Vec<_>>();

        if !ambiguities.is_empty() {
            warn!(
                event_name = "rule.saved_with_ties",
                correlation_id = %context.correlation_id,
                rule_id = %rule.id,
                ties = ambiguities.len(),
                "saved rule ties with other active rules at the same priority"
            );
        }

        self.audit.emit(
            AuditEvent::from_context(
                context,
                None,
                "rule.saved",
                AuditCategory::System,
                AuditOutcome::Success,
            )
            .with_metadata("rule_id", rule.id.to_string())
            .with_metadata("management_type_id", rule.management_type_id.0.clone())
            .with_metadata("active", rule.active.to_string()),
        );
        info!(
            event_name = "rule.saved",
            correlation_id = %context.correlation_id,
            rule_id = %rule.id,
            management_type_id = %rule.management_type_id,
            "transition rule saved"
        );

        Ok(SavedRule { rule, ambiguities })
    }

    async fn validate(&self, mut draft: RuleDraft) -> Result<RuleDraft, ApplicationError> {
        let mut fields = Vec::new();

        draft.ui_message = draft.ui_message.trim().to_string();
        if draft.ui_message.chars().count() > MAX_UI_MESSAGE_CHARS {
            fields.push(FieldError::new(
                "uiMessage",
                format!("must be at most {MAX_UI_MESSAGE_CHARS} characters"),
            ));
        }

        if self.store.management_type(&draft.management_type_id).await?.is_none() {
            fields.push(FieldError::new(
                "managementTypeId",
                format!("unknown management type `{}`", draft.management_type_id),
            ));
        }

        for (field, state) in [
            ("originStateId", draft.origin_state_id.as_ref()),
            ("destinationStateId", draft.destination_state_id.as_ref()),
        ] {
            if let Some(state) = state {
                if self.store.debt_state(state).await?.is_none() {
                    fields.push(FieldError::new(field, format!("unknown debt state `{state}`")));
                }
            }
        }

        if fields.is_empty() {
            Ok(draft)
        } else {
            Err(DomainError::Validation { fields }.into())
        }
    }
}
