use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use collecta_core::domain::authorization::{
    AuthorizationDecision, AuthorizationRequest, AuthorizationRequestId, AuthorizationResolution,
    AuthorizationStatus,
};
use collecta_core::domain::debt::{Debt, DebtId, Persona};
use collecta_core::domain::follow_up::FollowUp;
use collecta_core::domain::history::{DebtStateChange, StateChangeCause};
use collecta_core::domain::rule::{RuleDraft, RuleId, TransitionRule};
use collecta_core::domain::state::{DebtState, DebtStateId, ManagementType, ManagementTypeId};
use collecta_core::store::{AuthorizationFilter, CollectionsStore, FollowUpCommit, StoreError};

#[derive(Default)]
struct Collections {
    states: HashMap<String, DebtState>,
    management_types: HashMap<String, ManagementType>,
    personas: HashMap<String, Persona>,
    debts: HashMap<String, Debt>,
    rules: BTreeMap<i64, TransitionRule>,
    follow_ups: Vec<FollowUp>,
    requests: HashMap<String, AuthorizationRequest>,
    history: Vec<DebtStateChange>,
}

impl Collections {
    fn require_state(&self, id: &DebtStateId) -> Result<(), StoreError> {
        if self.states.contains_key(&id.0) {
            Ok(())
        } else {
            Err(StoreError::NotFound { entity: "debt state", id: id.0.clone() })
        }
    }

    fn require_debt(&self, id: &DebtId) -> Result<&Debt, StoreError> {
        self.debts
            .get(&id.0)
            .ok_or_else(|| StoreError::NotFound { entity: "debt", id: id.0.clone() })
    }

    fn check_state_change(
        &self,
        change: &DebtStateChange,
        expected: &DebtStateId,
    ) -> Result<(), StoreError> {
        self.require_state(&change.to_state_id)?;
        let debt = self.require_debt(&change.debt_id)?;
        if &debt.state_id != expected {
            return Err(StoreError::Conflict(format!(
                "debt `{}` is in state `{}`, expected `{expected}`",
                debt.id, debt.state_id
            )));
        }
        Ok(())
    }

    /// A debt holds at most one pending request, and only from the state it is in now.
    fn check_new_request(&self, request: &AuthorizationRequest) -> Result<(), StoreError> {
        let debt = self.require_debt(&request.debt_id)?;
        if debt.state_id != request.origin_state_id {
            return Err(StoreError::Conflict(format!(
                "debt `{}` is in state `{}`, expected `{}`",
                debt.id, debt.state_id, request.origin_state_id
            )));
        }
        self.require_state(&request.destination_state_id)?;
        if self.requests.contains_key(&request.id.0) {
            return Err(StoreError::Conflict(format!(
                "authorization request `{}` already exists",
                request.id
            )));
        }
        let pending = self.requests.values().any(|existing| {
            existing.debt_id == request.debt_id && existing.status == AuthorizationStatus::Pending
        });
        if pending {
            return Err(pending_conflict(&request.debt_id));
        }
        Ok(())
    }

    fn apply_state_change(&mut self, change: DebtStateChange) {
        if let Some(debt) = self.debts.get_mut(&change.debt_id.0) {
            debt.state_id = change.to_state_id.clone();
            debt.updated_at = change.changed_at;
        }
        self.history.push(change);
    }
}

fn pending_conflict(debt_id: &DebtId) -> StoreError {
    StoreError::Conflict(format!("debt `{debt_id}` already has a pending authorization request"))
}

/// Store backed by process memory. Every unit of work holds the single write
/// guard for its whole duration, which gives the same all-or-nothing and
/// first-writer-wins behavior as the SQL store's transactions.
#[derive(Default)]
pub struct InMemoryCollectionsStore {
    inner: RwLock<Collections>,
}

impl InMemoryCollectionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_debt_state(&self, state: DebtState) {
        let mut inner = self.inner.write().await;
        inner.states.insert(state.id.0.clone(), state);
    }

    pub async fn insert_management_type(&self, management_type: ManagementType) {
        let mut inner = self.inner.write().await;
        inner.management_types.insert(management_type.id.0.clone(), management_type);
    }

    pub async fn insert_persona(&self, persona: Persona) {
        let mut inner = self.inner.write().await;
        inner.personas.insert(persona.id.0.clone(), persona);
    }

    pub async fn insert_debt(&self, debt: Debt) {
        let mut inner = self.inner.write().await;
        inner.debts.insert(debt.id.0.clone(), debt);
    }
}

#[async_trait]
impl CollectionsStore for InMemoryCollectionsStore {
    async fn debt_state(&self, id: &DebtStateId) -> Result<Option<DebtState>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.states.get(&id.0).cloned())
    }

    async fn management_type(
        &self,
        id: &ManagementTypeId,
    ) -> Result<Option<ManagementType>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.management_types.get(&id.0).cloned())
    }

    async fn active_rules(
        &self,
        management_type_id: &ManagementTypeId,
    ) -> Result<Vec<TransitionRule>, StoreError> {
        let inner = self.inner.read().await;
        let mut rules = inner
            .rules
            .values()
            .filter(|rule| rule.active && &rule.management_type_id == management_type_id)
            .cloned()
            .collect::<Vec<_>>();
        rules.sort_by(|left, right| {
            right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id))
        });
        Ok(rules)
    }

    async fn list_rules(&self) -> Result<Vec<TransitionRule>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.rules.values().cloned().collect())
    }

    async fn save_rule(&self, draft: RuleDraft) -> Result<TransitionRule, StoreError> {
        let mut inner = self.inner.write().await;

        if !inner.management_types.contains_key(&draft.management_type_id.0) {
            return Err(StoreError::NotFound {
                entity: "management type",
                id: draft.management_type_id.0.clone(),
            });
        }
        for state in [&draft.origin_state_id, &draft.destination_state_id].into_iter().flatten() {
            inner.require_state(state)?;
        }

        let id = match draft.id {
            Some(id) => id,
            None => RuleId(inner.rules.keys().next_back().copied().unwrap_or(0) + 1),
        };
        let rule = TransitionRule {
            id,
            management_type_id: draft.management_type_id,
            origin_state_id: draft.origin_state_id,
            destination_state_id: draft.destination_state_id,
            requires_authorization: draft.requires_authorization,
            ui_message: draft.ui_message,
            priority: draft.priority,
            active: draft.active,
        };
        inner.rules.insert(id.0, rule.clone());
        Ok(rule)
    }

    async fn debt(&self, id: &DebtId) -> Result<Option<Debt>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.debts.get(&id.0).cloned())
    }

    async fn set_debt_state(&self, change: DebtStateChange) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let expected = change.from_state_id.clone();
        inner.check_state_change(&change, &expected)?;
        inner.apply_state_change(change);
        Ok(())
    }

    async fn commit_follow_up(&self, commit: FollowUpCommit) -> Result<FollowUp, StoreError> {
        let mut inner = self.inner.write().await;

        let follow_up = commit.follow_up;
        if inner.follow_ups.iter().any(|existing| existing.id == follow_up.id) {
            return Err(StoreError::Conflict(format!(
                "follow-up `{}` already exists",
                follow_up.id.0
            )));
        }
        if !inner.personas.contains_key(&follow_up.persona_id.0) {
            return Err(StoreError::NotFound {
                entity: "persona",
                id: follow_up.persona_id.0.clone(),
            });
        }
        if !inner.management_types.contains_key(&follow_up.management_type_id.0) {
            return Err(StoreError::NotFound {
                entity: "management type",
                id: follow_up.management_type_id.0.clone(),
            });
        }
        for debt_id in &follow_up.debt_ids {
            inner.require_debt(debt_id)?;
        }
        for guarded in &commit.state_changes {
            inner.check_state_change(&guarded.change, &guarded.expected_state_id)?;
        }
        for (index, request) in commit.authorization_requests.iter().enumerate() {
            inner.check_new_request(request)?;
            let repeated = commit.authorization_requests[..index]
                .iter()
                .any(|earlier| earlier.debt_id == request.debt_id);
            if repeated {
                return Err(pending_conflict(&request.debt_id));
            }
        }

        for guarded in commit.state_changes {
            inner.apply_state_change(guarded.change);
        }
        for request in commit.authorization_requests {
            inner.requests.insert(request.id.0.clone(), request);
        }
        inner.follow_ups.push(follow_up.clone());

        Ok(follow_up)
    }

    async fn follow_ups_for_debt(&self, debt_id: &DebtId) -> Result<Vec<FollowUp>, StoreError> {
        let inner = self.inner.read().await;
        let mut follow_ups = inner
            .follow_ups
            .iter()
            .filter(|follow_up| follow_up.debt_ids.contains(debt_id))
            .cloned()
            .collect::<Vec<_>>();
        follow_ups.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        Ok(follow_ups)
    }

    async fn create_authorization_request(
        &self,
        request: AuthorizationRequest,
    ) -> Result<AuthorizationRequest, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_new_request(&request)?;
        inner.requests.insert(request.id.0.clone(), request.clone());
        Ok(request)
    }

    async fn authorization_request(
        &self,
        id: &AuthorizationRequestId,
    ) -> Result<Option<AuthorizationRequest>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.requests.get(&id.0).cloned())
    }

    async fn list_authorization_requests(
        &self,
        filter: &AuthorizationFilter,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        let inner = self.inner.read().await;
        let mut requests = inner
            .requests
            .values()
            .filter(|request| filter.status.map_or(true, |status| request.status == status))
            .filter(|request| {
                filter.assigned_supervisor_id.as_ref().map_or(true, |supervisor| {
                    request.assigned_supervisor_id.as_ref() == Some(supervisor)
                })
            })
            .filter(|request| {
                filter.debt_id.as_ref().map_or(true, |debt_id| &request.debt_id == debt_id)
            })
            .cloned()
            .collect::<Vec<_>>();
        requests.sort_by(|left, right| {
            left.requested_at.cmp(&right.requested_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        if let Some(limit) = filter.limit {
            requests.truncate(limit as usize);
        }
        Ok(requests)
    }

    async fn resolve_authorization_request(
        &self,
        resolution: AuthorizationResolution,
    ) -> Result<AuthorizationRequest, StoreError> {
        let mut inner = self.inner.write().await;

        let mut request = inner.requests.get(&resolution.request_id.0).cloned().ok_or_else(|| {
            StoreError::NotFound {
                entity: "authorization request",
                id: resolution.request_id.0.clone(),
            }
        })?;
        request.apply_resolution(&resolution).map_err(|e| StoreError::Conflict(e.to_string()))?;

        let change = match resolution.decision {
            AuthorizationDecision::Approve => {
                let change = DebtStateChange {
                    debt_id: request.debt_id.clone(),
                    from_state_id: request.origin_state_id.clone(),
                    to_state_id: request.destination_state_id.clone(),
                    cause: StateChangeCause::Authorization,
                    follow_up_id: request.follow_up_id.clone(),
                    authorization_request_id: Some(request.id.clone()),
                    changed_by: resolution.resolver_id.clone(),
                    changed_at: resolution.resolved_at,
                };
                inner.check_state_change(&change, &request.origin_state_id)?;
                Some(change)
            }
            AuthorizationDecision::Reject => None,
        };

        if let Some(change) = change {
            inner.apply_state_change(change);
        }
        inner.requests.insert(request.id.0.clone(), request.clone());
        Ok(request)
    }

    async fn state_history(&self, debt_id: &DebtId) -> Result<Vec<DebtStateChange>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.history.iter().filter(|change| &change.debt_id == debt_id).cloned().collect())
    }
}
