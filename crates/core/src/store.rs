//! Outbound persistence port used by the follow-up recorder and the
//! authorization workflow. `collecta-db` provides the SQLite and in-memory
//! implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::authorization::{
    AuthorizationRequest, AuthorizationRequestId, AuthorizationResolution, AuthorizationStatus,
};
use crate::domain::debt::{Debt, DebtId};
use crate::domain::follow_up::FollowUp;
use crate::domain::history::DebtStateChange;
use crate::domain::rule::{RuleDraft, TransitionRule};
use crate::domain::state::{DebtState, DebtStateId, ManagementType, ManagementTypeId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// A state change conditioned on the debt still being in `expected_state_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardedStateChange {
    pub expected_state_id: DebtStateId,
    pub change: DebtStateChange,
}

/// Everything one follow-up submission writes. Stores persist it in a single
/// transaction or not at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowUpCommit {
    pub follow_up: FollowUp,
    pub state_changes: Vec<GuardedStateChange>,
    pub authorization_requests: Vec<AuthorizationRequest>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationFilter {
    pub status: Option<AuthorizationStatus>,
    pub assigned_supervisor_id: Option<String>,
    pub debt_id: Option<DebtId>,
    pub limit: Option<u32>,
}

#[async_trait]
pub trait CollectionsStore: Send + Sync {
    async fn debt_state(&self, id: &DebtStateId) -> Result<Option<DebtState>, StoreError>;

    async fn management_type(
        &self,
        id: &ManagementTypeId,
    ) -> Result<Option<ManagementType>, StoreError>;

    async fn active_rules(
        &self,
        management_type_id: &ManagementTypeId,
    ) -> Result<Vec<TransitionRule>, StoreError>;

    async fn list_rules(&self) -> Result<Vec<TransitionRule>, StoreError>;

    async fn save_rule(&self, draft: RuleDraft) -> Result<TransitionRule, StoreError>;

    async fn debt(&self, id: &DebtId) -> Result<Option<Debt>, StoreError>;

    /// Moves the debt only if it is still in `change.from_state_id`; otherwise `Conflict`.
    /// A standalone move with no follow-up or request attached. The follow-up recorder
    /// and the authorization workflow write state through `commit_follow_up` and
    /// `resolve_authorization_request` instead.
    async fn set_debt_state(&self, change: DebtStateChange) -> Result<(), StoreError>;

    /// Persists the whole commit or nothing. `Conflict` when a guarded debt left its
    /// expected state, or when a request's debt already holds a pending request or is
    /// no longer in the request's origin state.
    async fn commit_follow_up(&self, commit: FollowUpCommit) -> Result<FollowUp, StoreError>;

    async fn follow_ups_for_debt(&self, debt_id: &DebtId) -> Result<Vec<FollowUp>, StoreError>;

    /// Same request guards as `commit_follow_up`, checked atomically with the insert.
    async fn create_authorization_request(
        &self,
        request: AuthorizationRequest,
    ) -> Result<AuthorizationRequest, StoreError>;

    async fn authorization_request(
        &self,
        id: &AuthorizationRequestId,
    ) -> Result<Option<AuthorizationRequest>, StoreError>;

    async fn list_authorization_requests(
        &self,
        filter: &AuthorizationFilter,
    ) -> Result<Vec<AuthorizationRequest>, StoreError>;

    /// Marks the request resolved and, on approval, moves the debt to the
    /// destination state. `NotFound` for unknown ids, `Conflict` when the
    /// request is no longer pending. Nothing is written on error.
    async fn resolve_authorization_request(
        &self,
        resolution: AuthorizationResolution,
    ) -> Result<AuthorizationRequest, StoreError>;

    async fn state_history(&self, debt_id: &DebtId) -> Result<Vec<DebtStateChange>, StoreError>;
}
