pub mod access;
pub mod audit;
pub mod authorizations;
pub mod config;
pub mod domain;
pub mod errors;
pub mod follow_ups;
pub mod store;
pub mod transitions;

pub use access::{AccessPolicy, Actor, Operation, Role};
pub use authorizations::{AuthorizationWorkflow, ChangeRequest, QueuedAuthorization, ResolveCommand};
pub use domain::authorization::{
    AuthorizationRequest, AuthorizationRequestId, AuthorizationStatus, PriorityThresholds,
    RequestPriority,
};
pub use domain::debt::{Debt, DebtId, Persona, PersonaId};
pub use domain::follow_up::{FollowUp, FollowUpId};
pub use domain::rule::{RuleDraft, RuleId, TransitionRule};
pub use domain::state::{DebtState, DebtStateId, ManagementType, ManagementTypeId};
pub use errors::{ApplicationError, DomainError, FieldError, InterfaceError};
pub use follow_ups::{
    DebtEffect, DebtOutcome, FollowUpDraft, FollowUpReceipt, FollowUpRecorder, TransitionPreview,
};
pub use store::{AuthorizationFilter, CollectionsStore, StoreError};
pub use transitions::{
    AmbiguityPolicy, MatchedRule, RuleCatalog, SavedRule, TransitionEvaluator, UnmatchedPolicy,
};
