//! Supervisor approval gate for sensitive debt state changes.
//!
//! A request is created `Pending` and is resolved exactly once. Approval
//! moves the debt to the requested destination in the same store
//! transaction that marks the request approved; rejection leaves the debt
//! alone. The store re-checks `status = pending` at write time, so of two
//! concurrent resolutions only the first succeeds and the second sees
//! `Conflict`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::{AccessPolicy, Actor, Operation, Role};
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::authorization::{
    AuthorizationDecision, AuthorizationRequest, AuthorizationRequestId,
    AuthorizationResolution, AuthorizationStatus, PriorityThresholds, RequestPriority,
};
use crate::domain::debt::DebtId;
use crate::domain::state::DebtStateId;
use crate::errors::{ApplicationError, DomainError};
use crate::store::{AuthorizationFilter, CollectionsStore};

/// Manual request for a state change outside of a follow-up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub debt_id: DebtId,
    /// When set, must equal the debt's current state.
    pub origin_state_id: Option<DebtStateId>,
    pub destination_state_id: DebtStateId,
    pub comment: String,
    pub assigned_supervisor_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveCommand {
    pub request_id: AuthorizationRequestId,
    pub approve: bool,
    pub supervisor_comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueuedAuthorization {
    pub request: AuthorizationRequest,
    pub priority: RequestPriority,
    pub waiting_minutes: i64,
}

pub struct AuthorizationWorkflow {
    store: Arc<dyn CollectionsStore>,
    audit: Arc<dyn AuditSink>,
    policy: AccessPolicy,
    thresholds: PriorityThresholds,
    default_supervisor_id: Option<String>,
}

impl AuthorizationWorkflow {
    pub fn new(store: Arc<dyn CollectionsStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            policy: AccessPolicy,
            thresholds: PriorityThresholds::default(),
            default_supervisor_id: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: PriorityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_default_supervisor(mut self, supervisor_id: Option<String>) -> Self {
        self.default_supervisor_id = supervisor_id;
        self
    }

    pub fn thresholds(&self) -> PriorityThresholds {
        self.thresholds
    }

    pub async fn request_change(
        &self,
        actor: &Actor,
        context: &AuditContext,
        change: ChangeRequest,
    ) -> Result<AuthorizationRequest, ApplicationError> {
        self.policy.authorize(actor, Operation::RequestChange)?;

        let debt = self
            .store
            .debt(&change.debt_id)
            .await?
            .ok_or_else(|| DomainError::not_found("debt", change.debt_id.0.clone()))?;

        if let Some(origin) = change.origin_state_id.as_ref() {
            if origin != &debt.state_id {
                return Err(DomainError::Conflict(format!(
                    "debt `{}` is in state `{}`, not `{origin}`",
                    debt.id, debt.state_id
                ))
                .into());
            }
        }

        if change.destination_state_id == debt.state_id {
            return Err(DomainError::field(
                "destinationStateId",
                "destination state must differ from the debt's current state",
            )
            .into());
        }

        if self.store.debt_state(&change.destination_state_id).await?.is_none() {
            return Err(DomainError::field(
                "destinationStateId",
                format!("unknown debt state `{}`", change.destination_state_id),
            )
            .into());
        }

        let pending = self
            .store
            .list_authorization_requests(&AuthorizationFilter {
                status: Some(AuthorizationStatus::Pending),
                debt_id: Some(debt.id.clone()),
                ..AuthorizationFilter::default()
            })
            .await?;
        if let Some(existing) = pending.first() {
            return Err(DomainError::Conflict(format!(
                "debt `{}` already has pending authorization request `{}`",
                debt.id, existing.id
            ))
            .into());
        }

        let request = AuthorizationRequest::pending(
            debt.id.clone(),
            debt.state_id.clone(),
            change.destination_state_id,
            actor.id.clone(),
            change.comment,
            None,
            None,
            Utc::now(),
        )
        .with_supervisor(change.assigned_supervisor_id.or_else(|| self.default_supervisor_id.clone()));

        let created = self.store.create_authorization_request(request).await?;
        self.audit.emit(
            AuditEvent::from_context(
                context,
                Some(created.debt_id.clone()),
                "authorization.requested",
                AuditCategory::Authorization,
                AuditOutcome::Success,
            )
            .with_metadata("request_id", created.id.0.clone())
            .with_metadata("origin", created.origin_state_id.0.clone())
            .with_metadata("destination", created.destination_state_id.0.clone())
            .with_metadata("source", "manual"),
        );

        Ok(created)
    }

    pub async fn resolve(
        &self,
        actor: &Actor,
        context: &AuditContext,
        command: ResolveCommand,
    ) -> Result<AuthorizationRequest, ApplicationError> {
        self.resolve_at(actor, context, command, Utc::now()).await
    }

    pub async fn resolve_at(
        &self,
        actor: &Actor,
        context: &AuditContext,
        command: ResolveCommand,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationRequest, ApplicationError> {
        if let Err(error) = self.policy.authorize(actor, Operation::ResolveAuthorization) {
            self.emit_rejection(context, None, &command.request_id, &error);
            return Err(error.into());
        }

        let request = self
            .store
            .authorization_request(&command.request_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found("authorization request", command.request_id.0.clone())
            })?;

        if let Err(error) = check_resolver(actor, &request) {
            self.emit_rejection(context, Some(&request), &command.request_id, &error);
            return Err(error.into());
        }

        let decision = AuthorizationDecision::from_approve(command.approve);
        let resolution = AuthorizationResolution {
            request_id: request.id.clone(),
            decision,
            resolver_id: actor.id.clone(),
            supervisor_comment: normalize_comment(command.supervisor_comment),
            resolved_at: now,
        };

        // Validates the transition locally before the store repeats the check
        // under its write lock.
        let mut preview = request.clone();
        if let Err(error) = preview.apply_resolution(&resolution) {
            self.emit_rejection(context, Some(&request), &command.request_id, &error);
            return Err(error.into());
        }

        let resolved = match self.store.resolve_authorization_request(resolution).await {
            Ok(resolved) => resolved,
            Err(error) => {
                let error = ApplicationError::from(error);
                if let ApplicationError::Domain(domain) = &error {
                    self.emit_rejection(context, Some(&request), &command.request_id, domain);
                }
                return Err(error);
            }
        };

        let event_type = match decision {
            AuthorizationDecision::Approve => "authorization.approved",
            AuthorizationDecision::Reject => "authorization.rejected",
        };
        self.audit.emit(
            AuditEvent::from_context(
                context,
                Some(resolved.debt_id.clone()),
                event_type,
                AuditCategory::Authorization,
                AuditOutcome::Success,
            )
            .with_metadata("request_id", resolved.id.0.clone())
            .with_metadata("origin", resolved.origin_state_id.0.clone())
            .with_metadata("destination", resolved.destination_state_id.0.clone()),
        );
        info!(
            event_name = event_type,
            correlation_id = %context.correlation_id,
            request_id = %resolved.id,
            debt_id = %resolved.debt_id,
            resolver_id = %actor.id,
            "authorization request resolved"
        );

        Ok(resolved)
    }

    pub async fn get(
        &self,
        id: &AuthorizationRequestId,
    ) -> Result<AuthorizationRequest, ApplicationError> {
        self.store
            .authorization_request(id)
            .await?
            .ok_or_else(|| DomainError::not_found("authorization request", id.0.clone()).into())
    }

    /// Lists requests with their priority computed against `now`. Most urgent
    /// first, oldest first within the same priority.
    pub async fn queue(
        &self,
        actor: &Actor,
        filter: AuthorizationFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedAuthorization>, ApplicationError> {
        self.policy.authorize(actor, Operation::ViewAuthorizationQueue)?;

        let requests = self.store.list_authorization_requests(&filter).await?;
        let mut queue = requests
            .into_iter()
            .map(|request| QueuedAuthorization {
                priority: request.priority_at(now, &self.thresholds),
                waiting_minutes: (now - request.requested_at).num_minutes().max(0),
                request,
            })
            .collect::<Vec<_>>();

        queue.sort_by(|left, right| {
            right
                .priority
                .cmp(&left.priority)
                .then_with(|| left.request.requested_at.cmp(&right.request.requested_at))
                .then_with(|| left.request.id.0.cmp(&right.request.id.0))
        });

        Ok(queue)
    }

    fn emit_rejection(
        &self,
        context: &AuditContext,
        request: Option<&AuthorizationRequest>,
        request_id: &AuthorizationRequestId,
        error: &DomainError,
    ) {
        self.audit.emit(
            AuditEvent::from_context(
                context,
                request.map(|request| request.debt_id.clone()),
                "authorization.resolution_rejected",
                AuditCategory::Authorization,
                AuditOutcome::Rejected,
            )
            .with_metadata("request_id", request_id.0.clone())
            .with_metadata("error", error.to_string()),
        );
    }
}

fn check_resolver(actor: &Actor, request: &AuthorizationRequest) -> Result<(), DomainError> {
    if actor.id == request.requesting_manager_id {
        return Err(DomainError::Forbidden(format!(
            "`{}` cannot resolve their own authorization request",
            actor.id
        )));
    }

    if actor.role == Role::Supervisor {
        if let Some(assigned) = request.assigned_supervisor_id.as_deref() {
            if assigned != actor.id {
                return Err(DomainError::Forbidden(format!(
                    "authorization request `{}` is assigned to supervisor `{assigned}`",
                    request.id
                )));
            }
        }
    }

    Ok(())
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment.map(|comment| comment.trim().to_string()).filter(|comment| !comment.is_empty())
}
