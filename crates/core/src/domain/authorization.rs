use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::debt::DebtId;
use crate::domain::follow_up::FollowUpId;
use crate::domain::rule::RuleId;
use crate::domain::state::DebtStateId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationRequestId(pub String);

impl AuthorizationRequestId {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("AUTH-{}", &raw[..12]))
    }
}

impl std::fmt::Display for AuthorizationRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Pending,
    Approved,
    Rejected,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationDecision {
    Approve,
    Reject,
}

impl AuthorizationDecision {
    pub fn from_approve(approve: bool) -> Self {
        if approve {
            Self::Approve
        } else {
            Self::Reject
        }
    }

    pub fn resulting_status(&self) -> AuthorizationStatus {
        match self {
            Self::Approve => AuthorizationStatus::Approved,
            Self::Reject => AuthorizationStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub id: AuthorizationRequestId,
    pub debt_id: DebtId,
    pub follow_up_id: Option<FollowUpId>,
    pub rule_id: Option<RuleId>,
    pub origin_state_id: DebtStateId,
    pub destination_state_id: DebtStateId,
    pub requesting_manager_id: String,
    pub assigned_supervisor_id: Option<String>,
    pub status: AuthorizationStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolver_id: Option<String>,
    pub requester_comment: String,
    pub supervisor_comment: Option<String>,
}

/// The write a resolution performs, handed to the store as one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResolution {
    pub request_id: AuthorizationRequestId,
    pub decision: AuthorizationDecision,
    pub resolver_id: String,
    pub supervisor_comment: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

impl AuthorizationRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        debt_id: DebtId,
        origin_state_id: DebtStateId,
        destination_state_id: DebtStateId,
        requesting_manager_id: impl Into<String>,
        requester_comment: impl Into<String>,
        follow_up_id: Option<FollowUpId>,
        rule_id: Option<RuleId>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuthorizationRequestId::generate(),
            debt_id,
            follow_up_id,
            rule_id,
            origin_state_id,
            destination_state_id,
            requesting_manager_id: requesting_manager_id.into(),
            assigned_supervisor_id: None,
            status: AuthorizationStatus::Pending,
            requested_at,
            resolved_at: None,
            resolver_id: None,
            requester_comment: requester_comment.into(),
            supervisor_comment: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor_id: Option<String>) -> Self {
        self.assigned_supervisor_id = supervisor_id;
        self
    }

    /// Pending is the only state that accepts a resolution; every other state is terminal.
    pub fn apply_resolution(
        &mut self,
        resolution: &AuthorizationResolution,
    ) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::Conflict(format!(
                "authorization request `{}` is already {}",
                self.id,
                self.status.as_str()
            )));
        }

        self.status = resolution.decision.resulting_status();
        self.resolved_at = Some(resolution.resolved_at);
        self.resolver_id = Some(resolution.resolver_id.clone());
        self.supervisor_comment = resolution.supervisor_comment.clone();
        Ok(())
    }

    pub fn priority_at(&self, now: DateTime<Utc>, thresholds: &PriorityThresholds) -> RequestPriority {
        if self.status.is_terminal() {
            return RequestPriority::Normal;
        }
        thresholds.classify(now - self.requested_at)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    Normal,
    High,
    Urgent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorityThresholds {
    pub high_after: Duration,
    pub urgent_after: Duration,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self { high_after: Duration::hours(8), urgent_after: Duration::hours(24) }
    }
}

impl PriorityThresholds {
    pub fn from_hours(high_after_hours: u32, urgent_after_hours: u32) -> Self {
        Self {
            high_after: Duration::hours(i64::from(high_after_hours)),
            urgent_after: Duration::hours(i64::from(urgent_after_hours)),
        }
    }

    pub fn classify(&self, waiting: Duration) -> RequestPriority {
        if waiting > self.urgent_after {
            RequestPriority::Urgent
        } else if waiting > self.high_after {
            RequestPriority::High
        } else {
            RequestPriority::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        AuthorizationDecision, AuthorizationRequest, AuthorizationResolution,
        AuthorizationStatus, PriorityThresholds, RequestPriority,
    };
    use crate::domain::debt::DebtId;
    use crate::domain::state::DebtStateId;
    use crate::errors::DomainError;

    fn pending_request() -> AuthorizationRequest {
        AuthorizationRequest::pending(
            DebtId("D-1".to_string()),
            DebtStateId("in_management".to_string()),
            DebtStateId("agreed".to_string()),
            "collector-7",
            "customer agreed to 6 installments",
            None,
            None,
            Utc::now(),
        )
    }

    fn resolution(request: &AuthorizationRequest, decision: AuthorizationDecision) -> AuthorizationResolution {
        AuthorizationResolution {
            request_id: request.id.clone(),
            decision,
            resolver_id: "supervisor-1".to_string(),
            supervisor_comment: Some("ok".to_string()),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn pending_request_accepts_exactly_one_resolution() {
        let mut request = pending_request();
        let approve = resolution(&request, AuthorizationDecision::Approve);
        request.apply_resolution(&approve).expect("pending -> approved");

        assert_eq!(request.status, AuthorizationStatus::Approved);
        assert_eq!(request.resolver_id.as_deref(), Some("supervisor-1"));
        assert!(request.resolved_at.is_some());

        let reject = resolution(&request, AuthorizationDecision::Reject);
        let error = request.apply_resolution(&reject).expect_err("second resolution must fail");
        assert!(matches!(error, DomainError::Conflict(_)));
        assert_eq!(request.status, AuthorizationStatus::Approved);
    }

    #[test]
    fn rejection_is_terminal() {
        let mut request = pending_request();
        let reject = resolution(&request, AuthorizationDecision::Reject);
        request.apply_resolution(&reject).expect("pending -> rejected");

        assert!(request.status.is_terminal());
        assert!(request.apply_resolution(&reject).is_err());
    }

    #[test]
    fn priority_is_derived_from_waiting_time() {
        let thresholds = PriorityThresholds::default();
        let mut request = pending_request();
        let now = Utc::now();

        request.requested_at = now - Duration::hours(1);
        assert_eq!(request.priority_at(now, &thresholds), RequestPriority::Normal);

        request.requested_at = now - Duration::hours(9);
        assert_eq!(request.priority_at(now, &thresholds), RequestPriority::High);

        request.requested_at = now - Duration::hours(25);
        assert_eq!(request.priority_at(now, &thresholds), RequestPriority::Urgent);
    }

    #[test]
    fn resolved_requests_are_never_urgent() {
        let thresholds = PriorityThresholds::from_hours(1, 2);
        let mut request = pending_request();
        request.requested_at = Utc::now() - Duration::days(3);
        let approve = resolution(&request, AuthorizationDecision::Approve);
        request.apply_resolution(&approve).expect("approve");

        assert_eq!(request.priority_at(Utc::now(), &thresholds), RequestPriority::Normal);
    }

    #[test]
    fn status_parse_round_trips_known_values() {
        for status in [
            AuthorizationStatus::Pending,
            AuthorizationStatus::Approved,
            AuthorizationStatus::Rejected,
        ] {
            assert_eq!(AuthorizationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AuthorizationStatus::parse("escalated"), None);
    }
}
