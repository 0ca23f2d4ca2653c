//! Role checks performed before any core operation runs. The caller resolves
//! identity and role and passes them in as an [`Actor`]; nothing here reads
//! ambient request state.

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Collector,
    Supervisor,
    Administrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Supervisor => "supervisor",
            Self::Administrator => "administrator",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "collector" | "gestor" => Ok(Self::Collector),
            "supervisor" => Ok(Self::Supervisor),
            "administrator" | "admin" => Ok(Self::Administrator),
            other => Err(DomainError::field(
                "role",
                format!("unknown role `{other}` (expected collector|supervisor|administrator)"),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    RecordFollowUp,
    ViewFollowUps,
    RequestChange,
    ResolveAuthorization,
    ViewAuthorizationQueue,
    PreviewTransition,
    ManageRules,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordFollowUp => "record_follow_up",
            Self::ViewFollowUps => "view_follow_ups",
            Self::RequestChange => "request_change",
            Self::ResolveAuthorization => "resolve_authorization",
            Self::ViewAuthorizationQueue => "view_authorization_queue",
            Self::PreviewTransition => "preview_transition",
            Self::ManageRules => "manage_rules",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn allows(&self, role: Role, operation: Operation) -> bool {
        use Operation::*;
        use Role::*;

        match operation {
            RecordFollowUp | ViewFollowUps | RequestChange | PreviewTransition => true,
            ResolveAuthorization | ViewAuthorizationQueue => {
                matches!(role, Supervisor | Administrator)
            }
            ManageRules => matches!(role, Administrator),
        }
    }

    pub fn authorize(&self, actor: &Actor, operation: Operation) -> Result<(), DomainError> {
        if self.allows(actor.role, operation) {
            return Ok(());
        }

        Err(DomainError::Forbidden(format!(
            "role `{}` may not perform `{}`",
            actor.role.as_str(),
            operation.as_str()
        )))
    }
}
