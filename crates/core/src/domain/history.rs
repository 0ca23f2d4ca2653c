use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::authorization::AuthorizationRequestId;
use crate::domain::debt::DebtId;
use crate::domain::follow_up::FollowUpId;
use crate::domain::state::DebtStateId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeCause {
    Rule,
    Authorization,
}

impl StateChangeCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Authorization => "authorization",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "rule" => Some(Self::Rule),
            "authorization" => Some(Self::Authorization),
            _ => None,
        }
    }
}

/// One row of a debt's state history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtStateChange {
    pub debt_id: DebtId,
    pub from_state_id: DebtStateId,
    pub to_state_id: DebtStateId,
    pub cause: StateChangeCause,
    pub follow_up_id: Option<FollowUpId>,
    pub authorization_request_id: Option<AuthorizationRequestId>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}
