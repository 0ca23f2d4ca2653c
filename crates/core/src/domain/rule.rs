use serde::{Deserialize, Serialize};

use crate::domain::state::{DebtStateId, ManagementTypeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub i64);

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a management type recorded against a debt in `origin_state_id` to the
/// state the debt should move to.
///
/// `origin_state_id = None` matches any current state and
/// `destination_state_id = None` keeps the debt where it is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub id: RuleId,
    pub management_type_id: ManagementTypeId,
    pub origin_state_id: Option<DebtStateId>,
    pub destination_state_id: Option<DebtStateId>,
    pub requires_authorization: bool,
    pub ui_message: String,
    pub priority: i32,
    pub active: bool,
}

impl TransitionRule {
    pub fn matches(&self, management_type_id: &ManagementTypeId, state: &DebtStateId) -> bool {
        self.active
            && &self.management_type_id == management_type_id
            && self.origin_state_id.as_ref().map_or(true, |origin| origin == state)
    }

    pub fn destination_from(&self, current: &DebtStateId) -> DebtStateId {
        self.destination_state_id.clone().unwrap_or_else(|| current.clone())
    }
}

/// Payload for creating or replacing a rule; `id = None` inserts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub id: Option<RuleId>,
    pub management_type_id: ManagementTypeId,
    pub origin_state_id: Option<DebtStateId>,
    pub destination_state_id: Option<DebtStateId>,
    pub requires_authorization: bool,
    pub ui_message: String,
    pub priority: i32,
    pub active: bool,
}
