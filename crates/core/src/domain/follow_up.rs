use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::debt::{DebtId, PersonaId};
use crate::domain::state::ManagementTypeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FollowUpId(pub String);

impl FollowUpId {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("FUP-{}", &raw[..12]))
    }
}

/// A logged interaction with a debtor about one or more of their debts.
/// Written once and never updated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: FollowUpId,
    pub persona_id: PersonaId,
    pub manager_id: String,
    pub management_type_id: ManagementTypeId,
    pub debt_ids: Vec<DebtId>,
    pub observation: String,
    pub next_follow_up_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}
