use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use collecta_core::domain::debt::{Debt, DebtId, Persona, PersonaId};
use collecta_core::domain::rule::{RuleDraft, RuleId};
use collecta_core::domain::state::{DebtState, DebtStateId, ManagementType, ManagementTypeId};
use collecta_core::store::{CollectionsStore, StoreError};

use crate::connection::DbPool;
use crate::repositories::{InMemoryCollectionsStore, RepositoryError};

/// Deterministic catalog of states, management types, personas, debts and
/// rules shared by repository tests, service contracts and `collecta seed`.
#[derive(Clone, Debug)]
pub struct ReferenceData {
    pub states: Vec<DebtState>,
    pub management_types: Vec<ManagementType>,
    pub personas: Vec<Persona>,
    pub debts: Vec<Debt>,
    pub rules: Vec<RuleDraft>,
}

fn seeded_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap_or_else(Utc::now)
}

fn state(id: &str, label: &str, sort_order: i32, is_final: bool) -> DebtState {
    DebtState { id: DebtStateId(id.to_string()), label: label.to_string(), sort_order, is_final }
}

fn management_type(id: &str, name: &str, active: bool) -> ManagementType {
    ManagementType {
        id: ManagementTypeId(id.to_string()),
        name: name.to_string(),
        description: None,
        color: None,
        icon: None,
        active,
    }
}

fn debt(id: &str, persona: &str, state: &str, cents: i64) -> Debt {
    Debt {
        id: DebtId(id.to_string()),
        persona_id: PersonaId(persona.to_string()),
        state_id: DebtStateId(state.to_string()),
        assigned_manager_id: Some("collector-1".to_string()),
        outstanding_amount: Decimal::new(cents, 2),
        updated_at: seeded_at(),
    }
}

fn rule(
    id: i64,
    management_type_id: &str,
    origin: Option<&str>,
    destination: Option<&str>,
    requires_authorization: bool,
    priority: i32,
    ui_message: &str,
) -> RuleDraft {
    RuleDraft {
        id: Some(RuleId(id)),
        management_type_id: ManagementTypeId(management_type_id.to_string()),
        origin_state_id: origin.map(|s| DebtStateId(s.to_string())),
        destination_state_id: destination.map(|s| DebtStateId(s.to_string())),
        requires_authorization,
        ui_message: ui_message.to_string(),
        priority,
        active: true,
    }
}

impl ReferenceData {
    pub fn standard() -> Self {
        Self {
            states: vec![
                state("new", "New", 1, false),
                state("in_management", "In management", 2, false),
                state("agreed", "Payment agreed", 3, false),
                state("suspended", "Suspended", 4, false),
                state("legal", "Legal collection", 5, false),
                state("closed", "Closed", 6, true),
            ],
            management_types: vec![
                management_type("call", "Phone call", true),
                management_type("message", "Message", true),
                management_type("visit", "Field visit", true),
                management_type("payment_agreement", "Payment agreement", true),
                management_type("legacy_fax", "Fax", false),
            ],
            personas: vec![
                Persona {
                    id: PersonaId("P-1".to_string()),
                    full_name: "Ana Torres".to_string(),
                    document_number: Some("30111222".to_string()),
                },
                Persona {
                    id: PersonaId("P-2".to_string()),
                    full_name: "Bruno Diaz".to_string(),
                    document_number: None,
                },
            ],
            debts: vec![
                debt("D-100", "P-1", "in_management", 150_000),
                debt("D-101", "P-1", "new", 42_050),
                debt("D-102", "P-1", "in_management", 9_900),
                debt("D-200", "P-2", "new", 300_000),
            ],
            rules: vec![
                rule(1, "call", Some("new"), Some("in_management"), false, 10, "Debt is now in management"),
                rule(2, "call", None, None, false, 0, "Call logged"),
                rule(3, "payment_agreement", Some("in_management"), Some("agreed"), true, 10, "Agreement sent for supervisor approval"),
                rule(4, "payment_agreement", Some("new"), Some("agreed"), true, 10, "Agreement sent for supervisor approval"),
                rule(5, "visit", Some("new"), Some("in_management"), false, 5, "Visit moved the debt into management"),
            ],
        }
    }

    pub async fn load_into_pool(&self, pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        for state in &self.states {
            sqlx::query(
                "INSERT INTO debt_state (id, label, sort_order, is_final) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     label = excluded.label,
                     sort_order = excluded.sort_order,
                     is_final = excluded.is_final",
            )
            .bind(&state.id.0)
            .bind(&state.label)
            .bind(state.sort_order)
            .bind(state.is_final)
            .execute(&mut *tx)
            .await?;
        }

        for management_type in &self.management_types {
            sqlx::query(
                "INSERT INTO management_type (id, name, description, color, icon, active)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     description = excluded.description,
                     color = excluded.color,
                     icon = excluded.icon,
                     active = excluded.active",
            )
            .bind(&management_type.id.0)
            .bind(&management_type.name)
            .bind(management_type.description.as_deref())
            .bind(management_type.color.as_deref())
            .bind(management_type.icon.as_deref())
            .bind(management_type.active)
            .execute(&mut *tx)
            .await?;
        }

        for persona in &self.personas {
            sqlx::query(
                "INSERT INTO persona (id, full_name, document_number) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     full_name = excluded.full_name,
                     document_number = excluded.document_number",
            )
            .bind(&persona.id.0)
            .bind(&persona.full_name)
            .bind(persona.document_number.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        for debt in &self.debts {
            sqlx::query(
                "INSERT INTO debt (id, persona_id, state_id, assigned_manager_id,
                                   outstanding_amount, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(&debt.id.0)
            .bind(&debt.persona_id.0)
            .bind(&debt.state_id.0)
            .bind(debt.assigned_manager_id.as_deref())
            .bind(debt.outstanding_amount.to_string())
            .bind(debt.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for rule in &self.rules {
            sqlx::query(
                "INSERT INTO transition_rule (id, management_type_id, origin_state_id,
                     destination_state_id, requires_authorization, ui_message, priority, active)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )
            .bind(rule.id.map(|id| id.0))
            .bind(&rule.management_type_id.0)
            .bind(rule.origin_state_id.as_ref().map(|s| s.0.as_str()))
            .bind(rule.destination_state_id.as_ref().map(|s| s.0.as_str()))
            .bind(rule.requires_authorization)
            .bind(&rule.ui_message)
            .bind(rule.priority)
            .bind(rule.active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_into_memory(&self, store: &InMemoryCollectionsStore) -> Result<(), StoreError> {
        for state in &self.states {
            store.insert_debt_state(state.clone()).await;
        }
        for management_type in &self.management_types {
            store.insert_management_type(management_type.clone()).await;
        }
        for persona in &self.personas {
            store.insert_persona(persona.clone()).await;
        }
        for debt in &self.debts {
            store.insert_debt(debt.clone()).await;
        }
        for rule in &self.rules {
            store.save_rule(rule.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use collecta_core::domain::debt::DebtId;
    use collecta_core::domain::state::ManagementTypeId;
    use collecta_core::store::CollectionsStore;

    use super::ReferenceData;
    use crate::repositories::{InMemoryCollectionsStore, SqlCollectionsStore};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn both_stores_expose_the_same_reference_data() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let data = ReferenceData::standard();
        data.load_into_pool(&pool).await.expect("seed sql");
        data.load_into_pool(&pool).await.expect("seeding twice is a no-op");
        let sql = SqlCollectionsStore::new(pool);

        let memory = InMemoryCollectionsStore::new();
        data.load_into_memory(&memory).await.expect("seed memory");

        let call = ManagementTypeId("call".to_string());
        assert_eq!(
            sql.active_rules(&call).await.expect("sql rules"),
            memory.active_rules(&call).await.expect("memory rules"),
        );
        assert_eq!(
            sql.debt(&DebtId("D-100".to_string())).await.expect("sql debt"),
            memory.debt(&DebtId("D-100".to_string())).await.expect("memory debt"),
        );
        assert_eq!(sql.list_rules().await.expect("rules").len(), data.rules.len());
    }
}
