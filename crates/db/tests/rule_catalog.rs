use std::sync::Arc;

use collecta_core::access::{Actor, Role};
use collecta_core::audit::{AuditContext, InMemoryAuditSink};
use collecta_core::domain::rule::{RuleDraft, RuleId};
use collecta_core::domain::state::{DebtStateId, ManagementTypeId};
use collecta_core::errors::{ApplicationError, DomainError};
use collecta_core::store::CollectionsStore;
use collecta_core::transitions::RuleCatalog;
use collecta_db::{
    connect_with_settings, migrations, InMemoryCollectionsStore, ReferenceData,
    SqlCollectionsStore,
};

async fn stores() -> Vec<(&'static str, Arc<dyn CollectionsStore>)> {
    let data = ReferenceData::standard();

    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    data.load_into_pool(&pool).await.expect("seed sql");

    let memory = InMemoryCollectionsStore::new();
    data.load_into_memory(&memory).await.expect("seed memory");

    vec![("sql", Arc::new(SqlCollectionsStore::new(pool))), ("memory", Arc::new(memory))]
}

fn admin() -> Actor {
    Actor::new("admin-1", Role::Administrator)
}

fn context() -> AuditContext {
    AuditContext::new("req-rules", "admin-1")
}

fn draft(origin: Option<&str>, destination: Option<&str>, priority: i32) -> RuleDraft {
    RuleDraft {
        id: None,
        management_type_id: ManagementTypeId("call".to_string()),
        origin_state_id: origin.map(|id| DebtStateId(id.to_string())),
        destination_state_id: destination.map(|id| DebtStateId(id.to_string())),
        requires_authorization: true,
        ui_message: "  Escalated to legal  ".to_string(),
        priority,
        active: true,
    }
}

#[tokio::test]
async fn only_administrators_manage_rules() {
    for (name, store) in stores().await {
        let catalog = RuleCatalog::new(store, Arc::new(InMemoryAuditSink::default()));
        let supervisor = Actor::new("supervisor-1", Role::Supervisor);

        assert!(
            matches!(catalog.list(&supervisor).await, Err(ApplicationError::Domain(DomainError::Forbidden(_)))),
            "[{name}]"
        );
        let save = catalog.save(&supervisor, &context(), draft(Some("new"), Some("legal"), 1)).await;
        assert!(matches!(save, Err(ApplicationError::Domain(DomainError::Forbidden(_)))), "[{name}]");
        assert_eq!(catalog.list(&admin()).await.expect("list").len(), 5, "[{name}]");
    }
}

#[tokio::test]
async fn saving_reports_new_ties_and_trims_the_message() {
    for (name, store) in stores().await {
        let audit = Arc::new(InMemoryAuditSink::default());
        let catalog = RuleCatalog::new(store, audit.clone());

        let saved = catalog
            .save(&admin(), &context(), draft(Some("new"), Some("legal"), 10))
            .await
            .expect("save rule");

        assert_eq!(saved.rule.ui_message, "Escalated to legal", "[{name}]");
        assert_eq!(saved.ambiguities.len(), 1, "[{name}]");
        assert_eq!(saved.ambiguities[0].rule_ids, vec![RuleId(1), saved.rule.id], "[{name}]");
        assert_eq!(audit.events_of_type("rule.saved").len(), 1, "[{name}]");

        let findings = catalog.audit(&admin()).await.expect("audit");
        assert_eq!(findings, saved.ambiguities, "[{name}]");
    }
}

#[tokio::test]
async fn updating_a_rule_replaces_it_in_place() {
    for (name, store) in stores().await {
        let catalog = RuleCatalog::new(store, Arc::new(InMemoryAuditSink::default()));

        let mut update = draft(Some("new"), Some("in_management"), 20);
        update.id = Some(RuleId(1));
        update.requires_authorization = false;
        let saved = catalog.save(&admin(), &context(), update).await.expect("update");

        assert_eq!(saved.rule.id, RuleId(1), "[{name}]");
        assert!(saved.ambiguities.is_empty(), "[{name}]");
        let rules = catalog.list(&admin()).await.expect("list");
        assert_eq!(rules.len(), 5, "[{name}]");
        let rule = rules.iter().find(|rule| rule.id == RuleId(1)).expect("rule 1");
        assert_eq!(rule.priority, 20, "[{name}]");
    }
}

#[tokio::test]
async fn unknown_references_are_field_errors() {
    for (name, store) in stores().await {
        let catalog = RuleCatalog::new(store, Arc::new(InMemoryAuditSink::default()));

        let mut bad = draft(Some("limbo"), Some("legal"), 1);
        bad.management_type_id = ManagementTypeId("carrier_pigeon".to_string());
        let error = catalog.save(&admin(), &context(), bad).await.expect_err("invalid rule");

        match error {
            ApplicationError::Domain(DomainError::Validation { fields }) => {
                let names = fields.iter().map(|field| field.field.as_str()).collect::<Vec<_>>();
                assert_eq!(names, vec!["managementTypeId", "originStateId"], "[{name}]");
            }
            other => panic!("[{name}] expected validation error, got {other:?}"),
        }
        assert_eq!(catalog.list(&admin()).await.expect("list").len(), 5, "[{name}]");
    }
}
