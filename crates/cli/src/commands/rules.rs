use collecta_core::store::CollectionsStore;
use collecta_core::transitions::{audit_rule_set, RuleAmbiguity};
use collecta_db::{connect_with_config, SqlCollectionsStore};
use serde_json::{json, Value};

use crate::commands::{load_config, runtime, CommandResult};

/// Reports (management type, state) pairs where two or more active rules tie
/// at the top priority. Ties are reported as `ok` unless `strict` is set.
pub fn audit(strict: bool) -> CommandResult {
    let config = match load_config("rules.audit") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("rules.audit") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let store = SqlCollectionsStore::new(pool.clone());
        let rules =
            store.list_rules().await.map_err(|error| ("rule_query", error.to_string(), 5u8))?;
        pool.close().await;
        let active = rules.iter().filter(|rule| rule.active).count();
        Ok::<_, (&'static str, String, u8)>((active, audit_rule_set(&rules)))
    });

    let (active, findings) = match result {
        Ok(report) => report,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("rules.audit", error_class, message, exit_code);
        }
    };

    let details = Some(json!({
        "active_rules": active,
        "ambiguities": findings.iter().map(finding_json).collect::<Vec<_>>(),
    }));
    let message = describe(active, &findings);

    if strict && !findings.is_empty() {
        return CommandResult::failure_with_details(
            "rules.audit",
            "rule_ambiguity",
            message,
            6,
            details,
        );
    }
    CommandResult::success_with_details("rules.audit", message, details)
}

fn finding_json(finding: &RuleAmbiguity) -> Value {
    json!({
        "management_type_id": finding.management_type_id.0,
        "state_id": finding.state_id.as_ref().map(|state| state.0.as_str()).unwrap_or("*"),
        "priority": finding.priority,
        "rule_ids": finding.rule_ids.iter().map(|id| id.0).collect::<Vec<_>>(),
    })
}

fn describe(active: usize, findings: &[RuleAmbiguity]) -> String {
    if findings.is_empty() {
        return format!("{active} active rules, no priority ties");
    }

    let pairs = findings
        .iter()
        .map(|finding| {
            let state = finding.state_id.as_ref().map(|state| state.0.as_str()).unwrap_or("*");
            format!("{}@{}", finding.management_type_id.0, state)
        })
        .collect::<Vec<_>>();
    format!(
        "{active} active rules, {} priority ties resolved by lowest id: {}",
        findings.len(),
        pairs.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use collecta_core::domain::rule::RuleId;
    use collecta_core::domain::state::{DebtStateId, ManagementTypeId};
    use collecta_core::transitions::RuleAmbiguity;

    use super::describe;

    #[test]
    fn describe_lists_each_tied_pair() {
        let findings = vec![
            RuleAmbiguity {
                management_type_id: ManagementTypeId("call".to_string()),
                state_id: Some(DebtStateId("new".to_string())),
                priority: 10,
                rule_ids: vec![RuleId(1), RuleId(6)],
            },
            RuleAmbiguity {
                management_type_id: ManagementTypeId("visit".to_string()),
                state_id: None,
                priority: 0,
                rule_ids: vec![RuleId(7), RuleId(8)],
            },
        ];

        assert_eq!(
            describe(8, &findings),
            "8 active rules, 2 priority ties resolved by lowest id: call@new, visit@*"
        );
        assert_eq!(describe(5, &[]), "5 active rules, no priority ties");
    }
}
