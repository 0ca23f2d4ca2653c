use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use collecta_cli::commands::{doctor, migrate, rules, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[("COLLECTA_DATABASE_URL", "sqlite::memory:"), ("COLLECTA_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("COLLECTA_DATABASE_URL", "postgres://localhost/collecta")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_against_a_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("collecta.db"));

    with_env(&[("COLLECTA_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected seed success: {}", first.output);
        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected repeat seed success: {}", second.output);

        let first = parse_payload(&first.output);
        let second = parse_payload(&second.output);
        assert_eq!(first["command"], "seed");
        assert_eq!(first["message"], second["message"]);
        assert_eq!(first["details"]["rules"], 5);
        assert_eq!(first["details"]["debts"], 4);
    });
}

#[test]
fn rules_audit_reports_no_ties_for_the_reference_catalog() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("collecta.db"));

    with_env(&[("COLLECTA_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0);

        let result = rules::audit(true);
        assert_eq!(result.exit_code, 0, "strict audit should pass: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "rules.audit");
        assert_eq!(payload["details"]["active_rules"], 5);
        assert_eq!(payload["details"]["ambiguities"], Value::Array(Vec::new()));
    });
}

#[test]
fn rules_audit_fails_when_the_store_has_no_schema() {
    with_env(
        &[("COLLECTA_DATABASE_URL", "sqlite::memory:"), ("COLLECTA_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = rules::audit(false);
            assert_eq!(result.exit_code, 5, "expected query failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "rule_query");
        },
    );
}

#[test]
fn doctor_passes_after_seeding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("collecta.db"));

    with_env(&[("COLLECTA_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0);

        let report = parse_payload(&doctor::run(true));
        assert_eq!(report["overall_status"], "pass", "report: {report}");
        let names = report["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .map(|check| check["name"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["config_validation", "database_connectivity", "schema_current", "rule_set"]
        );
    });
}

#[test]
fn doctor_flags_an_unmigrated_database() {
    with_env(
        &[("COLLECTA_DATABASE_URL", "sqlite::memory:"), ("COLLECTA_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let report = parse_payload(&doctor::run(true));
            assert_eq!(report["overall_status"], "fail");
            assert_eq!(report["checks"][2]["name"], "schema_current");
            assert_eq!(report["checks"][2]["status"], "fail");
            assert_eq!(report["checks"][3]["status"], "skipped");
        },
    );
}

#[test]
fn doctor_skips_database_checks_when_config_is_invalid() {
    with_env(&[("COLLECTA_RULES_AMBIGUITY", "coin_flip")], || {
        let human = doctor::run(false);
        assert!(human.starts_with("doctor: one or more readiness checks failed"));
        assert!(human.contains("- [fail] config_validation"));
        assert!(human.contains("- [skip] database_connectivity"));
    });
}

fn file_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "COLLECTA_DATABASE_URL",
        "COLLECTA_DATABASE_MAX_CONNECTIONS",
        "COLLECTA_DATABASE_TIMEOUT_SECS",
        "COLLECTA_SERVER_BIND_ADDRESS",
        "COLLECTA_SERVER_PORT",
        "COLLECTA_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "COLLECTA_LOGGING_LEVEL",
        "COLLECTA_LOGGING_FORMAT",
        "COLLECTA_LOG_LEVEL",
        "COLLECTA_LOG_FORMAT",
        "COLLECTA_RULES_AMBIGUITY",
        "COLLECTA_RULES_UNMATCHED",
        "COLLECTA_AUTHORIZATION_HIGH_AFTER_HOURS",
        "COLLECTA_AUTHORIZATION_URGENT_AFTER_HOURS",
        "COLLECTA_AUTHORIZATION_DEFAULT_SUPERVISOR_ID",
        "COLLECTA_FOLLOW_UP_MAX_OBSERVATION_CHARS",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
