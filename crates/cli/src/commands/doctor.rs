use collecta_core::config::{AppConfig, LoadOptions};
use collecta_core::store::CollectionsStore;
use collecta_core::transitions::audit_rule_set;
use collecta_db::{connect_with_config, migrations, DbPool, SqlCollectionsStore};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "schema_current", "rule_set"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: format!(
                    "configuration loaded (ambiguity={:?}, unmatched={:?})",
                    config.rules.ambiguity, config.rules.unmatched
                ),
            });
            checks.extend(database_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(
                DATABASE_CHECKS
                    .iter()
                    .map(|name| DoctorCheck::skipped(name, "configuration did not load")),
            );
        }
    }

    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else if warned {
        (CheckStatus::Warn, "doctor: ready with warnings")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn database_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
            checks.extend(
                DATABASE_CHECKS[1..]
                    .iter()
                    .map(|name| DoctorCheck::skipped(name, "the async runtime did not start")),
            );
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                let mut checks = vec![DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                }];
                checks.extend(
                    DATABASE_CHECKS[1..]
                        .iter()
                        .map(|name| DoctorCheck::skipped(name, "the database is unreachable")),
                );
                return checks;
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];
        let schema = check_schema(&pool).await;
        let schema_ready = schema.status == CheckStatus::Pass;
        checks.push(schema);
        if schema_ready {
            checks.push(check_rule_set(&pool).await);
        } else {
            checks.push(DoctorCheck::skipped("rule_set", "the schema is not current"));
        }

        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let known = migrations::known_versions();
    match migrations::applied_versions(pool).await {
        Ok(applied) => {
            let missing = known.difference(&applied).map(ToString::to_string).collect::<Vec<_>>();
            if missing.is_empty() {
                DoctorCheck {
                    name: "schema_current",
                    status: CheckStatus::Pass,
                    details: format!("{} migrations applied", applied.len()),
                }
            } else {
                DoctorCheck {
                    name: "schema_current",
                    status: CheckStatus::Fail,
                    details: format!(
                        "pending migrations: {} (run `collecta migrate`)",
                        missing.join(", ")
                    ),
                }
            }
        }
        Err(error) => DoctorCheck {
            name: "schema_current",
            status: CheckStatus::Fail,
            details: format!("failed to read migration history: {error}"),
        },
    }
}

async fn check_rule_set(pool: &DbPool) -> DoctorCheck {
    let store = SqlCollectionsStore::new(pool.clone());
    match store.list_rules().await {
        Ok(rules) => {
            let active = rules.iter().filter(|rule| rule.active).count();
            let ties = audit_rule_set(&rules).len();
            let status = if active == 0 || ties > 0 { CheckStatus::Warn } else { CheckStatus::Pass };
            DoctorCheck {
                name: "rule_set",
                status,
                details: format!("{active} active rules, {ties} priority ties"),
            }
        }
        Err(error) => DoctorCheck {
            name: "rule_set",
            status: CheckStatus::Fail,
            details: format!("failed to load transition rules: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render_human, summarize, CheckStatus, DoctorCheck};

    fn check(name: &'static str, status: CheckStatus) -> DoctorCheck {
        DoctorCheck { name, status, details: String::new() }
    }

    #[test]
    fn warnings_do_not_fail_the_report() {
        let report = summarize(vec![
            check("config_validation", CheckStatus::Pass),
            check("rule_set", CheckStatus::Warn),
        ]);
        assert_eq!(report.overall_status, CheckStatus::Warn);
        assert!(render_human(&report).contains("- [warn] rule_set"));
    }

    #[test]
    fn any_failure_fails_the_report() {
        let report = summarize(vec![
            check("config_validation", CheckStatus::Fail),
            DoctorCheck::skipped("rule_set", "configuration did not load"),
        ]);
        assert_eq!(report.overall_status, CheckStatus::Fail);
        assert_eq!(report.summary, "doctor: one or more readiness checks failed");
    }
}
