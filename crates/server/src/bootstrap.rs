use std::sync::Arc;

use collecta_core::audit::{AuditSink, TracingAuditSink};
use collecta_core::config::{AppConfig, ConfigError};
use collecta_core::store::CollectionsStore;
use collecta_core::transitions::TransitionEvaluator;
use collecta_core::{AuthorizationWorkflow, FollowUpRecorder, RuleCatalog};
use collecta_db::{connect_with_config, migrations, DbPool, SqlCollectionsStore};
use thiserror::Error;
use tracing::info;

use crate::api::Services;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Services,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store: Arc<dyn CollectionsStore> = Arc::new(SqlCollectionsStore::new(db_pool.clone()));
    let services = build_services(&config, store, Arc::new(TracingAuditSink));

    Ok(Application { config, db_pool, services })
}

/// Wires the core services with the rule and authorization settings from `config`.
pub fn build_services(
    config: &AppConfig,
    store: Arc<dyn CollectionsStore>,
    audit: Arc<dyn AuditSink>,
) -> Services {
    let default_supervisor = config.authorization.default_supervisor_id.clone();

    let recorder = FollowUpRecorder::new(store.clone(), audit.clone())
        .with_evaluator(TransitionEvaluator::new(config.rules.ambiguity))
        .with_unmatched_policy(config.rules.unmatched)
        .with_max_observation_chars(config.follow_up.max_observation_chars)
        .with_default_supervisor(default_supervisor.clone());
    let workflow = AuthorizationWorkflow::new(store.clone(), audit.clone())
        .with_thresholds(config.authorization.thresholds())
        .with_default_supervisor(default_supervisor);
    let rules = RuleCatalog::new(store, audit);

    Services { recorder: Arc::new(recorder), workflow: Arc::new(workflow), rules: Arc::new(rules) }
}

#[cfg(test)]
mod tests {
    use collecta_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    #[tokio::test]
    async fn bootstrap_applies_schema_and_wires_services() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed against an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('debt', 'follow_up', 'authorization_request', 'transition_rule')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 4);
        assert_eq!(
            app.services.workflow.thresholds(),
            app.config.authorization.thresholds()
        );

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_urls() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/collecta".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("invalid url must fail").to_string();
        assert!(message.contains("database.url"));
    }
}
