use std::collections::BTreeSet;

use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Versions embedded in this binary.
pub fn known_versions() -> BTreeSet<i64> {
    MIGRATOR.iter().map(|migration| migration.version).collect()
}

/// Versions recorded as successfully applied; empty when the database was never migrated.
pub async fn applied_versions(pool: &DbPool) -> Result<BTreeSet<i64>, sqlx::Error> {
    let tracked: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    if tracked.is_none() {
        return Ok(BTreeSet::new());
    }

    let versions: Vec<i64> =
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
    Ok(versions.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_versions, known_versions, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "debt_state",
        "management_type",
        "persona",
        "debt",
        "transition_rule",
        "follow_up",
        "follow_up_debt",
        "authorization_request",
        "debt_state_change",
        "idx_debt_persona_id",
        "idx_debt_state_id",
        "idx_transition_rule_lookup",
        "idx_follow_up_persona_id",
        "idx_follow_up_debt_debt_id",
        "idx_authorization_request_status",
        "idx_authorization_request_debt_id",
        "idx_authorization_request_supervisor",
        "idx_debt_state_change_debt_id",
        "idx_authorization_request_one_pending",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("query sqlite_master")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_collections_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in [
            "debt_state",
            "management_type",
            "persona",
            "debt",
            "transition_rule",
            "follow_up",
            "follow_up_debt",
            "authorization_request",
            "debt_state_change",
        ] {
            assert_eq!(table_count(&pool, table).await, 1, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn applied_versions_track_the_embedded_migrations() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(applied_versions(&pool).await.expect("fresh database").is_empty());

        run_pending(&pool).await.expect("migrations");
        assert_eq!(applied_versions(&pool).await.expect("applied"), known_versions());
        assert!(!known_versions().is_empty());
    }

    #[tokio::test]
    async fn authorization_status_is_constrained() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO debt_state (id, label) VALUES ('new', 'New')")
            .execute(&pool)
            .await
            .expect("insert state");
        sqlx::query("INSERT INTO persona (id, full_name) VALUES ('P-1', 'Ana')")
            .execute(&pool)
            .await
            .expect("insert persona");
        sqlx::query(
            "INSERT INTO debt (id, persona_id, state_id, updated_at)
             VALUES ('D-1', 'P-1', 'new', '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert debt");

        let result = sqlx::query(
            "INSERT INTO authorization_request
                (id, debt_id, origin_state_id, destination_state_id, requesting_manager_id,
                 status, requested_at)
             VALUES ('AUTH-1', 'D-1', 'new', 'new', 'collector-1', 'escalated',
                     '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;

        assert!(result.is_err(), "unknown statuses must be rejected by the schema");
    }

    #[tokio::test]
    async fn a_debt_holds_at_most_one_pending_request() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO debt_state (id, label) VALUES ('new', 'New')")
            .execute(&pool)
            .await
            .expect("insert state");
        sqlx::query("INSERT INTO persona (id, full_name) VALUES ('P-1', 'Ana')")
            .execute(&pool)
            .await
            .expect("insert persona");
        sqlx::query(
            "INSERT INTO debt (id, persona_id, state_id, updated_at)
             VALUES ('D-1', 'P-1', 'new', '2026-03-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert debt");

        let insert = |id: &'static str, status: &'static str| {
            sqlx::query(
                "INSERT INTO authorization_request
                    (id, debt_id, origin_state_id, destination_state_id, requesting_manager_id,
                     status, requested_at)
                 VALUES (?, 'D-1', 'new', 'new', 'collector-1', ?, '2026-03-01T00:00:00Z')",
            )
            .bind(id)
            .bind(status)
        };

        insert("AUTH-1", "approved").execute(&pool).await.expect("resolved request");
        insert("AUTH-2", "pending").execute(&pool).await.expect("first pending request");

        let error = insert("AUTH-3", "pending")
            .execute(&pool)
            .await
            .expect_err("second pending request must be rejected");
        let unique = matches!(&error, sqlx::Error::Database(db) if db.is_unique_violation());
        assert!(unique, "expected a unique violation, got {error}");

        insert("AUTH-4", "rejected").execute(&pool).await.expect("resolved requests are unbounded");
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "authorization_request").await, 0);
        assert_eq!(table_count(&pool, "debt").await, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
