use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use collecta_core::domain::authorization::{
    AuthorizationDecision, AuthorizationRequest, AuthorizationRequestId, AuthorizationResolution,
    AuthorizationStatus,
};
use collecta_core::domain::debt::{Debt, DebtId, PersonaId};
use collecta_core::domain::follow_up::{FollowUp, FollowUpId};
use collecta_core::domain::history::{DebtStateChange, StateChangeCause};
use collecta_core::domain::rule::{RuleDraft, RuleId, TransitionRule};
use collecta_core::domain::state::{DebtState, DebtStateId, ManagementType, ManagementTypeId};
use collecta_core::store::{
    AuthorizationFilter, CollectionsStore, FollowUpCommit, StoreError,
};

use super::{parse_date, parse_timestamp, RepositoryError};
use crate::DbPool;

const RULE_COLUMNS: &str = "id, management_type_id, origin_state_id, destination_state_id,
    requires_authorization, ui_message, priority, active";

const REQUEST_COLUMNS: &str = "id, debt_id, follow_up_id, rule_id, origin_state_id,
    destination_state_id, requesting_manager_id, assigned_supervisor_id, status, requested_at,
    resolved_at, resolver_id, requester_comment, supervisor_comment";

pub struct SqlCollectionsStore {
    pool: DbPool,
}

impl SqlCollectionsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn find_follow_ups_for_debt(
        &self,
        debt_id: &DebtId,
    ) -> Result<Vec<FollowUp>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT f.id, f.persona_id, f.manager_id, f.management_type_id, f.observation,
                    f.next_follow_up_date, f.created_at
             FROM follow_up f
             JOIN follow_up_debt fd ON fd.follow_up_id = f.id
             WHERE fd.debt_id = ?
             ORDER BY f.created_at DESC, f.id DESC",
        )
        .bind(&debt_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut follow_ups = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = get(row, "id")?;
            let debt_ids = sqlx::query(
                "SELECT debt_id FROM follow_up_debt WHERE follow_up_id = ? ORDER BY position",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| get::<String>(row, "debt_id").map(DebtId))
            .collect::<Result<Vec<_>, _>>()?;

            follow_ups.push(follow_up_from_row(row, debt_ids)?);
        }
        Ok(follow_ups)
    }

    async fn insert_rule(&self, draft: RuleDraft) -> Result<TransitionRule, RepositoryError> {
        let id = match draft.id {
            Some(id) => {
                sqlx::query(
                    "INSERT INTO transition_rule (id, management_type_id, origin_state_id,
                         destination_state_id, requires_authorization, ui_message, priority, active)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                         management_type_id = excluded.management_type_id,
                         origin_state_id = excluded.origin_state_id,
                         destination_state_id = excluded.destination_state_id,
                         requires_authorization = excluded.requires_authorization,
                         ui_message = excluded.ui_message,
                         priority = excluded.priority,
                         active = excluded.active",
                )
                .bind(id.0)
                .bind(&draft.management_type_id.0)
                .bind(draft.origin_state_id.as_ref().map(|s| s.0.as_str()))
                .bind(draft.destination_state_id.as_ref().map(|s| s.0.as_str()))
                .bind(draft.requires_authorization)
                .bind(&draft.ui_message)
                .bind(draft.priority)
                .bind(draft.active)
                .execute(&self.pool)
                .await?;
                id
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO transition_rule (management_type_id, origin_state_id,
                         destination_state_id, requires_authorization, ui_message, priority, active)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&draft.management_type_id.0)
                .bind(draft.origin_state_id.as_ref().map(|s| s.0.as_str()))
                .bind(draft.destination_state_id.as_ref().map(|s| s.0.as_str()))
                .bind(draft.requires_authorization)
                .bind(&draft.ui_message)
                .bind(draft.priority)
                .bind(draft.active)
                .execute(&self.pool)
                .await?;
                RuleId(result.last_insert_rowid())
            }
        };

        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM transition_rule WHERE id = ?"))
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;
        rule_from_row(&row)
    }

    async fn apply_follow_up(&self, commit: FollowUpCommit) -> Result<FollowUp, RepositoryError> {
        let follow_up = commit.follow_up;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO follow_up (id, persona_id, manager_id, management_type_id, observation,
                                    next_follow_up_date, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&follow_up.id.0)
        .bind(&follow_up.persona_id.0)
        .bind(&follow_up.manager_id)
        .bind(&follow_up.management_type_id.0)
        .bind(&follow_up.observation)
        .bind(follow_up.next_follow_up_date.format("%Y-%m-%d").to_string())
        .bind(follow_up.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (position, debt_id) in follow_up.debt_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO follow_up_debt (follow_up_id, debt_id, position) VALUES (?, ?, ?)",
            )
            .bind(&follow_up.id.0)
            .bind(&debt_id.0)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        for guarded in &commit.state_changes {
            move_debt(&mut tx, &guarded.change, &guarded.expected_state_id).await?;
        }

        for request in &commit.authorization_requests {
            insert_request(&mut tx, request).await?;
        }

        tx.commit().await?;
        Ok(follow_up)
    }

    async fn apply_resolution(
        &self,
        resolution: AuthorizationResolution,
    ) -> Result<AuthorizationRequest, RepositoryError> {
        let status = resolution.decision.resulting_status();
        let mut tx = self.pool.begin().await?;

        // The conditional update is the first statement so the transaction
        // takes the write lock before it reads anything.
        let updated = sqlx::query(
            "UPDATE authorization_request
             SET status = ?, resolved_at = ?, resolver_id = ?, supervisor_comment = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(resolution.resolved_at.to_rfc3339())
        .bind(&resolution.resolver_id)
        .bind(resolution.supervisor_comment.as_deref())
        .bind(&resolution.request_id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current = sqlx::query("SELECT status FROM authorization_request WHERE id = ?")
                .bind(&resolution.request_id.0)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match current {
                None => RepositoryError::NotFound {
                    entity: "authorization request",
                    id: resolution.request_id.0.clone(),
                },
                Some(row) => {
                    let status: String = get(&row, "status")?;
                    RepositoryError::Conflict(format!(
                        "authorization request `{}` is already {status}",
                        resolution.request_id
                    ))
                }
            });
        }

        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM authorization_request WHERE id = ?"
        ))
        .bind(&resolution.request_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let request = request_from_row(&row)?;

        if resolution.decision == AuthorizationDecision::Approve {
            let change = DebtStateChange {
                debt_id: request.debt_id.clone(),
                from_state_id: request.origin_state_id.clone(),
                to_state_id: request.destination_state_id.clone(),
                cause: StateChangeCause::Authorization,
                follow_up_id: request.follow_up_id.clone(),
                authorization_request_id: Some(request.id.clone()),
                changed_by: resolution.resolver_id.clone(),
                changed_at: resolution.resolved_at,
            };
            move_debt(&mut tx, &change, &request.origin_state_id).await?;
        }

        tx.commit().await?;
        Ok(request)
    }

    async fn apply_state_change(&self, change: DebtStateChange) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let expected = change.from_state_id.clone();
        move_debt(&mut tx, &change, &expected).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_requests(
        &self,
        filter: &AuthorizationFilter,
    ) -> Result<Vec<AuthorizationRequest>, RepositoryError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {REQUEST_COLUMNS} FROM authorization_request"));
        query.push(" WHERE 1=1");
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(supervisor) = &filter.assigned_supervisor_id {
            query.push(" AND assigned_supervisor_id = ").push_bind(supervisor.clone());
        }
        if let Some(debt_id) = &filter.debt_id {
            query.push(" AND debt_id = ").push_bind(debt_id.0.clone());
        }
        query.push(" ORDER BY requested_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(request_from_row).collect()
    }
}

/// Moves a debt only if it is still in `expected` and records the history row.
async fn move_debt(
    conn: &mut SqliteConnection,
    change: &DebtStateChange,
    expected: &DebtStateId,
) -> Result<(), RepositoryError> {
    let moved = sqlx::query(
        "UPDATE debt SET state_id = ?, updated_at = ? WHERE id = ? AND state_id = ?",
    )
    .bind(&change.to_state_id.0)
    .bind(change.changed_at.to_rfc3339())
    .bind(&change.debt_id.0)
    .bind(&expected.0)
    .execute(&mut *conn)
    .await?;

    if moved.rows_affected() == 0 {
        let current = sqlx::query("SELECT state_id FROM debt WHERE id = ?")
            .bind(&change.debt_id.0)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(match current {
            None => RepositoryError::NotFound { entity: "debt", id: change.debt_id.0.clone() },
            Some(row) => {
                let state: String = get(&row, "state_id")?;
                RepositoryError::Conflict(format!(
                    "debt `{}` is in state `{state}`, expected `{expected}`",
                    change.debt_id
                ))
            }
        });
    }

    sqlx::query(
        "INSERT INTO debt_state_change (debt_id, from_state_id, to_state_id, cause, follow_up_id,
                                        authorization_request_id, changed_by, changed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&change.debt_id.0)
    .bind(&change.from_state_id.0)
    .bind(&change.to_state_id.0)
    .bind(change.cause.as_str())
    .bind(change.follow_up_id.as_ref().map(|id| id.0.as_str()))
    .bind(change.authorization_request_id.as_ref().map(|id| id.0.as_str()))
    .bind(&change.changed_by)
    .bind(change.changed_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Inserts a pending request only while the debt is still in the request's
/// origin state and holds no other pending request. The partial unique index
/// on `authorization_request(debt_id)` backs the second condition for writers
/// that race past the `NOT EXISTS` check.
async fn insert_request(
    conn: &mut SqliteConnection,
    request: &AuthorizationRequest,
) -> Result<(), RepositoryError> {
    let inserted = sqlx::query(&format!(
        "INSERT INTO authorization_request ({REQUEST_COLUMNS})
         SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
         WHERE EXISTS (SELECT 1 FROM debt WHERE id = ? AND state_id = ?)
           AND NOT EXISTS (
               SELECT 1 FROM authorization_request WHERE debt_id = ? AND status = 'pending'
           )"
    ))
    .bind(&request.id.0)
    .bind(&request.debt_id.0)
    .bind(request.follow_up_id.as_ref().map(|id| id.0.as_str()))
    .bind(request.rule_id.map(|id| id.0))
    .bind(&request.origin_state_id.0)
    .bind(&request.destination_state_id.0)
    .bind(&request.requesting_manager_id)
    .bind(request.assigned_supervisor_id.as_deref())
    .bind(request.status.as_str())
    .bind(request.requested_at.to_rfc3339())
    .bind(request.resolved_at.map(|at| at.to_rfc3339()))
    .bind(request.resolver_id.as_deref())
    .bind(&request.requester_comment)
    .bind(request.supervisor_comment.as_deref())
    .bind(&request.debt_id.0)
    .bind(&request.origin_state_id.0)
    .bind(&request.debt_id.0)
    .execute(&mut *conn)
    .await
    .map_err(|error| match error {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(
            format!("debt `{}` already has a pending authorization request", request.debt_id),
        ),
        other => RepositoryError::Database(other),
    })?;

    if inserted.rows_affected() > 0 {
        return Ok(());
    }

    let current = sqlx::query("SELECT state_id FROM debt WHERE id = ?")
        .bind(&request.debt_id.0)
        .fetch_optional(&mut *conn)
        .await?;
    Err(match current {
        None => RepositoryError::NotFound { entity: "debt", id: request.debt_id.0.clone() },
        Some(row) => {
            let state: String = get(&row, "state_id")?;
            if state == request.origin_state_id.0 {
                RepositoryError::Conflict(format!(
                    "debt `{}` already has a pending authorization request",
                    request.debt_id
                ))
            } else {
                RepositoryError::Conflict(format!(
                    "debt `{}` is in state `{state}`, expected `{}`",
                    request.debt_id, request.origin_state_id
                ))
            }
        }
    })
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn state_from_row(row: &SqliteRow) -> Result<DebtState, RepositoryError> {
    Ok(DebtState {
        id: DebtStateId(get(row, "id")?),
        label: get(row, "label")?,
        sort_order: get(row, "sort_order")?,
        is_final: get(row, "is_final")?,
    })
}

fn management_type_from_row(row: &SqliteRow) -> Result<ManagementType, RepositoryError> {
    Ok(ManagementType {
        id: ManagementTypeId(get(row, "id")?),
        name: get(row, "name")?,
        description: get(row, "description")?,
        color: get(row, "color")?,
        icon: get(row, "icon")?,
        active: get(row, "active")?,
    })
}

fn rule_from_row(row: &SqliteRow) -> Result<TransitionRule, RepositoryError> {
    let origin: Option<String> = get(row, "origin_state_id")?;
    let destination: Option<String> = get(row, "destination_state_id")?;
    Ok(TransitionRule {
        id: RuleId(get(row, "id")?),
        management_type_id: ManagementTypeId(get(row, "management_type_id")?),
        origin_state_id: origin.map(DebtStateId),
        destination_state_id: destination.map(DebtStateId),
        requires_authorization: get(row, "requires_authorization")?,
        ui_message: get(row, "ui_message")?,
        priority: get(row, "priority")?,
        active: get(row, "active")?,
    })
}

fn debt_from_row(row: &SqliteRow) -> Result<Debt, RepositoryError> {
    let amount: String = get(row, "outstanding_amount")?;
    let updated_at: String = get(row, "updated_at")?;
    Ok(Debt {
        id: DebtId(get(row, "id")?),
        persona_id: PersonaId(get(row, "persona_id")?),
        state_id: DebtStateId(get(row, "state_id")?),
        assigned_manager_id: get(row, "assigned_manager_id")?,
        outstanding_amount: Decimal::from_str(&amount).map_err(|e| {
            RepositoryError::Decode(format!("outstanding_amount `{amount}` is not a decimal: {e}"))
        })?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn follow_up_from_row(row: &SqliteRow, debt_ids: Vec<DebtId>) -> Result<FollowUp, RepositoryError> {
    let next_date: String = get(row, "next_follow_up_date")?;
    let created_at: String = get(row, "created_at")?;
    Ok(FollowUp {
        id: FollowUpId(get(row, "id")?),
        persona_id: PersonaId(get(row, "persona_id")?),
        manager_id: get(row, "manager_id")?,
        management_type_id: ManagementTypeId(get(row, "management_type_id")?),
        debt_ids,
        observation: get(row, "observation")?,
        next_follow_up_date: parse_date("next_follow_up_date", &next_date)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn request_from_row(row: &SqliteRow) -> Result<AuthorizationRequest, RepositoryError> {
    let status: String = get(row, "status")?;
    let requested_at: String = get(row, "requested_at")?;
    let resolved_at: Option<String> = get(row, "resolved_at")?;
    let follow_up_id: Option<String> = get(row, "follow_up_id")?;
    let rule_id: Option<i64> = get(row, "rule_id")?;

    Ok(AuthorizationRequest {
        id: AuthorizationRequestId(get(row, "id")?),
        debt_id: DebtId(get(row, "debt_id")?),
        follow_up_id: follow_up_id.map(FollowUpId),
        rule_id: rule_id.map(RuleId),
        origin_state_id: DebtStateId(get(row, "origin_state_id")?),
        destination_state_id: DebtStateId(get(row, "destination_state_id")?),
        requesting_manager_id: get(row, "requesting_manager_id")?,
        assigned_supervisor_id: get(row, "assigned_supervisor_id")?,
        status: AuthorizationStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown authorization status `{status}`"))
        })?,
        requested_at: parse_timestamp("requested_at", &requested_at)?,
        resolved_at: resolved_at.as_deref().map(|raw| parse_timestamp("resolved_at", raw)).transpose()?,
        resolver_id: get(row, "resolver_id")?,
        requester_comment: get(row, "requester_comment")?,
        supervisor_comment: get(row, "supervisor_comment")?,
    })
}

fn state_change_from_row(row: &SqliteRow) -> Result<DebtStateChange, RepositoryError> {
    let cause: String = get(row, "cause")?;
    let changed_at: String = get(row, "changed_at")?;
    let follow_up_id: Option<String> = get(row, "follow_up_id")?;
    let request_id: Option<String> = get(row, "authorization_request_id")?;
    Ok(DebtStateChange {
        debt_id: DebtId(get(row, "debt_id")?),
        from_state_id: DebtStateId(get(row, "from_state_id")?),
        to_state_id: DebtStateId(get(row, "to_state_id")?),
        cause: StateChangeCause::parse(&cause)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown state change cause `{cause}`")))?,
        follow_up_id: follow_up_id.map(FollowUpId),
        authorization_request_id: request_id.map(AuthorizationRequestId),
        changed_by: get(row, "changed_by")?,
        changed_at: parse_timestamp("changed_at", &changed_at)?,
    })
}

#[async_trait]
impl CollectionsStore for SqlCollectionsStore {
    async fn debt_state(&self, id: &DebtStateId) -> Result<Option<DebtState>, StoreError> {
        let row = sqlx::query("SELECT id, label, sort_order, is_final FROM debt_state WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(state_from_row).transpose()?)
    }

    async fn management_type(
        &self,
        id: &ManagementTypeId,
    ) -> Result<Option<ManagementType>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, color, icon, active FROM management_type WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(management_type_from_row).transpose()?)
    }

    async fn active_rules(
        &self,
        management_type_id: &ManagementTypeId,
    ) -> Result<Vec<TransitionRule>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM transition_rule
             WHERE management_type_id = ? AND active = 1
             ORDER BY priority DESC, id ASC"
        ))
        .bind(&management_type_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(rows.iter().map(rule_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_rules(&self) -> Result<Vec<TransitionRule>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM transition_rule ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(rows.iter().map(rule_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_rule(&self, draft: RuleDraft) -> Result<TransitionRule, StoreError> {
        Ok(self.insert_rule(draft).await?)
    }

    async fn debt(&self, id: &DebtId) -> Result<Option<Debt>, StoreError> {
        let row = sqlx::query(
            "SELECT id, persona_id, state_id, assigned_manager_id, outstanding_amount, updated_at
             FROM debt WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(debt_from_row).transpose()?)
    }

    async fn set_debt_state(&self, change: DebtStateChange) -> Result<(), StoreError> {
        Ok(self.apply_state_change(change).await?)
    }

    async fn commit_follow_up(&self, commit: FollowUpCommit) -> Result<FollowUp, StoreError> {
        Ok(self.apply_follow_up(commit).await?)
    }

    async fn follow_ups_for_debt(&self, debt_id: &DebtId) -> Result<Vec<FollowUp>, StoreError> {
        Ok(self.find_follow_ups_for_debt(debt_id).await?)
    }

    async fn create_authorization_request(
        &self,
        request: AuthorizationRequest,
    ) -> Result<AuthorizationRequest, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        insert_request(&mut conn, &request).await?;
        Ok(request)
    }

    async fn authorization_request(
        &self,
        id: &AuthorizationRequestId,
    ) -> Result<Option<AuthorizationRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM authorization_request WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(request_from_row).transpose()?)
    }

    async fn list_authorization_requests(
        &self,
        filter: &AuthorizationFilter,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        Ok(self.find_requests(filter).await?)
    }

    async fn resolve_authorization_request(
        &self,
        resolution: AuthorizationResolution,
    ) -> Result<AuthorizationRequest, StoreError> {
        Ok(self.apply_resolution(resolution).await?)
    }

    async fn state_history(&self, debt_id: &DebtId) -> Result<Vec<DebtStateChange>, StoreError> {
        let rows = sqlx::query(
            "SELECT debt_id, from_state_id, to_state_id, cause, follow_up_id,
                    authorization_request_id, changed_by, changed_at
             FROM debt_state_change WHERE debt_id = ? ORDER BY id",
        )
        .bind(&debt_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(rows.iter().map(state_change_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}
