//! JSON API over the follow-up recorder, the authorization workflow and the
//! rule catalog. Callers identify themselves with `x-actor-id` and
//! `x-actor-role`; `x-correlation-id` is echoed into audit events and error
//! bodies, or generated when absent.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Path, Query, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use collecta_core::access::{Actor, Role};
use collecta_core::audit::AuditContext;
use collecta_core::authorizations::{ChangeRequest, QueuedAuthorization, ResolveCommand};
use collecta_core::domain::authorization::{
    AuthorizationRequest, AuthorizationRequestId, AuthorizationStatus,
};
use collecta_core::domain::debt::{DebtId, PersonaId};
use collecta_core::domain::follow_up::FollowUp;
use collecta_core::domain::rule::{RuleDraft, RuleId, TransitionRule};
use collecta_core::domain::state::{DebtStateId, ManagementTypeId};
use collecta_core::errors::{ApplicationError, FieldError, InterfaceError};
use collecta_core::follow_ups::{DebtEffect, DebtOutcome, FollowUpDraft, TransitionPreview};
use collecta_core::store::AuthorizationFilter;
use collecta_core::transitions::{RuleAmbiguity, SavedRule};
use collecta_core::{AuthorizationWorkflow, FollowUpRecorder, RuleCatalog};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct Services {
    pub recorder: Arc<FollowUpRecorder>,
    pub workflow: Arc<AuthorizationWorkflow>,
    pub rules: Arc<RuleCatalog>,
}

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/api/v1/follow-ups", post(record_follow_up))
        .route("/api/v1/debts/{debt_id}/follow-ups", get(list_follow_ups))
        .route("/api/v1/authorizations", post(request_change).get(list_authorizations))
        .route("/api/v1/authorizations/resolve", post(resolve_authorization))
        .route("/api/v1/transitions/preview", get(preview_transition))
        .route("/api/v1/rules", get(list_rules).put(save_rule))
        .with_state(services)
}

// ---------------------------------------------------------------------------
// Identity and errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub actor: Actor,
    pub correlation_id: String,
}

impl RequestContext {
    fn audit(&self) -> AuditContext {
        AuditContext::new(self.correlation_id.clone(), self.actor.id.clone())
    }

    fn fail(&self, error: ApplicationError) -> ApiError {
        ApiError(error.into_interface(self.correlation_id.clone()))
    }

    fn bad_request(&self, message: impl Into<String>, fields: Vec<FieldError>) -> ApiError {
        ApiError(InterfaceError::BadRequest {
            message: message.into(),
            fields,
            correlation_id: self.correlation_id.clone(),
        })
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = header(parts, CORRELATION_ID_HEADER)
            .unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()));
        let unauthorized = |message: String| {
            ApiError(InterfaceError::Unauthorized { message, correlation_id: correlation_id.clone() })
        };

        let actor_id = header(parts, ACTOR_ID_HEADER)
            .ok_or_else(|| unauthorized(format!("missing `{ACTOR_ID_HEADER}` header")))?;
        let role = header(parts, ACTOR_ROLE_HEADER)
            .ok_or_else(|| unauthorized(format!("missing `{ACTOR_ROLE_HEADER}` header")))?
            .parse::<Role>()
            .map_err(|error| unauthorized(error.to_string()))?;

        Ok(Self { actor: Actor::new(actor_id, role), correlation_id: correlation_id.clone() })
    }
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    class: &'static str,
    message: String,
    user_message: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
    correlation_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let user_message = self.0.user_message();
        let correlation_id = self.0.correlation_id().to_string();
        let (status, class, message, fields) = match self.0 {
            InterfaceError::BadRequest { message, fields, .. } => {
                (StatusCode::BAD_REQUEST, "bad_request", message, fields)
            }
            InterfaceError::Unauthorized { message, .. } => {
                (StatusCode::UNAUTHORIZED, "unauthorized", message, Vec::new())
            }
            InterfaceError::Forbidden { message, .. } => {
                (StatusCode::FORBIDDEN, "forbidden", message, Vec::new())
            }
            InterfaceError::NotFound { message, .. } => {
                (StatusCode::NOT_FOUND, "not_found", message, Vec::new())
            }
            InterfaceError::Conflict { message, .. } => {
                (StatusCode::CONFLICT, "conflict", message, Vec::new())
            }
            InterfaceError::ServiceUnavailable { message, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message, Vec::new())
            }
            InterfaceError::Internal { message, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", message, Vec::new())
            }
        };

        if status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = %correlation_id,
                class = class,
                error = %message,
                "request failed"
            );
        }

        let body = ErrorBody {
            error: ErrorDetail { class, message, user_message, fields, correlation_id },
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFollowUpBody {
    pub persona_id: String,
    #[serde(default)]
    pub debt_ids: Vec<String>,
    pub management_type_id: String,
    #[serde(default)]
    pub observation: String,
    pub next_follow_up_date: Option<NaiveDate>,
}

impl From<RecordFollowUpBody> for FollowUpDraft {
    fn from(body: RecordFollowUpBody) -> Self {
        Self {
            persona_id: PersonaId(body.persona_id),
            debt_ids: body.debt_ids.into_iter().map(DebtId).collect(),
            management_type_id: ManagementTypeId(body.management_type_id),
            observation: body.observation,
            next_follow_up_date: body.next_follow_up_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestBody {
    pub debt_id: String,
    pub origin_state_id: Option<String>,
    pub destination_state_id: String,
    #[serde(default)]
    pub comment: String,
    pub assigned_supervisor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    pub request_id: String,
    pub approve: bool,
    pub supervisor_comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationQuery {
    pub status: Option<String>,
    pub supervisor_id: Option<String>,
    pub debt_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewQuery {
    pub management_type_id: Option<String>,
    pub state_id: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBody {
    pub id: Option<i64>,
    pub management_type_id: String,
    pub origin_state_id: Option<String>,
    pub destination_state_id: Option<String>,
    #[serde(default)]
    pub requires_authorization: bool,
    #[serde(default)]
    pub ui_message: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl From<RuleBody> for RuleDraft {
    fn from(body: RuleBody) -> Self {
        Self {
            id: body.id.map(RuleId),
            management_type_id: ManagementTypeId(body.management_type_id),
            origin_state_id: body.origin_state_id.map(DebtStateId),
            destination_state_id: body.destination_state_id.map(DebtStateId),
            requires_authorization: body.requires_authorization,
            ui_message: body.ui_message,
            priority: body.priority,
            active: body.active,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpView {
    pub id: String,
    pub persona_id: String,
    pub manager_id: String,
    pub management_type_id: String,
    pub debt_ids: Vec<String>,
    pub observation: String,
    pub next_follow_up_date: NaiveDate,
    pub created_at: String,
}

impl From<FollowUp> for FollowUpView {
    fn from(follow_up: FollowUp) -> Self {
        Self {
            id: follow_up.id.0,
            persona_id: follow_up.persona_id.0,
            manager_id: follow_up.manager_id,
            management_type_id: follow_up.management_type_id.0,
            debt_ids: follow_up.debt_ids.into_iter().map(|id| id.0).collect(),
            observation: follow_up.observation,
            next_follow_up_date: follow_up.next_follow_up_date,
            created_at: follow_up.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeView {
    pub debt_id: String,
    pub rule_id: Option<i64>,
    pub from_state_id: String,
    pub to_state_id: String,
    pub ui_message: Option<String>,
    pub effect: &'static str,
    pub authorization_request_id: Option<String>,
}

impl From<DebtOutcome> for OutcomeView {
    fn from(outcome: DebtOutcome) -> Self {
        let (effect, request_id) = match outcome.effect {
            DebtEffect::Applied => ("applied", None),
            DebtEffect::AuthorizationRequested { request_id } => {
                ("authorization_requested", Some(request_id.0))
            }
            DebtEffect::AlreadyPending { request_id } => ("already_pending", Some(request_id.0)),
            DebtEffect::Unchanged => ("unchanged", None),
            DebtEffect::NoRule => ("no_rule", None),
        };
        Self {
            debt_id: outcome.debt_id.0,
            rule_id: outcome.rule_id.map(|id| id.0),
            from_state_id: outcome.from_state_id.0,
            to_state_id: outcome.to_state_id.0,
            ui_message: outcome.ui_message,
            effect,
            authorization_request_id: request_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptView {
    pub follow_up: FollowUpView,
    pub outcomes: Vec<OutcomeView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationView {
    pub id: String,
    pub debt_id: String,
    pub follow_up_id: Option<String>,
    pub rule_id: Option<i64>,
    pub origin_state_id: String,
    pub destination_state_id: String,
    pub requesting_manager_id: String,
    pub assigned_supervisor_id: Option<String>,
    pub status: &'static str,
    pub requested_at: String,
    pub resolved_at: Option<String>,
    pub resolver_id: Option<String>,
    pub requester_comment: String,
    pub supervisor_comment: Option<String>,
}

impl From<AuthorizationRequest> for AuthorizationView {
    fn from(request: AuthorizationRequest) -> Self {
        Self {
            id: request.id.0,
            debt_id: request.debt_id.0,
            follow_up_id: request.follow_up_id.map(|id| id.0),
            rule_id: request.rule_id.map(|id| id.0),
            origin_state_id: request.origin_state_id.0,
            destination_state_id: request.destination_state_id.0,
            requesting_manager_id: request.requesting_manager_id,
            assigned_supervisor_id: request.assigned_supervisor_id,
            status: request.status.as_str(),
            requested_at: request.requested_at.to_rfc3339(),
            resolved_at: request.resolved_at.map(|at| at.to_rfc3339()),
            resolver_id: request.resolver_id,
            requester_comment: request.requester_comment,
            supervisor_comment: request.supervisor_comment,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItemView {
    #[serde(flatten)]
    pub request: AuthorizationView,
    pub priority: &'static str,
    pub waiting_minutes: i64,
}

impl From<QueuedAuthorization> for QueueItemView {
    fn from(item: QueuedAuthorization) -> Self {
        let priority = match item.priority {
            collecta_core::RequestPriority::Normal => "normal",
            collecta_core::RequestPriority::High => "high",
            collecta_core::RequestPriority::Urgent => "urgent",
        };
        Self { request: item.request.into(), priority, waiting_minutes: item.waiting_minutes }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleView {
    pub id: i64,
    pub management_type_id: String,
    pub origin_state_id: Option<String>,
    pub destination_state_id: Option<String>,
    pub requires_authorization: bool,
    pub ui_message: String,
    pub priority: i32,
    pub active: bool,
}

impl From<TransitionRule> for RuleView {
    fn from(rule: TransitionRule) -> Self {
        Self {
            id: rule.id.0,
            management_type_id: rule.management_type_id.0,
            origin_state_id: rule.origin_state_id.map(|id| id.0),
            destination_state_id: rule.destination_state_id.map(|id| id.0),
            requires_authorization: rule.requires_authorization,
            ui_message: rule.ui_message,
            priority: rule.priority,
            active: rule.active,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbiguityView {
    pub management_type_id: String,
    pub state_id: Option<String>,
    pub priority: i32,
    pub rule_ids: Vec<i64>,
}

impl From<RuleAmbiguity> for AmbiguityView {
    fn from(finding: RuleAmbiguity) -> Self {
        Self {
            management_type_id: finding.management_type_id.0,
            state_id: finding.state_id.map(|id| id.0),
            priority: finding.priority,
            rule_ids: finding.rule_ids.into_iter().map(|id| id.0).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRuleView {
    pub rule: RuleView,
    pub ambiguities: Vec<AmbiguityView>,
}

impl From<SavedRule> for SavedRuleView {
    fn from(saved: SavedRule) -> Self {
        Self {
            rule: saved.rule.into(),
            ambiguities: saved.ambiguities.into_iter().map(AmbiguityView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewView {
    pub management_type_id: String,
    pub state_id: String,
    pub matched_rule: Option<RuleView>,
    pub destination_state_id: Option<String>,
    pub changes_state: bool,
    pub requires_authorization: bool,
    pub ui_message: Option<String>,
}

impl From<TransitionPreview> for PreviewView {
    fn from(preview: TransitionPreview) -> Self {
        let changes_state = preview.matched.as_ref().is_some_and(|matched| matched.changes_state());
        let destination_state_id =
            preview.matched.as_ref().map(|matched| matched.destination_state_id.0.clone());
        let ui_message = preview.matched.as_ref().map(|matched| matched.rule.ui_message.clone());
        Self {
            management_type_id: preview.management_type_id.0,
            state_id: preview.state_id.0,
            matched_rule: preview.matched.map(|matched| matched.rule.into()),
            destination_state_id,
            changes_state,
            requires_authorization: preview.requires_authorization,
            ui_message,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn json_body<T>(context: &RequestContext, body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| context.bad_request(rejection.body_text(), Vec::new()))
}

fn query_params<T>(
    context: &RequestContext,
    query: Result<Query<T>, QueryRejection>,
) -> Result<T, ApiError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| context.bad_request(rejection.body_text(), Vec::new()))
}

async fn record_follow_up(
    State(services): State<Services>,
    context: RequestContext,
    body: Result<Json<RecordFollowUpBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ReceiptView>), ApiError> {
    let draft = FollowUpDraft::from(json_body(&context, body)?);
    let receipt = services
        .recorder
        .record(&context.actor, &context.audit(), draft)
        .await
        .map_err(|error| context.fail(error))?;

    Ok((
        StatusCode::CREATED,
        Json(ReceiptView {
            follow_up: receipt.follow_up.into(),
            outcomes: receipt.outcomes.into_iter().map(OutcomeView::from).collect(),
        }),
    ))
}

async fn list_follow_ups(
    State(services): State<Services>,
    context: RequestContext,
    Path(debt_id): Path<String>,
) -> Result<Json<Vec<FollowUpView>>, ApiError> {
    let follow_ups = services
        .recorder
        .history(&context.actor, &DebtId(debt_id))
        .await
        .map_err(|error| context.fail(error))?;

    Ok(Json(follow_ups.into_iter().map(FollowUpView::from).collect()))
}

async fn request_change(
    State(services): State<Services>,
    context: RequestContext,
    body: Result<Json<ChangeRequestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthorizationView>), ApiError> {
    let body = json_body(&context, body)?;
    let change = ChangeRequest {
        debt_id: DebtId(body.debt_id),
        origin_state_id: body.origin_state_id.map(DebtStateId),
        destination_state_id: DebtStateId(body.destination_state_id),
        comment: body.comment,
        assigned_supervisor_id: body.assigned_supervisor_id,
    };
    let request = services
        .workflow
        .request_change(&context.actor, &context.audit(), change)
        .await
        .map_err(|error| context.fail(error))?;

    Ok((StatusCode::CREATED, Json(request.into())))
}

async fn list_authorizations(
    State(services): State<Services>,
    context: RequestContext,
    query: Result<Query<AuthorizationQuery>, QueryRejection>,
) -> Result<Json<Vec<QueueItemView>>, ApiError> {
    let query = query_params(&context, query)?;

    let status = match query.status.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        None | Some("all") => None,
        Some(raw) => Some(AuthorizationStatus::parse(raw).ok_or_else(|| {
            context.bad_request(
                "invalid status filter",
                vec![FieldError::new(
                    "status",
                    format!("unknown status `{raw}` (expected pending|approved|rejected|all)"),
                )],
            )
        })?),
    };
    let filter = AuthorizationFilter {
        status,
        assigned_supervisor_id: query.supervisor_id,
        debt_id: query.debt_id.map(DebtId),
        limit: query.limit,
    };

    let queue = services
        .workflow
        .queue(&context.actor, filter, Utc::now())
        .await
        .map_err(|error| context.fail(error))?;

    Ok(Json(queue.into_iter().map(QueueItemView::from).collect()))
}

async fn resolve_authorization(
    State(services): State<Services>,
    context: RequestContext,
    body: Result<Json<ResolveBody>, JsonRejection>,
) -> Result<Json<AuthorizationView>, ApiError> {
    let body = json_body(&context, body)?;
    let command = ResolveCommand {
        request_id: AuthorizationRequestId(body.request_id),
        approve: body.approve,
        supervisor_comment: body.supervisor_comment,
    };
    let resolved = services
        .workflow
        .resolve(&context.actor, &context.audit(), command)
        .await
        .map_err(|error| context.fail(error))?;

    Ok(Json(resolved.into()))
}

async fn preview_transition(
    State(services): State<Services>,
    context: RequestContext,
    query: Result<Query<PreviewQuery>, QueryRejection>,
) -> Result<Json<PreviewView>, ApiError> {
    let query = query_params(&context, query)?;

    let non_blank = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let management_type_id = non_blank(query.management_type_id);
    let state_id = non_blank(query.state_id);

    let mut fields = Vec::new();
    if management_type_id.is_none() {
        fields.push(FieldError::new("managementTypeId", "is required"));
    }
    if state_id.is_none() {
        fields.push(FieldError::new("stateId", "is required"));
    }
    let (Some(management_type_id), Some(state_id)) = (management_type_id, state_id) else {
        return Err(context.bad_request("missing preview parameters", fields));
    };

    let preview = services
        .recorder
        .preview(&context.actor, &ManagementTypeId(management_type_id), &DebtStateId(state_id))
        .await
        .map_err(|error| context.fail(error))?;

    Ok(Json(preview.into()))
}

async fn list_rules(
    State(services): State<Services>,
    context: RequestContext,
) -> Result<Json<Vec<RuleView>>, ApiError> {
    let rules = services.rules.list(&context.actor).await.map_err(|error| context.fail(error))?;
    Ok(Json(rules.into_iter().map(RuleView::from).collect()))
}

async fn save_rule(
    State(services): State<Services>,
    context: RequestContext,
    body: Result<Json<RuleBody>, JsonRejection>,
) -> Result<Json<SavedRuleView>, ApiError> {
    let draft = RuleDraft::from(json_body(&context, body)?);
    let saved = services
        .rules
        .save(&context.actor, &context.audit(), draft)
        .await
        .map_err(|error| context.fail(error))?;

    Ok(Json(saved.into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{Days, Utc};
    use collecta_core::audit::InMemoryAuditSink;
    use collecta_core::config::AppConfig;
    use collecta_db::{InMemoryCollectionsStore, ReferenceData};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;
    use crate::bootstrap::build_services;

    async fn app() -> Router {
        let store = InMemoryCollectionsStore::new();
        ReferenceData::standard().load_into_memory(&store).await.expect("seed");
        let services = build_services(
            &AppConfig::default(),
            Arc::new(store),
            Arc::new(InMemoryAuditSink::default()),
        );
        router(services)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        actor: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-correlation-id", "req-test");
        if let Some((id, role)) = actor {
            builder = builder.header("x-actor-id", id).header("x-actor-role", role);
        }
        let body = body.map(|value| Body::from(value.to_string())).unwrap_or_else(Body::empty);
        let response =
            app.clone().oneshot(builder.body(body).expect("request")).await.expect("response");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn follow_up(management_type: &str, debts: &[&str]) -> Value {
        let next = Utc::now().date_naive().checked_add_days(Days::new(2)).expect("date");
        json!({
            "personaId": "P-1",
            "debtIds": debts,
            "managementTypeId": management_type,
            "observation": "Agreed on six installments",
            "nextFollowUpDate": next.format("%Y-%m-%d").to_string(),
        })
    }

    const COLLECTOR: Option<(&str, &str)> = Some(("collector-1", "collector"));
    const SUPERVISOR: Option<(&str, &str)> = Some(("supervisor-1", "supervisor"));
    const ADMIN: Option<(&str, &str)> = Some(("admin-1", "administrator"));

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let app = app().await;
        let (status, body) =
            send(&app, "POST", "/api/v1/follow-ups", None, Some(follow_up("call", &["D-101"]))).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["class"], "unauthorized");
        assert_eq!(body["error"]["correlationId"], "req-test");
    }

    #[tokio::test]
    async fn payment_agreement_flows_through_supervisor_approval() {
        let app = app().await;

        let (status, receipt) = send(
            &app,
            "POST",
            "/api/v1/follow-ups",
            COLLECTOR,
            Some(follow_up("payment_agreement", &["D-100"])),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let outcome = &receipt["outcomes"][0];
        assert_eq!(outcome["effect"], "authorization_requested");
        assert_eq!(outcome["fromStateId"], "in_management");
        let request_id = outcome["authorizationRequestId"].as_str().expect("request id").to_string();

        let (status, queue) =
            send(&app, "GET", "/api/v1/authorizations?status=pending", SUPERVISOR, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(queue.as_array().map(Vec::len), Some(1));
        assert_eq!(queue[0]["priority"], "normal");
        assert_eq!(queue[0]["id"], request_id.as_str());

        let resolve = json!({ "requestId": request_id, "approve": true, "supervisorComment": "ok" });
        let (status, resolved) =
            send(&app, "POST", "/api/v1/authorizations/resolve", SUPERVISOR, Some(resolve.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["status"], "approved");
        assert_eq!(resolved["resolverId"], "supervisor-1");

        let (status, body) =
            send(&app, "POST", "/api/v1/authorizations/resolve", ADMIN, Some(resolve)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["class"], "conflict");
    }

    #[tokio::test]
    async fn validation_failures_list_the_offending_fields() {
        let app = app().await;
        let body = json!({
            "personaId": "P-1",
            "debtIds": [],
            "managementTypeId": "call",
            "observation": "   ",
            "nextFollowUpDate": "2001-01-01",
        });

        let (status, response) = send(&app, "POST", "/api/v1/follow-ups", COLLECTOR, Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields = response["error"]["fields"]
            .as_array()
            .expect("fields")
            .iter()
            .map(|field| field["field"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(fields, vec!["debtIds", "observation", "nextFollowUpDate"]);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = app().await;
        let (status, body) =
            send(&app, "POST", "/api/v1/follow-ups", COLLECTOR, Some(json!({ "debtIds": 7 }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["class"], "bad_request");
    }

    #[tokio::test]
    async fn role_checks_map_to_forbidden() {
        let app = app().await;

        let (status, _) = send(&app, "GET", "/api/v1/authorizations", COLLECTOR, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, "GET", "/api/v1/rules", SUPERVISOR, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, rules) = send(&app, "GET", "/api/v1/rules", ADMIN, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rules.as_array().map(Vec::len), Some(5));
    }

    #[tokio::test]
    async fn follow_up_history_for_unknown_debt_is_not_found() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/api/v1/debts/D-404/follow-ups", COLLECTOR, None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"]["message"].as_str().unwrap_or_default().contains("D-404"));
    }

    #[tokio::test]
    async fn immediate_rule_shows_up_in_history() {
        let app = app().await;
        let (status, receipt) =
            send(&app, "POST", "/api/v1/follow-ups", COLLECTOR, Some(follow_up("call", &["D-101"]))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(receipt["outcomes"][0]["effect"], "applied");
        assert_eq!(receipt["outcomes"][0]["toStateId"], "in_management");

        let (status, history) = send(&app, "GET", "/api/v1/debts/D-101/follow-ups", COLLECTOR, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["managementTypeId"], "call");
        assert_eq!(history[0]["managerId"], "collector-1");
    }

    #[tokio::test]
    async fn preview_reports_authorization_gate() {
        let app = app().await;

        let (status, preview) = send(
            &app,
            "GET",
            "/api/v1/transitions/preview?managementTypeId=payment_agreement&stateId=in_management",
            COLLECTOR,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(preview["requiresAuthorization"], true);
        assert_eq!(preview["destinationStateId"], "agreed");

        let (status, body) =
            send(&app, "GET", "/api/v1/transitions/preview?stateId=new", COLLECTOR, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["fields"][0]["field"], "managementTypeId");
    }

    #[tokio::test]
    async fn administrators_save_rules_and_see_ties() {
        let app = app().await;
        let rule = json!({
            "managementTypeId": "call",
            "originStateId": "new",
            "destinationStateId": "legal",
            "requiresAuthorization": true,
            "uiMessage": "Escalate",
            "priority": 10,
        });

        let (status, _) = send(&app, "PUT", "/api/v1/rules", SUPERVISOR, Some(rule.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, saved) = send(&app, "PUT", "/api/v1/rules", ADMIN, Some(rule)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["rule"]["active"], true);
        assert_eq!(saved["ambiguities"][0]["stateId"], "new");
    }

    #[tokio::test]
    async fn manual_change_request_and_invalid_status_filter() {
        let app = app().await;
        let change = json!({
            "debtId": "D-102",
            "destinationStateId": "legal",
            "comment": "No contact in 90 days",
        });
        let (status, created) = send(&app, "POST", "/api/v1/authorizations", COLLECTOR, Some(change)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        assert_eq!(created["originStateId"], "in_management");

        let (status, body) =
            send(&app, "GET", "/api/v1/authorizations?status=escalated", SUPERVISOR, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["fields"][0]["field"], "status");
    }
}
