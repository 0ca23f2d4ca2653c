use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use collecta_core::domain::authorization::AuthorizationStatus;
use collecta_core::store::{AuthorizationFilter, CollectionsStore};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    store: Arc<dyn CollectionsStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: HealthCheck,
    pub authorization_queue: HealthCheck,
    pub checked_at: String,
}

pub fn router(store: Arc<dyn CollectionsStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { store })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.store.list_rules().await {
        Ok(rules) => HealthCheck {
            status: "ready",
            detail: format!("{} transition rules loaded", rules.len()),
        },
        Err(error) => HealthCheck { status: "degraded", detail: format!("store query failed: {error}") },
    };

    let pending = AuthorizationFilter {
        status: Some(AuthorizationStatus::Pending),
        ..AuthorizationFilter::default()
    };
    let authorization_queue = match state.store.list_authorization_requests(&pending).await {
        Ok(requests) => HealthCheck {
            status: "ready",
            detail: format!("{} requests awaiting resolution", requests.len()),
        },
        Err(error) => HealthCheck { status: "degraded", detail: format!("queue query failed: {error}") },
    };

    let ready = store.status == "ready" && authorization_queue.status == "ready";
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        store,
        authorization_queue,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
