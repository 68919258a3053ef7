//! Route handlers, spec.md §6.
//!
//! Grounded in the teacher's `api::routes` axum handler shape (thin
//! handler, `State<AppState>` extractor, `serde_json::json!` error bodies)
//! reused verbatim and repointed at the payment/refund/risk surface.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

use crate::alerts::AlertHub;
use crate::error::OrchestratorError;
use crate::models::{PaymentRequest, RefundRequest};
use crate::orchestrator::{PaymentOrchestrator, RefundOrchestrator};
use crate::velocity::VelocitySampler;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentOrchestrator>,
    pub refunds: Arc<RefundOrchestrator>,
    pub alerts: Arc<AlertHub>,
    pub velocity: Arc<VelocitySampler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payments/execute", post(execute_payment))
        .route("/payments/refund", post(execute_refund))
        .route("/risk/alerts", get(list_alerts))
        .route(
            "/risk/webhooks",
            post(subscribe_webhook)
                .delete(unsubscribe_webhook)
                .get(list_webhooks),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `POST /payments/execute`, spec.md §6: 200 on any well-formed outcome
/// (SUCCESS/FAILED distinguished in the body), 400 on validation error,
/// 503 on failover exhaustion.
async fn execute_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> impl IntoResponse {
    // Ingress velocity sampling, spec.md §5. Sampling is logged but never
    // itself rejects the request — admission policy is a caller concern.
    if state.velocity.sample(request.email.as_deref(), request.client_ip.as_deref()) {
        tracing::info!(
            merchant_reference = %request.merchant_reference,
            "request crossed the configured velocity threshold"
        );
    }

    match state.payments.execute(request).await {
        Ok(result) => (StatusCode::OK, Json(serde_json::to_value(result).unwrap())).into_response(),
        Err(OrchestratorError::Validation(details)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "VALIDATION_FAILED", "details": details})),
        )
            .into_response(),
        Err(OrchestratorError::NoPspAvailable { .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "NO_PSP_AVAILABLE"})),
        )
            .into_response(),
    }
}

/// `POST /payments/refund`, spec.md §6: always 200, the body's
/// `failureCode` conveys the §4.7 taxonomy on a refused refund.
async fn execute_refund(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> impl IntoResponse {
    let result = state.refunds.execute(request).await;
    (StatusCode::OK, Json(result))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    #[serde(default = "default_alert_limit")]
    limit: usize,
}

fn default_alert_limit() -> usize {
    50
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    Json(state.alerts.recent(query.limit))
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(rename = "entityId")]
    entity_id: String,
    #[serde(rename = "webhookUrl")]
    webhook_url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookDeleteQuery {
    #[serde(rename = "entityId")]
    entity_id: String,
    #[serde(rename = "webhookUrl")]
    webhook_url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookListQuery {
    #[serde(rename = "entityId")]
    entity_id: String,
}

async fn subscribe_webhook(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> impl IntoResponse {
    match state.alerts.subscribe_webhook(&body.entity_id, &body.webhook_url) {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "subscribed"}))).into_response(),
        Err(err) => {
            tracing::warn!(%err, "failed to persist webhook subscription");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "STORE_UNAVAILABLE"})),
            )
                .into_response()
        }
    }
}

async fn unsubscribe_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookDeleteQuery>,
) -> impl IntoResponse {
    match state.alerts.unsubscribe_webhook(&query.entity_id, &query.webhook_url) {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "unsubscribed"}))).into_response(),
        Err(err) => {
            tracing::warn!(%err, "failed to remove webhook subscription");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "STORE_UNAVAILABLE"})),
            )
                .into_response()
        }
    }
}

async fn list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<WebhookListQuery>,
) -> impl IntoResponse {
    match state.alerts.list_webhooks(&query.entity_id) {
        Ok(urls) => (StatusCode::OK, Json(json!({"webhookUrls": urls}))).into_response(),
        Err(err) => {
            tracing::warn!(%err, "failed to list webhook subscriptions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "STORE_UNAVAILABLE"})),
            )
                .into_response()
        }
    }
}
