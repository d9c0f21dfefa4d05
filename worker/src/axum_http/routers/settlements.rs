use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};

use crate::{
    config::config_model::DotEnvyConfig,
    usecases::{
        force_settle_payment::ForceSettlePaymentUseCase,
        reconcile_installments::ReconcileInstallmentsUseCase,
        settle_due_payments::SettleDuePaymentsUseCase,
    },
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/settlements/force" \
//     -H "Authorization: Bearer $INTERNAL_SETTLEMENT_TOKEN" \
//     -H "Content-Type: application/json" \
//     -d '{"amount":12900}'

#[derive(Clone)]
pub struct SettlementRouteState {
    pub config: Arc<DotEnvyConfig>,
    pub settlement: Arc<SettleDuePaymentsUseCase>,
    pub force_settle: Arc<ForceSettlePaymentUseCase>,
    pub reconciliation: Arc<ReconcileInstallmentsUseCase>,
}

pub fn routes(state: SettlementRouteState) -> Router {
    Router::new()
        .route("/run", post(run_settlement))
        .route("/force", post(force_settle))
        .route("/reconcile", post(reconcile))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ForceSettleRequest {
    pub amount: i64,
}

pub async fn run_settlement(
    State(state): State<SettlementRouteState>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }

    match state.settlement.run(Utc::now()).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            error!(error = ?err, "settlements: run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "settlement failed").into_response()
        }
    }
}

pub async fn force_settle(
    State(state): State<SettlementRouteState>,
    headers: HeaderMap,
    Json(payload): Json<ForceSettleRequest>,
) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }

    info!(amount = payload.amount, "settlements: force settle requested");
    match state.force_settle.run(payload.amount).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn reconcile(State(state): State<SettlementRouteState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }

    match state.reconciliation.run(Utc::now()).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            error!(error = ?err, "settlements: reconciliation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "reconciliation failed").into_response()
        }
    }
}

fn check_token(state: &SettlementRouteState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected_token) = state.config.settlement.internal_token.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "settlement token is not configured",
        )
            .into_response());
    };

    authorize_bearer(headers, expected_token)
        .map_err(|status| (status, "unauthorized").into_response())
}

fn authorize_bearer(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token == expected_token {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
