use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use crates::{
    domain::{
        repositories::{
            installment_payments::InstallmentPaymentRepository,
            installment_plans::InstallmentPlanRepository,
        },
        value_objects::installments::{CancelInstallmentPlanModel, CreateInstallmentPlanModel},
    },
    payments::gateway::StripeGateway,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    config::config_model::BalanceDueDate,
    usecases::{
        installment_plans::{InstallmentPlanError, InstallmentPlanUseCase},
        pricing_resolver::PricingResolver,
    },
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_BACKEND/api/v1/installment-plans" \
//     -H "Content-Type: application/json" \
//     -d '{"customer_name":"Maria Petrova","customer_email":"maria@example.com","selection":"185+Ski3days"}'

pub struct InstallmentPlanRouteState<P, Pay, Stripe>
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    pub usecase: Arc<InstallmentPlanUseCase<P, Pay, Stripe>>,
    pub pricing: Arc<PricingResolver>,
    pub balance_due: BalanceDueDate,
}

pub fn routes<P, Pay, Stripe>(state: InstallmentPlanRouteState<P, Pay, Stripe>) -> Router
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    Router::new()
        .route("/", post(create_plan::<P, Pay, Stripe>))
        .route("/cancel", post(cancel_plan::<P, Pay, Stripe>))
        .route(
            "/payments/:payment_id/confirm",
            post(confirm_first_payment::<P, Pay, Stripe>),
        )
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
pub struct CreateInstallmentPlanRequest {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    /// Package and add-on selection, e.g. `185+Quad+Ski3days*2`.
    pub selection: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmFirstPaymentRequest {
    pub payment_method_id: Option<String>,
}

pub async fn create_plan<P, Pay, Stripe>(
    State(state): State<Arc<InstallmentPlanRouteState<P, Pay, Stripe>>>,
    Json(payload): Json<CreateInstallmentPlanRequest>,
) -> Response
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    let quote = match state.pricing.resolve_slug(&payload.selection) {
        Ok(quote) => quote,
        Err(err) => {
            warn!(selection = %payload.selection, error = %err, "installment_plans: invalid selection");
            return InstallmentPlanError::from(err).into_response();
        }
    };

    let model = CreateInstallmentPlanModel {
        customer_name: payload.customer_name,
        customer_email: payload.customer_email,
        customer_phone: payload.customer_phone,
        deposit_amount: quote.deposit_amount,
        balance_amount: quote.balance_amount,
        balance_due_date: state.balance_due.resolve(Utc::now()),
        package_type: Some(quote.package_id.clone()),
        selected_addons: quote.selected_addons(),
    };

    match state.usecase.create_plan(model).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn confirm_first_payment<P, Pay, Stripe>(
    State(state): State<Arc<InstallmentPlanRouteState<P, Pay, Stripe>>>,
    Path(payment_id): Path<Uuid>,
    payload: Option<Json<ConfirmFirstPaymentRequest>>,
) -> Response
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    let payment_method_id = payload.and_then(|Json(body)| body.payment_method_id);

    match state
        .usecase
        .confirm_first_payment(payment_id, payment_method_id)
        .await
    {
        Ok(confirmed) => Json(confirmed).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn cancel_plan<P, Pay, Stripe>(
    State(state): State<Arc<InstallmentPlanRouteState<P, Pay, Stripe>>>,
    Json(payload): Json<CancelInstallmentPlanModel>,
) -> Response
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    match state.usecase.cancel_plan(payload).await {
        Ok(cancelled) => Json(cancelled).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use crates::{
        domain::{
            repositories::{
                installment_payments::MockInstallmentPaymentRepository,
                installment_plans::MockInstallmentPlanRepository,
            },
            value_objects::pricing::PricingCatalog,
        },
        payments::gateway::MockStripeGateway,
    };
    use tower::ServiceExt;

    fn app(
        plan_repo: MockInstallmentPlanRepository,
        stripe: MockStripeGateway,
    ) -> Router {
        routes(InstallmentPlanRouteState {
            usecase: Arc::new(InstallmentPlanUseCase::new(
                Arc::new(plan_repo),
                Arc::new(MockInstallmentPaymentRepository::new()),
                Arc::new(stripe),
            )),
            pricing: Arc::new(PricingResolver::new(Arc::new(PricingCatalog::default()))),
            balance_due: BalanceDueDate::DaysAfterCheckout(60),
        })
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_selection_never_reaches_stripe() {
        let mut stripe = MockStripeGateway::new();
        stripe.expect_create_customer().never();

        let response = app(MockInstallmentPlanRepository::new(), stripe)
            .oneshot(json_post(
                "/",
                serde_json::json!({
                    "customer_name": "Maria Petrova",
                    "customer_email": "maria@example.com",
                    "selection": "999+Quad"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_without_plan_returns_not_found_body() {
        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo
            .expect_list_pending_by_email()
            .returning(|_| Box::pin(async { Ok(vec![]) }));

        let response = app(plan_repo, MockStripeGateway::new())
            .oneshot(json_post(
                "/cancel",
                serde_json::json!({
                    "customer_name": "Maria Petrova",
                    "customer_email": "maria@example.com"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["code"], 404);
    }
}
