use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use crates::{
    domain::repositories::{
        installment_payments::InstallmentPaymentRepository,
        installment_plans::InstallmentPlanRepository,
    },
    payments::gateway::StripeGateway,
};
use tracing::warn;

use crate::usecases::installment_plans::{InstallmentPlanError, InstallmentPlanUseCase};

pub fn routes<P, Pay, Stripe>(usecase: Arc<InstallmentPlanUseCase<P, Pay, Stripe>>) -> Router
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    Router::new()
        .route("/webhook", post(stripe_webhook::<P, Pay, Stripe>))
        .with_state(usecase)
}

pub async fn stripe_webhook<P, Pay, Stripe>(
    State(usecase): State<Arc<InstallmentPlanUseCase<P, Pay, Stripe>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    else {
        warn!("stripe_webhook: missing stripe-signature header");
        return InstallmentPlanError::InvalidWebhook("missing stripe-signature header".into())
            .into_response();
    };

    match usecase.handle_stripe_webhook(&body, signature).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}
