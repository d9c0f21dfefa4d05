use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{info, warn};

use crate::usecases::pricing_resolver::PricingResolver;

// Run example
//   curl "http://localhost:$SERVER_PORT_BACKEND/api/v1/checkout/185+Ski3days*2"

pub fn routes(pricing: Arc<PricingResolver>) -> Router {
    Router::new()
        .route("/:slug", get(quote_selection))
        .with_state(pricing)
}

pub async fn quote_selection(
    State(pricing): State<Arc<PricingResolver>>,
    Path(slug): Path<String>,
) -> Response {
    match pricing.resolve_slug(&slug) {
        Ok(quote) => {
            info!(
                %slug,
                deposit_amount = quote.deposit_amount,
                balance_amount = quote.balance_amount,
                "checkout: selection quoted"
            );
            Json(quote).into_response()
        }
        Err(err) => {
            warn!(%slug, error = %err, "checkout: invalid selection");
            err.into_response()
        }
    }
}
