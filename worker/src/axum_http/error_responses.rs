use axum::response::{IntoResponse, Response};
use backend::axum_http::error_responses::ErrorResponse;

use crate::usecases::force_settle_payment::ForceSettleError;

impl IntoResponse for ForceSettleError {
    fn into_response(self) -> Response {
        let message = match &self {
            ForceSettleError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        ErrorResponse::into_response_with(self.status_code(), message)
    }
}
