use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::usecases::{installment_plans::InstallmentPlanError, pricing_resolver::PricingError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl ErrorResponse {
    pub fn into_response_with(status: StatusCode, message: impl Into<String>) -> Response {
        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message: message.into(),
        });

        (status, body).into_response()
    }
}

impl IntoResponse for InstallmentPlanError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Don't leak processor or database detail to the client
            InstallmentPlanError::Processor(_) => {
                "Payment provider is unavailable, please try again".to_string()
            }
            InstallmentPlanError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        ErrorResponse::into_response_with(status, message)
    }
}

impl IntoResponse for PricingError {
    fn into_response(self) -> Response {
        ErrorResponse::into_response_with(self.status_code(), self.to_string())
    }
}
