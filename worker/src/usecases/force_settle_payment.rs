use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use crates::domain::repositories::installment_payments::InstallmentPaymentRepository;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::settle_due_payments::{SettleDuePaymentsUseCase, SettlementReport};

#[derive(Debug, Error)]
pub enum ForceSettleError {
    #[error("amount must be a positive number of cents")]
    InvalidAmount,
    #[error("no pending payment with amount {0}")]
    NoPendingPayment(i64),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ForceSettleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ForceSettleError::InvalidAmount => StatusCode::BAD_REQUEST,
            ForceSettleError::NoPendingPayment(_) => StatusCode::NOT_FOUND,
            ForceSettleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForceSettleResult {
    pub payment_id: Uuid,
    pub plan_id: Uuid,
    pub report: SettlementReport,
}

/// Operator path: pulls one pending payment's due date forward to now and runs
/// a settlement pass right away.
pub struct ForceSettlePaymentUseCase {
    payment_repo: Arc<dyn InstallmentPaymentRepository + Send + Sync>,
    settlement: Arc<SettleDuePaymentsUseCase>,
}

impl ForceSettlePaymentUseCase {
    pub fn new(
        payment_repo: Arc<dyn InstallmentPaymentRepository + Send + Sync>,
        settlement: Arc<SettleDuePaymentsUseCase>,
    ) -> Self {
        Self {
            payment_repo,
            settlement,
        }
    }

    pub async fn run(&self, amount: i64) -> Result<ForceSettleResult, ForceSettleError> {
        if amount <= 0 {
            return Err(ForceSettleError::InvalidAmount);
        }

        let payment = self
            .payment_repo
            .find_next_pending_by_amount(amount)
            .await
            .map_err(|err| {
                error!(amount, db_error = ?err, "force_settle: lookup failed");
                ForceSettleError::Internal(err)
            })?
            .ok_or_else(|| {
                warn!(amount, "force_settle: no pending payment with this amount");
                ForceSettleError::NoPendingPayment(amount)
            })?;

        if payment.stripe_payment_intent_id.is_some() {
            warn!(payment_id = %payment.id, "force_settle: deposit is awaiting client confirmation");
            return Err(ForceSettleError::NoPendingPayment(amount));
        }

        let now = Utc::now();
        let rescheduled = self
            .payment_repo
            .reschedule_due_date(payment.id, now)
            .await
            .map_err(|err| {
                error!(payment_id = %payment.id, db_error = ?err, "force_settle: reschedule failed");
                ForceSettleError::Internal(err)
            })?;

        if !rescheduled {
            // Settled or cancelled between the lookup and the update.
            warn!(payment_id = %payment.id, "force_settle: payment is no longer pending");
            return Err(ForceSettleError::NoPendingPayment(amount));
        }

        info!(
            payment_id = %payment.id,
            plan_id = %payment.plan_id,
            amount,
            previous_due_date = %payment.due_date,
            "force_settle: due date pulled forward; running settlement"
        );

        let report = self.settlement.run(now).await?;

        Ok(ForceSettleResult {
            payment_id: payment.id,
            plan_id: payment.plan_id,
            report,
        })
    }
}
