use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use crates::domain::repositories::installment_payments::InstallmentPaymentRepository;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_REPORTED_IDS: usize = 20;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReconciliationReport {
    pub unconfirmed_first_payments: usize,
    pub stuck_processing: usize,
    pub unconfirmed_ids: Vec<Uuid>,
    pub stuck_ids: Vec<Uuid>,
}

/// Read-only sweep for payments that need an operator. Nothing is mutated.
pub struct ReconcileInstallmentsUseCase {
    payment_repo: Arc<dyn InstallmentPaymentRepository + Send + Sync>,
    grace: Duration,
}

impl ReconcileInstallmentsUseCase {
    pub fn new(
        payment_repo: Arc<dyn InstallmentPaymentRepository + Send + Sync>,
        grace_hours: i64,
    ) -> Self {
        Self {
            payment_repo,
            grace: Duration::hours(grace_hours.max(0)),
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReconciliationReport> {
        let cutoff = now - self.grace;
        let mut report = ReconciliationReport::default();

        let unconfirmed = self
            .payment_repo
            .list_unconfirmed_first_payments(cutoff)
            .await?;
        report.unconfirmed_first_payments = unconfirmed.len();
        for payment in unconfirmed {
            warn!(
                payment_id = %payment.id,
                plan_id = %payment.plan_id,
                payment_intent_id = payment.stripe_payment_intent_id.as_deref().unwrap_or_default(),
                created_at = %payment.created_at,
                "reconciliation: deposit never confirmed; needs manual reconciliation"
            );
            if report.unconfirmed_ids.len() < MAX_REPORTED_IDS {
                report.unconfirmed_ids.push(payment.id);
            }
        }

        let stuck = self.payment_repo.list_stuck_processing(cutoff).await?;
        report.stuck_processing = stuck.len();
        for payment in stuck {
            warn!(
                payment_id = %payment.id,
                plan_id = %payment.plan_id,
                updated_at = %payment.updated_at,
                "reconciliation: payment stuck in processing; check the charge in Stripe before touching it"
            );
            if report.stuck_ids.len() < MAX_REPORTED_IDS {
                report.stuck_ids.push(payment.id);
            }
        }

        info!(
            %cutoff,
            unconfirmed_first_payments = report.unconfirmed_first_payments,
            stuck_processing = report.stuck_processing,
            "reconciliation: scan finished"
        );

        Ok(report)
    }
}
