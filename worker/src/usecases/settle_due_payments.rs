use anyhow::Result;
use backend::usecases::plan_completion::complete_plan_if_settled;
use chrono::{DateTime, Utc};
use crates::{
    domain::{
        entities::installment_payments::DueInstallmentPaymentEntity,
        repositories::{
            installment_payments::InstallmentPaymentRepository,
            installment_plans::InstallmentPlanRepository,
        },
        value_objects::{
            enums::{
                charge_kinds::ChargeKind, installment_payment_statuses::InstallmentPaymentStatus,
                plan_statuses::PlanStatus,
            },
            installments::{
                ChargeOutcome, PLAN_CURRENCY, charge_metadata, scheduled_charge_idempotency_key,
            },
        },
    },
    payments::{
        gateway::StripeGateway,
        stripe_client::{OffSessionChargeRequest, StripePaymentMethod},
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_REPORTED_IDS: usize = 20;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SettlementReport {
    /// Due payments examined in this run.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_no_payment_method: usize,
    pub skipped_already_claimed: usize,
    pub skipped_awaiting_confirmation: usize,
    pub errors: usize,
    pub completed_plans: usize,
    pub succeeded_ids: Vec<Uuid>,
    pub failed_ids: Vec<Uuid>,
    pub skipped_ids: Vec<Uuid>,
    pub completed_plan_ids: Vec<Uuid>,
}

fn push_capped(ids: &mut Vec<Uuid>, id: Uuid) {
    if ids.len() < MAX_REPORTED_IDS {
        ids.push(id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentSettlement {
    Succeeded { plan_completed: bool },
    Failed,
    NoPaymentMethod,
    AlreadyClaimed,
    AwaitingConfirmation,
}

/// Most recently added card wins; on equal `created` the earlier listed one is kept.
pub fn choose_payment_method(methods: &[StripePaymentMethod]) -> Option<&StripePaymentMethod> {
    methods.iter().fold(None, |best, method| match best {
        Some(current) if current.created >= method.created => Some(current),
        _ => Some(method),
    })
}

pub struct SettleDuePaymentsUseCase {
    plan_repo: Arc<dyn InstallmentPlanRepository + Send + Sync>,
    payment_repo: Arc<dyn InstallmentPaymentRepository + Send + Sync>,
    stripe_client: Arc<dyn StripeGateway + Send + Sync>,
    // One settlement run at a time per process.
    run_lock: Mutex<()>,
}

impl SettleDuePaymentsUseCase {
    pub fn new(
        plan_repo: Arc<dyn InstallmentPlanRepository + Send + Sync>,
        payment_repo: Arc<dyn InstallmentPaymentRepository + Send + Sync>,
        stripe_client: Arc<dyn StripeGateway + Send + Sync>,
    ) -> Self {
        Self {
            plan_repo,
            payment_repo,
            stripe_client,
            run_lock: Mutex::new(()),
        }
    }

    /// Charges every pending payment due at `as_of`. A failure on one payment
    /// is recorded and never stops the batch.
    pub async fn run(&self, as_of: DateTime<Utc>) -> Result<SettlementReport> {
        let _guard = self.run_lock.lock().await;

        let due_payments = self.payment_repo.list_due_payments(as_of).await?;
        let mut report = SettlementReport {
            processed: due_payments.len(),
            ..Default::default()
        };

        info!(%as_of, due = report.processed, "settlement: run started");

        for due in due_payments {
            let payment_id = due.payment.id;
            match self.settle_payment(&due).await {
                Ok(PaymentSettlement::Succeeded { plan_completed }) => {
                    report.succeeded += 1;
                    push_capped(&mut report.succeeded_ids, payment_id);
                    if plan_completed {
                        report.completed_plans += 1;
                        push_capped(&mut report.completed_plan_ids, due.payment.plan_id);
                    }
                }
                Ok(PaymentSettlement::Failed) => {
                    report.failed += 1;
                    push_capped(&mut report.failed_ids, payment_id);
                }
                Ok(PaymentSettlement::NoPaymentMethod) => {
                    report.skipped_no_payment_method += 1;
                    push_capped(&mut report.skipped_ids, payment_id);
                }
                Ok(PaymentSettlement::AlreadyClaimed) => {
                    report.skipped_already_claimed += 1;
                }
                Ok(PaymentSettlement::AwaitingConfirmation) => {
                    report.skipped_awaiting_confirmation += 1;
                    push_capped(&mut report.skipped_ids, payment_id);
                }
                Err(err) => {
                    report.errors += 1;
                    error!(
                        %payment_id,
                        plan_id = %due.payment.plan_id,
                        error = ?err,
                        "settlement: payment could not be settled; continuing with the batch"
                    );
                }
            }
        }

        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped_no_payment_method = report.skipped_no_payment_method,
            skipped_already_claimed = report.skipped_already_claimed,
            skipped_awaiting_confirmation = report.skipped_awaiting_confirmation,
            errors = report.errors,
            completed_plans = report.completed_plans,
            "settlement: run finished"
        );

        Ok(report)
    }

    async fn settle_payment(&self, due: &DueInstallmentPaymentEntity) -> Result<PaymentSettlement> {
        let payment = &due.payment;
        let payment_id = payment.id;

        // Deposits are confirmed client-side; charging one here would bill it twice.
        if let Some(payment_intent_id) = payment.stripe_payment_intent_id.as_deref() {
            warn!(
                %payment_id,
                %payment_intent_id,
                "settlement: payment already has an intent awaiting confirmation; skipping"
            );
            return Ok(PaymentSettlement::AwaitingConfirmation);
        }

        let Some(customer_id) = due.stripe_customer_id.as_deref() else {
            warn!(%payment_id, plan_id = %payment.plan_id, "settlement: plan has no stripe customer; skipping");
            return Ok(PaymentSettlement::NoPaymentMethod);
        };

        let methods = match self.stripe_client.list_card_payment_methods(customer_id).await {
            Ok(methods) => methods,
            Err(err) => {
                warn!(
                    %payment_id,
                    %customer_id,
                    error = ?err,
                    "settlement: listing saved cards failed; marking payment failed"
                );
                if !self.payment_repo.claim_for_settlement(payment_id).await? {
                    return Ok(PaymentSettlement::AlreadyClaimed);
                }
                let outcome = ChargeOutcome {
                    payment_intent_id: None,
                    payment_method_id: None,
                    at: Utc::now(),
                };
                self.record(payment_id, outcome, false).await?;
                return Ok(PaymentSettlement::Failed);
            }
        };
        let Some(method) = choose_payment_method(&methods) else {
            warn!(
                %payment_id,
                %customer_id,
                "settlement: customer has no saved card; payment stays pending"
            );
            return Ok(PaymentSettlement::NoPaymentMethod);
        };

        if !self.payment_repo.claim_for_settlement(payment_id).await? {
            info!(%payment_id, "settlement: payment already claimed elsewhere; skipping");
            return Ok(PaymentSettlement::AlreadyClaimed);
        }

        let request = OffSessionChargeRequest {
            amount: payment.amount,
            currency: PLAN_CURRENCY.to_string(),
            customer_id: customer_id.to_string(),
            payment_method_id: method.id.clone(),
            metadata: charge_metadata(
                payment.plan_id,
                payment_id,
                ChargeKind::ScheduledInstallment,
            ),
            idempotency_key: scheduled_charge_idempotency_key(payment_id),
        };

        info!(
            %payment_id,
            amount = payment.amount,
            payment_method_id = %method.id,
            "settlement: charging saved card off session"
        );

        let charge = self.stripe_client.charge_off_session(request).await;
        let now = Utc::now();

        let succeeded = match charge {
            Ok(intent) if intent.is_succeeded() => {
                let outcome = ChargeOutcome {
                    payment_intent_id: Some(intent.id.clone()),
                    payment_method_id: intent.payment_method.clone().or(Some(method.id.clone())),
                    at: now,
                };
                self.record(payment_id, outcome, true).await?;
                true
            }
            Ok(intent) => {
                warn!(
                    %payment_id,
                    payment_intent_id = %intent.id,
                    intent_status = %intent.status,
                    "settlement: off-session charge did not succeed"
                );
                let outcome = ChargeOutcome {
                    payment_intent_id: Some(intent.id.clone()),
                    payment_method_id: Some(method.id.clone()),
                    at: now,
                };
                self.record(payment_id, outcome, false).await?;
                false
            }
            Err(err) => {
                warn!(%payment_id, error = ?err, "settlement: off-session charge failed");
                let outcome = ChargeOutcome {
                    payment_intent_id: None,
                    payment_method_id: Some(method.id.clone()),
                    at: now,
                };
                self.record(payment_id, outcome, false).await?;
                false
            }
        };

        if !succeeded {
            return Ok(PaymentSettlement::Failed);
        }

        let plan_status = complete_plan_if_settled(
            self.plan_repo.as_ref(),
            self.payment_repo.as_ref(),
            payment.plan_id,
        )
        .await?;

        Ok(PaymentSettlement::Succeeded {
            plan_completed: plan_status == PlanStatus::Completed,
        })
    }

    async fn record(&self, payment_id: Uuid, outcome: ChargeOutcome, succeeded: bool) -> Result<()> {
        let recorded = if succeeded {
            self.payment_repo
                .mark_succeeded(payment_id, InstallmentPaymentStatus::Processing, outcome)
                .await
        } else {
            self.payment_repo
                .mark_failed(payment_id, InstallmentPaymentStatus::Processing, outcome)
                .await
        };

        match recorded {
            Ok(true) => {
                info!(%payment_id, succeeded, "settlement: charge outcome recorded");
                Ok(())
            }
            Ok(false) => {
                error!(
                    %payment_id,
                    succeeded,
                    "settlement: payment left processing before its outcome was recorded"
                );
                Ok(())
            }
            Err(err) => {
                // Not retried: a second attempt could bill the customer twice.
                error!(
                    %payment_id,
                    succeeded,
                    db_error = ?err,
                    "settlement: charge outcome could not be recorded; payment stuck in processing and needs manual reconciliation"
                );
                Err(err)
            }
        }
    }
}
