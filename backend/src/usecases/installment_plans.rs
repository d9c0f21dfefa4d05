use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use crates::{
    domain::{
        entities::{
            installment_payments::{InsertInstallmentPaymentEntity, InstallmentPaymentEntity},
            installment_plans::InsertInstallmentPlanEntity,
        },
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
                CancelInstallmentPlanModel, CancelledInstallmentPlanDto, ChargeOutcome,
                ConfirmedInstallmentPaymentDto, CreateInstallmentPlanModel,
                CreatedInstallmentPlanDto, PLAN_CURRENCY, charge_metadata, names_match,
                normalize_email,
            },
        },
    },
    payments::{
        gateway::StripeGateway,
        stripe_client::{PaymentIntentRequest, StripeEvent, hashed_idempotency_key},
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{plan_completion::complete_plan_if_settled, pricing_resolver::PricingError};

#[derive(Debug, Error)]
pub enum InstallmentPlanError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("payment processor request failed")]
    Processor(#[source] anyhow::Error),
    #[error("no pending installment plan found for this email")]
    NotFound,
    #[error("name does not match the booking on file")]
    NameMismatch,
    #[error("cancellation is not possible on the day a payment is due")]
    BlackoutWindow,
    #[error("installment payment not found")]
    PaymentNotFound,
    #[error("installment payment is not pending")]
    PaymentNotPending,
    #[error("payment has not been confirmed by the processor")]
    PaymentNotConfirmed,
    #[error("invalid webhook payload: {0}")]
    InvalidWebhook(String),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl InstallmentPlanError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            InstallmentPlanError::InvalidSelection(_)
            | InstallmentPlanError::InvalidRequest(_)
            | InstallmentPlanError::BlackoutWindow
            | InstallmentPlanError::InvalidWebhook(_) => StatusCode::BAD_REQUEST,
            InstallmentPlanError::Processor(_) => StatusCode::BAD_GATEWAY,
            InstallmentPlanError::NotFound | InstallmentPlanError::PaymentNotFound => {
                StatusCode::NOT_FOUND
            }
            InstallmentPlanError::NameMismatch => StatusCode::FORBIDDEN,
            InstallmentPlanError::PaymentNotPending | InstallmentPlanError::PaymentNotConfirmed => {
                StatusCode::CONFLICT
            }
            InstallmentPlanError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PricingError> for InstallmentPlanError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::InvalidSelection(reason) => InstallmentPlanError::InvalidSelection(reason),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, InstallmentPlanError>;

pub struct InstallmentPlanUseCase<P, Pay, Stripe>
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    plan_repo: Arc<P>,
    payment_repo: Arc<Pay>,
    stripe_client: Arc<Stripe>,
}

impl<P, Pay, Stripe> InstallmentPlanUseCase<P, Pay, Stripe>
where
    P: InstallmentPlanRepository + Send + Sync + 'static,
    Pay: InstallmentPaymentRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    pub fn new(plan_repo: Arc<P>, payment_repo: Arc<Pay>, stripe_client: Arc<Stripe>) -> Self {
        Self {
            plan_repo,
            payment_repo,
            stripe_client,
        }
    }

    /// Opens the Stripe customer, card setup intent and deposit intent, then
    /// stores the plan with its deposit and balance payments. Nothing is written
    /// unless every Stripe call succeeded.
    pub async fn create_plan(
        &self,
        model: CreateInstallmentPlanModel,
    ) -> UseCaseResult<CreatedInstallmentPlanDto> {
        let now = Utc::now();
        Self::validate_new_plan(&model, now)?;

        let customer_name = model.customer_name.trim().to_string();
        let customer_email = normalize_email(&model.customer_email);
        let customer_phone = model
            .customer_phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .map(str::to_string);
        let total_amount = model
            .deposit_amount
            .checked_add(model.balance_amount)
            .ok_or_else(|| InstallmentPlanError::InvalidRequest("total is too large".into()))?;

        let plan_id = Uuid::new_v4();
        let first_payment_id = Uuid::new_v4();
        let second_payment_id = Uuid::new_v4();

        info!(
            %plan_id,
            deposit_amount = model.deposit_amount,
            balance_amount = model.balance_amount,
            balance_due_date = %model.balance_due_date,
            "installment_plans: create plan requested"
        );

        let customer_id = self
            .stripe_client
            .create_customer(&customer_name, &customer_email, customer_phone.clone())
            .await
            .map_err(|err| {
                error!(%plan_id, error = ?err, "installment_plans: failed to create stripe customer");
                InstallmentPlanError::Processor(err)
            })?;

        let setup_intent = self
            .stripe_client
            .create_setup_intent(&customer_id)
            .await
            .map_err(|err| {
                error!(
                    %plan_id,
                    %customer_id,
                    error = ?err,
                    "installment_plans: failed to create setup intent"
                );
                InstallmentPlanError::Processor(err)
            })?;
        let setup_intent_client_secret = setup_intent.client_secret.ok_or_else(|| {
            InstallmentPlanError::Processor(anyhow!(
                "setup intent {} has no client secret",
                setup_intent.id
            ))
        })?;

        let deposit_request = PaymentIntentRequest {
            amount: model.deposit_amount,
            currency: PLAN_CURRENCY.to_string(),
            customer_id: customer_id.clone(),
            setup_future_usage: true,
            metadata: charge_metadata(plan_id, first_payment_id, ChargeKind::FirstInstallment),
            idempotency_key: hashed_idempotency_key(&[&customer_email, &now.to_rfc3339()]),
        };
        let deposit_intent = self
            .stripe_client
            .create_payment_intent(deposit_request)
            .await
            .map_err(|err| {
                error!(
                    %plan_id,
                    %customer_id,
                    error = ?err,
                    "installment_plans: failed to create deposit payment intent"
                );
                InstallmentPlanError::Processor(err)
            })?;
        let client_secret = deposit_intent.client_secret.clone().ok_or_else(|| {
            InstallmentPlanError::Processor(anyhow!(
                "payment intent {} has no client secret",
                deposit_intent.id
            ))
        })?;

        let plan = InsertInstallmentPlanEntity {
            id: plan_id,
            customer_name,
            customer_email,
            customer_phone,
            total_amount,
            currency: PLAN_CURRENCY.to_string(),
            stripe_customer_id: Some(customer_id.clone()),
            package_type: model.package_type.clone(),
            selected_addons: serde_json::Value::from(model.selected_addons.clone()),
            status: PlanStatus::Pending.to_string(),
            cancellation_requested: false,
            created_at: now,
        };
        let payments = vec![
            InsertInstallmentPaymentEntity {
                id: first_payment_id,
                plan_id,
                amount: model.deposit_amount,
                due_date: now,
                status: InstallmentPaymentStatus::Pending.to_string(),
                stripe_payment_intent_id: Some(deposit_intent.id.clone()),
                created_at: now,
            },
            InsertInstallmentPaymentEntity {
                id: second_payment_id,
                plan_id,
                amount: model.balance_amount,
                due_date: model.balance_due_date,
                status: InstallmentPaymentStatus::Pending.to_string(),
                stripe_payment_intent_id: None,
                created_at: now,
            },
        ];

        self.plan_repo
            .create_plan_with_payments(plan, payments)
            .await
            .map_err(|err| {
                error!(
                    %plan_id,
                    %customer_id,
                    payment_intent_id = %deposit_intent.id,
                    db_error = ?err,
                    "installment_plans: failed to persist plan after stripe calls; stripe customer and deposit intent are orphaned and need manual reconciliation"
                );
                InstallmentPlanError::Internal(err)
            })?;

        info!(
            %plan_id,
            %first_payment_id,
            %second_payment_id,
            %customer_id,
            "installment_plans: plan created"
        );

        Ok(CreatedInstallmentPlanDto {
            plan_id,
            first_payment_id,
            second_payment_id,
            client_secret,
            setup_intent_client_secret,
            customer_id,
            deposit_amount: model.deposit_amount,
            balance_amount: model.balance_amount,
            balance_due_date: model.balance_due_date,
        })
    }

    fn validate_new_plan(
        model: &CreateInstallmentPlanModel,
        now: DateTime<Utc>,
    ) -> UseCaseResult<()> {
        if model.customer_name.trim().is_empty() {
            return Err(InstallmentPlanError::InvalidRequest(
                "customer name is required".into(),
            ));
        }
        if normalize_email(&model.customer_email).is_empty() {
            return Err(InstallmentPlanError::InvalidRequest(
                "customer email is required".into(),
            ));
        }
        if model.deposit_amount <= 0 || model.balance_amount <= 0 {
            return Err(InstallmentPlanError::InvalidRequest(
                "deposit and balance must be positive amounts".into(),
            ));
        }
        if model.balance_due_date <= now {
            return Err(InstallmentPlanError::InvalidRequest(
                "balance due date must be in the future".into(),
            ));
        }
        Ok(())
    }

    /// Write-back after the checkout page completed card confirmation. The
    /// intent is re-read from Stripe so a client cannot mark an unpaid deposit
    /// as succeeded.
    pub async fn confirm_first_payment(
        &self,
        payment_id: Uuid,
        payment_method_id: Option<String>,
    ) -> UseCaseResult<ConfirmedInstallmentPaymentDto> {
        info!(%payment_id, "installment_plans: deposit confirmation requested");

        let payment = self.load_payment(payment_id).await?;

        if payment.status == InstallmentPaymentStatus::Succeeded {
            info!(%payment_id, "installment_plans: deposit already confirmed");
            return self.confirmed_dto(&payment).await;
        }
        if payment.status != InstallmentPaymentStatus::Pending {
            let err = InstallmentPlanError::PaymentNotPending;
            warn!(
                %payment_id,
                payment_status = %payment.status,
                status = err.status_code().as_u16(),
                "installment_plans: deposit confirmation for a payment that is not pending"
            );
            return Err(err);
        }

        let Some(payment_intent_id) = payment.stripe_payment_intent_id.clone() else {
            let err = InstallmentPlanError::InvalidRequest(
                "payment is not a deposit awaiting confirmation".into(),
            );
            warn!(
                %payment_id,
                status = err.status_code().as_u16(),
                "installment_plans: confirmation attempted for a scheduled payment"
            );
            return Err(err);
        };

        let intent = self
            .stripe_client
            .retrieve_payment_intent(&payment_intent_id)
            .await
            .map_err(|err| {
                error!(
                    %payment_id,
                    %payment_intent_id,
                    error = ?err,
                    "installment_plans: failed to retrieve deposit payment intent"
                );
                InstallmentPlanError::Processor(err)
            })?;

        if !intent.is_succeeded() {
            let err = InstallmentPlanError::PaymentNotConfirmed;
            warn!(
                %payment_id,
                %payment_intent_id,
                intent_status = %intent.status,
                status = err.status_code().as_u16(),
                "installment_plans: deposit intent has not succeeded"
            );
            return Err(err);
        }

        let outcome = ChargeOutcome {
            payment_intent_id: Some(intent.id.clone()),
            payment_method_id: intent.payment_method.clone().or(payment_method_id),
            at: Utc::now(),
        };
        self.record_deposit_success(&payment, outcome).await
    }

    async fn record_deposit_success(
        &self,
        payment: &InstallmentPaymentEntity,
        outcome: ChargeOutcome,
    ) -> UseCaseResult<ConfirmedInstallmentPaymentDto> {
        let payment_id = payment.id;
        let marked = self
            .payment_repo
            .mark_succeeded(payment_id, InstallmentPaymentStatus::Pending, outcome)
            .await
            .map_err(|err| {
                error!(
                    %payment_id,
                    db_error = ?err,
                    "installment_plans: deposit succeeded at stripe but could not be recorded; needs manual reconciliation"
                );
                InstallmentPlanError::Internal(err)
            })?;

        // Lost a race with the webhook or a second confirmation call.
        let payment = if marked {
            info!(%payment_id, plan_id = %payment.plan_id, "installment_plans: deposit confirmed");
            self.load_payment(payment_id).await?
        } else {
            let current = self.load_payment(payment_id).await?;
            if current.status != InstallmentPaymentStatus::Succeeded {
                return Err(InstallmentPlanError::PaymentNotPending);
            }
            current
        };

        self.confirmed_dto(&payment).await
    }

    async fn confirmed_dto(
        &self,
        payment: &InstallmentPaymentEntity,
    ) -> UseCaseResult<ConfirmedInstallmentPaymentDto> {
        let plan_status = complete_plan_if_settled(
            self.plan_repo.as_ref(),
            self.payment_repo.as_ref(),
            payment.plan_id,
        )
        .await
        .map_err(|err| {
            error!(
                payment_id = %payment.id,
                plan_id = %payment.plan_id,
                db_error = ?err,
                "installment_plans: failed to refresh plan status"
            );
            InstallmentPlanError::Internal(err)
        })?;

        Ok(ConfirmedInstallmentPaymentDto {
            payment_id: payment.id,
            plan_id: payment.plan_id,
            status: payment.status,
            plan_status,
        })
    }

    async fn load_payment(&self, payment_id: Uuid) -> UseCaseResult<InstallmentPaymentEntity> {
        self.payment_repo
            .find_by_id(payment_id)
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "installment_plans: failed to load payment");
                InstallmentPlanError::Internal(err)
            })?
            .ok_or(InstallmentPlanError::PaymentNotFound)
    }

    pub async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> UseCaseResult<()> {
        let event = self
            .stripe_client
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = %err, "installment_plans: stripe webhook verification failed");
                InstallmentPlanError::InvalidWebhook("signature verification failed".into())
            })?;

        info!(
            event_id = ?event.id,
            event_type = %event.type_,
            "installment_plans: stripe webhook verified"
        );

        match event.type_.as_str() {
            "payment_intent.succeeded" => self.handle_payment_intent_succeeded(&event).await,
            "payment_intent.payment_failed" => {
                let intent = event.payment_intent();
                warn!(
                    payment_intent_id = ?intent.as_ref().map(|i| i.id.as_str()),
                    payment_type = ?intent.as_ref().and_then(|i| i.metadata.get("payment_type")),
                    plan_id = ?intent.as_ref().and_then(|i| i.metadata.get("plan_id")),
                    "installment_plans: stripe reported a failed payment intent"
                );
                Ok(())
            }
            _ => {
                debug!(event_type = %event.type_, "installment_plans: unhandled stripe event type");
                Ok(())
            }
        }
    }

    async fn handle_payment_intent_succeeded(&self, event: &StripeEvent) -> UseCaseResult<()> {
        let intent = event.payment_intent().ok_or_else(|| {
            InstallmentPlanError::InvalidWebhook("payment intent object is malformed".into())
        })?;

        let kind = intent
            .metadata
            .get("payment_type")
            .and_then(|value| ChargeKind::from_str(value));
        if kind != Some(ChargeKind::FirstInstallment) {
            // Scheduled charges are recorded synchronously by settlement.
            debug!(
                payment_intent_id = %intent.id,
                payment_type = ?kind,
                "installment_plans: ignoring succeeded intent that is not a deposit"
            );
            return Ok(());
        }

        let payment = self
            .payment_repo
            .find_by_payment_intent_id(&intent.id)
            .await
            .map_err(|err| {
                error!(
                    payment_intent_id = %intent.id,
                    db_error = ?err,
                    "installment_plans: failed to load payment for webhook"
                );
                InstallmentPlanError::Internal(err)
            })?;

        let Some(payment) = payment else {
            warn!(
                payment_intent_id = %intent.id,
                plan_id = ?intent.metadata.get("plan_id"),
                "installment_plans: no payment row for succeeded deposit intent"
            );
            return Ok(());
        };

        if payment.status != InstallmentPaymentStatus::Pending {
            info!(
                payment_id = %payment.id,
                payment_status = %payment.status,
                "installment_plans: deposit already settled; webhook ignored"
            );
            return Ok(());
        }

        let outcome = ChargeOutcome {
            payment_intent_id: Some(intent.id.clone()),
            payment_method_id: intent.payment_method.clone(),
            at: Utc::now(),
        };

        match self.record_deposit_success(&payment, outcome).await {
            Ok(_) | Err(InstallmentPlanError::PaymentNotPending) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn cancel_plan(
        &self,
        model: CancelInstallmentPlanModel,
    ) -> UseCaseResult<CancelledInstallmentPlanDto> {
        self.cancel_plan_at(model, Utc::now()).await
    }

    /// Cancels the customer's newest pending plan. Refused on the calendar day
    /// (UTC) the outstanding balance is due, and while a charge is in flight.
    pub async fn cancel_plan_at(
        &self,
        model: CancelInstallmentPlanModel,
        now: DateTime<Utc>,
    ) -> UseCaseResult<CancelledInstallmentPlanDto> {
        let customer_email = normalize_email(&model.customer_email);
        if customer_email.is_empty() || model.customer_name.trim().is_empty() {
            return Err(InstallmentPlanError::InvalidRequest(
                "name and email are required".into(),
            ));
        }

        let plans = self
            .plan_repo
            .list_pending_by_email(&customer_email)
            .await
            .map_err(|err| {
                error!(db_error = ?err, "installment_plans: failed to look up plans for cancellation");
                InstallmentPlanError::Internal(err)
            })?;

        if plans.is_empty() {
            let err = InstallmentPlanError::NotFound;
            warn!(
                status = err.status_code().as_u16(),
                "installment_plans: cancellation requested without a pending plan"
            );
            return Err(err);
        }

        // Several pending plans may share an email; the name picks the one to cancel.
        let Some(plan) = plans
            .into_iter()
            .find(|plan| names_match(&plan.customer_name, &model.customer_name))
        else {
            let err = InstallmentPlanError::NameMismatch;
            warn!(
                status = err.status_code().as_u16(),
                "installment_plans: cancellation name does not match any pending plan"
            );
            return Err(err);
        };
        let plan_id = plan.id;

        let payments = self.payment_repo.list_by_plan(plan_id).await.map_err(|err| {
            error!(%plan_id, db_error = ?err, "installment_plans: failed to load plan payments");
            InstallmentPlanError::Internal(err)
        })?;

        let charge_in_flight = payments
            .iter()
            .any(|payment| payment.status == InstallmentPaymentStatus::Processing);
        let outstanding = payments
            .iter()
            .filter(|payment| payment.status == InstallmentPaymentStatus::Pending)
            .max_by_key(|payment| payment.due_date);
        let due_today = outstanding
            .is_some_and(|payment| payment.due_date.date_naive() == now.date_naive());

        if due_today || charge_in_flight {
            let err = InstallmentPlanError::BlackoutWindow;
            warn!(
                %plan_id,
                charge_in_flight,
                status = err.status_code().as_u16(),
                "installment_plans: cancellation refused inside blackout window"
            );
            return Err(err);
        }

        let cancelled_payments = self
            .plan_repo
            .cancel_plan(plan_id, now)
            .await
            .map_err(|err| {
                error!(%plan_id, db_error = ?err, "installment_plans: failed to cancel plan");
                InstallmentPlanError::Internal(err)
            })?
            .ok_or_else(|| {
                warn!(%plan_id, "installment_plans: plan left pending state before cancellation");
                InstallmentPlanError::NotFound
            })?;

        info!(%plan_id, cancelled_payments, "installment_plans: plan cancelled");

        Ok(CancelledInstallmentPlanDto {
            plan_id,
            cancelled_payments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::plan_completion::test_support::{sample_payment, sample_plan};
    use chrono::{Duration, TimeZone};
    use crates::{
        domain::repositories::{
            installment_payments::MockInstallmentPaymentRepository,
            installment_plans::MockInstallmentPlanRepository,
        },
        payments::{
            gateway::MockStripeGateway,
            stripe_client::{StripeEventData, StripePaymentIntent, StripeSetupIntent},
        },
    };
    use mockall::predicate::eq;
    use std::collections::HashMap;

    type TestUseCase = InstallmentPlanUseCase<
        MockInstallmentPlanRepository,
        MockInstallmentPaymentRepository,
        MockStripeGateway,
    >;

    fn usecase(
        plan_repo: MockInstallmentPlanRepository,
        payment_repo: MockInstallmentPaymentRepository,
        stripe: MockStripeGateway,
    ) -> TestUseCase {
        InstallmentPlanUseCase::new(Arc::new(plan_repo), Arc::new(payment_repo), Arc::new(stripe))
    }

    fn intent(id: &str, status: &str, metadata: &[(&str, &str)]) -> StripePaymentIntent {
        StripePaymentIntent {
            id: id.to_string(),
            client_secret: Some(format!("{id}_secret")),
            status: status.to_string(),
            amount: Some(5300),
            customer: Some("cus_123".to_string()),
            payment_method: Some("pm_card".to_string()),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn create_model() -> CreateInstallmentPlanModel {
        CreateInstallmentPlanModel {
            customer_name: " Maria Petrova ".to_string(),
            customer_email: "Maria@Example.com".to_string(),
            customer_phone: Some("".to_string()),
            deposit_amount: 5300,
            balance_amount: 12900,
            balance_due_date: Utc::now() + Duration::days(60),
            package_type: Some("185".to_string()),
            selected_addons: vec!["Ski3days".to_string()],
        }
    }

    fn stripe_for_creation() -> MockStripeGateway {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_customer()
            .withf(|name, email, phone| {
                name == "Maria Petrova" && email == "maria@example.com" && phone.is_none()
            })
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok("cus_123".to_string()) }));
        stripe
            .expect_create_setup_intent()
            .times(1)
            .returning(|_| {
                Box::pin(async {
                    Ok(StripeSetupIntent {
                        id: "seti_1".to_string(),
                        client_secret: Some("seti_1_secret".to_string()),
                    })
                })
            });
        stripe
            .expect_create_payment_intent()
            .withf(|request| {
                request.amount == 5300
                    && request.currency == "eur"
                    && request.customer_id == "cus_123"
                    && request.setup_future_usage
                    && request.metadata.get("payment_type").map(String::as_str)
                        == Some("first_installment")
                    && request.idempotency_key.len() == 64
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(intent("pi_deposit", "requires_payment_method", &[])) }));
        stripe
    }

    #[tokio::test]
    async fn create_plan_persists_plan_with_two_payments_summing_to_total() {
        let model = create_model();
        let due = model.balance_due_date;

        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo
            .expect_create_plan_with_payments()
            .withf(move |plan, payments| {
                let amounts: i64 = payments.iter().map(|p| p.amount).sum();
                plan.total_amount == 18200
                    && amounts == plan.total_amount
                    && payments.len() == 2
                    && payments.iter().all(|p| p.plan_id == plan.id && p.status == "pending")
                    && payments[0].stripe_payment_intent_id.as_deref() == Some("pi_deposit")
                    && payments[1].stripe_payment_intent_id.is_none()
                    && payments[1].due_date == due
                    && plan.customer_email == "maria@example.com"
                    && plan.customer_phone.is_none()
                    && plan.stripe_customer_id.as_deref() == Some("cus_123")
                    && plan.selected_addons == serde_json::json!(["Ski3days"])
            })
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let created = usecase(
            plan_repo,
            MockInstallmentPaymentRepository::new(),
            stripe_for_creation(),
        )
        .create_plan(model)
        .await
        .unwrap();

        assert_eq!(created.client_secret, "pi_deposit_secret");
        assert_eq!(created.setup_intent_client_secret, "seti_1_secret");
        assert_eq!(created.customer_id, "cus_123");
        assert_ne!(created.first_payment_id, created.second_payment_id);
    }

    #[tokio::test]
    async fn processor_failure_aborts_before_any_database_write() {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_customer()
            .returning(|_, _, _| Box::pin(async { Err(anyhow!("stripe down")) }));
        stripe.expect_create_setup_intent().never();
        stripe.expect_create_payment_intent().never();

        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo.expect_create_plan_with_payments().never();

        let err = usecase(plan_repo, MockInstallmentPaymentRepository::new(), stripe)
            .create_plan(create_model())
            .await
            .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::Processor(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn database_failure_after_stripe_calls_is_internal() {
        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo
            .expect_create_plan_with_payments()
            .returning(|_, _| Box::pin(async { Err(anyhow!("connection reset")) }));

        let err = usecase(
            plan_repo,
            MockInstallmentPaymentRepository::new(),
            stripe_for_creation(),
        )
        .create_plan(create_model())
        .await
        .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::Internal(_)));
    }

    #[tokio::test]
    async fn create_plan_rejects_non_positive_amounts_without_calling_stripe() {
        let mut stripe = MockStripeGateway::new();
        stripe.expect_create_customer().never();

        let model = CreateInstallmentPlanModel {
            balance_amount: 0,
            ..create_model()
        };

        let err = usecase(
            MockInstallmentPlanRepository::new(),
            MockInstallmentPaymentRepository::new(),
            stripe,
        )
        .create_plan(model)
        .await
        .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn create_plan_rejects_balance_due_in_the_past() {
        let model = CreateInstallmentPlanModel {
            balance_due_date: Utc::now() - Duration::days(1),
            ..create_model()
        };

        let err = usecase(
            MockInstallmentPlanRepository::new(),
            MockInstallmentPaymentRepository::new(),
            MockStripeGateway::new(),
        )
        .create_plan(model)
        .await
        .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::InvalidRequest(_)));
    }

    fn pending_deposit(plan_id: Uuid) -> InstallmentPaymentEntity {
        let mut payment =
            sample_payment(plan_id, 5300, Utc::now(), InstallmentPaymentStatus::Pending);
        payment.stripe_payment_intent_id = Some("pi_deposit".to_string());
        payment
    }

    #[tokio::test]
    async fn confirm_first_payment_requires_a_succeeded_intent() {
        let plan_id = Uuid::new_v4();
        let deposit = pending_deposit(plan_id);
        let payment_id = deposit.id;

        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo
            .expect_find_by_id()
            .with(eq(payment_id))
            .returning(move |_| {
                let deposit = deposit.clone();
                Box::pin(async move { Ok(Some(deposit)) })
            });
        payment_repo.expect_mark_succeeded().never();

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_payment_intent()
            .returning(|_| Box::pin(async { Ok(intent("pi_deposit", "requires_action", &[])) }));

        let err = usecase(MockInstallmentPlanRepository::new(), payment_repo, stripe)
            .confirm_first_payment(payment_id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::PaymentNotConfirmed));
    }

    #[tokio::test]
    async fn confirm_first_payment_records_method_and_keeps_plan_pending() {
        let plan_id = Uuid::new_v4();
        let deposit = pending_deposit(plan_id);
        let payment_id = deposit.id;
        let balance = sample_payment(
            plan_id,
            12900,
            Utc::now() + Duration::days(60),
            InstallmentPaymentStatus::Pending,
        );

        let mut confirmed = deposit.clone();
        confirmed.status = InstallmentPaymentStatus::Succeeded;
        confirmed.payment_method_id = Some("pm_card".to_string());

        let mut payment_repo = MockInstallmentPaymentRepository::new();
        let mut reads = 0;
        let (before, after) = (deposit.clone(), confirmed.clone());
        payment_repo
            .expect_find_by_id()
            .with(eq(payment_id))
            .times(2)
            .returning(move |_| {
                reads += 1;
                let payment = if reads == 1 { before.clone() } else { after.clone() };
                Box::pin(async move { Ok(Some(payment)) })
            });
        payment_repo
            .expect_mark_succeeded()
            .withf(move |id, expected, outcome| {
                *id == payment_id
                    && *expected == InstallmentPaymentStatus::Pending
                    && outcome.payment_intent_id.as_deref() == Some("pi_deposit")
                    && outcome.payment_method_id.as_deref() == Some("pm_card")
            })
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok(true) }));
        let listed = vec![confirmed.clone(), balance];
        payment_repo.expect_list_by_plan().returning(move |_| {
            let listed = listed.clone();
            Box::pin(async move { Ok(listed) })
        });

        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo.expect_mark_completed().never();
        plan_repo.expect_find_by_id().returning(move |id| {
            Box::pin(async move { Ok(Some(sample_plan(id, PlanStatus::Pending))) })
        });

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_payment_intent()
            .withf(|id| id == "pi_deposit")
            .returning(|_| Box::pin(async { Ok(intent("pi_deposit", "succeeded", &[])) }));

        let dto = usecase(plan_repo, payment_repo, stripe)
            .confirm_first_payment(payment_id, Some("pm_client".to_string()))
            .await
            .unwrap();

        assert_eq!(dto.status, InstallmentPaymentStatus::Succeeded);
        assert_eq!(dto.plan_status, PlanStatus::Pending);
    }

    #[tokio::test]
    async fn confirm_first_payment_rejects_cancelled_payment() {
        let plan_id = Uuid::new_v4();
        let mut deposit = pending_deposit(plan_id);
        deposit.status = InstallmentPaymentStatus::Cancelled;
        let payment_id = deposit.id;

        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo.expect_find_by_id().returning(move |_| {
            let deposit = deposit.clone();
            Box::pin(async move { Ok(Some(deposit)) })
        });

        let mut stripe = MockStripeGateway::new();
        stripe.expect_retrieve_payment_intent().never();

        let err = usecase(MockInstallmentPlanRepository::new(), payment_repo, stripe)
            .confirm_first_payment(payment_id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::PaymentNotPending));
    }

    #[tokio::test]
    async fn confirm_first_payment_for_unknown_payment_is_not_found() {
        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo
            .expect_find_by_id()
            .returning(|_| Box::pin(async { Ok(None) }));

        let err = usecase(
            MockInstallmentPlanRepository::new(),
            payment_repo,
            MockStripeGateway::new(),
        )
        .confirm_first_payment(Uuid::new_v4(), None)
        .await
        .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::PaymentNotFound));
    }

    fn webhook_event(type_: &str, object: serde_json::Value) -> StripeEvent {
        StripeEvent {
            id: Some("evt_1".to_string()),
            type_: type_.to_string(),
            created: None,
            livemode: Some(false),
            data: StripeEventData { object },
        }
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected() {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_verify_webhook_signature()
            .returning(|_, _| Err(anyhow!("invalid webhook signature")));

        let err = usecase(
            MockInstallmentPlanRepository::new(),
            MockInstallmentPaymentRepository::new(),
            stripe,
        )
        .handle_stripe_webhook(b"{}", "t=1,v1=00")
        .await
        .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::InvalidWebhook(_)));
    }

    #[tokio::test]
    async fn webhook_ignores_scheduled_installment_intents() {
        let mut stripe = MockStripeGateway::new();
        stripe.expect_verify_webhook_signature().returning(|_, _| {
            Ok(webhook_event(
                "payment_intent.succeeded",
                serde_json::json!({
                    "id": "pi_balance",
                    "status": "succeeded",
                    "metadata": { "payment_type": "scheduled_installment" }
                }),
            ))
        });

        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo.expect_find_by_payment_intent_id().never();

        usecase(MockInstallmentPlanRepository::new(), payment_repo, stripe)
            .handle_stripe_webhook(b"{}", "sig")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn webhook_marks_pending_deposit_succeeded() {
        let plan_id = Uuid::new_v4();
        let deposit = pending_deposit(plan_id);
        let payment_id = deposit.id;
        let mut confirmed = deposit.clone();
        confirmed.status = InstallmentPaymentStatus::Succeeded;

        let mut stripe = MockStripeGateway::new();
        stripe.expect_verify_webhook_signature().returning(|_, _| {
            Ok(webhook_event(
                "payment_intent.succeeded",
                serde_json::json!({
                    "id": "pi_deposit",
                    "status": "succeeded",
                    "payment_method": "pm_card",
                    "metadata": { "payment_type": "first_installment" }
                }),
            ))
        });

        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo
            .expect_find_by_payment_intent_id()
            .withf(|id| id == "pi_deposit")
            .returning(move |_| {
                let deposit = deposit.clone();
                Box::pin(async move { Ok(Some(deposit)) })
            });
        payment_repo
            .expect_mark_succeeded()
            .withf(move |id, _, outcome| {
                *id == payment_id && outcome.payment_method_id.as_deref() == Some("pm_card")
            })
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok(true) }));
        let confirmed_for_reads = confirmed.clone();
        payment_repo.expect_find_by_id().returning(move |_| {
            let confirmed = confirmed_for_reads.clone();
            Box::pin(async move { Ok(Some(confirmed)) })
        });
        payment_repo.expect_list_by_plan().returning(move |_| {
            let listed = vec![confirmed.clone()];
            Box::pin(async move { Ok(listed) })
        });

        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo.expect_find_by_id().returning(move |id| {
            Box::pin(async move { Ok(Some(sample_plan(id, PlanStatus::Pending))) })
        });

        usecase(plan_repo, payment_repo, stripe)
            .handle_stripe_webhook(b"{}", "sig")
            .await
            .unwrap();
    }

    fn cancel_model(name: &str) -> CancelInstallmentPlanModel {
        CancelInstallmentPlanModel {
            customer_name: name.to_string(),
            customer_email: " MARIA@example.com".to_string(),
        }
    }

    fn plan_repo_with_pending_plan(plan_id: Uuid) -> MockInstallmentPlanRepository {
        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo
            .expect_list_pending_by_email()
            .withf(|email| email == "maria@example.com")
            .returning(move |_| {
                Box::pin(async move { Ok(vec![sample_plan(plan_id, PlanStatus::Pending)]) })
            });
        plan_repo
    }

    fn payment_repo_with(payments: Vec<InstallmentPaymentEntity>) -> MockInstallmentPaymentRepository {
        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo.expect_list_by_plan().returning(move |_| {
            let payments = payments.clone();
            Box::pin(async move { Ok(payments) })
        });
        payment_repo
    }

    #[tokio::test]
    async fn cancel_plan_cancels_pending_payments() {
        let plan_id = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 12, 0, 0).unwrap();
        let payments = vec![
            sample_payment(plan_id, 5300, now - Duration::days(10), InstallmentPaymentStatus::Succeeded),
            sample_payment(plan_id, 12900, now + Duration::days(40), InstallmentPaymentStatus::Pending),
        ];

        let mut plan_repo = plan_repo_with_pending_plan(plan_id);
        plan_repo
            .expect_cancel_plan()
            .with(eq(plan_id), eq(now))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(Some(1)) }));

        let dto = usecase(plan_repo, payment_repo_with(payments), MockStripeGateway::new())
            .cancel_plan_at(cancel_model("maria PETROVA"), now)
            .await
            .unwrap();

        assert_eq!(dto.plan_id, plan_id);
        assert_eq!(dto.cancelled_payments, 1);
    }

    #[tokio::test]
    async fn cancel_plan_with_mismatched_name_touches_nothing() {
        let plan_id = Uuid::new_v4();

        let mut plan_repo = plan_repo_with_pending_plan(plan_id);
        plan_repo.expect_cancel_plan().never();
        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo.expect_list_by_plan().never();

        let err = usecase(plan_repo, payment_repo, MockStripeGateway::new())
            .cancel_plan_at(cancel_model("Ivan Petrov"), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::NameMismatch));
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cancel_plan_picks_the_plan_matching_the_name_under_a_shared_email() {
        let partner_plan_id = Uuid::new_v4();
        let own_plan_id = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2025, 11, 1, 12, 0, 0).unwrap();

        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo.expect_list_pending_by_email().returning(move |_| {
            let mut partner = sample_plan(partner_plan_id, PlanStatus::Pending);
            partner.customer_name = "Ivan Petrov".to_string();
            let own = sample_plan(own_plan_id, PlanStatus::Pending);
            Box::pin(async move { Ok(vec![partner, own]) })
        });
        plan_repo
            .expect_cancel_plan()
            .with(eq(own_plan_id), eq(now))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(Some(1)) }));

        let mut payment_repo = MockInstallmentPaymentRepository::new();
        payment_repo
            .expect_list_by_plan()
            .with(eq(own_plan_id))
            .returning(move |plan_id| {
                let payments = vec![sample_payment(
                    plan_id,
                    12900,
                    now + Duration::days(40),
                    InstallmentPaymentStatus::Pending,
                )];
                Box::pin(async move { Ok(payments) })
            });

        let dto = usecase(plan_repo, payment_repo, MockStripeGateway::new())
            .cancel_plan_at(cancel_model("Maria Petrova"), now)
            .await
            .unwrap();

        assert_eq!(dto.plan_id, own_plan_id);
    }

    #[tokio::test]
    async fn cancel_plan_without_pending_plan_is_not_found() {
        let mut plan_repo = MockInstallmentPlanRepository::new();
        plan_repo
            .expect_list_pending_by_email()
            .returning(|_| Box::pin(async { Ok(vec![]) }));

        let err = usecase(
            plan_repo,
            MockInstallmentPaymentRepository::new(),
            MockStripeGateway::new(),
        )
        .cancel_plan_at(cancel_model("Maria Petrova"), Utc::now())
        .await
        .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::NotFound));
    }

    #[tokio::test]
    async fn cancel_plan_is_refused_on_the_balance_due_date() {
        let plan_id = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2026, 1, 6, 18, 30, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
        let payments = vec![
            sample_payment(plan_id, 5300, now - Duration::days(30), InstallmentPaymentStatus::Succeeded),
            sample_payment(plan_id, 12900, due, InstallmentPaymentStatus::Pending),
        ];

        let mut plan_repo = plan_repo_with_pending_plan(plan_id);
        plan_repo.expect_cancel_plan().never();

        let err = usecase(plan_repo, payment_repo_with(payments), MockStripeGateway::new())
            .cancel_plan_at(cancel_model("Maria Petrova"), now)
            .await
            .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::BlackoutWindow));
    }

    #[tokio::test]
    async fn cancel_plan_is_refused_while_a_charge_is_processing() {
        let plan_id = Uuid::new_v4();
        let now = Utc::now();
        let payments = vec![sample_payment(
            plan_id,
            12900,
            now - Duration::hours(1),
            InstallmentPaymentStatus::Processing,
        )];

        let mut plan_repo = plan_repo_with_pending_plan(plan_id);
        plan_repo.expect_cancel_plan().never();

        let err = usecase(plan_repo, payment_repo_with(payments), MockStripeGateway::new())
            .cancel_plan_at(cancel_model("Maria Petrova"), now)
            .await
            .unwrap_err();

        assert!(matches!(err, InstallmentPlanError::BlackoutWindow));
    }
}
