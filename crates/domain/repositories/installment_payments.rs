use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::installment_payments::{DueInstallmentPaymentEntity, InstallmentPaymentEntity},
    value_objects::{
        enums::installment_payment_statuses::InstallmentPaymentStatus,
        installments::ChargeOutcome,
    },
};

#[async_trait]
#[automock]
pub trait InstallmentPaymentRepository {
    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<InstallmentPaymentEntity>>;

    async fn find_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<InstallmentPaymentEntity>>;

    async fn list_by_plan(&self, plan_id: Uuid) -> Result<Vec<InstallmentPaymentEntity>>;

    /// Pending payments of pending plans with `due_date <= as_of`, oldest first.
    /// Deposits still waiting for client-side confirmation are never returned.
    async fn list_due_payments(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<DueInstallmentPaymentEntity>>;

    /// Atomically moves a payment from pending to processing. Only the caller that
    /// gets `true` back may charge it.
    async fn claim_for_settlement(&self, payment_id: Uuid) -> Result<bool>;

    async fn mark_succeeded(
        &self,
        payment_id: Uuid,
        expected: InstallmentPaymentStatus,
        outcome: ChargeOutcome,
    ) -> Result<bool>;

    async fn mark_failed(
        &self,
        payment_id: Uuid,
        expected: InstallmentPaymentStatus,
        outcome: ChargeOutcome,
    ) -> Result<bool>;

    /// Earliest-due pending payment of a pending plan with exactly this amount.
    /// Unconfirmed deposits are excluded.
    async fn find_next_pending_by_amount(
        &self,
        amount: i64,
    ) -> Result<Option<InstallmentPaymentEntity>>;

    /// Rewrites the due date of a still-pending payment.
    async fn reschedule_due_date(&self, payment_id: Uuid, due_date: DateTime<Utc>)
    -> Result<bool>;

    /// Deposits whose client-side confirmation never arrived.
    async fn list_unconfirmed_first_payments(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<InstallmentPaymentEntity>>;

    async fn list_stuck_processing(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<InstallmentPaymentEntity>>;
}
