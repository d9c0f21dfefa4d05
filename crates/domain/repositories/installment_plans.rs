use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::{
    installment_payments::InsertInstallmentPaymentEntity,
    installment_plans::{InsertInstallmentPlanEntity, InstallmentPlanEntity},
};

#[async_trait]
#[automock]
pub trait InstallmentPlanRepository {
    /// Inserts the plan and its payments in a single transaction.
    async fn create_plan_with_payments(
        &self,
        plan: InsertInstallmentPlanEntity,
        payments: Vec<InsertInstallmentPaymentEntity>,
    ) -> Result<()>;

    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<InstallmentPlanEntity>>;

    /// Pending plans for a normalized email, newest first.
    async fn list_pending_by_email(&self, customer_email: &str)
    -> Result<Vec<InstallmentPlanEntity>>;

    /// Moves a pending plan to completed. Returns `false` when the plan was not pending.
    async fn mark_completed(&self, plan_id: Uuid) -> Result<bool>;

    /// Cancels a pending plan together with all of its pending payments.
    /// Returns the number of payments cancelled, or `None` when the plan was no
    /// longer pending.
    async fn cancel_plan(
        &self,
        plan_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Option<usize>>;
}
