use anyhow::{Result, anyhow};
use crates::domain::{
    repositories::{
        installment_payments::InstallmentPaymentRepository,
        installment_plans::InstallmentPlanRepository,
    },
    value_objects::{
        enums::{
            installment_payment_statuses::InstallmentPaymentStatus, plan_statuses::PlanStatus,
        },
        installments::INSTALLMENTS_PER_PLAN,
    },
};
use tracing::info;
use uuid::Uuid;

/// Completes the plan once every one of its payments has succeeded and returns
/// the plan status as stored afterwards. Shared by deposit confirmation and
/// settlement.
pub async fn complete_plan_if_settled<P, Pay>(
    plan_repo: &P,
    payment_repo: &Pay,
    plan_id: Uuid,
) -> Result<PlanStatus>
where
    P: InstallmentPlanRepository + Send + Sync + ?Sized,
    Pay: InstallmentPaymentRepository + Send + Sync + ?Sized,
{
    let payments = payment_repo.list_by_plan(plan_id).await?;

    // A plan missing a payment row is never treated as settled.
    let settled = payments.len() >= INSTALLMENTS_PER_PLAN
        && payments
            .iter()
            .all(|payment| payment.status == InstallmentPaymentStatus::Succeeded);

    if settled && plan_repo.mark_completed(plan_id).await? {
        info!(%plan_id, "installment_plans: every payment succeeded; plan completed");
    }

    let plan = plan_repo
        .find_by_id(plan_id)
        .await?
        .ok_or_else(|| anyhow!("installment plan {plan_id} not found"))?;

    Ok(plan.status)
}
