use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{installment_payments, installment_plans},
    },
};
use domain::{
    entities::{
        installment_payments::InsertInstallmentPaymentEntity,
        installment_plans::{
            InsertInstallmentPlanEntity, InstallmentPlanEntity, InstallmentPlanRow,
        },
    },
    repositories::installment_plans::InstallmentPlanRepository,
    value_objects::enums::{
        installment_payment_statuses::InstallmentPaymentStatus, plan_statuses::PlanStatus,
    },
};

pub struct InstallmentPlanPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl InstallmentPlanPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl InstallmentPlanRepository for InstallmentPlanPostgres {
    async fn create_plan_with_payments(
        &self,
        plan: InsertInstallmentPlanEntity,
        payments: Vec<InsertInstallmentPaymentEntity>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            insert_into(installment_plans::table)
                .values(&plan)
                .execute(conn)?;
            insert_into(installment_payments::table)
                .values(&payments)
                .execute(conn)?;
            Ok(())
        })?;

        Ok(())
    }

    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<InstallmentPlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = installment_plans::table
            .filter(installment_plans::id.eq(plan_id))
            .select(InstallmentPlanRow::as_select())
            .first::<InstallmentPlanRow>(&mut conn)
            .optional()?;

        row.map(InstallmentPlanEntity::try_from).transpose()
    }

    async fn list_pending_by_email(
        &self,
        customer_email: &str,
    ) -> Result<Vec<InstallmentPlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = installment_plans::table
            .filter(installment_plans::customer_email.eq(customer_email))
            .filter(installment_plans::status.eq(PlanStatus::Pending.as_str()))
            .order(installment_plans::created_at.desc())
            .select(InstallmentPlanRow::as_select())
            .load::<InstallmentPlanRow>(&mut conn)?;

        rows.into_iter()
            .map(InstallmentPlanEntity::try_from)
            .collect()
    }

    async fn mark_completed(&self, plan_id: Uuid) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(
            installment_plans::table
                .filter(installment_plans::id.eq(plan_id))
                .filter(installment_plans::status.eq(PlanStatus::Pending.as_str())),
        )
        .set((
            installment_plans::status.eq(PlanStatus::Completed.as_str()),
            installment_plans::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(updated > 0)
    }

    async fn cancel_plan(
        &self,
        plan_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let cancelled = conn.transaction::<Option<usize>, diesel::result::Error, _>(|conn| {
            let plans_updated = update(
                installment_plans::table
                    .filter(installment_plans::id.eq(plan_id))
                    .filter(installment_plans::status.eq(PlanStatus::Pending.as_str())),
            )
            .set((
                installment_plans::status.eq(PlanStatus::Cancelled.as_str()),
                installment_plans::cancellation_requested.eq(true),
                installment_plans::cancelled_at.eq(Some(cancelled_at)),
                installment_plans::updated_at.eq(cancelled_at),
            ))
            .execute(conn)?;

            if plans_updated == 0 {
                return Ok(None);
            }

            // Succeeded and in-flight payments are left alone.
            let payments_cancelled = update(
                installment_payments::table
                    .filter(installment_payments::plan_id.eq(plan_id))
                    .filter(
                        installment_payments::status
                            .eq(InstallmentPaymentStatus::Pending.as_str()),
                    ),
            )
            .set((
                installment_payments::status.eq(InstallmentPaymentStatus::Cancelled.as_str()),
                installment_payments::updated_at.eq(cancelled_at),
            ))
            .execute(conn)?;

            Ok(Some(payments_cancelled))
        })?;

        Ok(cancelled)
    }
}
