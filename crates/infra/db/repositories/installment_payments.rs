use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, prelude::*, update};
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
    entities::installment_payments::{
        DueInstallmentPaymentEntity, InstallmentPaymentEntity, InstallmentPaymentRow,
    },
    repositories::installment_payments::InstallmentPaymentRepository,
    value_objects::{
        enums::{
            installment_payment_statuses::InstallmentPaymentStatus, plan_statuses::PlanStatus,
        },
        installments::ChargeOutcome,
    },
};

pub struct InstallmentPaymentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl InstallmentPaymentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }

    fn to_entities(rows: Vec<InstallmentPaymentRow>) -> Result<Vec<InstallmentPaymentEntity>> {
        rows.into_iter()
            .map(InstallmentPaymentEntity::try_from)
            .collect()
    }
}

#[async_trait]
impl InstallmentPaymentRepository for InstallmentPaymentPostgres {
    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<InstallmentPaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = installment_payments::table
            .filter(installment_payments::id.eq(payment_id))
            .select(InstallmentPaymentRow::as_select())
            .first::<InstallmentPaymentRow>(&mut conn)
            .optional()?;

        row.map(InstallmentPaymentEntity::try_from).transpose()
    }

    async fn find_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<InstallmentPaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = installment_payments::table
            .filter(installment_payments::stripe_payment_intent_id.eq(payment_intent_id))
            .select(InstallmentPaymentRow::as_select())
            .first::<InstallmentPaymentRow>(&mut conn)
            .optional()?;

        row.map(InstallmentPaymentEntity::try_from).transpose()
    }

    async fn list_by_plan(&self, plan_id: Uuid) -> Result<Vec<InstallmentPaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = installment_payments::table
            .filter(installment_payments::plan_id.eq(plan_id))
            .order(installment_payments::due_date.asc())
            .select(InstallmentPaymentRow::as_select())
            .load::<InstallmentPaymentRow>(&mut conn)?;

        Self::to_entities(rows)
    }

    async fn list_due_payments(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<DueInstallmentPaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = installment_payments::table
            .inner_join(installment_plans::table)
            .filter(installment_payments::status.eq(InstallmentPaymentStatus::Pending.as_str()))
            .filter(installment_payments::due_date.le(as_of))
            // A pending row with an intent is a deposit awaiting client confirmation.
            .filter(installment_payments::stripe_payment_intent_id.is_null())
            .filter(installment_plans::status.eq(PlanStatus::Pending.as_str()))
            .order(installment_payments::due_date.asc())
            .select((
                InstallmentPaymentRow::as_select(),
                installment_plans::stripe_customer_id,
                installment_plans::customer_email,
            ))
            .load::<(InstallmentPaymentRow, Option<String>, String)>(&mut conn)?;

        rows.into_iter()
            .map(|(row, stripe_customer_id, customer_email)| {
                Ok(DueInstallmentPaymentEntity {
                    payment: InstallmentPaymentEntity::try_from(row)?,
                    stripe_customer_id,
                    customer_email,
                })
            })
            .collect()
    }

    async fn claim_for_settlement(&self, payment_id: Uuid) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let claimed = update(
            installment_payments::table
                .filter(installment_payments::id.eq(payment_id))
                .filter(installment_payments::status.eq(InstallmentPaymentStatus::Pending.as_str())),
        )
        .set((
            installment_payments::status.eq(InstallmentPaymentStatus::Processing.as_str()),
            installment_payments::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(claimed == 1)
    }

    async fn mark_succeeded(
        &self,
        payment_id: Uuid,
        expected: InstallmentPaymentStatus,
        outcome: ChargeOutcome,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(
            installment_payments::table
                .filter(installment_payments::id.eq(payment_id))
                .filter(installment_payments::status.eq(expected.as_str())),
        )
        .set((
            installment_payments::status.eq(InstallmentPaymentStatus::Succeeded.as_str()),
            installment_payments::stripe_payment_intent_id.eq(outcome.payment_intent_id),
            installment_payments::payment_method_id.eq(outcome.payment_method_id),
            installment_payments::paid_at.eq(Some(outcome.at)),
            installment_payments::updated_at.eq(outcome.at),
        ))
        .execute(&mut conn)?;

        Ok(updated == 1)
    }

    async fn mark_failed(
        &self,
        payment_id: Uuid,
        expected: InstallmentPaymentStatus,
        outcome: ChargeOutcome,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(
            installment_payments::table
                .filter(installment_payments::id.eq(payment_id))
                .filter(installment_payments::status.eq(expected.as_str())),
        )
        .set((
            installment_payments::status.eq(InstallmentPaymentStatus::Failed.as_str()),
            installment_payments::stripe_payment_intent_id.eq(outcome.payment_intent_id),
            installment_payments::payment_method_id.eq(outcome.payment_method_id),
            installment_payments::paid_at.eq::<Option<DateTime<Utc>>>(None),
            installment_payments::updated_at.eq(outcome.at),
        ))
        .execute(&mut conn)?;

        Ok(updated == 1)
    }

    async fn find_next_pending_by_amount(
        &self,
        amount: i64,
    ) -> Result<Option<InstallmentPaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = installment_payments::table
            .inner_join(installment_plans::table)
            .filter(installment_payments::amount.eq(amount))
            .filter(installment_payments::status.eq(InstallmentPaymentStatus::Pending.as_str()))
            .filter(installment_payments::stripe_payment_intent_id.is_null())
            .filter(installment_plans::status.eq(PlanStatus::Pending.as_str()))
            .order(installment_payments::due_date.asc())
            .select(InstallmentPaymentRow::as_select())
            .first::<InstallmentPaymentRow>(&mut conn)
            .optional()?;

        row.map(InstallmentPaymentEntity::try_from).transpose()
    }

    async fn reschedule_due_date(
        &self,
        payment_id: Uuid,
        due_date: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = update(
            installment_payments::table
                .filter(installment_payments::id.eq(payment_id))
                .filter(installment_payments::status.eq(InstallmentPaymentStatus::Pending.as_str())),
        )
        .set((
            installment_payments::due_date.eq(due_date),
            installment_payments::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(updated == 1)
    }

    async fn list_unconfirmed_first_payments(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<InstallmentPaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // Only deposits carry a payment intent while still pending.
        let rows = installment_payments::table
            .inner_join(installment_plans::table)
            .filter(installment_payments::status.eq(InstallmentPaymentStatus::Pending.as_str()))
            .filter(installment_payments::stripe_payment_intent_id.is_not_null())
            .filter(installment_payments::created_at.lt(created_before))
            .filter(installment_plans::status.eq(PlanStatus::Pending.as_str()))
            .order(installment_payments::created_at.asc())
            .select(InstallmentPaymentRow::as_select())
            .load::<InstallmentPaymentRow>(&mut conn)?;

        Self::to_entities(rows)
    }

    async fn list_stuck_processing(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<InstallmentPaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let rows = installment_payments::table
            .filter(
                installment_payments::status.eq(InstallmentPaymentStatus::Processing.as_str()),
            )
            .filter(installment_payments::updated_at.lt(updated_before))
            .order(installment_payments::updated_at.asc())
            .select(InstallmentPaymentRow::as_select())
            .load::<InstallmentPaymentRow>(&mut conn)?;

        Self::to_entities(rows)
    }
}
