use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::installment_payment_statuses::InstallmentPaymentStatus,
    infra::db::postgres::schema::installment_payments,
};

#[derive(Debug, Clone, PartialEq)]
pub struct InstallmentPaymentEntity {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub due_date: DateTime<Utc>,
    pub status: InstallmentPaymentStatus,
    pub stripe_payment_intent_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = installment_payments)]
pub struct InstallmentPaymentRow {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub due_date: DateTime<Utc>,
    pub status: String,
    pub stripe_payment_intent_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InstallmentPaymentRow> for InstallmentPaymentEntity {
    type Error = anyhow::Error;

    fn try_from(value: InstallmentPaymentRow) -> Result<Self> {
        let status = InstallmentPaymentStatus::from_str(&value.status).ok_or_else(|| {
            anyhow!(
                "installment payment {} has unknown status {:?}",
                value.id,
                value.status
            )
        })?;

        Ok(Self {
            id: value.id,
            plan_id: value.plan_id,
            amount: value.amount,
            due_date: value.due_date,
            status,
            stripe_payment_intent_id: value.stripe_payment_intent_id,
            payment_method_id: value.payment_method_id,
            paid_at: value.paid_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = installment_payments)]
pub struct InsertInstallmentPaymentEntity {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub due_date: DateTime<Utc>,
    pub status: String,
    pub stripe_payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A due payment joined with the owning plan's Stripe identity, as loaded by a
/// settlement run.
#[derive(Debug, Clone, PartialEq)]
pub struct DueInstallmentPaymentEntity {
    pub payment: InstallmentPaymentEntity,
    pub stripe_customer_id: Option<String>,
    pub customer_email: String,
}
