use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::plan_statuses::PlanStatus,
    infra::db::postgres::schema::installment_plans,
};

#[derive(Debug, Clone, PartialEq)]
pub struct InstallmentPlanEntity {
    pub id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    pub stripe_customer_id: Option<String>,
    pub package_type: Option<String>,
    pub selected_addons: Vec<String>,
    pub status: PlanStatus,
    pub cancellation_requested: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw row used for Diesel queries. Add-ons stay as JSON and status as text until
/// converted into [`InstallmentPlanEntity`].
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = installment_plans)]
pub struct InstallmentPlanRow {
    pub id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    pub stripe_customer_id: Option<String>,
    pub package_type: Option<String>,
    pub selected_addons: serde_json::Value,
    pub status: String,
    pub cancellation_requested: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InstallmentPlanRow> for InstallmentPlanEntity {
    type Error = anyhow::Error;

    fn try_from(value: InstallmentPlanRow) -> Result<Self> {
        let status = PlanStatus::from_str(&value.status).ok_or_else(|| {
            anyhow!(
                "installment plan {} has unknown status {:?}",
                value.id,
                value.status
            )
        })?;
        let selected_addons = serde_json::from_value(value.selected_addons).unwrap_or_default();

        Ok(Self {
            id: value.id,
            customer_name: value.customer_name,
            customer_email: value.customer_email,
            customer_phone: value.customer_phone,
            total_amount: value.total_amount,
            currency: value.currency,
            stripe_customer_id: value.stripe_customer_id,
            package_type: value.package_type,
            selected_addons,
            status,
            cancellation_requested: value.cancellation_requested,
            cancelled_at: value.cancelled_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = installment_plans)]
pub struct InsertInstallmentPlanEntity {
    pub id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    pub stripe_customer_id: Option<String>,
    pub package_type: Option<String>,
    pub selected_addons: serde_json::Value,
    pub status: String,
    pub cancellation_requested: bool,
    pub created_at: DateTime<Utc>,
}
