use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::enums::{
    charge_kinds::ChargeKind, installment_payment_statuses::InstallmentPaymentStatus,
    plan_statuses::PlanStatus,
};

/// Plans are always charged in euro; there is no multi-currency support.
pub const PLAN_CURRENCY: &str = "eur";

/// Every plan is split into a deposit and a balance.
pub const INSTALLMENTS_PER_PLAN: usize = 2;

/// Emails are the identity key for plans and are compared case-insensitively.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn names_match(on_file: &str, provided: &str) -> bool {
    on_file.trim().to_lowercase() == provided.trim().to_lowercase()
}

/// Metadata attached to every payment intent so Stripe objects can be traced back
/// to their plan and payment rows.
pub fn charge_metadata(plan_id: Uuid, payment_id: Uuid, kind: ChargeKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("plan_id".to_string(), plan_id.to_string()),
        ("payment_id".to_string(), payment_id.to_string()),
        ("payment_type".to_string(), kind.to_string()),
    ])
}

/// One key per payment row, so a repeated charge attempt cannot bill twice.
pub fn scheduled_charge_idempotency_key(payment_id: Uuid) -> String {
    format!("installment-payment-{payment_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateInstallmentPlanModel {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub deposit_amount: i64,
    pub balance_amount: i64,
    pub balance_due_date: DateTime<Utc>,
    pub package_type: Option<String>,
    pub selected_addons: Vec<String>,
}

/// Everything the checkout page needs to finish card confirmation client-side.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatedInstallmentPlanDto {
    pub plan_id: Uuid,
    pub first_payment_id: Uuid,
    pub second_payment_id: Uuid,
    pub client_secret: String,
    pub setup_intent_client_secret: String,
    pub customer_id: String,
    pub deposit_amount: i64,
    pub balance_amount: i64,
    pub balance_due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelInstallmentPlanModel {
    pub customer_name: String,
    pub customer_email: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CancelledInstallmentPlanDto {
    pub plan_id: Uuid,
    pub cancelled_payments: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfirmedInstallmentPaymentDto {
    pub payment_id: Uuid,
    pub plan_id: Uuid,
    pub status: InstallmentPaymentStatus,
    pub plan_status: PlanStatus,
}

/// Processor references written back when a payment reaches a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub payment_intent_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub at: DateTime<Utc>,
}
