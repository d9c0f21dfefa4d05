use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Value of the `payment_type` metadata key attached to Stripe payment intents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    FirstInstallment,
    ScheduledInstallment,
}

impl ChargeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeKind::FirstInstallment => "first_installment",
            ChargeKind::ScheduledInstallment => "scheduled_installment",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "first_installment" => Some(ChargeKind::FirstInstallment),
            "scheduled_installment" => Some(ChargeKind::ScheduledInstallment),
            _ => None,
        }
    }
}

impl Display for ChargeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
