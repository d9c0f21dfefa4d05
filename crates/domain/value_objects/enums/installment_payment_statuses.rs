use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// `Processing` marks a payment claimed by a settlement run while the off-session
/// charge is in flight. It only ever moves on to `Succeeded` or `Failed`.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentPaymentStatus {
    #[default]
    Pending,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
}

impl InstallmentPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentPaymentStatus::Pending => "pending",
            InstallmentPaymentStatus::Processing => "processing",
            InstallmentPaymentStatus::Succeeded => "succeeded",
            InstallmentPaymentStatus::Failed => "failed",
            InstallmentPaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(InstallmentPaymentStatus::Pending),
            "processing" => Some(InstallmentPaymentStatus::Processing),
            "succeeded" => Some(InstallmentPaymentStatus::Succeeded),
            "failed" => Some(InstallmentPaymentStatus::Failed),
            "cancelled" => Some(InstallmentPaymentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallmentPaymentStatus::Succeeded
                | InstallmentPaymentStatus::Failed
                | InstallmentPaymentStatus::Cancelled
        )
    }
}

impl Display for InstallmentPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
