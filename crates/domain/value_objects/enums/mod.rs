pub mod charge_kinds;
pub mod installment_payment_statuses;
pub mod plan_statuses;
