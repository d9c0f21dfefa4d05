pub mod installment_payments;
pub mod installment_plans;
