pub mod force_settle_payment;
pub mod reconcile_installments;
pub mod settle_due_payments;
