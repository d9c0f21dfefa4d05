pub mod checkout;
pub mod installment_plans;
pub mod stripe_webhook;
