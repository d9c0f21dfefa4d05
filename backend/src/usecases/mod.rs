pub mod installment_plans;
pub mod plan_completion;
pub mod pricing_resolver;
