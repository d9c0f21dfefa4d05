pub mod enums;
pub mod installments;
pub mod pricing;
