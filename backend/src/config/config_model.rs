use chrono::{DateTime, Duration, Utc};
use crates::domain::value_objects::pricing::PricingCatalog;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub stripe: Stripe,
    pub checkout: Checkout,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub balance_due: BalanceDueDate,
    pub pricing_catalog: PricingCatalog,
}

/// When the second installment of a new plan falls due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDueDate {
    /// Seasonal bookings share one balance date.
    Fixed(DateTime<Utc>),
    DaysAfterCheckout(i64),
}

impl BalanceDueDate {
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BalanceDueDate::Fixed(date) => *date,
            BalanceDueDate::DaysAfterCheckout(days) => now + Duration::days(*days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_due_date_ignores_checkout_time() {
        let fixed = Utc.with_ymd_and_hms(2027, 1, 6, 0, 0, 0).unwrap();
        assert_eq!(BalanceDueDate::Fixed(fixed).resolve(Utc::now()), fixed);
    }

    #[test]
    fn relative_due_date_counts_from_checkout() {
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap();
        let due = BalanceDueDate::DaysAfterCheckout(60).resolve(now);
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 11, 30, 9, 0, 0).unwrap());
    }
}
