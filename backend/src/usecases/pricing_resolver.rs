use std::sync::Arc;

use crates::domain::value_objects::pricing::{AddonPricing, PricingCatalog};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
}

impl PricingError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::BAD_REQUEST
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PricedAddon {
    pub token: String,
    pub label: String,
    pub quantity: Option<u32>,
    pub price: i64,
}

/// A resolved selection, ready to be turned into an installment plan.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PricingQuote {
    pub package_id: String,
    pub package_name: String,
    pub addons: Vec<PricedAddon>,
    pub admin_fee: i64,
    pub person_count: u32,
    pub deposit_amount: i64,
    pub balance_amount: i64,
    pub total_amount: i64,
}

impl PricingQuote {
    /// Tokens that survived validation, in selection order.
    pub fn selected_addons(&self) -> Vec<String> {
        self.addons.iter().map(|addon| addon.token.clone()).collect()
    }
}

pub struct PricingResolver {
    catalog: Arc<PricingCatalog>,
}

impl PricingResolver {
    pub fn new(catalog: Arc<PricingCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolves `<packageId>(+<addonToken>)*(*<personCount>)?`.
    pub fn resolve_slug(&self, slug: &str) -> Result<PricingQuote, PricingError> {
        let slug = slug.trim();
        let mut halves = slug.split('*');
        let selection = halves.next().unwrap_or_default();
        let person_count = match (halves.next(), halves.next()) {
            (None, _) => 1,
            (Some(raw), None) => parse_person_count(raw)?,
            (Some(_), Some(_)) => {
                return Err(PricingError::InvalidSelection(
                    "more than one person-count suffix".to_string(),
                ));
            }
        };

        let mut parts = selection.split('+');
        let package_id = parts.next().unwrap_or_default().trim();
        let tokens: Vec<&str> = parts.collect();

        self.resolve(package_id, &tokens, person_count)
    }

    pub fn resolve(
        &self,
        package_id: &str,
        addon_tokens: &[&str],
        person_count: u32,
    ) -> Result<PricingQuote, PricingError> {
        if person_count == 0 {
            return Err(PricingError::InvalidSelection(
                "person count must be at least 1".to_string(),
            ));
        }

        let package = self.catalog.package(package_id).ok_or_else(|| {
            PricingError::InvalidSelection(format!("unknown package {package_id:?}"))
        })?;

        let addons: Vec<PricedAddon> = addon_tokens
            .iter()
            .filter_map(|token| self.price_addon(token.trim()))
            .collect();

        let persons = i64::from(person_count);
        let overflow = || PricingError::InvalidSelection("selection total is too large".to_string());

        let per_person_deposit = addons
            .iter()
            .try_fold(package.deposit, |sum, addon| sum.checked_add(addon.price))
            .and_then(|sum| sum.checked_add(self.catalog.admin_fee))
            .ok_or_else(overflow)?;
        let deposit_amount = per_person_deposit.checked_mul(persons).ok_or_else(overflow)?;
        let balance_amount = package.balance.checked_mul(persons).ok_or_else(overflow)?;
        let total_amount = deposit_amount
            .checked_add(balance_amount)
            .ok_or_else(overflow)?;

        Ok(PricingQuote {
            package_id: package_id.to_string(),
            package_name: package.name.clone(),
            addons,
            admin_fee: self.catalog.admin_fee,
            person_count,
            deposit_amount,
            balance_amount,
            total_amount,
        })
    }

    /// Unknown or out-of-range tokens are dropped, not rejected.
    fn price_addon(&self, token: &str) -> Option<PricedAddon> {
        let name_end = token
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(token.len());
        let (name, rest) = token.split_at(name_end);
        let addon = self.catalog.addon(name);

        let priced = match addon {
            Some(addon) if rest.is_empty() => flat_price(token, addon),
            Some(addon) => per_unit_price(token, addon, rest),
            None => None,
        };

        if priced.is_none() {
            debug!(token, "pricing: ignoring unrecognised add-on token");
        }
        priced
    }
}

fn parse_person_count(raw: &str) -> Result<u32, PricingError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(PricingError::InvalidSelection(format!(
            "person count {raw:?} is not a positive integer"
        )));
    }

    match raw.parse::<u32>() {
        Ok(count) if count >= 1 => Ok(count),
        _ => Err(PricingError::InvalidSelection(format!(
            "person count {raw:?} is not a positive integer"
        ))),
    }
}

fn flat_price(token: &str, addon: &AddonPricing) -> Option<PricedAddon> {
    addon.flat_price.map(|price| PricedAddon {
        token: token.to_string(),
        label: addon.label.clone(),
        quantity: None,
        price,
    })
}

fn per_unit_price(token: &str, addon: &AddonPricing, rest: &str) -> Option<PricedAddon> {
    let unit_pricing = addon.per_unit.as_ref()?;

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, unit) = rest.split_at(digits_end);
    if digits.is_empty() || !unit.eq_ignore_ascii_case(&unit_pricing.unit) {
        return None;
    }

    let quantity = digits.parse::<u32>().ok()?;
    let price = unit_pricing.price_for(quantity)?;

    Some(PricedAddon {
        token: token.to_string(),
        label: format!("{} ({} {})", addon.label, quantity, unit_pricing.unit),
        quantity: Some(quantity),
        price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PricingResolver {
        PricingResolver::new(Arc::new(PricingCatalog::default()))
    }

    fn resolver_without_admin_fee() -> PricingResolver {
        PricingResolver::new(Arc::new(PricingCatalog {
            admin_fee: 0,
            ..PricingCatalog::default()
        }))
    }

    #[test]
    fn bare_package_without_admin_fee_matches_base_prices() {
        let quote = resolver_without_admin_fee().resolve_slug("185").unwrap();

        assert_eq!(quote.deposit_amount, 5000);
        assert_eq!(quote.balance_amount, 12900);
        assert_eq!(quote.total_amount, 17900);
        assert_eq!(quote.person_count, 1);
    }

    #[test]
    fn admin_fee_is_added_to_the_deposit_only() {
        let quote = resolver().resolve_slug("185").unwrap();

        assert_eq!(quote.deposit_amount, 5300);
        assert_eq!(quote.balance_amount, 12900);
    }

    #[test]
    fn flat_and_per_unit_addons_are_summed_into_the_deposit() {
        let quote = resolver().resolve_slug("245+Quad+Ski3days+Lessons2hr").unwrap();

        // 7400 + 5000 + 3 * 550 + 2 * 2500 + 300
        assert_eq!(quote.deposit_amount, 19350);
        assert_eq!(quote.balance_amount, 17100);
        assert_eq!(
            quote.selected_addons(),
            vec!["Quad", "Ski3days", "Lessons2hr"]
        );
        assert_eq!(quote.addons[1].quantity, Some(3));
    }

    #[test]
    fn person_count_multiplies_deposit_and_balance() {
        let quote = resolver().resolve_slug("185+Snowboard*3").unwrap();

        assert_eq!(quote.deposit_amount, (5000 + 2250 + 300) * 3);
        assert_eq!(quote.balance_amount, 12900 * 3);
        assert_eq!(quote.total_amount, quote.deposit_amount + quote.balance_amount);
    }

    #[test]
    fn unrecognised_tokens_never_change_the_total() {
        let plain = resolver().resolve_slug("185+Ski").unwrap();
        let noisy = resolver()
            .resolve_slug("185+Ski+Jetpack+Ski9days+Ski3weeks+Quad2days++ski")
            .unwrap();

        assert_eq!(plain.deposit_amount, noisy.deposit_amount);
        assert_eq!(plain.balance_amount, noisy.balance_amount);
        assert_eq!(noisy.selected_addons(), vec!["Ski"]);
    }

    #[test]
    fn unit_suffix_is_case_insensitive() {
        let quote = resolver().resolve_slug("185+Ski2Days").unwrap();
        assert_eq!(quote.deposit_amount, 5000 + 1100 + 300);
    }

    #[test]
    fn unknown_package_is_an_invalid_selection() {
        let err = resolver().resolve_slug("999+Quad").unwrap_err();
        assert!(matches!(err, PricingError::InvalidSelection(_)));
    }

    #[test]
    fn empty_slug_is_an_invalid_selection() {
        assert!(resolver().resolve_slug("").is_err());
    }

    #[test]
    fn malformed_person_counts_are_rejected() {
        for slug in ["185*0", "185*", "185*two", "185*2*3", "185*-1", "185*99999999999"] {
            assert!(
                resolver().resolve_slug(slug).is_err(),
                "expected {slug} to be rejected"
            );
        }
    }

    #[test]
    fn deposit_plus_balance_is_positive_for_every_package() {
        let resolver = resolver();
        for package_id in ["185", "245"] {
            for persons in 1..=4 {
                let quote = resolver
                    .resolve(package_id, &["Quad", "Lessons6hr"], persons)
                    .unwrap();
                assert!(quote.total_amount > 0);
                assert_eq!(quote.total_amount, quote.deposit_amount + quote.balance_amount);
            }
        }
    }

    #[test]
    fn overflowing_totals_are_rejected() {
        let mut catalog = PricingCatalog::default();
        if let Some(package) = catalog.packages.get_mut("185") {
            package.balance = i64::MAX / 2;
        }
        let resolver = PricingResolver::new(Arc::new(catalog));

        let err = resolver.resolve_slug("185*3").unwrap_err();
        assert!(matches!(err, PricingError::InvalidSelection(_)));
    }
}
