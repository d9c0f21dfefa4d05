use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Base price of a bookable package, per person, in minor units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackagePricing {
    pub name: String,
    pub deposit: i64,
    pub balance: i64,
}

/// Price of an add-on sold by quantity, e.g. `Ski3days`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitPricing {
    pub unit: String,
    pub unit_price: i64,
    pub min_quantity: u32,
    pub max_quantity: u32,
}

impl UnitPricing {
    pub fn price_for(&self, quantity: u32) -> Option<i64> {
        if quantity < self.min_quantity || quantity > self.max_quantity {
            return None;
        }
        self.unit_price.checked_mul(i64::from(quantity))
    }
}

/// An add-on may be sold flat (`Ski`), by quantity (`Ski3days`), or both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddonPricing {
    pub label: String,
    #[serde(default)]
    pub flat_price: Option<i64>,
    #[serde(default)]
    pub per_unit: Option<UnitPricing>,
}

/// Immutable pricing table. Loaded once at startup and handed to the resolver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingCatalog {
    pub admin_fee: i64,
    pub packages: BTreeMap<String, PackagePricing>,
    pub addons: BTreeMap<String, AddonPricing>,
}

impl PricingCatalog {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let catalog: PricingCatalog =
            serde_json::from_str(raw).context("pricing catalog is not valid JSON")?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin_fee < 0 {
            bail!("admin fee must not be negative");
        }
        if self.packages.is_empty() {
            bail!("pricing catalog has no packages");
        }

        for (id, package) in &self.packages {
            if package.deposit <= 0 || package.balance <= 0 {
                bail!("package {id} must have a positive deposit and balance");
            }
        }

        for (name, addon) in &self.addons {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
                bail!("add-on name {name:?} must be alphabetic");
            }
            if addon.flat_price.is_none() && addon.per_unit.is_none() {
                bail!("add-on {name} has neither a flat nor a per-unit price");
            }
            if matches!(addon.flat_price, Some(price) if price <= 0) {
                bail!("add-on {name} must have a positive flat price");
            }
            if let Some(unit) = &addon.per_unit {
                if unit.unit_price <= 0 {
                    bail!("add-on {name} must have a positive unit price");
                }
                if unit.min_quantity == 0 || unit.min_quantity > unit.max_quantity {
                    bail!("add-on {name} has an invalid quantity range");
                }
                if unit.unit.is_empty() || unit.unit.chars().any(|c| c.is_ascii_digit()) {
                    bail!("add-on {name} has an invalid unit {:?}", unit.unit);
                }
            }
        }

        Ok(())
    }

    pub fn package(&self, id: &str) -> Option<&PackagePricing> {
        self.packages.get(id)
    }

    pub fn addon(&self, name: &str) -> Option<&AddonPricing> {
        self.addons.get(name)
    }
}

impl Default for PricingCatalog {
    fn default() -> Self {
        let packages = BTreeMap::from([
            (
                "185".to_string(),
                PackagePricing {
                    name: "€185 Package".to_string(),
                    deposit: 5000,
                    balance: 12900,
                },
            ),
            (
                "245".to_string(),
                PackagePricing {
                    name: "€245 Package".to_string(),
                    deposit: 7400,
                    balance: 17100,
                },
            ),
        ]);

        let per_day = |unit_price| UnitPricing {
            unit: "days".to_string(),
            unit_price,
            min_quantity: 1,
            max_quantity: 7,
        };

        let addons = BTreeMap::from([
            (
                "Quad".to_string(),
                AddonPricing {
                    label: "Quad Bike Adventure".to_string(),
                    flat_price: Some(5000),
                    per_unit: None,
                },
            ),
            (
                "Ski".to_string(),
                AddonPricing {
                    label: "Ski gear".to_string(),
                    flat_price: Some(1650),
                    per_unit: Some(per_day(550)),
                },
            ),
            (
                "Snowboard".to_string(),
                AddonPricing {
                    label: "Snowboard gear".to_string(),
                    flat_price: Some(2250),
                    per_unit: Some(per_day(750)),
                },
            ),
            (
                "Lessons".to_string(),
                AddonPricing {
                    label: "Lessons (2hr session)".to_string(),
                    flat_price: Some(5000),
                    per_unit: Some(UnitPricing {
                        unit: "hr".to_string(),
                        unit_price: 2500,
                        min_quantity: 1,
                        max_quantity: 6,
                    }),
                },
            ),
        ]);

        Self {
            admin_fee: 300,
            packages,
            addons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_valid() {
        PricingCatalog::default().validate().unwrap();
    }

    #[test]
    fn unit_price_respects_quantity_range() {
        let unit = UnitPricing {
            unit: "days".to_string(),
            unit_price: 550,
            min_quantity: 1,
            max_quantity: 7,
        };

        assert_eq!(unit.price_for(3), Some(1650));
        assert_eq!(unit.price_for(0), None);
        assert_eq!(unit.price_for(8), None);
    }

    #[test]
    fn loads_catalog_from_json() {
        let raw = r#"{
            "admin_fee": 0,
            "packages": { "99": { "name": "Weekend", "deposit": 2000, "balance": 7900 } },
            "addons": {
                "Sauna": { "label": "Sauna pass", "flat_price": 1200 },
                "Bike": {
                    "label": "Bike rental",
                    "per_unit": { "unit": "days", "unit_price": 900, "min_quantity": 1, "max_quantity": 3 }
                }
            }
        }"#;

        let catalog = PricingCatalog::from_json_str(raw).unwrap();

        assert_eq!(catalog.package("99").map(|p| p.balance), Some(7900));
        assert_eq!(catalog.addon("Sauna").and_then(|a| a.flat_price), Some(1200));
        assert!(catalog.addon("Bike").and_then(|a| a.flat_price).is_none());
    }

    #[test]
    fn rejects_catalog_with_inverted_quantity_range() {
        let raw = r#"{
            "admin_fee": 300,
            "packages": { "185": { "name": "Base", "deposit": 5000, "balance": 12900 } },
            "addons": {
                "Ski": {
                    "label": "Ski gear",
                    "per_unit": { "unit": "days", "unit_price": 550, "min_quantity": 5, "max_quantity": 2 }
                }
            }
        }"#;

        let err = PricingCatalog::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("quantity range"));
    }
}
