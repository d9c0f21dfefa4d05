use std::{env, fs};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use crates::{
    domain::value_objects::pricing::PricingCatalog, payments::stripe_client::DEFAULT_API_BASE,
};
use url::Url;

use super::config_model::{
    BackendServer, BalanceDueDate, Checkout, Database, DotEnvyConfig, Stripe,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: required("SERVER_PORT_BACKEND")?
            .parse()
            .context("SERVER_PORT_BACKEND is invalid")?,
        body_limit: required("SERVER_BODY_LIMIT")?
            .parse()
            .context("SERVER_BODY_LIMIT is invalid")?,
        timeout: required("SERVER_TIMEOUT")?
            .parse()
            .context("SERVER_TIMEOUT is invalid")?,
        allowed_origins: optional("CORS_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or_default(),
    };

    let database = Database {
        url: required("DATABASE_URL")?,
    };

    let stripe = Stripe {
        secret_key: required("STRIPE_SECRET_KEY")?,
        webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
        api_base: parse_api_base(
            &optional("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        )?,
    };

    let balance_due = match optional("CHECKOUT_BALANCE_DUE_DATE") {
        Some(raw) => BalanceDueDate::Fixed(
            DateTime::parse_from_rfc3339(&raw)
                .context("CHECKOUT_BALANCE_DUE_DATE is invalid")?
                .with_timezone(&Utc),
        ),
        None => BalanceDueDate::DaysAfterCheckout(
            optional("CHECKOUT_BALANCE_DUE_IN_DAYS")
                .unwrap_or_else(|| "60".to_string())
                .parse::<i64>()
                .ok()
                .filter(|days| *days > 0)
                .context("CHECKOUT_BALANCE_DUE_IN_DAYS is invalid")?,
        ),
    };

    let pricing_catalog = match optional("PRICING_CATALOG_PATH") {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read pricing catalog at {path}"))?;
            PricingCatalog::from_json_str(&raw)
                .with_context(|| format!("pricing catalog at {path} is invalid"))?
        }
        None => PricingCatalog::default(),
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        stripe,
        checkout: Checkout {
            balance_due,
            pricing_catalog,
        },
    })
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{key} is missing"))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|v| {
        let trimmed = v.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

fn parse_api_base(raw: &str) -> Result<String> {
    let url = Url::parse(raw).context("STRIPE_API_BASE is invalid")?;
    if url.scheme() != "https" && url.host_str() != Some("localhost") {
        bail!("STRIPE_API_BASE must use https");
    }
    Ok(raw.trim_end_matches('/').to_string())
}
