use super::config_model::{Database, DotEnvyConfig, Settlement, Stripe, WorkerServer};
use anyhow::{Context, Result};
use crates::payments::stripe_client::DEFAULT_API_BASE;

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let worker_server = WorkerServer {
        port: required("SERVER_PORT_WORKER")?
            .parse()
            .context("SERVER_PORT_WORKER is invalid")?,
        body_limit: required("SERVER_BODY_LIMIT")?
            .parse()
            .context("SERVER_BODY_LIMIT is invalid")?,
        timeout: required("SERVER_TIMEOUT")?
            .parse()
            .context("SERVER_TIMEOUT is invalid")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
    };

    let stripe = Stripe {
        secret_key: required("STRIPE_SECRET_KEY")?,
        api_base: optional("STRIPE_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string(),
    };

    let settlement = Settlement {
        internal_token: optional("INTERNAL_SETTLEMENT_TOKEN"),
        enabled: parse_bool(&optional("SETTLEMENT_ENABLED").unwrap_or_else(|| "true".to_string()))
            .context("SETTLEMENT_ENABLED is invalid")?,
        interval_secs: optional("SETTLEMENT_INTERVAL_SECS")
            .unwrap_or_else(|| "3600".to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .context("SETTLEMENT_INTERVAL_SECS is invalid")?,
        reconciliation_grace_hours: optional("RECONCILIATION_GRACE_HOURS")
            .unwrap_or_else(|| "24".to_string())
            .parse::<i64>()
            .ok()
            .filter(|hours| *hours >= 0)
            .context("RECONCILIATION_GRACE_HOURS is invalid")?,
    };

    Ok(DotEnvyConfig {
        worker_server,
        database,
        stripe,
        settlement,
    })
}

fn required(key: &str) -> Result<String> {
    optional(key).with_context(|| format!("{key} is missing"))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
