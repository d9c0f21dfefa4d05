use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, anyhow};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::error;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum clock skew accepted on a signed webhook timestamp.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeClientConfig {
    pub secret_key: String,
    /// Only the backend receives webhooks; the worker leaves this unset.
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: Option<String>,
    api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub livemode: Option<bool>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    /// The payment intent carried by `payment_intent.*` events.
    pub fn payment_intent(&self) -> Option<StripePaymentIntent> {
        serde_json::from_value(self.data.object.clone()).ok()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StripeSetupIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StripePaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: Option<i64>,
    pub customer: Option<String>,
    pub payment_method: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripePaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StripePaymentMethod {
    pub id: String,
    /// Unix seconds.
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentRequest {
    pub amount: i64,
    pub currency: String,
    pub customer_id: String,
    /// Saves the card for later off-session charges.
    pub setup_future_usage: bool,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffSessionChargeRequest {
    pub amount: i64,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
    decline_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

/// Hex SHA-256 over the given parts, usable as a Stripe `Idempotency-Key`.
pub fn hashed_idempotency_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

impl StripeClient {
    pub fn new(config: StripeClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: config.secret_key,
            webhook_secret: config.webhook_secret,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn metadata_fields(metadata: &BTreeMap<String, String>, body: &mut Vec<(String, String)>) {
        for (key, value) in metadata {
            body.push((format!("metadata[{key}]"), value.clone()));
        }
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .or_else(|| resp.headers().get("stripe-request-id"))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.as_deref()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.as_deref()),
            stripe_error_param = ?details.as_ref().and_then(|d| d.param.as_deref()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.as_deref()),
            stripe_decline_code = ?details.as_ref().and_then(|d| d.decline_code.as_deref()),
            context = %context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    async fn post_form(
        &self,
        path: &str,
        body: &[(String, String)],
        idempotency_key: Option<&str>,
        context: &str,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(body);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let resp = request.send().await?;
        Self::ensure_success(resp, context).await
    }

    /// https://stripe.com/docs/api/customers/create
    pub async fn create_customer(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<String> {
        let mut body = vec![
            ("name".to_string(), name.to_string()),
            ("email".to_string(), email.to_string()),
        ];
        if let Some(phone) = phone.filter(|p| !p.trim().is_empty()) {
            body.push(("phone".to_string(), phone.to_string()));
        }

        let resp = self
            .post_form("customers", &body, None, "create customer")
            .await?;

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let parsed: CustomerResp = resp.json().await?;
        Ok(parsed.id)
    }

    /// Card setup intent for later off-session charges.
    /// https://stripe.com/docs/api/setup_intents/create
    pub async fn create_setup_intent(&self, customer_id: &str) -> Result<StripeSetupIntent> {
        let body = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("usage".to_string(), "off_session".to_string()),
        ];

        let resp = self
            .post_form("setup_intents", &body, None, "create setup intent")
            .await?;
        Ok(resp.json().await?)
    }

    /// https://stripe.com/docs/api/payment_intents/create
    pub async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<StripePaymentIntent> {
        let mut body = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("customer".to_string(), request.customer_id.clone()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
        ];
        if request.setup_future_usage {
            body.push(("setup_future_usage".to_string(), "off_session".to_string()));
        }
        Self::metadata_fields(&request.metadata, &mut body);

        let resp = self
            .post_form(
                "payment_intents",
                &body,
                Some(&request.idempotency_key),
                "create payment intent",
            )
            .await?;
        Ok(resp.json().await?)
    }

    /// Creates and confirms a payment intent against a saved card without the
    /// customer present.
    pub async fn charge_off_session(
        &self,
        request: &OffSessionChargeRequest,
    ) -> Result<StripePaymentIntent> {
        let mut body = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("customer".to_string(), request.customer_id.clone()),
            ("payment_method".to_string(), request.payment_method_id.clone()),
            ("off_session".to_string(), "true".to_string()),
            ("confirm".to_string(), "true".to_string()),
        ];
        Self::metadata_fields(&request.metadata, &mut body);

        let resp = self
            .post_form(
                "payment_intents",
                &body,
                Some(&request.idempotency_key),
                "charge off session",
            )
            .await?;
        Ok(resp.json().await?)
    }

    /// https://stripe.com/docs/api/payment_intents/retrieve
    pub async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<StripePaymentIntent> {
        let resp = self
            .http
            .get(self.url(&format!("payment_intents/{payment_intent_id}")))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve payment intent").await?;

        Ok(resp.json().await?)
    }

    /// https://stripe.com/docs/api/payment_methods/customer_list
    pub async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<StripePaymentMethod>> {
        let resp = self
            .http
            .get(self.url(&format!("customers/{customer_id}/payment_methods")))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .query(&[("type", "card"), ("limit", "100")])
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "list payment methods").await?;

        let list: StripeList<StripePaymentMethod> = resp.json().await?;
        Ok(list.data)
    }

    /// Verifies the webhook signature. https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent> {
        self.verify_webhook_signature_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    pub fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now_secs: i64,
    ) -> Result<StripeEvent> {
        let webhook_secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| anyhow!("stripe webhook secret is not configured"))?;

        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest);
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signatures.push(rest);
            }
        }

        let timestamp = timestamp.ok_or_else(|| anyhow!("missing timestamp in stripe-signature"))?;
        if signatures.is_empty() {
            anyhow::bail!("missing v1 in stripe-signature");
        }

        let signed_at: i64 = timestamp
            .parse()
            .map_err(|_| anyhow!("invalid timestamp in stripe-signature"))?;
        if (now_secs - signed_at).abs() > WEBHOOK_TOLERANCE_SECS {
            anyhow::bail!("webhook timestamp is outside the tolerance window");
        }

        let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);

        // Stripe sends one v1 entry per active secret during rotation.
        let matched = signatures.iter().any(|signature| {
            hex::decode(signature)
                .map(|provided| mac.clone().verify_slice(&provided).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            anyhow::bail!("invalid webhook signature");
        }

        let event: StripeEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(webhook_secret: Option<&str>) -> StripeClient {
        StripeClient::new(StripeClientConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: webhook_secret.map(str::to_string),
            api_base: format!("{DEFAULT_API_BASE}/"),
        })
    }

    fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    const SIGNED_AT: i64 = 1_700_000_000;

    const PAYLOAD: &[u8] = br#"{
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_1",
            "status": "succeeded",
            "amount": 5300,
            "customer": "cus_1",
            "payment_method": "pm_1",
            "metadata": { "payment_type": "first_installment" }
        } }
    }"#;

    #[test]
    fn accepts_valid_signature_and_parses_payment_intent() {
        let signature = sign("whsec_test", "1700000000", PAYLOAD);
        let header = format!("t=1700000000,v1={signature}");

        let event = client(Some("whsec_test"))
            .verify_webhook_signature_at(PAYLOAD, &header, SIGNED_AT)
            .unwrap();

        assert_eq!(event.type_, "payment_intent.succeeded");
        let intent = event.payment_intent().unwrap();
        assert!(intent.is_succeeded());
        assert_eq!(intent.payment_method.as_deref(), Some("pm_1"));
        assert_eq!(
            intent.metadata.get("payment_type").map(String::as_str),
            Some("first_installment")
        );
    }

    #[test]
    fn accepts_any_matching_signature_during_rotation() {
        let signature = sign("whsec_test", "1700000000", PAYLOAD);
        let header = format!("t=1700000000, v1=deadbeef, v1={signature}");

        assert!(
            client(Some("whsec_test"))
                .verify_webhook_signature_at(PAYLOAD, &header, SIGNED_AT)
                .is_ok()
        );
    }

    #[test]
    fn rejects_signature_from_other_secret() {
        let signature = sign("whsec_other", "1700000000", PAYLOAD);
        let header = format!("t=1700000000,v1={signature}");

        let err = client(Some("whsec_test"))
            .verify_webhook_signature_at(PAYLOAD, &header, SIGNED_AT)
            .unwrap_err();
        assert!(err.to_string().contains("invalid webhook signature"));
    }

    #[test]
    fn rejects_stale_and_future_timestamps() {
        let signature = sign("whsec_test", "1700000000", PAYLOAD);
        let header = format!("t=1700000000,v1={signature}");
        let client = client(Some("whsec_test"));

        let stale = client
            .verify_webhook_signature_at(PAYLOAD, &header, SIGNED_AT + WEBHOOK_TOLERANCE_SECS + 1)
            .unwrap_err();
        assert!(stale.to_string().contains("tolerance"));

        assert!(
            client
                .verify_webhook_signature_at(PAYLOAD, &header, SIGNED_AT - WEBHOOK_TOLERANCE_SECS - 1)
                .is_err()
        );
        assert!(
            client
                .verify_webhook_signature_at(PAYLOAD, &header, SIGNED_AT + WEBHOOK_TOLERANCE_SECS)
                .is_ok()
        );
    }

    #[test]
    fn wall_clock_verification_accepts_fresh_and_rejects_old_webhooks() {
        let now = chrono::Utc::now().timestamp();
        let fresh = now.to_string();
        let signature = sign("whsec_test", &fresh, PAYLOAD);
        let header = format!("t={fresh},v1={signature}");

        assert!(client(Some("whsec_test")).verify_webhook_signature(PAYLOAD, &header).is_ok());

        let old_signature = sign("whsec_test", "1700000000", PAYLOAD);
        let old_header = format!("t=1700000000,v1={old_signature}");
        assert!(client(Some("whsec_test")).verify_webhook_signature(PAYLOAD, &old_header).is_err());
    }

    #[test]
    fn rejects_header_without_timestamp() {
        let err = client(Some("whsec_test"))
            .verify_webhook_signature_at(PAYLOAD, "v1=abcd", SIGNED_AT)
            .unwrap_err();
        assert!(err.to_string().contains("missing timestamp"));
    }

    #[test]
    fn rejects_webhooks_when_secret_is_not_configured() {
        let err = client(None)
            .verify_webhook_signature_at(PAYLOAD, "t=1,v1=abcd", SIGNED_AT)
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn idempotency_key_is_stable_and_separates_parts() {
        let a = hashed_idempotency_key(&["maria@example.com", "2025-09-20T10:00:00Z"]);
        let b = hashed_idempotency_key(&["maria@example.com", "2025-09-20T10:00:00Z"]);
        let c = hashed_idempotency_key(&["maria@example.com2025-09-20T10:00:00Z", ""]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn trims_trailing_slash_from_api_base() {
        assert_eq!(
            client(None).url("customers"),
            "https://api.stripe.com/v1/customers"
        );
    }
}
