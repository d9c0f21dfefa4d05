use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use super::stripe_client::{
    OffSessionChargeRequest, PaymentIntentRequest, StripeClient, StripeEvent,
    StripePaymentIntent, StripePaymentMethod, StripeSetupIntent,
};

/// The Stripe operations the installment flows depend on.
#[async_trait]
#[automock]
pub trait StripeGateway: Send + Sync {
    async fn create_customer(
        &self,
        name: &str,
        email: &str,
        phone: Option<String>,
    ) -> Result<String>;

    async fn create_setup_intent(&self, customer_id: &str) -> Result<StripeSetupIntent>;

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<StripePaymentIntent>;

    async fn retrieve_payment_intent(&self, payment_intent_id: &str)
    -> Result<StripePaymentIntent>;

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<StripePaymentMethod>>;

    async fn charge_off_session(
        &self,
        request: OffSessionChargeRequest,
    ) -> Result<StripePaymentIntent>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<StripeEvent>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn create_customer(
        &self,
        name: &str,
        email: &str,
        phone: Option<String>,
    ) -> Result<String> {
        self.create_customer(name, email, phone.as_deref()).await
    }

    async fn create_setup_intent(&self, customer_id: &str) -> Result<StripeSetupIntent> {
        self.create_setup_intent(customer_id).await
    }

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<StripePaymentIntent> {
        self.create_payment_intent(&request).await
    }

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<StripePaymentIntent> {
        self.retrieve_payment_intent(payment_intent_id).await
    }

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<StripePaymentMethod>> {
        self.list_card_payment_methods(customer_id).await
    }

    async fn charge_off_session(
        &self,
        request: OffSessionChargeRequest,
    ) -> Result<StripePaymentIntent> {
        self.charge_off_session(&request).await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }
}
