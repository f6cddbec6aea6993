//! Outbound card-payment gateway boundary.

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub payment_id: Uuid,
    pub learner_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub description: String,
}

/// Handle returned when an intent is opened. The client secret lets the
/// payer complete the charge out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Gateway-side state of an intent, collapsed to what reconciliation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Succeeded,
    Canceled,
    /// Still collecting a payment method, confirming, or processing.
    Pending,
}

/// Errors are normalized into `anyhow` by implementations and surface as
/// `ExternalGateway` to callers.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: &IntentRequest) -> anyhow::Result<OpenedIntent>;

    async fn retrieve_intent(&self, intent_id: &str) -> anyhow::Result<IntentStatus>;
}

/// Stripe-compatible REST client.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building gateway http client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn ensure_configured(&self) -> anyhow::Result<()> {
        if self.secret_key.is_empty() {
            return Err(anyhow!("payment gateway secret key is not configured"));
        }
        Ok(())
    }

    async fn read_intent(resp: reqwest::Response) -> anyhow::Result<IntentBody> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("gateway responded {status}: {body}"));
        }
        resp.json::<IntentBody>()
            .await
            .context("decoding gateway intent")
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, req), target = "gateway", fields(payment_id = %req.payment_id))]
    async fn create_intent(&self, req: &IntentRequest) -> anyhow::Result<OpenedIntent> {
        self.ensure_configured()?;

        let form = [
            ("amount", req.amount.to_string()),
            ("currency", req.currency.to_lowercase()),
            ("description", req.description.clone()),
            ("metadata[payment_id]", req.payment_id.to_string()),
            ("metadata[learner_id]", req.learner_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let resp = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", req.payment_id.to_string())
            .form(&form)
            .send()
            .await
            .context("creating payment intent")?;

        let body = Self::read_intent(resp).await?;
        let client_secret = body
            .client_secret
            .ok_or_else(|| anyhow!("gateway intent {} has no client secret", body.id))?;

        debug!(intent_id = %body.id, status = %body.status, "intent opened");
        Ok(OpenedIntent {
            intent_id: body.id,
            client_secret,
        })
    }

    #[instrument(skip(self), target = "gateway")]
    async fn retrieve_intent(&self, intent_id: &str) -> anyhow::Result<IntentStatus> {
        self.ensure_configured()?;

        let resp = self
            .client
            .get(format!("{}/v1/payment_intents/{intent_id}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("retrieving payment intent")?;

        let body = Self::read_intent(resp).await?;
        Ok(intent_status(&body.status))
    }
}

fn intent_status(raw: &str) -> IntentStatus {
    match raw {
        "succeeded" => IntentStatus::Succeeded,
        "canceled" => IntentStatus::Canceled,
        _ => IntentStatus::Pending,
    }
}
