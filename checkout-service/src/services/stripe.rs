//! Stripe gateway client.
//!
//! Implements checkout-session creation for payment initiation and
//! webhook signature verification for reconciliation callbacks.

use crate::config::StripeConfig;
use crate::models::{Order, Product};
use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

/// Events older than this relative to delivery are rejected outright.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe client for checkout sessions and webhook verification.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

/// Gateway-side checkout handle returned to the payer.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Checkout-session id, stored as the order's gateway reference.
    pub id: String,
    /// Hosted checkout URL.
    pub url: Option<String>,
    /// Client secret for embedded checkout.
    pub client_secret: Option<String>,
    /// Payment reference, present once the session has a payment attached.
    pub payment_intent: Option<String>,
    pub status: Option<String>,
}

/// Stripe API error response.
#[derive(Debug, Deserialize)]
pub struct StripeApiError {
    pub error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Stripe is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
            && !self.config.webhook_secret.expose_secret().is_empty()
    }

    /// Create a checkout session for an order.
    ///
    /// Single attempt, bounded by the configured request timeout. Any
    /// failure here is surfaced to the caller, which marks the order
    /// `failed`; there is no automatic retry.
    pub async fn create_checkout_session(
        &self,
        order: &Order,
        product: &Product,
    ) -> Result<CheckoutSession> {
        if !self.is_configured() {
            return Err(anyhow!("Stripe credentials not configured"));
        }

        let mode = if product.billing_interval().is_recurring() {
            "subscription"
        } else {
            "payment"
        };

        let amount = order.amount_cents.to_string();
        let order_ref = order.order_id.to_string();
        let form: Vec<(&str, &str)> = vec![
            ("mode", mode),
            ("client_reference_id", &order_ref),
            ("success_url", &self.config.success_url),
            ("cancel_url", &self.config.cancel_url),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", &order.currency),
            ("line_items[0][price_data][unit_amount]", &amount),
            ("line_items[0][price_data][product_data][name]", &product.name),
        ];

        let url = format!("{}/checkout/sessions", self.config.api_base_url);

        let timer = crate::services::metrics::GATEWAY_REQUEST_DURATION
            .with_label_values(&["create_checkout_session"])
            .start_timer();

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        timer.observe_duration();

        tracing::debug!(status = %status, "Stripe create_checkout_session response");

        if status.is_success() {
            let session: CheckoutSession = serde_json::from_str(&body)?;
            tracing::info!(
                session_id = %session.id,
                order_id = %order.order_id,
                mode = mode,
                "Stripe checkout session created"
            );
            Ok(session)
        } else {
            let error: StripeApiError =
                serde_json::from_str(&body).unwrap_or_else(|_| StripeApiError {
                    error: StripeErrorDetail {
                        error_type: "unknown".to_string(),
                        code: None,
                        message: Some(body.clone()),
                    },
                });
            tracing::error!(
                error_type = %error.error.error_type,
                code = ?error.error.code,
                message = ?error.error.message,
                "Stripe checkout session creation failed"
            );
            Err(anyhow!(
                "Stripe error: {} - {}",
                error.error.error_type,
                error.error.message.unwrap_or_default()
            ))
        }
    }

    /// Verify a webhook signature header.
    ///
    /// The header carries `t=<unix ts>,v1=<hex sig>` where the signature
    /// is `HMAC-SHA256("{t}.{body}", webhook_secret)`. The timestamp must
    /// be within the tolerance window to blunt replay of captured
    /// deliveries.
    pub fn verify_webhook_signature(&self, payload: &str, signature_header: &str) -> Result<bool> {
        let (timestamp, candidates) = match parse_signature_header(signature_header) {
            Some(parsed) => parsed,
            None => return Ok(false),
        };

        let age = (chrono::Utc::now().timestamp() - timestamp).abs();
        if age > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(age_secs = age, "Webhook signature timestamp outside tolerance");
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        let expected = self.compute_signature(
            &signed_payload,
            self.config.webhook_secret.expose_secret(),
        )?;

        let is_valid = candidates.iter().any(|candidate| {
            candidate.as_bytes().ct_eq(expected.as_bytes()).into()
        });

        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }

    /// Compute HMAC-SHA256 signature, hex encoded.
    fn compute_signature(&self, payload: &str, secret: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| anyhow!("Invalid key length"))?;
        mac.update(payload.as_bytes());
        let result = mac.finalize();
        Ok(hex::encode(result.into_bytes()))
    }
}

/// Parse `t=<ts>,v1=<sig>[,v1=<sig>...]`. Returns `None` when either
/// part is missing or malformed.
fn parse_signature_header(header: &str) -> Option<(i64, Vec<String>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            // Unknown schemes (e.g. v0 test signatures) are ignored.
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(t), false) => Some((t, signatures)),
        _ => None,
    }
}
