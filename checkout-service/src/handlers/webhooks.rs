//! Stripe webhook handler.
//!
//! Receives signed gateway callbacks and reconciles them against the
//! order ledger. The signature check runs before any other work: an
//! unauthenticated payload must not touch any order.

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::json;
use service_core::error::AppError;

use crate::{
    error::CheckoutError,
    services::metrics::record_webhook_event,
    services::{interpret_event, parse_webhook_event, ApplyOutcome, Interpretation},
    startup::AppState,
};

pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Handle a gateway webhook delivery.
///
/// Deliveries are at-least-once and unordered; everything past the
/// signature check is idempotent, and failures return a non-success
/// status so the gateway redelivers.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing Stripe-Signature header");
            record_webhook_event("unknown", "missing_signature");
            AppError::from(CheckoutError::MissingSignature)
        })?;

    let is_valid = state
        .stripe
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;

    if !is_valid {
        tracing::warn!("Invalid webhook signature, possible forgery");
        record_webhook_event("unknown", "invalid_signature");
        return Err(CheckoutError::InvalidSignature.into());
    }

    let event = parse_webhook_event(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        record_webhook_event("unknown", "malformed");
        AppError::from(CheckoutError::ProcessingFailed(e))
    })?;

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        "Processing webhook event"
    );

    let action = match interpret_event(&event) {
        Ok(Interpretation::Apply(action)) => action,
        Ok(Interpretation::Ignore) => {
            // Gateways send many event types; acknowledge the ones we do
            // not reconcile so they are not redelivered forever.
            tracing::debug!(event_type = %event.event_type, "Unhandled webhook event type");
            record_webhook_event(&event.event_type, "ignored");
            return Ok(Json(json!({ "status": "success" })));
        }
        Err(e) => {
            tracing::error!(event_id = %event.id, error = %e, "Failed to interpret webhook event");
            record_webhook_event(&event.event_type, "malformed");
            return Err(CheckoutError::ProcessingFailed(e).into());
        }
    };

    match state.db.apply_order_event(&action).await {
        Ok(ApplyOutcome::Applied {
            subscription_granted,
        }) => {
            tracing::info!(
                event_id = %event.id,
                target = action.target.as_str(),
                subscription_granted = subscription_granted,
                "Webhook event applied"
            );
            record_webhook_event(&event.event_type, "applied");
        }
        Ok(ApplyOutcome::NoOp { reason }) => {
            // Redelivery or stale event; success so the gateway stops.
            tracing::info!(event_id = %event.id, reason = reason, "Webhook event ignored idempotently");
            record_webhook_event(&event.event_type, "noop");
        }
        Err(e) => {
            tracing::error!(event_id = %event.id, error = %e, "Failed to apply webhook event");
            record_webhook_event(&event.event_type, "failed");
            return Err(CheckoutError::ProcessingFailed(anyhow::anyhow!(e)).into());
        }
    }

    Ok(Json(json!({ "status": "success" })))
}
