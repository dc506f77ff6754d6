//! Webhook event parsing and interpretation.
//!
//! Maps gateway events onto an order lookup and a target status. The
//! interpreter is pure; applying the result (idempotently) is the
//! database layer's job.

use crate::models::OrderStatus;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A gateway webhook event.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    /// Gateway event id, persisted on the order as the ordering guard.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix timestamp of event emission at the gateway.
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

/// The entity carried by the event. Only the fields the interpreter
/// needs; everything else in the payload is ignored.
#[derive(Debug, Deserialize)]
pub struct EventObject {
    pub id: Option<String>,
    /// Entity type tag, e.g. "checkout.session" or "charge".
    pub object: Option<String>,
    pub payment_intent: Option<String>,
    pub status: Option<String>,
}

/// How to find the order an event applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderLookup {
    /// Checkout-session events reference the session id we stored at
    /// order creation.
    ByCheckoutSession(String),
    /// Refund events only carry the payment reference, captured when
    /// the session completed.
    ByPaymentIntent(String),
}

/// A fully interpreted event, ready to apply.
#[derive(Debug)]
pub struct OrderEventAction {
    pub lookup: OrderLookup,
    pub target: OrderStatus,
    pub event_id: String,
    pub event_created: DateTime<Utc>,
    /// Attached to the order on the `paid` transition.
    pub payment_intent: Option<String>,
}

/// Outcome of interpreting an event.
#[derive(Debug)]
pub enum Interpretation {
    Apply(OrderEventAction),
    /// Event types this service does not reconcile. Acknowledged so the
    /// gateway stops redelivering them.
    Ignore,
}

pub fn parse_webhook_event(body: &str) -> Result<WebhookEvent> {
    let event: WebhookEvent = serde_json::from_str(body)?;
    Ok(event)
}

/// Map an event to the order transition it implies.
///
/// Returns an error for events we do handle but whose payload is
/// missing the reference needed to locate the order.
pub fn interpret_event(event: &WebhookEvent) -> Result<Interpretation> {
    let created = DateTime::<Utc>::from_timestamp(event.created, 0)
        .ok_or_else(|| anyhow!("Event has invalid created timestamp: {}", event.created))?;

    let action = match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            OrderEventAction {
                lookup: session_lookup(event)?,
                target: OrderStatus::Paid,
                event_id: event.id.clone(),
                event_created: created,
                payment_intent: event.data.object.payment_intent.clone(),
            }
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => OrderEventAction {
            lookup: session_lookup(event)?,
            target: OrderStatus::Failed,
            event_id: event.id.clone(),
            event_created: created,
            payment_intent: None,
        },
        "charge.refunded" => {
            let payment_intent = event
                .data
                .object
                .payment_intent
                .clone()
                .ok_or_else(|| anyhow!("Refund event {} has no payment_intent", event.id))?;
            OrderEventAction {
                lookup: OrderLookup::ByPaymentIntent(payment_intent),
                target: OrderStatus::Refunded,
                event_id: event.id.clone(),
                event_created: created,
                payment_intent: None,
            }
        }
        _ => return Ok(Interpretation::Ignore),
    };

    Ok(Interpretation::Apply(action))
}

fn session_lookup(event: &WebhookEvent) -> Result<OrderLookup> {
    let session_id = event
        .data
        .object
        .id
        .clone()
        .ok_or_else(|| anyhow!("Session event {} has no object id", event.id))?;
    Ok(OrderLookup::ByCheckoutSession(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, object: serde_json::Value) -> WebhookEvent {
        parse_webhook_event(
            &serde_json::json!({
                "id": "evt_1",
                "type": event_type,
                "created": 1_700_000_000,
                "data": { "object": object }
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn completed_session_maps_to_paid() {
        let event = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_123",
                "object": "checkout.session",
                "payment_intent": "pi_456",
                "status": "complete"
            }),
        );

        match interpret_event(&event).unwrap() {
            Interpretation::Apply(action) => {
                assert_eq!(action.lookup, OrderLookup::ByCheckoutSession("cs_123".into()));
                assert_eq!(action.target, OrderStatus::Paid);
                assert_eq!(action.payment_intent.as_deref(), Some("pi_456"));
            }
            other => panic!("expected Apply, got {:?}", other),
        }
    }

    #[test]
    fn expired_session_maps_to_failed() {
        let event = event(
            "checkout.session.expired",
            serde_json::json!({ "id": "cs_123", "object": "checkout.session" }),
        );

        match interpret_event(&event).unwrap() {
            Interpretation::Apply(action) => {
                assert_eq!(action.target, OrderStatus::Failed);
                assert!(action.payment_intent.is_none());
            }
            other => panic!("expected Apply, got {:?}", other),
        }
    }

    #[test]
    fn refund_maps_to_refunded_via_payment_intent() {
        let event = event(
            "charge.refunded",
            serde_json::json!({ "id": "ch_1", "object": "charge", "payment_intent": "pi_456" }),
        );

        match interpret_event(&event).unwrap() {
            Interpretation::Apply(action) => {
                assert_eq!(action.lookup, OrderLookup::ByPaymentIntent("pi_456".into()));
                assert_eq!(action.target, OrderStatus::Refunded);
            }
            other => panic!("expected Apply, got {:?}", other),
        }
    }

    #[test]
    fn unknown_event_is_ignored() {
        let event = event(
            "invoice.finalized",
            serde_json::json!({ "id": "in_1", "object": "invoice" }),
        );
        assert!(matches!(
            interpret_event(&event).unwrap(),
            Interpretation::Ignore
        ));
    }

    #[test]
    fn session_event_without_object_id_is_an_error() {
        let event = event(
            "checkout.session.completed",
            serde_json::json!({ "object": "checkout.session" }),
        );
        assert!(interpret_event(&event).is_err());
    }

    #[test]
    fn refund_without_payment_intent_is_an_error() {
        let event = event(
            "charge.refunded",
            serde_json::json!({ "id": "ch_1", "object": "charge" }),
        );
        assert!(interpret_event(&event).is_err());
    }
}
