//! Order model: one row per purchase attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Order status.
///
/// Transitions are forward-only: `pending -> {paid, failed}` and
/// `paid -> refunded`. Nothing re-enters `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => OrderStatus::Paid,
            "failed" => OrderStatus::Failed,
            "refunded" => OrderStatus::Refunded,
            _ => OrderStatus::Pending,
        }
    }

    /// Statuses an order may hold immediately before moving to `self`.
    pub fn allowed_prior_statuses(&self) -> &'static [&'static str] {
        match self {
            OrderStatus::Pending => &[],
            OrderStatus::Paid => &["pending"],
            OrderStatus::Failed => &["pending"],
            OrderStatus::Refunded => &["paid"],
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        target
            .allowed_prior_statuses()
            .contains(&self.as_str())
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Failed | OrderStatus::Refunded)
    }
}

/// Payment gateway identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
        }
    }

    /// Parse a provider selector from a request. `None` for unsupported values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stripe" => Some(PaymentProvider::Stripe),
            _ => None,
        }
    }
}

impl Default for PaymentProvider {
    fn default() -> Self {
        PaymentProvider::Stripe
    }
}

/// Order ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    /// Price snapshot at purchase time. Never recomputed from the product.
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub provider: String,
    /// Gateway checkout-session id, set once the gateway responds.
    pub gateway_ref: Option<String>,
    /// Gateway payment reference, set when the session completes.
    /// Refund events are resolved through this.
    pub payment_intent_ref: Option<String>,
    pub checkout_url: Option<String>,
    pub client_secret: Option<String>,
    pub idempotency_key: Option<String>,
    pub last_event_id: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> OrderStatus {
        OrderStatus::from_string(&self.status)
    }
}

/// Input for opening a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub idempotency_key: Option<String>,
}
